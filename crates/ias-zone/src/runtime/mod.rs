//! Zone runtime: runs a ZoneServer as a live event loop.
//!
//! The runtime owns the server (and through it the attribute store) and the
//! transport. It exposes a channel-based API so the application never
//! touches timers, completions or frames.
mod executor;
mod r#loop;
mod timers;
pub mod transport;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::effect::ZoneEvent;
use crate::error::ZoneError;
use crate::network::NetworkDownReason;
use crate::queue::QueueEntry;
use crate::retry::RetryPolicy;
use crate::server::{Diagnostics, ZoneServer};
use crate::stats::DeliveryStats;
use crate::store::AttributeStore;
use crate::types::{EnrollResponseCode, EnrollmentMode, Endpoint, IeeeAddress, ZoneId, ZoneStatus};

pub use transport::Transport;

// ── Configuration ─────────────────────────────────────────────────────

/// Channel sizing for the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Command channel capacity (app → runtime).
    pub command_buffer: usize,
    /// Event channel capacity (runtime → app). Events are dropped, not
    /// awaited, when it is full.
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            event_buffer: 256,
        }
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the runtime event loop.
pub enum ZoneCommand {
    UpdateZoneStatus {
        endpoint: Endpoint,
        status: ZoneStatus,
        elapsed_secs: u32,
        reply: oneshot::Sender<Result<(), ZoneError>>,
    },
    SetEnrollmentMode {
        endpoint: Endpoint,
        mode: u8,
        reply: oneshot::Sender<Result<EnrollmentMode, ZoneError>>,
    },
    ConfigureRetryPolicy {
        policy: RetryPolicy,
        reply: oneshot::Sender<Result<(), ZoneError>>,
    },
    DiscardQueue,
    DumpQueue {
        reply: oneshot::Sender<Vec<QueueEntry>>,
    },
    IsEnrolled {
        endpoint: Endpoint,
        reply: oneshot::Sender<Result<bool, ZoneError>>,
    },
    Diagnostics {
        reply: oneshot::Sender<Diagnostics>,
    },
    /// Enroll response already decoded by the caller.
    EnrollResponse {
        endpoint: Endpoint,
        code: EnrollResponseCode,
        zone_id: ZoneId,
        reply: oneshot::Sender<Result<(), ZoneError>>,
    },
    /// Raw ZCL frame received from the CIE.
    IncomingFrame {
        endpoint: Endpoint,
        frame: Bytes,
        reply: oneshot::Sender<Result<(), ZoneError>>,
    },
    CieAddressWritten {
        endpoint: Endpoint,
        address: IeeeAddress,
        reply: oneshot::Sender<Result<(), ZoneError>>,
    },
    NetworkUp,
    NetworkDown {
        reason: NetworkDownReason,
        reply: oneshot::Sender<Result<(), ZoneError>>,
    },
    /// Graceful shutdown.
    Shutdown,
}

// ── ZoneHandle (app-facing API) ──────────────────────────────────────

/// Handle to communicate with a running ZoneRuntime.
///
/// Cheap to clone. Every method fails with [`ZoneError::RuntimeStopped`]
/// once the loop is gone.
#[derive(Clone)]
pub struct ZoneHandle {
    cmd_tx: mpsc::Sender<ZoneCommand>,
}

impl ZoneHandle {
    /// Record a status change and queue it for delivery.
    ///
    /// Returns once the attribute is written and the entry queued (or an
    /// enroll request scheduled). Delivery itself is reported through events.
    pub async fn update_zone_status(
        &self,
        endpoint: Endpoint,
        status: ZoneStatus,
        elapsed_secs: u32,
    ) -> Result<(), ZoneError> {
        self.request(|reply| ZoneCommand::UpdateZoneStatus {
            endpoint,
            status,
            elapsed_secs,
            reply,
        })
        .await?
    }

    pub async fn set_enrollment_mode(
        &self,
        endpoint: Endpoint,
        mode: u8,
    ) -> Result<EnrollmentMode, ZoneError> {
        self.request(|reply| ZoneCommand::SetEnrollmentMode {
            endpoint,
            mode,
            reply,
        })
        .await?
    }

    pub async fn configure_retry_policy(&self, policy: RetryPolicy) -> Result<(), ZoneError> {
        self.request(|reply| ZoneCommand::ConfigureRetryPolicy { policy, reply })
            .await?
    }

    pub async fn discard_queue(&self) -> Result<(), ZoneError> {
        self.send(ZoneCommand::DiscardQueue).await
    }

    pub async fn dump_queue(&self) -> Result<Vec<QueueEntry>, ZoneError> {
        self.request(|reply| ZoneCommand::DumpQueue { reply }).await
    }

    pub async fn is_enrolled(&self, endpoint: Endpoint) -> Result<bool, ZoneError> {
        self.request(|reply| ZoneCommand::IsEnrolled { endpoint, reply })
            .await?
    }

    pub async fn diagnostics(&self) -> Result<Diagnostics, ZoneError> {
        self.request(|reply| ZoneCommand::Diagnostics { reply }).await
    }

    pub async fn enroll_response(
        &self,
        endpoint: Endpoint,
        code: EnrollResponseCode,
        zone_id: ZoneId,
    ) -> Result<(), ZoneError> {
        self.request(|reply| ZoneCommand::EnrollResponse {
            endpoint,
            code,
            zone_id,
            reply,
        })
        .await?
    }

    /// Feed a frame received from the CIE (Zone Enroll Response).
    pub async fn incoming_frame(&self, endpoint: Endpoint, frame: Bytes) -> Result<(), ZoneError> {
        self.request(|reply| ZoneCommand::IncomingFrame {
            endpoint,
            frame,
            reply,
        })
        .await?
    }

    pub async fn cie_address_written(
        &self,
        endpoint: Endpoint,
        address: IeeeAddress,
    ) -> Result<(), ZoneError> {
        self.request(|reply| ZoneCommand::CieAddressWritten {
            endpoint,
            address,
            reply,
        })
        .await?
    }

    pub async fn network_up(&self) -> Result<(), ZoneError> {
        self.send(ZoneCommand::NetworkUp).await
    }

    pub async fn network_down(&self, reason: NetworkDownReason) -> Result<(), ZoneError> {
        self.request(|reply| ZoneCommand::NetworkDown { reason, reply })
            .await?
    }

    /// Graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ZoneCommand::Shutdown).await;
    }

    async fn send(&self, cmd: ZoneCommand) -> Result<(), ZoneError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| ZoneError::RuntimeStopped)
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> ZoneCommand,
    ) -> Result<R, ZoneError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| ZoneError::RuntimeStopped)
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// Channels returned to the application when the runtime starts.
pub struct RuntimeChannels {
    /// Handle to send commands to the runtime.
    pub handle: ZoneHandle,
    /// Delivery and enrollment events.
    pub events: mpsc::Receiver<ZoneEvent>,
    /// Live delivery counters.
    pub stats: Arc<DeliveryStats>,
    /// The event loop task; finishes after shutdown.
    pub task: JoinHandle<()>,
}

// ── ZoneRuntime ──────────────────────────────────────────────────────

/// The zone runtime: spawn it and communicate via channels.
pub struct ZoneRuntime;

impl ZoneRuntime {
    /// Start the event loop as a tokio task.
    ///
    /// Takes ownership of the server and the transport.
    pub fn spawn<S, T>(server: ZoneServer<S>, transport: T, config: RuntimeConfig) -> RuntimeChannels
    where
        S: AttributeStore + Send + 'static,
        T: Transport,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ZoneCommand>(config.command_buffer);
        let (event_tx, event_rx) = mpsc::channel::<ZoneEvent>(config.event_buffer);
        let stats = server.stats();

        let task = tokio::spawn(r#loop::zone_loop(server, transport, cmd_rx, event_tx));

        RuntimeChannels {
            handle: ZoneHandle { cmd_tx },
            events: event_rx,
            stats,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::transport::mock::{MockOutcome, MockTransport};
    use super::*;
    use crate::config::ZoneConfig;
    use crate::error::SendError;
    use crate::frame::StatusChangeNotification;
    use crate::store::MemoryStore;
    use crate::types::SendResult;

    const EP: Endpoint = Endpoint(1);

    async fn start(transport: MockTransport) -> RuntimeChannels {
        let server = ZoneServer::new(ZoneConfig::new(), MemoryStore::new()).unwrap();
        let channels = ZoneRuntime::spawn(server, transport, RuntimeConfig::default());
        channels
            .handle
            .enroll_response(EP, EnrollResponseCode::Success, ZoneId(4))
            .await
            .unwrap();
        channels
    }

    async fn next_event(events: &mut mpsc::Receiver<ZoneEvent>) -> ZoneEvent {
        tokio::time::timeout(Duration::from_secs(600), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Skip enrollment noise.
    async fn next_delivery_event(events: &mut mpsc::Receiver<ZoneEvent>) -> ZoneEvent {
        loop {
            match next_event(events).await {
                ZoneEvent::Enrolled { .. } => continue,
                other => return other,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_update_sends_frame_and_emits_event() {
        let transport = MockTransport::new();
        let mut ch = start(transport.clone()).await;

        ch.handle
            .update_zone_status(EP, ZoneStatus(ZoneStatus::ALARM1), 0)
            .await
            .unwrap();
        assert_eq!(
            next_delivery_event(&mut ch.events).await,
            ZoneEvent::Delivered {
                endpoint: EP,
                status: ZoneStatus(ZoneStatus::ALARM1),
                attempts: 1,
            }
        );

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let (_, notification) = StatusChangeNotification::decode(&sent[0].1).unwrap();
        assert_eq!(notification.zone_id, ZoneId(4));
        assert!(ch.handle.dump_queue().await.unwrap().is_empty());
        assert_eq!(ch.stats.delivered.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_ack_retries_after_backoff() {
        let transport = MockTransport::new();
        transport.push_outcome(MockOutcome::Complete(SendResult::NoAckReceived));
        let mut ch = start(transport.clone()).await;

        let before = tokio::time::Instant::now();
        ch.handle.update_zone_status(EP, ZoneStatus(1), 0).await.unwrap();
        assert!(matches!(
            next_delivery_event(&mut ch.events).await,
            ZoneEvent::RetryScheduled {
                attempt: 1,
                backoff_secs: 3,
                ..
            }
        ));
        assert!(matches!(
            next_delivery_event(&mut ch.events).await,
            ZoneEvent::Delivered { attempts: 2, .. }
        ));
        assert!(before.elapsed() >= Duration::from_secs(3));
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_send_parks_until_network_up() {
        let transport = MockTransport::new();
        transport.push_outcome(MockOutcome::Refuse(SendError::NoRoute));
        let mut ch = start(transport.clone()).await;

        ch.handle.update_zone_status(EP, ZoneStatus(1), 0).await.unwrap();
        assert!(matches!(
            next_delivery_event(&mut ch.events).await,
            ZoneEvent::Parked {
                reason: crate::ParkReason::LocalSendFailure,
                ..
            }
        ));
        assert_eq!(ch.handle.dump_queue().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        ch.handle.network_up().await.unwrap();
        assert!(matches!(
            next_delivery_event(&mut ch.events).await,
            ZoneEvent::Delivered { .. }
        ));
        assert_eq!(ch.stats.local_failures.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn held_completion_keeps_single_attempt_in_flight() {
        let transport = MockTransport::new();
        transport.push_outcome(MockOutcome::Hold);
        let mut ch = start(transport.clone()).await;

        ch.handle.update_zone_status(EP, ZoneStatus(1), 0).await.unwrap();
        ch.handle.update_zone_status(EP, ZoneStatus(2), 0).await.unwrap();
        let diag = ch.handle.diagnostics().await.unwrap();
        assert_eq!(diag.queue.len(), 2);
        assert_eq!(transport.sent().len(), 1);

        assert!(transport.complete_held(SendResult::Delivered));
        assert!(matches!(
            next_delivery_event(&mut ch.events).await,
            ZoneEvent::Delivered { status: ZoneStatus(1), .. }
        ));
        assert!(matches!(
            next_delivery_event(&mut ch.events).await,
            ZoneEvent::Delivered { status: ZoneStatus(2), .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_fails_after_shutdown() {
        let ch = start(MockTransport::new()).await;
        ch.handle.shutdown().await;
        ch.task.await.unwrap();
        assert!(matches!(
            ch.handle.dump_queue().await,
            Err(ZoneError::RuntimeStopped)
        ));
    }
}

//! Effect executor: the only place that touches I/O.
//!
//! Takes the ZoneEffects returned by the ZoneServer and executes them:
//! - SendStatusChange -> encode + transport, completion tracked as in-flight
//! - SendEnrollRequest -> encode + transport, completion ignored
//! - ArmTimer / CancelTimer -> TimerSet
//! - Emit -> event_tx.try_send()

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::effect::{AttemptId, ZoneEffect, ZoneEvent};
use crate::error::SendError;
use crate::types::SendResult;

use super::timers::TimerSet;
use super::transport::Transport;

/// The single status notification awaiting its completion.
pub(super) struct InFlight {
    pub(super) attempt: AttemptId,
    pub(super) rx: oneshot::Receiver<SendResult>,
}

/// Mutable I/O state owned by the event loop.
pub(super) struct Io<T> {
    pub(super) transport: T,
    pub(super) timers: TimerSet,
    pub(super) in_flight: Option<InFlight>,
    pub(super) event_tx: mpsc::Sender<ZoneEvent>,
    seq: u8,
}

impl<T: Transport> Io<T> {
    pub(super) fn new(transport: T, event_tx: mpsc::Sender<ZoneEvent>) -> Self {
        Self {
            transport,
            timers: TimerSet::new(),
            in_flight: None,
            event_tx,
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> u8 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }
}

/// Execute a list of effects. Returns the status sends the transport
/// refused, which the caller feeds back to the server.
pub(super) async fn execute_effects<T: Transport>(
    effects: Vec<ZoneEffect>,
    io: &mut Io<T>,
) -> Vec<(AttemptId, SendError)> {
    let mut refused = Vec::new();
    for effect in effects {
        match effect {
            ZoneEffect::SendStatusChange {
                attempt,
                endpoint,
                notification,
            } => {
                let frame = notification.encode(io.next_seq());
                match io.transport.send_to_bound_peer(endpoint, frame).await {
                    Ok(rx) => {
                        if let Some(previous) = io.in_flight.replace(InFlight { attempt, rx }) {
                            // Cannot happen while the server keeps one attempt in flight.
                            tracing::warn!(
                                attempt = previous.attempt.0,
                                "executor: replaced an unfinished attempt"
                            );
                        }
                    }
                    Err(e) => refused.push((attempt, e)),
                }
            }
            ZoneEffect::SendEnrollRequest { endpoint, request } => {
                let frame = request.encode(io.next_seq());
                if let Err(e) = io.transport.send_to_bound_peer(endpoint, frame).await {
                    tracing::warn!(%endpoint, "executor: enroll request not sent: {e}");
                }
            }
            ZoneEffect::ArmTimer { timer, delay } => {
                io.timers.arm(timer, Instant::now() + delay);
            }
            ZoneEffect::CancelTimer(timer) => {
                io.timers.cancel(timer);
            }
            ZoneEffect::Emit(event) => {
                // try_send: never block the loop on a slow consumer
                if let Err(e) = io.event_tx.try_send(event) {
                    tracing::debug!("executor: event dropped: {e}");
                }
            }
        }
    }
    refused
}

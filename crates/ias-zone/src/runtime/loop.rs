//! The zone runtime event loop.
//!
//! A single async task that owns the ZoneServer and multiplexes over
//! application commands, the in-flight send completion, and timers. Each
//! input is processed to completion (effects executed, local send failures
//! fed back) before the next one is picked up.
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::effect::{AttemptId, ZoneEffect, ZoneEvent};
use crate::server::ZoneServer;
use crate::store::AttributeStore;
use crate::types::SendResult;

use super::executor::{execute_effects, InFlight, Io};
use super::timers::sleep_until_next;
use super::transport::Transport;
use super::ZoneCommand;

/// Monotonic ms since the loop started.
struct Clock {
    start: Instant,
}

impl Clock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Main event loop: owns all zone state.
pub(super) async fn zone_loop<S, T>(
    mut server: ZoneServer<S>,
    transport: T,
    mut cmd_rx: mpsc::Receiver<ZoneCommand>,
    event_tx: mpsc::Sender<ZoneEvent>,
) where
    S: AttributeStore + Send + 'static,
    T: Transport,
{
    let clock = Clock {
        start: Instant::now(),
    };
    let mut io = Io::new(transport, event_tx);
    tracing::info!("runtime: zone loop started");

    loop {
        let deadline = io.timers.next_deadline();
        let effects = tokio::select! {
            // ── 1. Application commands ─────────────────────────
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::info!("runtime: all handles dropped, stopping");
                    break;
                };
                match handle_command(&mut server, cmd, clock.now_ms()) {
                    Some(effects) => effects,
                    None => {
                        tracing::info!("runtime: shutdown requested");
                        break;
                    }
                }
            }

            // ── 2. Completion of the in-flight send ─────────────
            (attempt, result) = next_completion(&mut io.in_flight) => {
                io.in_flight = None;
                server.on_send_complete(attempt, result, clock.now_ms())
            }

            // ── 3. Timers ───────────────────────────────────────
            _ = sleep_until_next(deadline) => {
                let now = clock.now_ms();
                let mut effects = Vec::new();
                for timer in io.timers.pop_expired(Instant::now()) {
                    effects.extend(server.on_timer(timer, now));
                }
                effects
            }
        };

        apply(&mut server, &mut io, &clock, effects).await;
    }
}

/// Execute effects, feeding refused sends back until nothing is left.
async fn apply<S, T>(server: &mut ZoneServer<S>, io: &mut Io<T>, clock: &Clock, effects: Vec<ZoneEffect>)
where
    S: AttributeStore,
    T: Transport,
{
    let mut pending = effects;
    while !pending.is_empty() {
        let refused = execute_effects(pending, io).await;
        let now = clock.now_ms();
        pending = refused
            .iter()
            .flat_map(|(attempt, error)| server.on_local_send_failure(*attempt, error, now))
            .collect();
    }
}

/// Resolve with the in-flight outcome, or never if nothing is in flight.
async fn next_completion(in_flight: &mut Option<InFlight>) -> (AttemptId, SendResult) {
    match in_flight {
        Some(flight) => {
            let result = (&mut flight.rx).await.unwrap_or(SendResult::OtherFailure);
            (flight.attempt, result)
        }
        None => std::future::pending().await,
    }
}

/// Dispatch one command. `None` means stop.
fn handle_command<S: AttributeStore>(
    server: &mut ZoneServer<S>,
    cmd: ZoneCommand,
    now_ms: u64,
) -> Option<Vec<ZoneEffect>> {
    let effects = match cmd {
        ZoneCommand::UpdateZoneStatus {
            endpoint,
            status,
            elapsed_secs,
            reply,
        } => match server.update_zone_status(endpoint, status, elapsed_secs, now_ms) {
            Ok(effects) => {
                let _ = reply.send(Ok(()));
                effects
            }
            Err(e) => {
                tracing::warn!(%endpoint, "runtime: status update failed: {e}");
                let _ = reply.send(Err(e));
                Vec::new()
            }
        },
        ZoneCommand::SetEnrollmentMode {
            endpoint,
            mode,
            reply,
        } => {
            let _ = reply.send(server.set_enrollment_mode(endpoint, mode));
            Vec::new()
        }
        ZoneCommand::ConfigureRetryPolicy { policy, reply } => {
            let _ = reply.send(server.configure_retry_policy(policy));
            Vec::new()
        }
        ZoneCommand::DiscardQueue => server.discard_queue(),
        ZoneCommand::DumpQueue { reply } => {
            let _ = reply.send(server.dump_queue());
            Vec::new()
        }
        ZoneCommand::IsEnrolled { endpoint, reply } => {
            let _ = reply.send(server.is_enrolled(endpoint));
            Vec::new()
        }
        ZoneCommand::Diagnostics { reply } => {
            let _ = reply.send(server.diagnostics());
            Vec::new()
        }
        ZoneCommand::EnrollResponse {
            endpoint,
            code,
            zone_id,
            reply,
        } => split(server.on_enroll_response(endpoint, code, zone_id, now_ms), reply),
        ZoneCommand::IncomingFrame {
            endpoint,
            frame,
            reply,
        } => split(server.on_incoming_frame(endpoint, &frame, now_ms), reply),
        ZoneCommand::CieAddressWritten {
            endpoint,
            address,
            reply,
        } => split(server.on_cie_address_written(endpoint, address), reply),
        ZoneCommand::NetworkUp => server.on_network_up(now_ms),
        ZoneCommand::NetworkDown { reason, reply } => split(server.on_network_down(reason), reply),
        ZoneCommand::Shutdown => return None,
    };
    Some(effects)
}

/// Reply with the outcome, keep the effects.
fn split(
    result: Result<Vec<ZoneEffect>, crate::ZoneError>,
    reply: tokio::sync::oneshot::Sender<Result<(), crate::ZoneError>>,
) -> Vec<ZoneEffect> {
    match result {
        Ok(effects) => {
            let _ = reply.send(Ok(()));
            effects
        }
        Err(e) => {
            let _ = reply.send(Err(e));
            Vec::new()
        }
    }
}

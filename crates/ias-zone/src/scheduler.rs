//! Delivery scheduler: drives the queue head through send / retry / drop.
//!
//! Pure state machine: every input returns the effects to execute and
//! nothing here touches I/O. At most one attempt is in flight, and only the
//! queue head is ever attempted.
//!
//! ```text
//!          send                  Delivered / exhausted
//!   Idle ────────▶ AttemptInFlight ─────────────────────▶ Idle (next head)
//!    ▲                  │
//!    │ timer            │ NoAck / OtherFailure
//!    └─ WaitingBackoff ◀┘
//! ```
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::effect::{AttemptId, ParkReason, TimerHandle, TimerKey, ZoneEffect, ZoneEvent};
use crate::error::{SendError, ZoneError};
use crate::frame::{quarter_seconds, StatusChangeNotification};
use crate::queue::{QueueEntry, SlotResult, StatusQueue};
use crate::retry::{RetryController, RetryPolicy};
use crate::stats::DeliveryStats;
use crate::types::{Endpoint, SendResult, ZoneId};

/// What the scheduler needs to know about the outside world before it
/// sends the head.
pub trait DeliveryGate {
    fn network_up(&self) -> bool;

    /// Zone id of `endpoint` if it is currently enrolled.
    fn enrolled_zone(&self, endpoint: Endpoint) -> Option<ZoneId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    AttemptInFlight { attempt: AttemptId },
    WaitingBackoff { timer: TimerHandle },
}

pub struct DeliveryScheduler {
    queue: StatusQueue,
    retry: RetryController,
    state: SchedulerState,
    min_spacing_ms: u64,
    /// When the current head was first handed to the transport.
    head_first_attempt_ms: Option<u64>,
    parked: Option<ParkReason>,
    /// The in-flight attempt's entry was discarded; its completion must not
    /// touch the queue.
    orphaned: bool,
    next_attempt: u64,
    timer_generation: u64,
    stats: Arc<DeliveryStats>,
}

impl DeliveryScheduler {
    pub fn new(
        queue_capacity: usize,
        policy: RetryPolicy,
        min_spacing_ms: u64,
        stats: Arc<DeliveryStats>,
    ) -> Result<Self, ZoneError> {
        Ok(Self {
            queue: StatusQueue::new(queue_capacity)?,
            retry: RetryController::new(policy)?,
            state: SchedulerState::Idle,
            min_spacing_ms,
            head_first_attempt_ms: None,
            parked: None,
            orphaned: false,
            next_attempt: 1,
            timer_generation: 0,
            stats,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn parked(&self) -> Option<ParkReason> {
        self.parked
    }

    pub fn queue(&self) -> &StatusQueue {
        &self.queue
    }

    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    pub fn configure_retry(&mut self, policy: RetryPolicy) -> Result<(), ZoneError> {
        self.retry.configure(policy)
    }

    // ── Inputs ──────────────────────────────────────────────────────────

    /// Queue a status change. Starts delivery only if the scheduler is idle;
    /// a waiting or in-flight head is left alone.
    pub fn enqueue<G: DeliveryGate>(
        &mut self,
        entry: QueueEntry,
        now_ms: u64,
        gate: &G,
    ) -> Vec<ZoneEffect> {
        let was_empty = self.queue.is_empty();
        let mut effects = Vec::new();

        match self.queue.enqueue(entry) {
            SlotResult::Appended { len } => {
                tracing::debug!(endpoint = %entry.endpoint, status = %entry.status, len, "queue: appended");
            }
            SlotResult::Overwrote { replaced } => {
                self.stats.overwritten.inc();
                tracing::warn!(
                    endpoint = %replaced.endpoint,
                    status = %replaced.status,
                    "queue: full, overwrote newest entry"
                );
                effects.push(ZoneEffect::Emit(ZoneEvent::Overwritten { replaced }));
            }
        }
        self.stats.queue_depth.set(self.queue.len() as u64);

        if was_empty {
            self.retry.reset();
        }
        effects.extend(self.pump(now_ms, gate));
        effects
    }

    /// Try to start an attempt on the head. No-op unless idle.
    pub fn pump<G: DeliveryGate>(&mut self, now_ms: u64, gate: &G) -> Vec<ZoneEffect> {
        if self.state != SchedulerState::Idle {
            return Vec::new();
        }
        let Some(head) = self.queue.peek_head().copied() else {
            self.parked = None;
            return Vec::new();
        };

        if !gate.network_up() {
            return self.park(head.endpoint, ParkReason::NetworkUnavailable);
        }
        let Some(zone_id) = gate.enrolled_zone(head.endpoint) else {
            return self.park(head.endpoint, ParkReason::NotEnrolled);
        };
        self.parked = None;

        if let Some(first) = self.head_first_attempt_ms {
            let elapsed = now_ms.saturating_sub(first);
            if elapsed < self.min_spacing_ms {
                let remaining = self.min_spacing_ms - elapsed;
                let timer = self.next_timer();
                self.state = SchedulerState::WaitingBackoff { timer };
                tracing::debug!(endpoint = %head.endpoint, "scheduler: spacing floor, waiting {remaining} ms");
                return vec![ZoneEffect::ArmTimer {
                    timer,
                    delay: Duration::from_millis(remaining),
                }];
            }
        }

        self.head_first_attempt_ms.get_or_insert(now_ms);
        let attempt = AttemptId(self.next_attempt);
        self.next_attempt += 1;
        self.state = SchedulerState::AttemptInFlight { attempt };
        self.stats.attempts.inc();

        let notification = StatusChangeNotification {
            zone_status: head.status,
            extended_status: 0,
            zone_id,
            delay_qs: quarter_seconds(now_ms.saturating_sub(head.occurred_at_ms)),
        };
        tracing::debug!(
            endpoint = %head.endpoint,
            status = %head.status,
            attempt = attempt.0,
            retry = self.retry.current_attempt(),
            "scheduler: sending head"
        );
        vec![ZoneEffect::SendStatusChange {
            attempt,
            endpoint: head.endpoint,
            notification,
        }]
    }

    /// Transport reported the outcome of an accepted send.
    pub fn on_send_complete<G: DeliveryGate>(
        &mut self,
        attempt: AttemptId,
        result: SendResult,
        now_ms: u64,
        gate: &G,
    ) -> Vec<ZoneEffect> {
        if !self.take_in_flight(attempt) {
            tracing::debug!(attempt = attempt.0, "scheduler: ignoring stale completion");
            return Vec::new();
        }
        if std::mem::take(&mut self.orphaned) {
            tracing::debug!(attempt = attempt.0, "scheduler: completion for discarded entry");
            return self.pump(now_ms, gate);
        }
        let Some(head) = self.queue.peek_head().copied() else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        match result {
            SendResult::Delivered => {
                let attempts = self.retry.current_attempt() + 1;
                self.retry.reset();
                self.advance_head();
                self.stats.delivered.inc();
                tracing::info!(endpoint = %head.endpoint, status = %head.status, attempts, "delivery: acknowledged");
                effects.push(ZoneEffect::Emit(ZoneEvent::Delivered {
                    endpoint: head.endpoint,
                    status: head.status,
                    attempts,
                }));
            }
            SendResult::NoAckReceived | SendResult::OtherFailure => {
                let exceeded = self.retry.record_attempt();
                let attempts = self.retry.current_attempt();
                if exceeded {
                    self.retry.reset();
                    self.advance_head();
                    self.stats.dropped.inc();
                    tracing::warn!(
                        endpoint = %head.endpoint,
                        status = %head.status,
                        attempts,
                        "delivery: retries exhausted, dropping ({result:?})"
                    );
                    effects.push(ZoneEffect::Emit(ZoneEvent::Dropped {
                        endpoint: head.endpoint,
                        status: head.status,
                        attempts,
                    }));
                } else {
                    let backoff_secs = self.retry.next_backoff();
                    let timer = self.next_timer();
                    self.state = SchedulerState::WaitingBackoff { timer };
                    self.stats.retries.inc();
                    tracing::info!(
                        endpoint = %head.endpoint,
                        attempt = attempts,
                        "delivery: {result:?}, retrying in {backoff_secs}s"
                    );
                    effects.push(ZoneEffect::ArmTimer {
                        timer,
                        delay: Duration::from_secs(u64::from(backoff_secs)),
                    });
                    effects.push(ZoneEffect::Emit(ZoneEvent::RetryScheduled {
                        endpoint: head.endpoint,
                        status: head.status,
                        attempt: attempts,
                        backoff_secs,
                    }));
                    return effects;
                }
            }
        }
        effects.extend(self.pump(now_ms, gate));
        effects
    }

    /// The transport refused the send outright. The entry stays queued and
    /// the scheduler parks until something external wakes it up.
    pub fn on_local_send_failure<G: DeliveryGate>(
        &mut self,
        attempt: AttemptId,
        error: &SendError,
        now_ms: u64,
        gate: &G,
    ) -> Vec<ZoneEffect> {
        if !self.take_in_flight(attempt) {
            return Vec::new();
        }
        self.stats.local_failures.inc();
        if std::mem::take(&mut self.orphaned) {
            return self.pump(now_ms, gate);
        }
        let Some(endpoint) = self.queue.peek_head().map(|e| e.endpoint) else {
            return Vec::new();
        };
        tracing::warn!(%endpoint, "delivery: send refused locally: {error}");
        self.park(endpoint, ParkReason::LocalSendFailure)
    }

    /// Retry (or spacing) timer fired.
    pub fn on_timer<G: DeliveryGate>(
        &mut self,
        timer: TimerHandle,
        now_ms: u64,
        gate: &G,
    ) -> Vec<ZoneEffect> {
        match self.state {
            SchedulerState::WaitingBackoff { timer: armed } if armed == timer => {
                self.state = SchedulerState::Idle;
                self.pump(now_ms, gate)
            }
            _ => {
                tracing::debug!(generation = timer.generation, "scheduler: ignoring stale timer");
                Vec::new()
            }
        }
    }

    /// Network came back: skip any pending backoff and try the head now.
    pub fn on_network_up<G: DeliveryGate>(&mut self, now_ms: u64, gate: &G) -> Vec<ZoneEffect> {
        let mut effects = Vec::new();
        if let SchedulerState::WaitingBackoff { timer } = self.state {
            effects.push(ZoneEffect::CancelTimer(timer));
            self.state = SchedulerState::Idle;
        }
        self.parked = None;
        effects.extend(self.pump(now_ms, gate));
        effects
    }

    /// Drop every queued entry. An attempt already in flight is left to
    /// complete but its outcome no longer touches the queue.
    pub fn discard(&mut self) -> Vec<ZoneEffect> {
        let count = self.queue.len();
        let mut effects = Vec::new();
        match self.state {
            SchedulerState::WaitingBackoff { timer } => {
                effects.push(ZoneEffect::CancelTimer(timer));
                self.state = SchedulerState::Idle;
            }
            SchedulerState::AttemptInFlight { .. } => self.orphaned = true,
            SchedulerState::Idle => {}
        }
        self.queue.reset();
        self.retry.reset();
        self.head_first_attempt_ms = None;
        self.parked = None;
        self.stats.queue_depth.set(0);
        tracing::info!("queue: discarded {count} entries");
        effects.push(ZoneEffect::Emit(ZoneEvent::QueueDiscarded { count }));
        effects
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    /// If `attempt` is the one in flight, go back to Idle and return true.
    fn take_in_flight(&mut self, attempt: AttemptId) -> bool {
        match self.state {
            SchedulerState::AttemptInFlight { attempt: current } if current == attempt => {
                self.state = SchedulerState::Idle;
                true
            }
            _ => false,
        }
    }

    fn advance_head(&mut self) {
        self.queue.dequeue();
        self.head_first_attempt_ms = None;
        self.stats.queue_depth.set(self.queue.len() as u64);
    }

    fn park(&mut self, endpoint: Endpoint, reason: ParkReason) -> Vec<ZoneEffect> {
        if self.parked == Some(reason) {
            return Vec::new();
        }
        self.parked = Some(reason);
        self.stats.parked.inc();
        tracing::info!(%endpoint, pending = self.queue.len(), "scheduler: parked ({reason:?})");
        vec![ZoneEffect::Emit(ZoneEvent::Parked { endpoint, reason })]
    }

    fn next_timer(&mut self) -> TimerHandle {
        self.timer_generation += 1;
        TimerHandle {
            key: TimerKey::Retry,
            generation: self.timer_generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ZoneStatus;

    struct Gate {
        up: bool,
        enrolled: bool,
    }

    impl DeliveryGate for Gate {
        fn network_up(&self) -> bool {
            self.up
        }

        fn enrolled_zone(&self, _endpoint: Endpoint) -> Option<ZoneId> {
            self.enrolled.then_some(ZoneId(5))
        }
    }

    const OPEN: Gate = Gate {
        up: true,
        enrolled: true,
    };

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    fn scheduler(capacity: usize, max_attempts: u32) -> DeliveryScheduler {
        DeliveryScheduler::new(capacity, policy(max_attempts), 500, Arc::new(DeliveryStats::new()))
            .unwrap()
    }

    fn entry(status: u16) -> QueueEntry {
        QueueEntry {
            endpoint: Endpoint(1),
            status: ZoneStatus(status),
            occurred_at_ms: 0,
        }
    }

    fn sent_attempt(effects: &[ZoneEffect]) -> Option<AttemptId> {
        effects.iter().find_map(|e| match e {
            ZoneEffect::SendStatusChange { attempt, .. } => Some(*attempt),
            _ => None,
        })
    }

    fn armed_timer(effects: &[ZoneEffect]) -> Option<(TimerHandle, Duration)> {
        effects.iter().find_map(|e| match e {
            ZoneEffect::ArmTimer { timer, delay } => Some((*timer, *delay)),
            _ => None,
        })
    }

    #[test]
    fn enqueue_on_empty_sends_immediately() {
        let mut s = scheduler(4, 3);
        let effects = s.enqueue(entry(1), 1_000, &OPEN);
        let attempt = sent_attempt(&effects).unwrap();
        assert_eq!(s.state(), SchedulerState::AttemptInFlight { attempt });
        match &effects[0] {
            ZoneEffect::SendStatusChange { notification, .. } => {
                assert_eq!(notification.zone_id, ZoneId(5));
                assert_eq!(notification.zone_status, ZoneStatus(1));
                assert_eq!(notification.delay_qs, 4);
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn enqueue_while_in_flight_does_not_send() {
        let mut s = scheduler(4, 3);
        s.enqueue(entry(1), 0, &OPEN);
        let effects = s.enqueue(entry(2), 10, &OPEN);
        assert!(sent_attempt(&effects).is_none());
        assert_eq!(s.queue().len(), 2);
    }

    #[test]
    fn delivered_advances_to_next_head() {
        let mut s = scheduler(4, 3);
        let a1 = sent_attempt(&s.enqueue(entry(1), 0, &OPEN)).unwrap();
        s.enqueue(entry(2), 10, &OPEN);
        let effects = s.on_send_complete(a1, SendResult::Delivered, 20, &OPEN);
        assert!(effects.iter().any(|e| matches!(
            e,
            ZoneEffect::Emit(ZoneEvent::Delivered { attempts: 1, .. })
        )));
        let a2 = sent_attempt(&effects).unwrap();
        assert_ne!(a1, a2);
        assert_eq!(s.queue().peek_head().unwrap().status, ZoneStatus(2));
    }

    #[test]
    fn failure_arms_backoff_then_retries_same_head() {
        let mut s = scheduler(4, 3);
        let a1 = sent_attempt(&s.enqueue(entry(1), 0, &OPEN)).unwrap();
        let effects = s.on_send_complete(a1, SendResult::NoAckReceived, 100, &OPEN);
        let (timer, delay) = armed_timer(&effects).unwrap();
        assert_eq!(delay, Duration::from_secs(3));
        assert_eq!(s.state(), SchedulerState::WaitingBackoff { timer });

        let effects = s.on_timer(timer, 3_100, &OPEN);
        assert!(sent_attempt(&effects).is_some());
        assert_eq!(s.queue().len(), 1);
        assert_eq!(s.retry().current_attempt(), 1);
    }

    #[test]
    fn exhaustion_drops_head() {
        let mut s = scheduler(4, 3);
        let mut attempt = sent_attempt(&s.enqueue(entry(1), 0, &OPEN)).unwrap();
        s.enqueue(entry(2), 0, &OPEN);
        let mut now = 0;
        for _ in 0..2 {
            let effects = s.on_send_complete(attempt, SendResult::NoAckReceived, now, &OPEN);
            let (timer, delay) = armed_timer(&effects).unwrap();
            now += delay.as_millis() as u64;
            attempt = sent_attempt(&s.on_timer(timer, now, &OPEN)).unwrap();
        }
        let effects = s.on_send_complete(attempt, SendResult::OtherFailure, now, &OPEN);
        assert!(effects.iter().any(|e| matches!(
            e,
            ZoneEffect::Emit(ZoneEvent::Dropped { attempts: 3, .. })
        )));
        assert_eq!(s.queue().peek_head().unwrap().status, ZoneStatus(2));
        assert_eq!(s.retry().current_attempt(), 0);
        assert!(sent_attempt(&effects).is_some());
    }

    #[test]
    fn stale_completion_and_timer_are_ignored() {
        let mut s = scheduler(4, 3);
        let a1 = sent_attempt(&s.enqueue(entry(1), 0, &OPEN)).unwrap();
        assert!(s
            .on_send_complete(AttemptId(a1.0 + 7), SendResult::Delivered, 5, &OPEN)
            .is_empty());
        let effects = s.on_send_complete(a1, SendResult::NoAckReceived, 10, &OPEN);
        let (timer, _) = armed_timer(&effects).unwrap();
        let stale = TimerHandle {
            generation: timer.generation - 1,
            ..timer
        };
        assert!(s.on_timer(stale, 20, &OPEN).is_empty());
        assert_eq!(s.state(), SchedulerState::WaitingBackoff { timer });
    }

    #[test]
    fn network_down_parks_once() {
        let mut s = scheduler(4, 3);
        let down = Gate {
            up: false,
            enrolled: true,
        };
        let effects = s.enqueue(entry(1), 0, &down);
        assert_eq!(
            effects,
            vec![ZoneEffect::Emit(ZoneEvent::Parked {
                endpoint: Endpoint(1),
                reason: ParkReason::NetworkUnavailable,
            })]
        );
        assert!(s.enqueue(entry(2), 0, &down).is_empty());
        assert_eq!(s.parked(), Some(ParkReason::NetworkUnavailable));
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[test]
    fn not_enrolled_parks() {
        let mut s = scheduler(4, 3);
        let gate = Gate {
            up: true,
            enrolled: false,
        };
        s.enqueue(entry(1), 0, &gate);
        assert_eq!(s.parked(), Some(ParkReason::NotEnrolled));
        assert_eq!(s.queue().len(), 1);
    }

    #[test]
    fn network_up_cancels_backoff_and_sends() {
        let mut s = scheduler(4, 3);
        let a1 = sent_attempt(&s.enqueue(entry(1), 0, &OPEN)).unwrap();
        let effects = s.on_send_complete(a1, SendResult::NoAckReceived, 600, &OPEN);
        let (timer, _) = armed_timer(&effects).unwrap();
        let effects = s.on_network_up(700, &OPEN);
        assert_eq!(effects[0], ZoneEffect::CancelTimer(timer));
        assert!(sent_attempt(&effects).is_some());
        // The superseded timer is now stale.
        assert!(s.on_timer(timer, 3_600, &OPEN).is_empty());
    }

    #[test]
    fn spacing_floor_after_fast_local_failure() {
        let mut s = scheduler(4, 3);
        let a1 = sent_attempt(&s.enqueue(entry(1), 1_000, &OPEN)).unwrap();
        let effects = s.on_local_send_failure(a1, &SendError::NoRoute, 1_010, &OPEN);
        assert!(matches!(
            effects.as_slice(),
            [ZoneEffect::Emit(ZoneEvent::Parked {
                reason: ParkReason::LocalSendFailure,
                ..
            })]
        ));
        assert_eq!(s.queue().len(), 1);
        assert_eq!(s.retry().current_attempt(), 0);

        let effects = s.on_network_up(1_010, &OPEN);
        let (timer, delay) = armed_timer(&effects).unwrap();
        assert!(delay >= Duration::from_millis(490));
        assert!(sent_attempt(&effects).is_none());

        let effects = s.on_timer(timer, 1_500, &OPEN);
        assert!(sent_attempt(&effects).is_some());
    }

    #[test]
    fn discard_while_in_flight_orphans_completion() {
        let mut s = scheduler(4, 3);
        let a1 = sent_attempt(&s.enqueue(entry(1), 0, &OPEN)).unwrap();
        let effects = s.discard();
        assert_eq!(
            effects,
            vec![ZoneEffect::Emit(ZoneEvent::QueueDiscarded { count: 1 })]
        );
        s.enqueue(entry(2), 5, &OPEN);
        assert_eq!(s.queue().len(), 1);

        // Completion of the discarded entry must not dequeue entry 2.
        let effects = s.on_send_complete(a1, SendResult::Delivered, 10, &OPEN);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, ZoneEffect::Emit(ZoneEvent::Delivered { .. }))));
        assert!(sent_attempt(&effects).is_some());
        assert_eq!(s.queue().peek_head().unwrap().status, ZoneStatus(2));
    }

    #[test]
    fn discard_while_waiting_cancels_timer() {
        let mut s = scheduler(4, 3);
        let a1 = sent_attempt(&s.enqueue(entry(1), 0, &OPEN)).unwrap();
        let (timer, _) = armed_timer(&s.on_send_complete(a1, SendResult::NoAckReceived, 0, &OPEN)).unwrap();
        let effects = s.discard();
        assert_eq!(effects[0], ZoneEffect::CancelTimer(timer));
        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(s.queue().is_empty());
    }
}

//! One-shot timers for the event loop.
//!
//! One deadline per [`TimerKey`]; arming a key replaces its deadline.
//! Cancelling only removes the deadline if the generation matches, so a late
//! cancel never kills a newer timer.
use std::collections::HashMap;

use tokio::time::Instant;

use crate::effect::{TimerHandle, TimerKey};

#[derive(Debug, Default)]
pub(super) struct TimerSet {
    deadlines: HashMap<TimerKey, (TimerHandle, Instant)>,
}

impl TimerSet {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn arm(&mut self, timer: TimerHandle, at: Instant) {
        self.deadlines.insert(timer.key, (timer, at));
    }

    pub(super) fn cancel(&mut self, timer: TimerHandle) {
        if let Some((armed, _)) = self.deadlines.get(&timer.key) {
            if *armed == timer {
                self.deadlines.remove(&timer.key);
            }
        }
    }

    pub(super) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().map(|(_, at)| *at).min()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub(super) fn pop_expired(&mut self, now: Instant) -> Vec<TimerHandle> {
        let mut due: Vec<(Instant, TimerHandle)> = self
            .deadlines
            .values()
            .filter(|(_, at)| *at <= now)
            .map(|(timer, at)| (*at, *timer))
            .collect();
        due.sort_by_key(|(at, _)| *at);
        for (_, timer) in &due {
            self.deadlines.remove(&timer.key);
        }
        due.into_iter().map(|(_, timer)| timer).collect()
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.deadlines.len()
    }
}

/// Sleep until `deadline`, or forever if there is none.
pub(super) async fn sleep_until_next(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Endpoint;
    use std::time::Duration;

    fn retry(generation: u64) -> TimerHandle {
        TimerHandle {
            key: TimerKey::Retry,
            generation,
        }
    }

    #[test]
    fn rearm_replaces_deadline() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(retry(1), now + Duration::from_secs(3));
        timers.arm(retry(2), now + Duration::from_secs(1));
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn stale_cancel_keeps_newer_timer() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(retry(2), now);
        timers.cancel(retry(1));
        assert_eq!(timers.len(), 1);
        timers.cancel(retry(2));
        assert_eq!(timers.len(), 0);
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn pop_expired_in_deadline_order() {
        let now = Instant::now();
        let enroll = TimerHandle {
            key: TimerKey::EnrollRequest(Endpoint(1)),
            generation: 1,
        };
        let mut timers = TimerSet::new();
        timers.arm(retry(1), now + Duration::from_millis(20));
        timers.arm(enroll, now + Duration::from_millis(10));
        assert!(timers.pop_expired(now).is_empty());
        let due = timers.pop_expired(now + Duration::from_millis(30));
        assert_eq!(due, vec![enroll, retry(1)]);
        assert_eq!(timers.len(), 0);
    }
}

/// Property-based tests for the status queue, the backoff sequence and the
/// delivery scheduler.
use std::collections::VecDeque;

use ias_zone::{
    EnrollResponseCode, Endpoint, MemoryStore, QueueEntry, RetryController, RetryPolicy,
    SchedulerState, SendResult, SlotResult, StatusQueue, ZoneConfig, ZoneEffect, ZoneId,
    ZoneServer, ZoneStatus, MAX_BACKOFF_CEILING_SECS,
};
use proptest::prelude::*;

const EP: Endpoint = Endpoint(1);

fn entry(status: u16) -> QueueEntry {
    QueueEntry {
        endpoint: EP,
        status: ZoneStatus(status),
        occurred_at_ms: u64::from(status),
    }
}

#[derive(Debug, Clone)]
enum QueueOp {
    Enqueue(u16),
    Dequeue,
    Reset,
}

fn queue_op() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        4 => any::<u16>().prop_map(QueueOp::Enqueue),
        2 => Just(QueueOp::Dequeue),
        1 => Just(QueueOp::Reset),
    ]
}

fn retry_policy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..=600, 1u32..=10)
        .prop_flat_map(|(first, ratio)| {
            (Just(first), Just(ratio), first..=MAX_BACKOFF_CEILING_SECS)
        })
        .prop_map(|(first_backoff_secs, backoff_ratio, max_backoff_secs)| RetryPolicy {
            first_backoff_secs,
            backoff_ratio,
            max_backoff_secs,
            unlimited_retries: false,
            max_attempts: 10,
        })
}

proptest! {
    /// The queue matches a VecDeque model whose "full" rule replaces the
    /// newest element.
    #[test]
    fn queue_matches_model(capacity in 2usize..8, ops in prop::collection::vec(queue_op(), 0..64)) {
        let mut queue = StatusQueue::new(capacity).unwrap();
        let mut model: VecDeque<u16> = VecDeque::new();

        for op in ops {
            match op {
                QueueOp::Enqueue(status) => {
                    let was_full = model.len() == capacity;
                    let result = queue.enqueue(entry(status));
                    if was_full {
                        let replaced = model.pop_back().unwrap();
                        prop_assert_eq!(result, SlotResult::Overwrote { replaced: entry(replaced) });
                    } else {
                        prop_assert_eq!(result, SlotResult::Appended { len: model.len() + 1 });
                    }
                    model.push_back(status);
                }
                QueueOp::Dequeue => {
                    let got = queue.dequeue().map(|e| e.status.bits());
                    prop_assert_eq!(got, model.pop_front());
                }
                QueueOp::Reset => {
                    queue.reset();
                    model.clear();
                }
            }
            prop_assert!(queue.len() <= capacity);
            let contents: Vec<u16> = queue.iter().map(|e| e.status.bits()).collect();
            let expected: Vec<u16> = model.iter().copied().collect();
            prop_assert_eq!(contents, expected);
        }
    }

    /// The head survives any number of enqueues.
    #[test]
    fn head_never_overwritten(capacity in 2usize..8, statuses in prop::collection::vec(any::<u16>(), 1..40)) {
        let mut queue = StatusQueue::new(capacity).unwrap();
        for &status in &statuses {
            queue.enqueue(entry(status));
        }
        prop_assert_eq!(queue.peek_head().map(|e| e.status.bits()), Some(statuses[0]));
        prop_assert_eq!(queue.len(), statuses.len().min(capacity));
    }

    /// k-th backoff equals min(first * ratio^(k-1), max), computed wide.
    #[test]
    fn backoff_sequence_is_capped_geometric(policy in retry_policy(), steps in 1usize..40) {
        let mut retry = RetryController::new(policy).unwrap();
        let mut expected = u64::from(policy.first_backoff_secs);
        let mut previous = 0u32;
        for _ in 0..steps {
            let backoff = retry.next_backoff();
            prop_assert_eq!(u64::from(backoff), expected.min(u64::from(policy.max_backoff_secs)));
            prop_assert!(backoff >= previous);
            prop_assert!(backoff <= policy.max_backoff_secs);
            previous = backoff;
            expected = (expected * u64::from(policy.backoff_ratio))
                .min(u64::from(policy.max_backoff_secs));
        }
    }

    /// Reset restores the first backoff and is idempotent.
    #[test]
    fn reset_is_idempotent(policy in retry_policy(), failures in 0usize..20) {
        let mut retry = RetryController::new(policy).unwrap();
        for _ in 0..failures {
            retry.record_attempt();
            retry.next_backoff();
        }
        retry.reset();
        let once = retry.state();
        retry.reset();
        prop_assert_eq!(retry.state(), once);
        prop_assert_eq!(once.current_attempt, 0);
        prop_assert_eq!(once.current_backoff_secs, policy.first_backoff_secs);
    }

    /// With every attempt acknowledged, each update settles back to an
    /// empty queue, and the retry state is back at (first, 0) after every
    /// success.
    #[test]
    fn every_acknowledged_update_settles_empty(
        policy in retry_policy(),
        updates in prop::collection::vec((any::<u16>(), 0u64..5_000), 1..30),
    ) {
        let config = ZoneConfig::new().retry(policy);
        let mut server = ZoneServer::new(config, MemoryStore::new()).unwrap();
        server.on_enroll_response(EP, EnrollResponseCode::Success, ZoneId(1), 0).unwrap();

        let mut now = 0u64;
        let mut delivered = Vec::new();
        for &(status, gap_ms) in &updates {
            now += gap_ms;
            let mut pending = server.update_zone_status(EP, ZoneStatus(status), 0, now).unwrap();
            while let Some(effect) = pending.pop() {
                if let ZoneEffect::SendStatusChange { attempt, notification, .. } = effect {
                    delivered.push(notification.zone_status.bits());
                    pending.extend(server.on_send_complete(attempt, SendResult::Delivered, now));

                    let retry = server.diagnostics().retry;
                    prop_assert_eq!(
                        (retry.current_backoff_secs, retry.current_attempt),
                        (policy.first_backoff_secs, 0)
                    );
                }
            }
            prop_assert!(server.dump_queue().is_empty());
            prop_assert_eq!(server.scheduler().state(), SchedulerState::Idle);
        }

        let statuses: Vec<u16> = updates.iter().map(|&(status, _)| status).collect();
        prop_assert_eq!(delivered, statuses);
    }
}

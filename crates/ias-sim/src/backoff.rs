use ias_zone::{RetryController, RetryPolicy};

use crate::events::{emit, EventBackoffEnd, EventBackoffStep};

/// Print the wait before each retry, as the delivery scheduler would apply
/// it to a head that keeps failing.
pub fn run(policy: RetryPolicy) -> anyhow::Result<()> {
    let mut retry = RetryController::new(policy)?;
    let mut total = 0u64;
    let mut exhausted = false;
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        attempts += 1;
        if retry.record_attempt() {
            exhausted = true;
            break;
        }
        let backoff_secs = retry.next_backoff();
        total += u64::from(backoff_secs);
        emit(&EventBackoffStep {
            event: "backoff_step",
            attempt: attempts,
            backoff_secs,
            cumulative_secs: total,
        });
    }

    emit(&EventBackoffEnd {
        event: "backoff_end",
        attempts,
        exhausted,
        total_wait_secs: total,
    });
    Ok(())
}

use std::time::Duration;

use serde::Serialize;

use crate::frame::{EnrollRequest, StatusChangeNotification};
use crate::queue::QueueEntry;
use crate::types::{EnrollResponseCode, Endpoint, ZoneId, ZoneStatus};

/// Identifies one delivery attempt, so late completions can be matched
/// (or ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AttemptId(pub u64);

/// What a timer is for. Arming a key replaces any deadline already armed
/// under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKey {
    /// Retry/backoff wait (or minimum-spacing wait) for the queue head.
    Retry,
    /// Delayed enroll request for one endpoint.
    EnrollRequest(Endpoint),
}

/// A timer key plus the generation it was armed with. A handle whose
/// generation no longer matches is stale and must be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimerHandle {
    pub key: TimerKey,
    pub generation: u64,
}

/// Why the scheduler stopped with entries still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkReason {
    NetworkUnavailable,
    NotEnrolled,
    LocalSendFailure,
}

/// Intention produced by the pure [`ZoneServer`](crate::ZoneServer) core.
///
/// Every entry point returns `Vec<ZoneEffect>`; the runtime executes them
/// against the transport, the timer set and the event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneEffect {
    /// Transmit a Zone Status Change Notification to the bound CIE. The
    /// outcome comes back as a completion for `attempt`.
    SendStatusChange {
        attempt: AttemptId,
        endpoint: Endpoint,
        notification: StatusChangeNotification,
    },

    /// Transmit a Zone Enroll Request to the bound CIE.
    SendEnrollRequest {
        endpoint: Endpoint,
        request: EnrollRequest,
    },

    /// Arm a one-shot timer.
    ArmTimer { timer: TimerHandle, delay: Duration },

    /// Cancel a timer armed earlier.
    CancelTimer(TimerHandle),

    /// Surface an event to the application.
    Emit(ZoneEvent),
}

/// Observable delivery and enrollment events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ZoneEvent {
    /// The CIE acknowledged a notification.
    Delivered {
        endpoint: Endpoint,
        status: ZoneStatus,
        attempts: u32,
    },
    /// A notification failed and will be retried after `backoff_secs`.
    RetryScheduled {
        endpoint: Endpoint,
        status: ZoneStatus,
        attempt: u32,
        backoff_secs: u32,
    },
    /// Retries exhausted; the notification is gone.
    Dropped {
        endpoint: Endpoint,
        status: ZoneStatus,
        attempts: u32,
    },
    /// The queue was full and its newest entry was overwritten.
    Overwritten { replaced: QueueEntry },
    /// Delivery stopped with entries pending.
    Parked {
        endpoint: Endpoint,
        reason: ParkReason,
    },
    /// The application discarded the queue.
    QueueDiscarded { count: usize },
    Enrolled { endpoint: Endpoint, zone_id: ZoneId },
    EnrollRejected {
        endpoint: Endpoint,
        code: EnrollResponseCode,
    },
    /// Enrollment cleared after leaving the network.
    Unenrolled { endpoint: Endpoint },
    EnrollRequestSent { endpoint: Endpoint },
}

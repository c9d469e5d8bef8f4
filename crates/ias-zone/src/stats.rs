use ias_metrics::{Counter, Gauge};
use serde::Serialize;

/// Delivery counters, shared between the event loop and anyone holding
/// an `Arc` to them.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DeliveryStats {
    /// Status notifications handed to the transport.
    pub attempts: Counter,
    pub delivered: Counter,
    /// Failed attempts that were rescheduled.
    pub retries: Counter,
    /// Entries abandoned after exhausting their retries.
    pub dropped: Counter,
    /// Entries lost to overwrite-on-full.
    pub overwritten: Counter,
    /// Sends refused synchronously by the transport.
    pub local_failures: Counter,
    pub parked: Counter,
    pub enroll_requests: Counter,
    pub queue_depth: Gauge,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_counters_as_numbers_and_gauge_as_reading() {
        let stats = DeliveryStats::new();
        stats.attempts.add(3);
        stats.delivered.inc();
        stats.queue_depth.set(4);
        stats.queue_depth.set(1);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["attempts"], 3);
        assert_eq!(json["delivered"], 1);
        assert_eq!(json["dropped"], 0);
        assert_eq!(json["queue_depth"]["value"], 1);
        assert_eq!(json["queue_depth"]["peak"], 4);
    }
}

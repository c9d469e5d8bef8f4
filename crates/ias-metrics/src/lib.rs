//! Counters and gauges for the IAS Zone delivery stack.
//!
//! Every metric is a few relaxed atomics with a plain read-out:
//! [`Counter::get`] for counters, [`Gauge::reading`] for gauges. Debug,
//! serde and `Clone` all go through that read-out, so a counter serializes
//! as a JSON number, a gauge as `{"value": .., "peak": ..}`, and a cloned
//! stats block is a frozen snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use serde::{Deserialize, Serialize};

/// Number of times something happened. Only ever goes up.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Relaxed)
    }
}

impl From<u64> for Counter {
    fn from(count: u64) -> Self {
        Self(AtomicU64::new(count))
    }
}

/// Point-in-time reading of a [`Gauge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaugeReading {
    pub value: u64,
    /// Highest value set since the gauge was created.
    pub peak: u64,
}

/// A level that goes up and down (queue depth), with its high-water mark.
#[derive(Default)]
pub struct Gauge {
    value: AtomicU64,
    peak: AtomicU64,
}

impl Gauge {
    pub fn set(&self, value: u64) {
        self.value.store(value, Relaxed);
        self.peak.fetch_max(value, Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Relaxed)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Relaxed)
    }

    pub fn reading(&self) -> GaugeReading {
        GaugeReading {
            value: self.get(),
            peak: self.peak(),
        }
    }
}

impl From<GaugeReading> for Gauge {
    fn from(reading: GaugeReading) -> Self {
        Self {
            value: AtomicU64::new(reading.value),
            peak: AtomicU64::new(reading.peak.max(reading.value)),
        }
    }
}

/// Debug, Clone and serde for a metric, in terms of its read-out.
macro_rules! through_reading {
    ($metric:ty, $reading:ty, $read:ident) => {
        impl Clone for $metric {
            fn clone(&self) -> Self {
                Self::from(self.$read())
            }
        }

        impl fmt::Debug for $metric {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&self.$read(), f)
            }
        }

        impl Serialize for $metric {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.$read().serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $metric {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                <$reading>::deserialize(deserializer).map(Self::from)
            }
        }
    };
}

through_reading!(Counter, u64, get);
through_reading!(Gauge, GaugeReading, reading);

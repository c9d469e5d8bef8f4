use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ZoneError;
use crate::queue::MIN_QUEUE_CAPACITY;
use crate::retry::RetryPolicy;
use crate::types::Endpoint;

/// Contact switch.
pub const DEFAULT_ZONE_TYPE: u16 = 0x0015;

/// Configuration of one IAS Zone server device.
///
/// Every field has a default, so a JSON file only needs the fields it
/// overrides:
///
/// ```rust
/// use ias_zone::ZoneConfig;
///
/// let config: ZoneConfig = serde_json::from_str(r#"{ "queue_capacity": 4 }"#).unwrap();
/// assert_eq!(config.queue_capacity, 4);
/// assert_eq!(config.min_attempt_spacing_ms, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Endpoints hosting an IAS Zone server instance.
    pub endpoints: Vec<Endpoint>,
    /// Slots in the shared status queue.
    pub queue_capacity: usize,
    /// Retry/backoff policy applied to the queue head.
    pub retry: RetryPolicy,
    /// Minimum time between the head's first attempt and the next one.
    pub min_attempt_spacing_ms: u64,
    /// Delay before an enroll request goes out.
    pub enroll_request_delay_ms: u64,
    /// ZoneType written at first start, carried in enroll requests.
    pub zone_type: u16,
    /// Manufacturer code carried in enroll requests.
    pub manufacturer_code: u16,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneConfig {
    /// Create a new config with defaults: one endpoint (1), ten queue slots,
    /// 3 s → 12 s backoff over at most ten attempts.
    pub fn new() -> Self {
        Self {
            endpoints: vec![Endpoint(1)],
            queue_capacity: 10,
            retry: RetryPolicy::default(),
            min_attempt_spacing_ms: 500,
            enroll_request_delay_ms: 1_000,
            zone_type: DEFAULT_ZONE_TYPE,
            manufacturer_code: 0x1002,
        }
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ZoneError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ZoneError::invalid(format!("config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the endpoint list.
    pub fn endpoints(mut self, endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        self.endpoints = endpoints.into_iter().collect();
        self
    }

    /// Set the queue capacity (default: 10, minimum 2).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the minimum attempt spacing (default: 500 ms).
    pub fn min_attempt_spacing(mut self, spacing: Duration) -> Self {
        self.min_attempt_spacing_ms = spacing.as_millis() as u64;
        self
    }

    /// Set the enroll request delay (default: 1 s).
    pub fn enroll_request_delay(mut self, delay: Duration) -> Self {
        self.enroll_request_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn zone_type(mut self, zone_type: u16) -> Self {
        self.zone_type = zone_type;
        self
    }

    pub fn manufacturer_code(mut self, code: u16) -> Self {
        self.manufacturer_code = code;
        self
    }

    pub fn validate(&self) -> Result<(), ZoneError> {
        if self.endpoints.is_empty() {
            return Err(ZoneError::invalid("at least one endpoint is required"));
        }
        let unique: BTreeSet<_> = self.endpoints.iter().collect();
        if unique.len() != self.endpoints.len() {
            return Err(ZoneError::invalid("duplicate endpoint in config"));
        }
        if self.queue_capacity < MIN_QUEUE_CAPACITY {
            return Err(ZoneError::invalid(format!(
                "queue capacity must be >= {MIN_QUEUE_CAPACITY}, got {}",
                self.queue_capacity
            )));
        }
        self.retry.validate()
    }
}

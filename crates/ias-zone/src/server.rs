//! ZoneServer: the pure protocol core.
//!
//! Owns the attribute store, the enrollment table and the delivery
//! scheduler. Every entry point takes the current monotonic time in ms and
//! returns the effects to execute; nothing in here does I/O beyond the
//! attribute store.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::ZoneConfig;
use crate::effect::{AttemptId, ParkReason, TimerHandle, TimerKey, ZoneEffect, ZoneEvent};
use crate::enrollment::{EnrollmentRecord, EnrollmentTable};
use crate::error::{SendError, ZoneError};
use crate::frame::{EnrollRequest, EnrollResponse};
use crate::network::NetworkStatus;
use crate::queue::QueueEntry;
use crate::retry::{RetryPolicy, RetryState};
use crate::scheduler::{DeliveryGate, DeliveryScheduler, SchedulerState};
use crate::stats::DeliveryStats;
use crate::store::{AttributeStore, AttributeStoreExt};
use crate::types::{
    attr, EnrollResponseCode, EnrollmentMode, Endpoint, IeeeAddress, SendResult, ZoneId,
    ZoneStatus,
};

/// Snapshot of everything worth looking at when delivery misbehaves.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub scheduler: SchedulerState,
    pub parked: Option<ParkReason>,
    pub network: NetworkStatus,
    pub queue: Vec<QueueEntry>,
    pub queue_capacity: usize,
    pub retry: RetryState,
    pub enrollment: Vec<EnrollmentRecord>,
    pub stats: DeliveryStats,
}

pub struct ZoneServer<S: AttributeStore> {
    pub(crate) config: ZoneConfig,
    pub(crate) store: S,
    pub(crate) enrollment: EnrollmentTable,
    pub(crate) scheduler: DeliveryScheduler,
    pub(crate) network: NetworkStatus,
    /// Pending enroll-request timers, by endpoint.
    pub(crate) enroll_timers: HashMap<Endpoint, TimerHandle>,
    enroll_generation: u64,
    stats: Arc<DeliveryStats>,
}

/// Read-only view handed to the scheduler.
pub(crate) struct Gate<'a, S> {
    store: &'a S,
    enrollment: &'a EnrollmentTable,
    network_up: bool,
}

impl<S: AttributeStore> DeliveryGate for Gate<'_, S> {
    fn network_up(&self) -> bool {
        self.network_up
    }

    fn enrolled_zone(&self, endpoint: Endpoint) -> Option<ZoneId> {
        match self.enrollment.is_enrolled(self.store, endpoint) {
            Ok(true) => self.enrollment.zone_id(endpoint).ok(),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(%endpoint, "enrollment: state unreadable, treating as not enrolled: {e}");
                None
            }
        }
    }
}

impl<S: AttributeStore> ZoneServer<S> {
    /// Validate `config`, then load (or initialise) enrollment attributes.
    pub fn new(config: ZoneConfig, mut store: S) -> Result<Self, ZoneError> {
        config.validate()?;
        let enrollment = EnrollmentTable::load(&mut store, &config.endpoints, config.zone_type)?;
        let stats = Arc::new(DeliveryStats::new());
        let scheduler = DeliveryScheduler::new(
            config.queue_capacity,
            config.retry,
            config.min_attempt_spacing_ms,
            Arc::clone(&stats),
        )?;
        tracing::info!(
            endpoints = config.endpoints.len(),
            capacity = config.queue_capacity,
            "zone: server ready"
        );
        Ok(Self {
            config,
            store,
            enrollment,
            scheduler,
            network: NetworkStatus::default(),
            enroll_timers: HashMap::new(),
            enroll_generation: 0,
            stats,
        })
    }

    // ── Application API ─────────────────────────────────────────────────

    /// Record a new zone status and queue it for delivery.
    ///
    /// The ZoneStatus attribute is written first, whatever happens next. A
    /// non-enrolled endpoint in trip-to-pair mode schedules an enroll request
    /// instead of queueing. Delivery outcomes never show up in the result.
    pub fn update_zone_status(
        &mut self,
        endpoint: Endpoint,
        status: ZoneStatus,
        elapsed_secs: u32,
        now_ms: u64,
    ) -> Result<Vec<ZoneEffect>, ZoneError> {
        if !self.enrollment.contains(endpoint) {
            return Err(ZoneError::UnknownEndpoint(endpoint));
        }
        self.store
            .write_u16(endpoint, attr::ZONE_STATUS, status.bits())?;

        let enrolled = self.enrollment.is_enrolled(&self.store, endpoint)?;
        if !enrolled && self.enrollment.mode(endpoint)? == EnrollmentMode::TripToPair {
            tracing::info!(%endpoint, %status, "zone: tripped while not enrolled, requesting enrollment");
            return Ok(self.schedule_enroll_request(endpoint));
        }

        let entry = QueueEntry {
            endpoint,
            status,
            occurred_at_ms: now_ms.saturating_sub(u64::from(elapsed_secs) * 1000),
        };
        Ok(self.drive(|scheduler, gate| scheduler.enqueue(entry, now_ms, gate)))
    }

    pub fn set_enrollment_mode(
        &mut self,
        endpoint: Endpoint,
        raw_mode: u8,
    ) -> Result<EnrollmentMode, ZoneError> {
        self.enrollment.set_mode(&mut self.store, endpoint, raw_mode)
    }

    /// Replace the retry policy. On error the previous policy is kept.
    pub fn configure_retry_policy(&mut self, policy: RetryPolicy) -> Result<(), ZoneError> {
        self.scheduler.configure_retry(policy)?;
        self.config.retry = policy;
        tracing::info!(
            first = policy.first_backoff_secs,
            ratio = policy.backoff_ratio,
            max = policy.max_backoff_secs,
            "retry: policy updated"
        );
        Ok(())
    }

    pub fn discard_queue(&mut self) -> Vec<ZoneEffect> {
        self.scheduler.discard()
    }

    /// Queued entries, oldest (the head) first.
    pub fn dump_queue(&self) -> Vec<QueueEntry> {
        self.scheduler.queue().snapshot()
    }

    pub fn is_enrolled(&self, endpoint: Endpoint) -> Result<bool, ZoneError> {
        self.enrollment.is_enrolled(&self.store, endpoint)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            scheduler: self.scheduler.state(),
            parked: self.scheduler.parked(),
            network: self.network,
            queue: self.dump_queue(),
            queue_capacity: self.scheduler.queue().capacity(),
            retry: self.scheduler.retry().state(),
            enrollment: self.enrollment.snapshot(),
            stats: (*self.stats).clone(),
        }
    }

    // ── Transport / timer inputs ────────────────────────────────────────

    pub fn on_send_complete(
        &mut self,
        attempt: AttemptId,
        result: SendResult,
        now_ms: u64,
    ) -> Vec<ZoneEffect> {
        self.drive(|scheduler, gate| scheduler.on_send_complete(attempt, result, now_ms, gate))
    }

    pub fn on_local_send_failure(
        &mut self,
        attempt: AttemptId,
        error: &SendError,
        now_ms: u64,
    ) -> Vec<ZoneEffect> {
        self.drive(|scheduler, gate| scheduler.on_local_send_failure(attempt, error, now_ms, gate))
    }

    pub fn on_timer(&mut self, timer: TimerHandle, now_ms: u64) -> Vec<ZoneEffect> {
        match timer.key {
            TimerKey::Retry => self.drive(|scheduler, gate| scheduler.on_timer(timer, now_ms, gate)),
            TimerKey::EnrollRequest(endpoint) => self.fire_enroll_request(endpoint, timer),
        }
    }

    // ── Enrollment inputs ───────────────────────────────────────────────

    /// Apply a Zone Enroll Response from the CIE. An acceptance wakes up a
    /// scheduler parked on the endpoint not being enrolled.
    pub fn on_enroll_response(
        &mut self,
        endpoint: Endpoint,
        code: EnrollResponseCode,
        zone_id: ZoneId,
        now_ms: u64,
    ) -> Result<Vec<ZoneEffect>, ZoneError> {
        let accepted = self
            .enrollment
            .on_enroll_response(&mut self.store, endpoint, code, zone_id)?;

        let mut effects = Vec::new();
        if let Some(timer) = self.enroll_timers.remove(&endpoint) {
            effects.push(ZoneEffect::CancelTimer(timer));
        }
        if accepted {
            effects.push(ZoneEffect::Emit(ZoneEvent::Enrolled { endpoint, zone_id }));
            effects.extend(self.drive(|scheduler, gate| scheduler.pump(now_ms, gate)));
        } else {
            effects.push(ZoneEffect::Emit(ZoneEvent::EnrollRejected { endpoint, code }));
        }
        Ok(effects)
    }

    /// Decode a frame received from the CIE on `endpoint`. Only the Zone
    /// Enroll Response is handled.
    pub fn on_incoming_frame(
        &mut self,
        endpoint: Endpoint,
        frame: &[u8],
        now_ms: u64,
    ) -> Result<Vec<ZoneEffect>, ZoneError> {
        let (_seq, response) = EnrollResponse::decode(frame)?;
        self.on_enroll_response(endpoint, response.code, response.zone_id, now_ms)
    }

    /// The CIE wrote its address into `endpoint`. In request mode this is
    /// the cue to ask for enrollment.
    pub fn on_cie_address_written(
        &mut self,
        endpoint: Endpoint,
        address: IeeeAddress,
    ) -> Result<Vec<ZoneEffect>, ZoneError> {
        self.enrollment
            .set_cie_address(&mut self.store, endpoint, address)?;
        if address.is_set()
            && self.enrollment.mode(endpoint)? == EnrollmentMode::Request
            && !self.enrollment.is_enrolled(&self.store, endpoint)?
        {
            return Ok(self.schedule_enroll_request(endpoint));
        }
        Ok(Vec::new())
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn enrollment(&self) -> &EnrollmentTable {
        &self.enrollment
    }

    pub fn scheduler(&self) -> &DeliveryScheduler {
        &self.scheduler
    }

    pub fn network(&self) -> NetworkStatus {
        self.network
    }

    /// Live counters, shared with the scheduler.
    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Run a scheduler input against a gate built from the current state.
    pub(crate) fn drive<F>(&mut self, f: F) -> Vec<ZoneEffect>
    where
        F: FnOnce(&mut DeliveryScheduler, &Gate<'_, S>) -> Vec<ZoneEffect>,
    {
        let gate = Gate {
            store: &self.store,
            enrollment: &self.enrollment,
            network_up: self.network.up,
        };
        f(&mut self.scheduler, &gate)
    }

    /// Arm the enroll-request timer for `endpoint`, unless one is pending.
    pub(crate) fn schedule_enroll_request(&mut self, endpoint: Endpoint) -> Vec<ZoneEffect> {
        if self.enroll_timers.contains_key(&endpoint) {
            return Vec::new();
        }
        self.enroll_generation += 1;
        let timer = TimerHandle {
            key: TimerKey::EnrollRequest(endpoint),
            generation: self.enroll_generation,
        };
        self.enroll_timers.insert(endpoint, timer);
        tracing::debug!(%endpoint, "enrollment: request in {} ms", self.config.enroll_request_delay_ms);
        vec![ZoneEffect::ArmTimer {
            timer,
            delay: Duration::from_millis(self.config.enroll_request_delay_ms),
        }]
    }

    fn fire_enroll_request(&mut self, endpoint: Endpoint, timer: TimerHandle) -> Vec<ZoneEffect> {
        if self.enroll_timers.get(&endpoint) != Some(&timer) {
            tracing::debug!(%endpoint, "enrollment: ignoring stale request timer");
            return Vec::new();
        }
        self.enroll_timers.remove(&endpoint);

        if !self.network.up {
            tracing::info!(%endpoint, "enrollment: network down, request skipped");
            return Vec::new();
        }
        match self.enrollment.is_enrolled(&self.store, endpoint) {
            Ok(false) => {}
            Ok(true) => return Vec::new(),
            Err(e) => {
                tracing::warn!(%endpoint, "enrollment: state unreadable: {e}");
                return Vec::new();
            }
        }

        let zone_type = match self.store.read_u16(endpoint, attr::ZONE_TYPE) {
            Ok(Some(zone_type)) => zone_type,
            _ => self.config.zone_type,
        };
        self.stats.enroll_requests.inc();
        tracing::info!(%endpoint, "enrollment: sending enroll request");
        vec![
            ZoneEffect::SendEnrollRequest {
                endpoint,
                request: EnrollRequest {
                    zone_type,
                    manufacturer_code: self.config.manufacturer_code,
                },
            },
            ZoneEffect::Emit(ZoneEvent::EnrollRequestSent { endpoint }),
        ]
    }
}

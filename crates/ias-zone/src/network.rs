//! Network lifecycle adapter.
//!
//! Turns network-membership transitions into enrollment resets and
//! scheduler wake-ups. The queue itself is never flushed here: entries wait
//! out an outage and are delivered once the network (and enrollment) is back.
use serde::{Deserialize, Serialize};

use crate::effect::{ZoneEffect, ZoneEvent};
use crate::error::ZoneError;
use crate::server::ZoneServer;
use crate::store::AttributeStore;
use crate::types::{EnrollmentMode, Endpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkDownReason {
    /// The device left the network for good. Enrollment is wiped.
    LeftNetwork,
    /// Lost the parent; the device is still commissioned.
    ParentLost,
    /// Rejoin in progress.
    Rejoining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub up: bool,
    pub last_down: Option<NetworkDownReason>,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self {
            up: true,
            last_down: None,
        }
    }
}

impl<S: AttributeStore> ZoneServer<S> {
    /// The network became unavailable. Delivery parks on its next attempt;
    /// leaving the network also clears every endpoint's enrollment and
    /// cancels pending enroll requests.
    pub fn on_network_down(
        &mut self,
        reason: NetworkDownReason,
    ) -> Result<Vec<ZoneEffect>, ZoneError> {
        self.network.up = false;
        self.network.last_down = Some(reason);
        tracing::info!(pending = self.scheduler.queue().len(), "network: down ({reason:?})");

        let mut effects = Vec::new();
        if reason != NetworkDownReason::LeftNetwork {
            return Ok(effects);
        }

        let endpoints: Vec<Endpoint> = self.enrollment.endpoints().collect();
        for endpoint in endpoints {
            self.enrollment.on_network_left(&mut self.store, endpoint)?;
            effects.push(ZoneEffect::Emit(ZoneEvent::Unenrolled { endpoint }));
        }
        effects.extend(
            self.enroll_timers
                .drain()
                .map(|(_, timer)| ZoneEffect::CancelTimer(timer)),
        );
        Ok(effects)
    }

    /// The network is usable again. A queued head is attempted right away
    /// (any backoff wait is cut short), and endpoints in request mode that
    /// already know their CIE ask for enrollment again.
    pub fn on_network_up(&mut self, now_ms: u64) -> Vec<ZoneEffect> {
        self.network.up = true;
        tracing::info!(pending = self.scheduler.queue().len(), "network: up");

        let mut effects = self.drive(|scheduler, gate| scheduler.on_network_up(now_ms, gate));
        for endpoint in self.endpoints_awaiting_enrollment() {
            effects.extend(self.schedule_enroll_request(endpoint));
        }
        effects
    }

    fn endpoints_awaiting_enrollment(&self) -> Vec<Endpoint> {
        self.enrollment
            .snapshot()
            .into_iter()
            .filter(|record| record.mode == EnrollmentMode::Request)
            .filter(|record| matches!(self.is_enrolled(record.endpoint), Ok(false)))
            .filter(|record| {
                self.enrollment
                    .cie_address(&self.store, record.endpoint)
                    .map(|address| address.is_set())
                    .unwrap_or(false)
            })
            .map(|record| record.endpoint)
            .collect()
    }
}

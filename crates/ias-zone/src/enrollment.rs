//! Enrollment state holder.
//!
//! One [`EnrollmentRecord`] per configured endpoint, mirrored from the
//! persisted attributes. The attribute store stays authoritative: every
//! mutation writes through before the cached record is touched, and
//! [`EnrollmentTable::is_enrolled`] reads the ZoneState attribute directly.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ZoneError;
use crate::store::{AttributeStore, AttributeStoreExt};
use crate::types::{attr, EnrollResponseCode, EnrollmentMode, Endpoint, IeeeAddress, ZoneId, ZoneState};

/// Cached enrollment view of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnrollmentRecord {
    pub endpoint: Endpoint,
    pub mode: EnrollmentMode,
    pub enrolled: bool,
    pub zone_id: ZoneId,
}

pub struct EnrollmentTable {
    records: BTreeMap<Endpoint, EnrollmentRecord>,
}

impl EnrollmentTable {
    /// Load (and initialise where missing) the enrollment attributes of
    /// every endpoint.
    ///
    /// A missing or unrecognised persisted mode falls back to
    /// [`EnrollmentMode::Request`], which is written back.
    pub fn load<S: AttributeStore>(
        store: &mut S,
        endpoints: &[Endpoint],
        zone_type: u16,
    ) -> Result<Self, ZoneError> {
        let mut records = BTreeMap::new();
        for &endpoint in endpoints {
            let mode = match read_mode(store, endpoint)? {
                Some(mode) => mode,
                None => {
                    let mode = EnrollmentMode::default();
                    store.write_u8(endpoint, attr::ENROLLMENT_MODE, mode as u8)?;
                    tracing::debug!(%endpoint, "enrollment: persisted default mode {mode:?}");
                    mode
                }
            };

            let state = match store.read_u8(endpoint, attr::ZONE_STATE)? {
                Some(raw) => ZoneState::from(raw),
                None => {
                    store.write_u8(endpoint, attr::ZONE_STATE, ZoneState::NotEnrolled as u8)?;
                    ZoneState::NotEnrolled
                }
            };

            let zone_id = match store.read_u8(endpoint, attr::ZONE_ID)? {
                Some(raw) => ZoneId(raw),
                None => {
                    store.write_u8(endpoint, attr::ZONE_ID, ZoneId::UNDEFINED.0)?;
                    ZoneId::UNDEFINED
                }
            };

            if store.read_u16(endpoint, attr::ZONE_TYPE)?.is_none() {
                store.write_u16(endpoint, attr::ZONE_TYPE, zone_type)?;
            }

            let record = EnrollmentRecord {
                endpoint,
                mode,
                enrolled: state == ZoneState::Enrolled,
                zone_id,
            };
            tracing::info!(
                %endpoint,
                enrolled = record.enrolled,
                zone_id = zone_id.0,
                "enrollment: loaded, mode {mode:?}"
            );
            records.insert(endpoint, record);
        }
        Ok(Self { records })
    }

    pub fn get(&self, endpoint: Endpoint) -> Option<&EnrollmentRecord> {
        self.records.get(&endpoint)
    }

    pub fn contains(&self, endpoint: Endpoint) -> bool {
        self.records.contains_key(&endpoint)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = Endpoint> + '_ {
        self.records.keys().copied()
    }

    pub fn snapshot(&self) -> Vec<EnrollmentRecord> {
        self.records.values().copied().collect()
    }

    pub fn mode(&self, endpoint: Endpoint) -> Result<EnrollmentMode, ZoneError> {
        Ok(self.record(endpoint)?.mode)
    }

    pub fn zone_id(&self, endpoint: Endpoint) -> Result<ZoneId, ZoneError> {
        Ok(self.record(endpoint)?.zone_id)
    }

    /// Enrolled according to the persisted ZoneState attribute.
    pub fn is_enrolled<S: AttributeStore>(
        &self,
        store: &S,
        endpoint: Endpoint,
    ) -> Result<bool, ZoneError> {
        self.record(endpoint)?;
        let state = store
            .read_u8(endpoint, attr::ZONE_STATE)?
            .map(ZoneState::from)
            .unwrap_or(ZoneState::NotEnrolled);
        Ok(state == ZoneState::Enrolled)
    }

    /// Change the enrollment mode. Refused while enrolled.
    pub fn set_mode<S: AttributeStore>(
        &mut self,
        store: &mut S,
        endpoint: Endpoint,
        raw_mode: u8,
    ) -> Result<EnrollmentMode, ZoneError> {
        if self.is_enrolled(store, endpoint)? {
            return Err(ZoneError::AlreadyEnrolled { endpoint });
        }
        let mode = EnrollmentMode::try_from(raw_mode)?;
        store.write_u8(endpoint, attr::ENROLLMENT_MODE, mode as u8)?;
        self.record_mut(endpoint)?.mode = mode;
        tracing::info!(%endpoint, "enrollment: mode set to {mode:?}");
        Ok(mode)
    }

    /// Apply the CIE's enroll response. Returns whether it was accepted.
    pub fn on_enroll_response<S: AttributeStore>(
        &mut self,
        store: &mut S,
        endpoint: Endpoint,
        code: EnrollResponseCode,
        zone_id: ZoneId,
    ) -> Result<bool, ZoneError> {
        self.record(endpoint)?;
        let accepted = code.is_success();
        let (state, zone_id) = if accepted {
            (ZoneState::Enrolled, zone_id)
        } else {
            (ZoneState::NotEnrolled, ZoneId::UNDEFINED)
        };
        store.write_u8(endpoint, attr::ZONE_STATE, state as u8)?;
        store.write_u8(endpoint, attr::ZONE_ID, zone_id.0)?;

        let record = self.record_mut(endpoint)?;
        record.enrolled = accepted;
        record.zone_id = zone_id;

        if accepted {
            tracing::info!(%endpoint, zone_id = zone_id.0, "enrollment: accepted by CIE");
        } else {
            tracing::warn!(%endpoint, "enrollment: rejected by CIE ({code:?})");
        }
        Ok(accepted)
    }

    /// Hard reset after the device left the network.
    pub fn on_network_left<S: AttributeStore>(
        &mut self,
        store: &mut S,
        endpoint: Endpoint,
    ) -> Result<(), ZoneError> {
        self.record(endpoint)?;
        store.write_u8(endpoint, attr::ZONE_STATE, ZoneState::NotEnrolled as u8)?;
        store.write_u8(endpoint, attr::ZONE_ID, ZoneId::UNDEFINED.0)?;
        store.write_u64(endpoint, attr::IAS_CIE_ADDRESS, IeeeAddress::UNSET.0)?;
        store.write_u8(endpoint, attr::ENROLLMENT_MODE, EnrollmentMode::Request as u8)?;

        let record = self.record_mut(endpoint)?;
        record.enrolled = false;
        record.zone_id = ZoneId::UNDEFINED;
        record.mode = EnrollmentMode::Request;
        tracing::info!(%endpoint, "enrollment: cleared after leaving network");
        Ok(())
    }

    /// Persist the address the CIE wrote into this endpoint.
    pub fn set_cie_address<S: AttributeStore>(
        &mut self,
        store: &mut S,
        endpoint: Endpoint,
        address: IeeeAddress,
    ) -> Result<(), ZoneError> {
        self.record(endpoint)?;
        store.write_u64(endpoint, attr::IAS_CIE_ADDRESS, address.0)?;
        tracing::debug!(%endpoint, "enrollment: CIE address {address}");
        Ok(())
    }

    pub fn cie_address<S: AttributeStore>(
        &self,
        store: &S,
        endpoint: Endpoint,
    ) -> Result<IeeeAddress, ZoneError> {
        self.record(endpoint)?;
        Ok(IeeeAddress(
            store.read_u64(endpoint, attr::IAS_CIE_ADDRESS)?.unwrap_or(0),
        ))
    }

    fn record(&self, endpoint: Endpoint) -> Result<&EnrollmentRecord, ZoneError> {
        self.records
            .get(&endpoint)
            .ok_or(ZoneError::UnknownEndpoint(endpoint))
    }

    fn record_mut(&mut self, endpoint: Endpoint) -> Result<&mut EnrollmentRecord, ZoneError> {
        self.records
            .get_mut(&endpoint)
            .ok_or(ZoneError::UnknownEndpoint(endpoint))
    }
}

/// Persisted mode, or `None` if missing or not a valid mode.
fn read_mode<S: AttributeStore>(
    store: &S,
    endpoint: Endpoint,
) -> Result<Option<EnrollmentMode>, ZoneError> {
    match store.read_u8(endpoint, attr::ENROLLMENT_MODE) {
        Ok(Some(raw)) => Ok(EnrollmentMode::try_from(raw).ok()),
        Ok(None) | Err(ZoneError::MalformedAttribute { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

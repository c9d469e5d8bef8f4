//! Persisted attribute storage.
//!
//! The zone server treats attributes as an opaque (endpoint, id) → bytes map.
//! Multi-byte values are little-endian, matching the ZCL wire encoding.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::ZoneError;
use crate::types::{AttributeId, Endpoint};

/// Key/value attribute storage.
pub trait AttributeStore {
    /// Read raw attribute bytes. `Ok(None)` if never written.
    fn read_attribute(
        &self,
        endpoint: Endpoint,
        id: AttributeId,
    ) -> Result<Option<Vec<u8>>, ZoneError>;

    /// Write raw attribute bytes, replacing any previous value.
    fn write_attribute(
        &mut self,
        endpoint: Endpoint,
        id: AttributeId,
        value: &[u8],
    ) -> Result<(), ZoneError>;
}

impl<S: AttributeStore + ?Sized> AttributeStore for Box<S> {
    fn read_attribute(
        &self,
        endpoint: Endpoint,
        id: AttributeId,
    ) -> Result<Option<Vec<u8>>, ZoneError> {
        (**self).read_attribute(endpoint, id)
    }

    fn write_attribute(
        &mut self,
        endpoint: Endpoint,
        id: AttributeId,
        value: &[u8],
    ) -> Result<(), ZoneError> {
        (**self).write_attribute(endpoint, id, value)
    }
}

/// Typed accessors on top of [`AttributeStore`].
pub trait AttributeStoreExt: AttributeStore {
    fn read_u8(&self, endpoint: Endpoint, id: AttributeId) -> Result<Option<u8>, ZoneError> {
        self.read_fixed::<1>(endpoint, id).map(|v| v.map(|b| b[0]))
    }

    fn read_u16(&self, endpoint: Endpoint, id: AttributeId) -> Result<Option<u16>, ZoneError> {
        self.read_fixed::<2>(endpoint, id)
            .map(|v| v.map(u16::from_le_bytes))
    }

    fn read_u64(&self, endpoint: Endpoint, id: AttributeId) -> Result<Option<u64>, ZoneError> {
        self.read_fixed::<8>(endpoint, id)
            .map(|v| v.map(u64::from_le_bytes))
    }

    fn write_u8(&mut self, endpoint: Endpoint, id: AttributeId, value: u8) -> Result<(), ZoneError> {
        self.write_attribute(endpoint, id, &[value])
    }

    fn write_u16(
        &mut self,
        endpoint: Endpoint,
        id: AttributeId,
        value: u16,
    ) -> Result<(), ZoneError> {
        self.write_attribute(endpoint, id, &value.to_le_bytes())
    }

    fn write_u64(
        &mut self,
        endpoint: Endpoint,
        id: AttributeId,
        value: u64,
    ) -> Result<(), ZoneError> {
        self.write_attribute(endpoint, id, &value.to_le_bytes())
    }

    /// Read an attribute that must be exactly `N` bytes long.
    fn read_fixed<const N: usize>(
        &self,
        endpoint: Endpoint,
        id: AttributeId,
    ) -> Result<Option<[u8; N]>, ZoneError> {
        let Some(bytes) = self.read_attribute(endpoint, id)? else {
            return Ok(None);
        };
        let len = bytes.len();
        let fixed: [u8; N] = bytes
            .try_into()
            .map_err(|_| ZoneError::MalformedAttribute { endpoint, id, len })?;
        Ok(Some(fixed))
    }
}

impl<S: AttributeStore + ?Sized> AttributeStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::attr;

    #[test]
    fn typed_roundtrip_is_little_endian() {
        let mut store = MemoryStore::new();
        let ep = Endpoint(1);
        store.write_u16(ep, attr::ZONE_STATUS, 0x0102).unwrap();
        assert_eq!(
            store.read_attribute(ep, attr::ZONE_STATUS).unwrap(),
            Some(vec![0x02, 0x01])
        );
        assert_eq!(store.read_u16(ep, attr::ZONE_STATUS).unwrap(), Some(0x0102));

        store.write_u64(ep, attr::IAS_CIE_ADDRESS, 0xAABBCCDD).unwrap();
        assert_eq!(
            store.read_u64(ep, attr::IAS_CIE_ADDRESS).unwrap(),
            Some(0xAABBCCDD)
        );
    }

    #[test]
    fn missing_attribute_reads_none() {
        let store = MemoryStore::new();
        assert_eq!(store.read_u8(Endpoint(1), attr::ZONE_ID).unwrap(), None);
    }

    #[test]
    fn wrong_length_is_malformed() {
        let mut store = MemoryStore::new();
        let ep = Endpoint(3);
        store.write_attribute(ep, attr::ZONE_STATUS, &[1, 2, 3]).unwrap();
        let err = store.read_u16(ep, attr::ZONE_STATUS).unwrap_err();
        assert!(matches!(
            err,
            ZoneError::MalformedAttribute { len: 3, .. }
        ));
    }

    #[test]
    fn boxed_store_delegates() {
        let mut store: Box<dyn AttributeStore> = Box::new(MemoryStore::new());
        store.write_u8(Endpoint(1), attr::ZONE_ID, 7).unwrap();
        assert_eq!(store.read_u8(Endpoint(1), attr::ZONE_ID).unwrap(), Some(7));
    }
}

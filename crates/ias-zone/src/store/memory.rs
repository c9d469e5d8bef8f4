use std::collections::HashMap;

use crate::error::ZoneError;
use crate::store::AttributeStore;
use crate::types::{AttributeId, Endpoint};

/// Volatile attribute store, for tests and simulation.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    attributes: HashMap<(Endpoint, AttributeId), Vec<u8>>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (to exercise error propagation).
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl AttributeStore for MemoryStore {
    fn read_attribute(
        &self,
        endpoint: Endpoint,
        id: AttributeId,
    ) -> Result<Option<Vec<u8>>, ZoneError> {
        Ok(self.attributes.get(&(endpoint, id)).cloned())
    }

    fn write_attribute(
        &mut self,
        endpoint: Endpoint,
        id: AttributeId,
        value: &[u8],
    ) -> Result<(), ZoneError> {
        if self.fail_writes {
            return Err(ZoneError::Storage(format!(
                "write of {id:#06x} on {endpoint} refused"
            )));
        }
        self.attributes.insert((endpoint, id), value.to_vec());
        Ok(())
    }
}

//! SQLite-backed attribute store.
//!
//! One row per (endpoint, attribute). Survives restarts, which is what keeps
//! enrollment state and the last zone status across power cycles.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ZoneError;
use crate::store::AttributeStore;
use crate::types::{AttributeId, Endpoint};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS zone_attributes (
    endpoint     INTEGER NOT NULL,
    attribute_id INTEGER NOT NULL,
    value        BLOB    NOT NULL,
    PRIMARY KEY (endpoint, attribute_id)
)";

/// Persistent attribute store on a SQLite database file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ZoneError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Throwaway database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, ZoneError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, ZoneError> {
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn })
    }

    /// Number of stored attributes across all endpoints.
    pub fn count(&self) -> Result<usize, ZoneError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM zone_attributes", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl AttributeStore for SqliteStore {
    fn read_attribute(
        &self,
        endpoint: Endpoint,
        id: AttributeId,
    ) -> Result<Option<Vec<u8>>, ZoneError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM zone_attributes WHERE endpoint = ?1 AND attribute_id = ?2",
                params![endpoint.0, id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write_attribute(
        &mut self,
        endpoint: Endpoint,
        id: AttributeId,
        value: &[u8],
    ) -> Result<(), ZoneError> {
        self.conn.execute(
            "INSERT INTO zone_attributes (endpoint, attribute_id, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(endpoint, attribute_id) DO UPDATE SET value = excluded.value",
            params![endpoint.0, id, value],
        )?;
        Ok(())
    }
}

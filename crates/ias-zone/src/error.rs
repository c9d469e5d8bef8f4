use crate::frame::FrameError;
use crate::types::{AttributeId, Endpoint};

/// Errors returned synchronously by the zone server.
///
/// Delivery failures never show up here: they are retried, logged and
/// surfaced as [`ZoneEvent`](crate::ZoneEvent)s instead.
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("endpoint {endpoint} is already enrolled")]
    AlreadyEnrolled { endpoint: Endpoint },

    #[error("invalid enrollment mode: {0}")]
    InvalidMode(u8),

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(Endpoint),

    #[error("malformed attribute {id:#06x} on {endpoint}: {len} bytes")]
    MalformedAttribute {
        endpoint: Endpoint,
        id: AttributeId,
        len: usize,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("runtime stopped")]
    RuntimeStopped,
}

impl ZoneError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ZoneError::InvalidParameter {
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for ZoneError {
    fn from(e: rusqlite::Error) -> Self {
        ZoneError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for ZoneError {
    fn from(e: std::io::Error) -> Self {
        ZoneError::Storage(e.to_string())
    }
}

/// Local (synchronous) refusal by the transport. The message never left.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("no route to bound CIE")]
    NoRoute,

    #[error("transport busy")]
    Busy,

    #[error("network down")]
    NetworkDown,

    #[error("send failed: {0}")]
    Other(String),
}

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::SendError;
use crate::types::{Endpoint, SendResult};

/// Unicast path to the CIE bound to an endpoint.
///
/// In production: the radio stack's APS unicast.
/// In tests: MockTransport (records frames, scripted outcomes).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hand a frame to the stack.
    ///
    /// `Err` means the frame never left (no route, busy, ...). On `Ok` the
    /// receiver resolves exactly once with the delivery outcome; a dropped
    /// sender counts as [`SendResult::OtherFailure`].
    async fn send_to_bound_peer(
        &self,
        endpoint: Endpoint,
        frame: Bytes,
    ) -> Result<oneshot::Receiver<SendResult>, SendError>;
}

// ── MockTransport (tests) ───────────────────────────────────────────

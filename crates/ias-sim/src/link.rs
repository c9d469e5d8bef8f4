//! Simulated unicast link to the CIE.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ias_zone::{Endpoint, SendError, SendResult, Transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::oneshot;

/// Drops a fixed fraction of frames and answers the rest after `latency`.
/// While the link is down every send is refused locally.
#[derive(Clone)]
pub struct LossyLink {
    rng: Arc<Mutex<StdRng>>,
    loss: f64,
    latency: Duration,
    up: Arc<AtomicBool>,
}

impl LossyLink {
    pub fn new(loss: f64, seed: u64, latency: Duration) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            loss,
            latency,
            up: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Relaxed);
    }

    fn roll(&self) -> SendResult {
        // A poisoned rng is still a valid rng; keep the seeded sequence going.
        let lost = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_bool(self.loss);
        if lost {
            SendResult::NoAckReceived
        } else {
            SendResult::Delivered
        }
    }
}

#[async_trait]
impl Transport for LossyLink {
    async fn send_to_bound_peer(
        &self,
        endpoint: Endpoint,
        frame: Bytes,
    ) -> Result<oneshot::Receiver<SendResult>, SendError> {
        if !self.up.load(Ordering::Relaxed) {
            return Err(SendError::NetworkDown);
        }
        let result = self.roll();
        tracing::debug!(%endpoint, len = frame.len(), ?result, "link: frame");

        let (tx, rx) = oneshot::channel();
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let _ = tx.send(result);
        });
        Ok(rx)
    }
}

use std::io::Write;

use ias_zone::{QueueEntry, ZoneEvent};
use serde::Serialize;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

// ── Run events ──────────────────────────────────────────────────

/// A zone event stamped with simulated time.
#[derive(Serialize)]
pub struct EventZone<'a> {
    pub t_ms: u64,
    #[serde(flatten)]
    pub zone: &'a ZoneEvent,
}

#[derive(Serialize)]
pub struct EventUpdate {
    pub event: &'static str,
    pub t_ms: u64,
    pub seq: u32,
    pub status: u16,
}

#[derive(Serialize)]
pub struct EventNetwork {
    pub event: &'static str,
    pub t_ms: u64,
    pub up: bool,
}

#[derive(Serialize)]
pub struct EventRunSummary {
    pub event: &'static str,
    pub updates: u32,
    pub attempts: u64,
    pub delivered: u64,
    pub retries: u64,
    pub dropped: u64,
    pub overwritten: u64,
    pub local_failures: u64,
    pub peak_queue_depth: u64,
    pub remaining: Vec<QueueEntry>,
    pub elapsed_s: f64,
}

// ── Backoff events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventBackoffStep {
    pub event: &'static str,
    pub attempt: u32,
    pub backoff_secs: u32,
    pub cumulative_secs: u64,
}

#[derive(Serialize)]
pub struct EventBackoffEnd {
    pub event: &'static str,
    pub attempts: u32,
    pub exhausted: bool,
    pub total_wait_secs: u64,
}

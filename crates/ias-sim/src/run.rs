use std::path::PathBuf;
use std::time::Duration;

use ias_zone::{
    EnrollResponseCode, MemoryStore, NetworkDownReason, RuntimeConfig, SchedulerState,
    ZoneConfig, ZoneId, ZoneRuntime, ZoneServer, ZoneStatus,
};
use tokio::time::Instant;

use crate::events::{emit, EventNetwork, EventRunSummary, EventUpdate, EventZone};
use crate::link::LossyLink;

/// Longest the run waits for the queue to drain after the last update.
const SETTLE_LIMIT: Duration = Duration::from_secs(24 * 3600);

pub struct RunConfig {
    pub updates: u32,
    pub interval_ms: u64,
    pub loss: f64,
    pub seed: u64,
    pub latency_ms: u64,
    pub capacity: Option<usize>,
    pub config: Option<PathBuf>,
    /// (start, duration) of a network outage, in ms.
    pub outage: Option<(u64, u64)>,
}

pub async fn run(cfg: RunConfig) -> anyhow::Result<()> {
    let mut zone_config = match &cfg.config {
        Some(path) => ZoneConfig::from_json_file(path)?,
        None => ZoneConfig::new(),
    };
    if let Some(capacity) = cfg.capacity {
        zone_config = zone_config.queue_capacity(capacity);
    }
    let endpoint = *zone_config
        .endpoints
        .first()
        .ok_or_else(|| anyhow::anyhow!("configuration has no endpoints"))?;

    let server = ZoneServer::new(zone_config, MemoryStore::new())?;
    let link = LossyLink::new(cfg.loss, cfg.seed, Duration::from_millis(cfg.latency_ms));
    let ch = ZoneRuntime::spawn(server, link.clone(), RuntimeConfig::default());
    let start = Instant::now();
    let t_ms = move || start.elapsed().as_millis() as u64;

    let mut events = ch.events;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            emit(&EventZone {
                t_ms: t_ms(),
                zone: &event,
            });
        }
    });

    ch.handle
        .enroll_response(endpoint, EnrollResponseCode::Success, ZoneId(1))
        .await?;

    let mut outage_state = cfg.outage.map(|(at, len)| (at, at + len, false));
    for seq in 0..cfg.updates {
        let status = if seq % 2 == 0 {
            ZoneStatus::ALARM1
        } else {
            0
        };
        emit(&EventUpdate {
            event: "update",
            t_ms: t_ms(),
            seq,
            status,
        });
        ch.handle
            .update_zone_status(endpoint, ZoneStatus(status), 0)
            .await?;
        tokio::time::sleep(Duration::from_millis(cfg.interval_ms)).await;

        if let Some((down_at, up_at, down)) = outage_state.as_mut() {
            let now = t_ms();
            if !*down && now >= *down_at && now < *up_at {
                link.set_up(false);
                ch.handle.network_down(NetworkDownReason::ParentLost).await?;
                emit(&EventNetwork {
                    event: "network",
                    t_ms: now,
                    up: false,
                });
                *down = true;
            } else if *down && now >= *up_at {
                bring_up(&link, &ch.handle, now).await?;
                outage_state = None;
            }
        }
    }
    if let Some((_, up_at, true)) = outage_state {
        let now = t_ms();
        tokio::time::sleep(Duration::from_millis(up_at.saturating_sub(now))).await;
        bring_up(&link, &ch.handle, t_ms()).await?;
    }

    let deadline = Instant::now() + SETTLE_LIMIT;
    let remaining = loop {
        let diagnostics = ch.handle.diagnostics().await?;
        let settled = diagnostics.queue.is_empty() && diagnostics.scheduler == SchedulerState::Idle;
        if settled || diagnostics.parked.is_some() || Instant::now() >= deadline {
            break diagnostics.queue;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    };

    let elapsed_s = start.elapsed().as_secs_f64();
    ch.handle.shutdown().await;
    ch.task.await?;
    printer.await?;

    let stats = &ch.stats;
    emit(&EventRunSummary {
        event: "summary",
        updates: cfg.updates,
        attempts: stats.attempts.get(),
        delivered: stats.delivered.get(),
        retries: stats.retries.get(),
        dropped: stats.dropped.get(),
        overwritten: stats.overwritten.get(),
        local_failures: stats.local_failures.get(),
        peak_queue_depth: stats.queue_depth.peak(),
        remaining,
        elapsed_s,
    });
    Ok(())
}

async fn bring_up(link: &LossyLink, handle: &ias_zone::ZoneHandle, now: u64) -> anyhow::Result<()> {
    link.set_up(true);
    handle.network_up().await?;
    emit(&EventNetwork {
        event: "network",
        t_ms: now,
        up: true,
    });
    Ok(())
}

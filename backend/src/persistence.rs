//! # persistence
//!
//! Outbound lap-record sink: closed laps are queued in a bounded in-memory
//! buffer and POSTed to the tournament API by a single worker. Submission is
//! best-effort — the queue drops its oldest record on overflow, failures are
//! logged and never retried here (the remote sink owns retries), and nothing
//! on this path ever blocks the ingress pipeline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::scoring::{round3, LapScore};

/// Pending records beyond this are dropped oldest-first.
const QUEUE_CAPACITY: usize = 64;

/// Wire shape of one persisted lap.
#[derive(Debug, Clone, Serialize)]
pub struct LapRecord {
    pub gp_id: i64,
    pub lap_number: u32,
    pub raw_time: f64,
    /// None for voided laps.
    pub elp_time: Option<f64>,
    pub penalty: f64,
    pub bonus: f64,
    pub wall_hits: u32,
    pub atk_hits: u32,
    pub vic_hits: u32,
    pub corner_cuts: u32,
    pub voided: bool,
}

impl LapRecord {
    pub fn new(gp_id: i64, lap: &LapScore) -> Self {
        Self {
            gp_id,
            lap_number: lap.lap_number,
            raw_time: round3(lap.raw),
            elp_time: lap.elp_finite().map(round3),
            penalty: round3(lap.penalty),
            bonus: round3(lap.bonus),
            wall_hits: lap.wall_hits,
            atk_hits: lap.atk_hits,
            vic_hits: lap.vic_hits,
            corner_cuts: lap.corner_cuts,
            voided: lap.voided,
        }
    }
}

// ── Sink handle ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct LapSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    queue: Mutex<VecDeque<LapRecord>>,
    notify: Notify,
}

impl LapSink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SinkInner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue one record; drops the oldest pending record on overflow.
    pub fn submit(&self, record: LapRecord) {
        if let Ok(mut queue) = self.inner.queue.lock() {
            queue.push_back(record);
            if queue.len() > QUEUE_CAPACITY {
                queue.pop_front();
                warn!("lap sink queue full — dropped oldest record");
            }
        }
        self.inner.notify.notify_one();
    }

    fn pop(&self) -> Option<LapRecord> {
        self.inner.queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

impl Default for LapSink {
    fn default() -> Self {
        Self::new()
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

/// Drain the sink queue, POSTing each record to the configured endpoint.
/// With no endpoint configured (local dev), records are drained and dropped.
pub async fn run_lap_sink(sink: LapSink, url: Option<String>, mut shutdown: watch::Receiver<bool>) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!("lap sink disabled — could not build HTTP client: {e}");
            return;
        }
    };
    match &url {
        Some(u) => info!("lap sink posting to {u}"),
        None => info!("lap sink running without LAP_API_URL — records will be dropped"),
    }

    loop {
        tokio::select! {
            _ = sink.inner.notify.notified() => {}
            _ = shutdown.changed() => return,
        }
        while let Some(record) = sink.pop() {
            let Some(url) = &url else {
                debug!(
                    "lap record dropped (no endpoint): gp={} lap={}",
                    record.gp_id, record.lap_number
                );
                continue;
            };
            match client.post(url).json(&record).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        "lap saved: gp={} lap={} elp={:?}",
                        record.gp_id, record.lap_number, record.elp_time
                    );
                }
                Ok(resp) => {
                    warn!(
                        "lap save rejected (HTTP {}): gp={} lap={}",
                        resp.status(),
                        record.gp_id,
                        record.lap_number
                    );
                }
                Err(e) => {
                    warn!("lap save failed: gp={} lap={}: {e}", record.gp_id, record.lap_number);
                }
            }
        }
    }
}

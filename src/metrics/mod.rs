//! Metrics for witness-proof handling
//!
//! Named counters and latency histograms shared by the handler and the
//! delivery layer. `snapshot()` renders everything as JSON for a status
//! endpoint or a log line.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

/// Upper bounds of the latency buckets, in seconds
const LATENCY_BUCKETS: [f64; 10] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

/// Metrics registry
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
}

/// Shared handle for `name`, created on first use
async fn handle<T: Default>(map: &RwLock<HashMap<String, Arc<T>>>, name: &str) -> Arc<T> {
    if let Some(existing) = map.read().await.get(name) {
        return existing.clone();
    }
    map.write()
        .await
        .entry(name.to_string())
        .or_default()
        .clone()
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    pub async fn add_counter(&self, name: &str, value: u64) {
        handle(&self.counters, name)
            .await
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Current value; zero for a counter never touched
    pub async fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .await
            .get(name)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Record a latency in seconds
    pub async fn observe_histogram(&self, name: &str, seconds: f64) {
        handle(&self.histograms, name).await.observe(seconds);
    }

    /// Observations recorded under `name`
    pub async fn histogram_count(&self, name: &str) -> u64 {
        self.histograms
            .read()
            .await
            .get(name)
            .map_or(0, |h| h.count.load(Ordering::Relaxed))
    }

    /// Every counter and histogram as JSON
    pub async fn snapshot(&self) -> serde_json::Value {
        let counters: serde_json::Map<String, serde_json::Value> = self
            .counters
            .read()
            .await
            .iter()
            .map(|(name, c)| (name.clone(), c.load(Ordering::Relaxed).into()))
            .collect();

        let histograms: serde_json::Map<String, serde_json::Value> = self
            .histograms
            .read()
            .await
            .iter()
            .map(|(name, h)| (name.clone(), h.snapshot()))
            .collect();

        serde_json::json!({ "counters": counters, "histograms": histograms })
    }
}

/// Latency histogram over [`LATENCY_BUCKETS`]
struct Histogram {
    /// Per-bucket counts; values above the last bound only reach `count`
    buckets: [AtomicU64; LATENCY_BUCKETS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    fn observe(&self, seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);

        if let Some(i) = LATENCY_BUCKETS.iter().position(|le| seconds <= *le) {
            self.buckets[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let buckets: Vec<serde_json::Value> = LATENCY_BUCKETS
            .iter()
            .zip(&self.buckets)
            .map(|(le, n)| serde_json::json!({ "le": le, "count": n.load(Ordering::Relaxed) }))
            .collect();

        serde_json::json!({
            "count": self.count.load(Ordering::Relaxed),
            "sum_seconds": self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            "buckets": buckets,
        })
    }
}

/// Metric names recorded by the witness handler
pub mod metric_names {
    pub const PROOFS_RECEIVED: &str = "witness.proofs.received";
    pub const PROOFS_ACCEPTED: &str = "witness.proofs.accepted";
    pub const PROOFS_EXPIRED: &str = "witness.proofs.expired";
    pub const PROOFS_AFTER_COMPLETION: &str = "witness.proofs.after_completion";
    pub const PROOFS_FAILED: &str = "witness.proofs.failed";

    pub const ANCHORS_FINALIZED: &str = "witness.anchors.finalized";
    pub const FINALIZE_RACES_LOST: &str = "witness.anchors.finalize_races_lost";

    pub const HANDLE_LATENCY: &str = "witness.handle.latency_seconds";

    pub const DELIVERIES_RETRIED: &str = "witness.deliveries.retried";
    pub const DELIVERIES_REJECTED: &str = "witness.deliveries.rejected";
}

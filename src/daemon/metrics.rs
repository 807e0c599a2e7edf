//! Daemon telemetry.
//!
//! Per-operation counters and bounded latency samples, plus connection
//! and cache counters. Snapshots clone under a brief lock and compute
//! percentiles outside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Bounded latency sample count per operation.
const MAX_SAMPLES: usize = 1000;

#[derive(Debug, Default, Clone)]
struct OpStats {
    count: u64,
    errors: u64,
    /// Milliseconds, most recent last, capped at [`MAX_SAMPLES`].
    samples: Vec<f64>,
}

/// Telemetry registry owned by the server instance.
#[derive(Debug, Default)]
pub struct Metrics {
    ops: Mutex<HashMap<String, OpStats>>,
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
    mutation_drops: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request's outcome and latency.
    pub fn record(&self, operation: &str, latency: Duration, ok: bool) {
        let mut ops = self.ops.lock();
        let stats = ops.entry(operation.to_string()).or_default();
        stats.count += 1;
        if !ok {
            stats.errors += 1;
        }
        if stats.samples.len() >= MAX_SAMPLES {
            stats.samples.remove(0);
        }
        stats.samples.push(latency.as_secs_f64() * 1000.0);
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_eviction(&self, count: u64) {
        self.cache_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn mutation_dropped(&self) {
        self.mutation_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the registry. The ops map is cloned under the lock;
    /// percentile math happens after release.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let ops: HashMap<String, OpStats> = self.ops.lock().clone();

        let operations = ops
            .into_iter()
            .map(|(name, stats)| {
                let summary = summarize(&stats);
                (name, summary)
            })
            .collect();

        MetricsSnapshot {
            operations,
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            mutation_drops: self.mutation_drops.load(Ordering::Relaxed),
        }
    }
}

fn summarize(stats: &OpStats) -> OperationSummary {
    let mut sorted = stats.samples.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let percentile = |p: f64| -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let rank = (p * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    };

    let (min, max) = match (sorted.first(), sorted.last()) {
        (Some(min), Some(max)) => (*min, *max),
        _ => (0.0, 0.0),
    };
    let avg = if sorted.is_empty() {
        0.0
    } else {
        sorted.iter().sum::<f64>() / sorted.len() as f64
    };

    OperationSummary {
        count: stats.count,
        errors: stats.errors,
        p50_ms: percentile(0.50),
        p95_ms: percentile(0.95),
        p99_ms: percentile(0.99),
        min_ms: min,
        max_ms: max,
        avg_ms: avg,
    }
}

/// Latency summary for one operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationSummary {
    pub count: u64,
    pub errors: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
}

/// Full telemetry snapshot returned by the `metrics` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub operations: HashMap<String, OperationSummary>,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub mutation_drops: u64,
}

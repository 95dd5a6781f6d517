//! Observability counters for the price engine
//!
//! Atomic counters shared across the pipeline. They back log lines and test
//! assertions; there is no external metrics endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

/// Core counters for the price engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    // Fetching
    pub fetches_attempted: AtomicU64,
    pub fetches_soft_failed: AtomicU64,

    // Cache
    pub cache_writes: AtomicU64,
    pub cache_write_errors: AtomicU64,
    pub cache_fallback_reads: AtomicU64,

    // Variation log
    pub variation_appends: AtomicU64,

    // Broadcasting
    pub broadcasts_sent: AtomicU64,
    pub broadcast_send_failures: AtomicU64,

    // Aggregation
    pub aggregator_runs: AtomicU64,
    pub items_aggregated: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch_attempted(&self) {
        self.fetches_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_soft_failed(&self) {
        self.fetches_soft_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_write(&self) {
        self.cache_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_write_error(&self) {
        self.cache_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_fallback_read(&self) {
        self.cache_fallback_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_variation_append(&self) {
        self.variation_appends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self) {
        self.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast_failure(&self) {
        self.broadcast_send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregator_run(&self, items: u64) {
        self.aggregator_runs.fetch_add(1, Ordering::Relaxed);
        self.items_aggregated.fetch_add(items, Ordering::Relaxed);
    }

    /// Point-in-time snapshot for logging.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetches_attempted: self.fetches_attempted.load(Ordering::Relaxed),
            fetches_soft_failed: self.fetches_soft_failed.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            cache_write_errors: self.cache_write_errors.load(Ordering::Relaxed),
            cache_fallback_reads: self.cache_fallback_reads.load(Ordering::Relaxed),
            variation_appends: self.variation_appends.load(Ordering::Relaxed),
            broadcasts_sent: self.broadcasts_sent.load(Ordering::Relaxed),
            broadcast_send_failures: self.broadcast_send_failures.load(Ordering::Relaxed),
            aggregator_runs: self.aggregator_runs.load(Ordering::Relaxed),
            items_aggregated: self.items_aggregated.load(Ordering::Relaxed),
        }
    }
}

/// A consistent-enough view of the counters at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub fetches_attempted: u64,
    pub fetches_soft_failed: u64,
    pub cache_writes: u64,
    pub cache_write_errors: u64,
    pub cache_fallback_reads: u64,
    pub variation_appends: u64,
    pub broadcasts_sent: u64,
    pub broadcast_send_failures: u64,
    pub aggregator_runs: u64,
    pub items_aggregated: u64,
}

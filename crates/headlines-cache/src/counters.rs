//! Hit/miss counters.
//!
//! The cache reports through the [`Counters`] trait so that counting stays
//! fire-and-forget and off the correctness path. [`MetricsCounters`] forwards
//! to the `metrics` facade (Prometheus in the server); [`InMemoryCounters`]
//! keeps totals locally for tests and stats endpoints.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_STALE_SERVED_TOTAL: &str = "cache_stale_served_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "cache_evictions_total";
    pub const CACHE_WARM_CYCLES_TOTAL: &str = "cache_warm_cycles_total";
    pub const CACHE_WARM_FAILURES_TOTAL: &str = "cache_warm_failures_total";
    pub const CACHE_PREFILL_FAILURES_TOTAL: &str = "cache_prefill_failures_total";
}

/// Sink for named, per-namespace counters.
pub trait Counters: Send + Sync {
    fn increment_by(&self, name: &'static str, namespace: &str, value: u64);

    fn increment(&self, name: &'static str, namespace: &str) {
        self.increment_by(name, namespace, 1);
    }
}

/// Forwards to the globally installed `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCounters;

impl Counters for MetricsCounters {
    fn increment_by(&self, name: &'static str, namespace: &str, value: u64) {
        counter!(name, "namespace" => namespace.to_string()).increment(value);
    }
}

/// Keeps totals in process.
#[derive(Debug, Default)]
pub struct InMemoryCounters {
    counts: DashMap<(&'static str, String), u64>,
}

impl InMemoryCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current total for `name` in `namespace`.
    pub fn get(&self, name: &'static str, namespace: &str) -> u64 {
        self.counts
            .get(&(name, namespace.to_string()))
            .map(|v| *v)
            .unwrap_or(0)
    }
}

impl Counters for InMemoryCounters {
    fn increment_by(&self, name: &'static str, namespace: &str, value: u64) {
        *self
            .counts
            .entry((name, namespace.to_string()))
            .or_insert(0) += value;
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCounters;

impl Counters for NoopCounters {
    fn increment_by(&self, _name: &'static str, _namespace: &str, _value: u64) {}
}

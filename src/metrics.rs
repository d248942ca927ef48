//! Process-wide counters exposed over the `/metrics` endpoint.
//!
//! Grounded on the atomic, RAII-free counter style of the storage pool's
//! read counters: plain `AtomicU64`s updated inline, snapshotted into a
//! plain struct for serialization rather than pulling in a metrics crate
//! with no other precedent in this codebase.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_coalesced: AtomicU64,
    pub cache_evictions: AtomicU64,
    pub decode_errors: AtomicU64,
    pub prefetch_completed: AtomicU64,
    pub prefetch_dropped: AtomicU64,
    /// Current estimated bytes held by `Ready` cache entries. A gauge, not a
    /// counter: observability only, never consulted by eviction (baseline
    /// eviction is count-bounded).
    pub bytes_cached: AtomicU64,
}

#[derive(Debug, Serialize, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_coalesced: u64,
    pub cache_evictions: u64,
    pub decode_errors: u64,
    pub prefetch_completed: u64,
    pub prefetch_dropped: u64,
    pub bytes_cached: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_coalesced(&self) {
        self.cache_coalesced.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_eviction(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_prefetch_completed(&self) {
        self.prefetch_completed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_prefetch_dropped(&self) {
        self.prefetch_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_cached(&self, bytes: u64) {
        self.bytes_cached.fetch_add(bytes, Ordering::Relaxed);
    }
    pub fn sub_bytes_cached(&self, bytes: u64) {
        self.bytes_cached.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_coalesced: self.cache_coalesced.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            prefetch_completed: self.prefetch_completed.load(Ordering::Relaxed),
            prefetch_dropped: self.prefetch_dropped.load(Ordering::Relaxed),
            bytes_cached: self.bytes_cached.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = Metrics::new();
        metrics.inc_hit();
        metrics.inc_hit();
        metrics.inc_miss();
        let snap = metrics.snapshot();
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 1);
    }
}

//! Interception counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the agent's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Requests answered from a cache bucket.
    pub cache_hits: u64,
    /// Requests that missed and went to the network.
    pub cache_misses: u64,
    /// Requests passed through because the agent was not active.
    pub passthrough: u64,
    /// Live fetches that failed at the transport level.
    pub network_errors: u64,
    /// Assets stored by the last successful install.
    pub precached: u64,
}

impl FetchStats {
    /// Fraction of intercepted requests served from cache, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Lock-free counters updated by concurrent fetch handlers.
#[derive(Debug, Default)]
pub struct FetchStatsTracker {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    passthrough: AtomicU64,
    network_errors: AtomicU64,
    precached: AtomicU64,
}

impl FetchStatsTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            passthrough: AtomicU64::new(0),
            network_errors: AtomicU64::new(0),
            precached: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_precached(&self, count: u64) {
        self.precached.store(count, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> FetchStats {
        FetchStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            precached: self.precached.load(Ordering::Relaxed),
        }
    }
}

//! Monotonic statistics counter bundle.

use std::sync::atomic::{AtomicU64, Ordering};

use gridcache_core::CacheStats;

/// Monotonic counter bundle shared by the pipeline, evictor, and dispatcher.
///
/// Counters use relaxed ordering: each is an independent monotonic tally and
/// no cross-counter consistency is promised by a snapshot.
#[derive(Debug, Default)]
pub struct StatisticsCalculator {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    evictions: AtomicU64,
    expiries: AtomicU64,
    dropped_events: AtomicU64,
}

impl StatisticsCalculator {
    /// Creates a bundle with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a read that observed a live entry.
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a read that observed no live entry.
    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an installed value.
    pub fn put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an explicit removal.
    pub fn removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a capacity eviction.
    pub fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an expiry-driven removal.
    pub fn expiry(&self) {
        self.expiries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an event dropped on a full listener queue.
    pub fn event_dropped(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expiries: self.expiries.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }
}

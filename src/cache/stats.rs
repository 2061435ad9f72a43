//! Cache Statistics Module
//!
//! Tracks hits, misses and fetch activity. Counters are atomics so every
//! caller can record without taking a cache lock.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Stats Recorder ==
/// Live counters shared by all callers of one cache.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
    coalesced: AtomicU64,
    updates: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters into a plain snapshot.
    pub(crate) fn snapshot(&self, total_entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            total_entries,
        }
    }
}

// == Cache Stats ==
/// Point-in-time view of cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// `get` calls answered from the store
    pub hits: u64,
    /// `get` calls that missed the fast path
    pub misses: u64,
    /// Times the fetcher was invoked
    pub fetches: u64,
    /// Fetcher invocations that returned an error
    pub fetch_errors: u64,
    /// Callers that waited on another caller's fetch instead of fetching
    pub coalesced: u64,
    /// Forced refreshes requested through `update`
    pub updates: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, evictions and
//! expirations.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
///
/// Counters are cumulative since creation or the last `reset`; `size`,
/// `memory_usage` and `uptime_ms` are point-in-time values filled in when a
/// snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found or expired)
    pub misses: u64,
    /// Number of entries removed by the eviction strategy
    pub evictions: u64,
    /// Number of entries removed because their deadline passed
    pub expirations: u64,
    /// Number of successful writes
    pub sets: u64,
    /// Number of manual deletions
    pub deletes: u64,
    /// Current number of entries in the cache
    pub size: usize,
    /// Sum of the estimated entry sizes, in bytes
    pub memory_usage: usize,
    /// Milliseconds since the cache was created
    pub uptime_ms: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

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

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_delete(&mut self) {
        self.deletes += 1;
    }

    // == Reset ==
    /// Zeroes the cumulative counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

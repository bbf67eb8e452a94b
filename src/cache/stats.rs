//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.
//! Counters are atomics so the read path never takes a lock to record them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Counters ==
/// Live counters shared by the façade, read tracker and pipeline worker.
#[derive(Debug, Default)]
pub struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    dropped_reads: AtomicU64,
    rejected_writes: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// One access batch discarded because the access queue was full.
    pub fn record_dropped_reads(&self) {
        self.dropped_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_write(&self) {
        self.rejected_writes.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    pub fn snapshot(&self, total_entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            dropped_reads: self.dropped_reads.load(Ordering::Relaxed),
            rejected_writes: self.rejected_writes.load(Ordering::Relaxed),
            total_entries,
        }
    }
}

// == Cache Stats ==
/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads that found a live value
    pub hits: u64,
    /// Reads that found nothing or a stale value
    pub misses: u64,
    /// Entries removed by the LRU policy
    pub evictions: u64,
    /// Entries removed by the expiration timer
    pub expirations: u64,
    /// Access batches dropped under load
    pub dropped_reads: u64,
    /// Mutations the write queue refused
    pub rejected_writes: u64,
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

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = Counters::new().snapshot(0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counters = Counters::new();
        counters.record_hit();
        counters.record_miss();
        assert_eq!(counters.snapshot(1).hit_rate(), 0.5);
    }

    #[test]
    fn test_record_counters() {
        let counters = Counters::new();
        counters.record_eviction();
        counters.record_eviction();
        counters.record_expiration();
        counters.record_dropped_reads();
        counters.record_rejected_write();

        let stats = counters.snapshot(42);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.dropped_reads, 1);
        assert_eq!(stats.rejected_writes, 1);
        assert_eq!(stats.total_entries, 42);
    }
}

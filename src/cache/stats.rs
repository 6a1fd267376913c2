//! Cache Statistics Module
//!
//! Counts lookup outcomes so the degraded paths are visible to operators.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of lookup counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered by the first store read
    pub hits: u64,
    /// Lookups that entered the miss path
    pub misses: u64,
    /// Misses answered by the re-read under the distributed lock
    pub double_check_hits: u64,
    /// Distributed locks acquired
    pub locks_obtained: u64,
    /// Misses that proceeded without the distributed lock
    pub locks_unavailable: u64,
    /// Successful producer invocations
    pub productions: u64,
    /// Failed producer invocations
    pub producer_failures: u64,
    /// Produced values that could not be written back
    pub write_failures: u64,
    /// Store reads that failed and were treated as misses
    pub read_errors: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Share of lookups served from the store without producing.
    ///
    /// Returns 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.double_check_hits) as f64 / total as f64
        }
    }
}

/// Lock-free counters shared by concurrent lookups.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    double_check_hits: AtomicU64,
    locks_obtained: AtomicU64,
    locks_unavailable: AtomicU64,
    productions: AtomicU64,
    producer_failures: AtomicU64,
    write_failures: AtomicU64,
    read_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StatsRecorder {
    pub fn record_hit(&self) {
        bump(&self.hits);
    }

    pub fn record_miss(&self) {
        bump(&self.misses);
    }

    pub fn record_double_check_hit(&self) {
        bump(&self.double_check_hits);
    }

    pub fn record_lock_obtained(&self) {
        bump(&self.locks_obtained);
    }

    pub fn record_lock_unavailable(&self) {
        bump(&self.locks_unavailable);
    }

    pub fn record_production(&self) {
        bump(&self.productions);
    }

    pub fn record_producer_failure(&self) {
        bump(&self.producer_failures);
    }

    pub fn record_write_failure(&self) {
        bump(&self.write_failures);
    }

    pub fn record_read_error(&self) {
        bump(&self.read_errors);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            double_check_hits: self.double_check_hits.load(Ordering::Relaxed),
            locks_obtained: self.locks_obtained.load(Ordering::Relaxed),
            locks_unavailable: self.locks_unavailable.load(Ordering::Relaxed),
            productions: self.productions.load(Ordering::Relaxed),
            producer_failures: self.producer_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

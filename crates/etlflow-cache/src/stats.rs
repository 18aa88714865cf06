//! Hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Thread-safe counters; every lookup bumps exactly one.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    L1Hit,
    L2Hit,
    Miss,
}

impl StatsCounters {
    pub(crate) fn record(&self, lookup: Lookup) {
        let counter = match lookup {
            Lookup::L1Hit => &self.l1_hits,
            Lookup::L2Hit => &self.l2_hits,
            Lookup::Miss => &self.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, l1_size: Option<usize>, l1_max_size: usize) -> CacheStats {
        CacheStats::from_counts(
            self.l1_hits.load(Ordering::Relaxed),
            self.l2_hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            l1_size,
            l1_max_size,
        )
    }
}

/// Point-in-time view of cache effectiveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub l1_hit_ratio: f64,
    pub l2_hit_ratio: f64,
    pub miss_ratio: f64,
    /// Entries currently in the in-process tier, when known.
    pub l1_size: Option<usize>,
    pub l1_max_size: usize,
}

impl CacheStats {
    fn from_counts(
        l1_hits: u64,
        l2_hits: u64,
        misses: u64,
        l1_size: Option<usize>,
        l1_max_size: usize,
    ) -> Self {
        let total_requests = l1_hits + l2_hits + misses;
        Self {
            l1_hits,
            l2_hits,
            misses,
            total_requests,
            l1_hit_ratio: ratio(l1_hits, total_requests),
            l2_hit_ratio: ratio(l2_hits, total_requests),
            miss_ratio: ratio(misses, total_requests),
            l1_size,
            l1_max_size,
        }
    }

    /// Fraction of lookups served by either tier.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        round3(self.l1_hit_ratio + self.l2_hit_ratio)
    }
}

/// `count / total` rounded to three decimals; zero when `total` is zero.
#[allow(clippy::cast_precision_loss)]
fn ratio(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round3(count as f64 / total as f64)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

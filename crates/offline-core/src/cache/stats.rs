//! Request statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the strategy executor
#[derive(Debug, Default)]
pub struct StrategyStats {
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
    synthesized: AtomicU64,
    revalidations: AtomicU64,
    bypassed: AtomicU64,
}

/// Point-in-time copy of [`StrategyStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub fallbacks: u64,
    pub synthesized: u64,
    pub revalidations: u64,
    pub bypassed: u64,
}

impl StrategyStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesized(&self) {
        self.synthesized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revalidation(&self) {
        self.revalidations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("offline_cache_revalidations_total").increment(1);
    }

    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            synthesized: self.synthesized.load(Ordering::Relaxed),
            revalidations: self.revalidations.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
        }
    }

    /// Fraction of cache lookups that hit, 0.0 when nothing was looked up
    pub fn hit_rate(&self) -> f64 {
        let snapshot = self.snapshot();
        let total = snapshot.hits + snapshot.misses;
        if total == 0 {
            0.0
        } else {
            snapshot.hits as f64 / total as f64
        }
    }
}

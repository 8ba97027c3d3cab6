//! Dynamic bucket maintenance
//!
//! Periodically bounds the `dynamic` bucket of the controlling deployment by
//! age and by entry count. Static assets are left alone.

use offline_storage::{CacheStore, EntrySummary};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::CoreError;
use crate::lifecycle::Controller;

/// Janitor configuration
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Time between scheduled passes
    pub interval: Duration,
    /// Entries older than this are deleted regardless of TTL
    pub max_age: Duration,
    /// Upper bound on the number of dynamic entries
    pub max_entries: usize,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_age: Duration::from_secs(10 * 60),
            max_entries: 50,
        }
    }
}

/// Counts from one janitor pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JanitorReport {
    /// Removed for exceeding the maximum age
    pub expired: usize,
    /// Removed to get back under the entry cap
    pub trimmed: usize,
}

pub struct Janitor {
    store: Arc<dyn CacheStore>,
    controller: Arc<Controller>,
    clock: Arc<dyn Clock>,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(
        store: Arc<dyn CacheStore>,
        controller: Arc<Controller>,
        clock: Arc<dyn Clock>,
        config: JanitorConfig,
    ) -> Self {
        Self {
            store,
            controller,
            clock,
            config,
        }
    }

    /// Run both eviction passes once
    ///
    /// Individual delete failures are logged and skipped; only failing to
    /// enumerate the bucket is an error.
    pub async fn run(&self) -> Result<JanitorReport, CoreError> {
        let Some(buckets) = self.controller.current() else {
            debug!("No controlling deployment, nothing to clean");
            return Ok(JanitorReport::default());
        };
        let bucket = buckets.dynamic_bucket;

        let entries = self.store.list(&bucket).await?;
        let now = self.clock.now();
        let max_age_ms = self.config.max_age.as_millis() as i64;

        let mut report = JanitorReport::default();
        let mut remaining = Vec::with_capacity(entries.len());
        for entry in entries {
            if (now - entry.cached_at).num_milliseconds() > max_age_ms {
                if self.evict(&bucket, &entry, "age").await {
                    report.expired += 1;
                }
            } else {
                remaining.push(entry);
            }
        }

        if remaining.len() > self.config.max_entries {
            remaining.sort_by(|a, b| a.cached_at.cmp(&b.cached_at).then_with(|| a.key.cmp(&b.key)));
            let excess = remaining.len() - self.config.max_entries;
            for entry in &remaining[..excess] {
                if self.evict(&bucket, entry, "size").await {
                    report.trimmed += 1;
                }
            }
        }

        if report.expired > 0 || report.trimmed > 0 {
            info!(
                "Janitor cleaned {}: {} expired, {} trimmed",
                bucket, report.expired, report.trimmed
            );
        }

        Ok(report)
    }

    async fn evict(&self, bucket: &str, entry: &EntrySummary, reason: &'static str) -> bool {
        match self.store.delete(bucket, &entry.key).await {
            Ok(deleted) => {
                if deleted {
                    debug!("Evicted {} ({})", entry.key, reason);
                    metrics::counter!("offline_cache_evictions_total", "reason" => reason)
                        .increment(1);
                }
                deleted
            }
            Err(e) => {
                warn!("Failed to evict {} from {}: {}", entry.key, bucket, e);
                false
            }
        }
    }
}

/// Spawn a background task that runs the janitor periodically
pub fn spawn_janitor(janitor: Arc<Janitor>) -> tokio::task::JoinHandle<()> {
    let period = janitor.config.interval.max(Duration::from_secs(1));
    info!("Starting janitor task (interval: {:?})", period);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match janitor.run().await {
                Ok(report) => debug!(
                    "Scheduled janitor pass: {} expired, {} trimmed",
                    report.expired, report.trimmed
                ),
                Err(e) => warn!("Error during janitor pass: {}", e),
            }
        }
    })
}

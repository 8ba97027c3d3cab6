//! Cache freshness, statistics and maintenance

mod janitor;
mod policy;
mod stats;

pub use janitor::{Janitor, JanitorConfig, JanitorReport, spawn_janitor};
pub use policy::{FreshnessPolicy, TtlRule};
pub use stats::{StatsSnapshot, StrategyStats};

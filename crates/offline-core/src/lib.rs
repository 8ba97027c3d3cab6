//! Offline Cache core logic
//!
//! Request classification, caching strategies, freshness rules, the
//! deployment lifecycle and background maintenance.

pub mod cache;
pub mod classify;
pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use cache::{
    FreshnessPolicy, Janitor, JanitorConfig, JanitorReport, StatsSnapshot, StrategyStats,
    TtlRule, spawn_janitor,
};
pub use classify::{Classifier, ClassifierConfig, ResourceClass};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CoreError;
pub use lifecycle::{
    BucketSet, ControlEnvelope, ControlMessage, ControlReply, Controller, LifecycleConfig,
    LifecycleManager, LifecycleState, LifecycleStatus, spawn_control_loop, spawn_install_task,
};
pub use strategy::{InterceptedRequest, Outcome, ServedFrom, StrategyExecutor};

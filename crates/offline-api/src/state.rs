//! Application state

use offline_core::{ControlEnvelope, Janitor, LifecycleManager, StrategyExecutor};
use offline_storage::CacheStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub executor: StrategyExecutor,
    pub lifecycle: Arc<LifecycleManager>,
    pub control: mpsc::Sender<ControlEnvelope>,
    pub janitor: Arc<Janitor>,
    pub store: Arc<dyn CacheStore>,
    /// Base for resolving origin-form request URIs
    pub origin: Url,
}

impl AppState {
    pub fn new(
        executor: StrategyExecutor,
        lifecycle: Arc<LifecycleManager>,
        control: mpsc::Sender<ControlEnvelope>,
        janitor: Arc<Janitor>,
        store: Arc<dyn CacheStore>,
        origin: Url,
    ) -> Self {
        Self {
            executor,
            lifecycle,
            control,
            janitor,
            store,
            origin,
        }
    }
}

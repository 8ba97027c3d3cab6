//! Core error types

use thiserror::Error;

use crate::lifecycle::LifecycleState;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] offline_storage::StorageError),

    #[error("Network error: {0}")]
    Network(#[from] offline_proxy::ProxyError),

    #[error("Install failed for {} manifest entries: {}", failed.len(), failed.join(", "))]
    InstallFailed { failed: Vec<String> },

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

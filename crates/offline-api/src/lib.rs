//! Offline Cache HTTP API
//!
//! Axum front end for the cache: the intercepting proxy handler plus the
//! control, status and maintenance endpoints under `/__offline`.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};

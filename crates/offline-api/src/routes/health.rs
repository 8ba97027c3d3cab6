//! Health check endpoint

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// Health status response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Deployment version this instance installs
    pub version: String,
}

/// GET /__offline/health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    metrics::counter!("offline_cache_health_checks_total").increment(1);

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.lifecycle.buckets().version.clone(),
    })
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/__offline/health", get(health))
}

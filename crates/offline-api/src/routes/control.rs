//! Control channel and maintenance routes

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use bytes::Bytes;
use offline_core::{
    ControlEnvelope, ControlMessage, ControlReply, JanitorReport, LifecycleStatus, StatsSnapshot,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Executor counters plus per-bucket entry counts
#[derive(Serialize)]
pub struct StatsResponse {
    pub requests: StatsSnapshot,
    pub hit_rate: f64,
    pub buckets: BTreeMap<String, usize>,
}

/// POST /__offline/control
///
/// Replies once the lifecycle has processed the message.
async fn control(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ControlReply>, ApiError> {
    let message: ControlMessage = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid control message: {}", e)))?;
    info!("Control message received: {:?}", message);

    let (envelope, reply) = ControlEnvelope::new(message);
    state
        .control
        .send(envelope)
        .await
        .map_err(|_| ApiError::Unavailable("control channel closed".to_string()))?;

    let reply = reply
        .await
        .map_err(|_| ApiError::Internal("control reply dropped".to_string()))?;
    if !reply.success {
        warn!("Control message failed: {:?}", reply.error);
    }

    Ok(Json(reply))
}

/// GET /__offline/status
async fn status(State(state): State<AppState>) -> Json<LifecycleStatus> {
    Json(state.lifecycle.status())
}

/// GET /__offline/stats
async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let mut buckets = BTreeMap::new();
    for name in state.store.list_buckets().await? {
        let count = state.store.list(&name).await?.len();
        buckets.insert(name, count);
    }

    let executor_stats = state.executor.stats();
    Ok(Json(StatsResponse {
        requests: executor_stats.snapshot(),
        hit_rate: executor_stats.hit_rate(),
        buckets,
    }))
}

/// POST /__offline/janitor
async fn run_janitor(State(state): State<AppState>) -> Result<Json<JanitorReport>, ApiError> {
    info!("Running janitor on demand");
    Ok(Json(state.janitor.run().await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/__offline/control", post(control))
        .route("/__offline/status", get(status))
        .route("/__offline/stats", get(stats))
        .route("/__offline/janitor", post(run_janitor))
}

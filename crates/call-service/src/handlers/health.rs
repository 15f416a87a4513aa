//! Health check handler.

use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use common::api::HealthResponse;
use std::sync::Arc;
use tracing::instrument;

/// Health check handler.
///
/// The store is in-process, so the service is healthy whenever it can answer.
///
/// ## Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "active_calls": 3
/// }
/// ```
#[instrument(skip_all, name = "cs.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        active_calls: state.lifecycle.active_calls().await,
    })
}

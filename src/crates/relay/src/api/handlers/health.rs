//! Health and statistics endpoints

use axum::{extract::State, Json};

use crate::api::routes::AppState;
use crate::protocol::{HealthResponse, StatsResponse};

/// Handler for GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Handler for GET /stats
///
/// Read-only snapshot of sessions, cache and running jobs.
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        sessions: state.registry.get_stats(),
        cache: state.cache.stats(),
        jobs_in_flight: state.jobs.len(),
    })
}

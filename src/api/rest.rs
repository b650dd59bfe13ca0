// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` and are read-only. Nothing here can
// trigger a close or mutate stored state; bind to localhost unless a proxy in
// front handles authentication.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::app_state::AppState;

/// Build the status router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/last-cycle", get(last_cycle))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/closed-trades", get(closed_trades))
        .route("/api/v1/thresholds", get(thresholds))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    cycles_completed: u64,
    cycles_failed: u64,
    last_failure: Option<crate::app_state::CycleFailure>,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        cycles_completed: state.cycles_completed(),
        cycles_failed: state.cycles_failed(),
        last_failure: state.last_failure.read().clone(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Last cycle summary
// =============================================================================

async fn last_cycle(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summary = state.last_summary.read().clone();
    Json(summary)
}

// =============================================================================
// Stored state
// =============================================================================

async fn positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.read_rows().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!(error = %e, "status API: failed to read active table");
            store_unavailable(e.to_string())
        }
    }
}

async fn closed_trades(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.read_closed_trades().await {
        Ok(trades) => Json(trades).into_response(),
        Err(e) => {
            warn!(error = %e, "status API: failed to read closed trades");
            store_unavailable(e.to_string())
        }
    }
}

fn store_unavailable(message: String) -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

// =============================================================================
// Thresholds
// =============================================================================

async fn thresholds(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(*state.engine.rules())
}

// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The core's contribution to the observer control plane: a health probe and
// the aggregate status snapshot. Everything else the dashboard serves
// (strategies, threats, hedges, lifecycle) lives outside this process.
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Build the observer router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/quotes/:symbol", get(quote))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.build_snapshot();
    Json(HealthResponse {
        status: "ok",
        server_time: snapshot.server_time,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// The full aggregate state of the nexus.
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

/// Latest distributed quote for one symbol.
async fn quote(
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.hub.current_quote(&symbol) {
        Some(quote) => Json(quote).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "no quote distributed for symbol yet",
                "symbol": symbol,
            })),
        )
            .into_response(),
    }
}

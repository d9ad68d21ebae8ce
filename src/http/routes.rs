//! HTTP route definitions

use std::collections::HashMap;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::telemetry::{SessionExport, Telemetry};
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = match state.config.client_origin.as_deref() {
        // comma-separated list of allowed origins
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new().allow_origin(allowed)
        }
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods([Method::GET, Method::OPTIONS])
    .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/statistics.json", get(statistics_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    ticks: u64,
    actors: usize,
    entities: usize,
    humans: usize,
    clients: usize,
    observers: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let gauges = &state.session.gauges;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        ticks: gauges.ticks(),
        actors: gauges.actors(),
        entities: gauges.entities(),
        humans: gauges.humans(),
        clients: state.hub.client_count(),
        observers: state.hub.observer_count(),
    })
}

// ============================================================================
// Telemetry export
// ============================================================================

/// Full per-session telemetry, same shape as the stats page export
async fn statistics_handler(State(state): State<AppState>) -> Json<HashMap<Uuid, SessionExport>> {
    Json(state.telemetry.export())
}

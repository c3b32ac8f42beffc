//! ==============================================================================
//! server.rs - local status and control surface
//! ==============================================================================
//!
//! routes:
//!     GET  /api           current telemetry message (same shape as published)
//!     GET  /api/health    poller sample/error counters
//!     GET  /api/reported  every acknowledged patch value so far
//!     POST /api/twin      apply a patch, answer with its acknowledgments
//!
//! with the http transport this is the only way patches reach the station.
//!
//! ==============================================================================

use crate::patch::Acknowledgments;
use crate::pollers::HealthReport;
use crate::runtime::StationRuntime;
use crate::telemetry::TelemetryMessage;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub fn router(runtime: StationRuntime) -> Router {
    Router::new()
        .route("/api", get(telemetry_handler))
        .route("/api/health", get(health_handler))
        .route("/api/reported", get(reported_handler))
        .route("/api/twin", post(patch_handler))
        .layer(CorsLayer::permissive())
        .with_state(runtime)
}

pub async fn run_server(runtime: StationRuntime, cancel: CancellationToken) -> anyhow::Result<()> {
    let bind = runtime.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("status server live at http://{bind}");
    axum::serve(listener, router(runtime))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn telemetry_handler(State(runtime): State<StationRuntime>) -> Json<TelemetryMessage> {
    Json(TelemetryMessage::from_snapshot(&runtime.snapshot()))
}

async fn health_handler(State(runtime): State<StationRuntime>) -> Json<Vec<HealthReport>> {
    Json(runtime.health())
}

async fn reported_handler(State(runtime): State<StationRuntime>) -> Json<Acknowledgments> {
    Json(runtime.reported())
}

/// actuator keys drive hardware, so the patch runs on the blocking pool
async fn patch_handler(
    State(runtime): State<StationRuntime>,
    Json(patch): Json<Value>,
) -> Result<Json<Acknowledgments>, StatusCode> {
    tokio::task::spawn_blocking(move || runtime.handle_patch(&patch))
        .await
        .map(Json)
        .map_err(|e| {
            error!("patch handler failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

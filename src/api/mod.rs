//! HTTP API for health checks and batch status

use crate::config::ApiConfig;
use crate::controller::{BatchController, ControllerStatus};
use crate::error::{RelayerError, RelayerResult};

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<BatchController>,
}

pub fn router(controller: Arc<BatchController>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { controller })
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, controller: Arc<BatchController>) -> RelayerResult<()> {
    let app = router(controller);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Config(format!("Cannot bind API address {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Liveness
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Connection, capability and pending-batch snapshot
async fn get_status(State(state): State<AppState>) -> Json<ControllerStatus> {
    Json(state.controller.status().await)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

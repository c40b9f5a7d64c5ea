//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" when the model is ready, "degraded" otherwise
    pub status: String,
    /// Module name ("hxp-predict")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Gateway state ("unloaded", "loading", "ready", "failed")
    pub model_state: String,
    pub schema_version: String,
}

/// GET /health
///
/// Always 200; a service without a usable model reports itself degraded.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let model_state = state.gateway.state();
    let status = if state.gateway.is_ready() { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        module: "hxp-predict".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        model_state: model_state.as_str().to_string(),
        schema_version: state.gateway.schema().version().to_string(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

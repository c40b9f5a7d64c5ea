//! Model and schema introspection endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use hxp_common::FeatureSchema;
use tracing::info;

use crate::error::ApiResult;
use crate::gateway::ModelStatus;
use crate::AppState;

/// GET /model
pub async fn get_model_status(State(state): State<AppState>) -> Json<ModelStatus> {
    Json(state.gateway.status())
}

/// POST /model/reload
///
/// On failure a previously loaded artifact keeps serving.
pub async fn reload_model(State(state): State<AppState>) -> ApiResult<Json<ModelStatus>> {
    let artifact = state.gateway.reload().await?;
    info!(name = ?artifact.name, kind = artifact.kind(), "Model reloaded by operator");
    Ok(Json(state.gateway.status()))
}

/// GET /schema
///
/// The exact field names, kinds and positions a payload must follow.
pub async fn get_schema(State(state): State<AppState>) -> Json<&'static FeatureSchema> {
    Json(state.service.schema())
}

/// Build model routes
pub fn model_routes() -> Router<AppState> {
    Router::new()
        .route("/model", get(get_model_status))
        .route("/model/reload", post(reload_model))
        .route("/schema", get(get_schema))
}

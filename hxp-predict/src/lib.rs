//! hxp-predict library interface
//!
//! Sedation hypoxemia risk inference: request validation, feature vector
//! construction, classifier invocation and risk interpretation behind an
//! axum router.

pub mod acquire;
pub mod api;
pub mod error;
pub mod features;
pub mod gateway;
pub mod interpreter;
pub mod model;
pub mod service;
pub mod validator;

pub use crate::error::{ApiError, ApiResult, PredictError};
pub use crate::gateway::{GatewayState, ModelGateway};
pub use crate::interpreter::{PredictionResult, RiskTier};
pub use crate::service::PredictionService;

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use hxp_common::config::LabelPolicy;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PredictionService>,
    /// Same gateway the service predicts through
    pub gateway: Arc<ModelGateway>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(gateway: Arc<ModelGateway>, label_policy: LabelPolicy) -> Self {
        Self {
            service: Arc::new(PredictionService::new(Arc::clone(&gateway), label_policy)),
            gateway,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ui_routes())
        .merge(api::predict_routes())
        .merge(api::model_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

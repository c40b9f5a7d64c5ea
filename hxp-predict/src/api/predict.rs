//! Prediction endpoint
//!
//! `POST /predict` takes a JSON object keyed by schema field names. The
//! default response carries the interpreted result; `?format=raw` returns
//! only `{"prediction": [label]}` with the classifier's label untouched by
//! the label policy.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, PredictError};
use crate::interpreter::PredictionResult;
use crate::AppState;

/// Response body shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Full,
    Raw,
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictQuery {
    #[serde(default)]
    pub format: ResponseFormat,
}

/// Default success body
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    #[serde(flatten)]
    pub result: PredictionResult,
    pub schema_version: &'static str,
}

/// POST /predict
#[tracing::instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn predict(
    State(state): State<AppState>,
    query: Result<Query<PredictQuery>, QueryRejection>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let Query(query) = query.map_err(|e| ApiError::InvalidPayload(e.body_text()))?;

    let request = match payload {
        Ok(Json(Value::Object(map))) => map,
        Ok(Json(other)) => {
            warn!(kind = json_kind(&other), "Rejected non-object payload");
            return Err(ApiError::InvalidPayload(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )));
        }
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected unreadable payload");
            return Err(ApiError::InvalidPayload(rejection.body_text()));
        }
    };

    // First request triggers the load in lazy mode; no-op once attempted
    state.gateway.ensure_loaded().await;

    let response = match query.format {
        ResponseFormat::Raw => {
            let label = state.service.predict_label(&request).map_err(log_failure)?;
            Json(json!({ "prediction": [label] })).into_response()
        }
        ResponseFormat::Full => {
            let result = state.service.handle_prediction(&request).map_err(log_failure)?;
            Json(PredictResponse {
                result,
                schema_version: state.service.schema().version(),
            })
            .into_response()
        }
    };
    Ok(response)
}

fn log_failure(e: PredictError) -> PredictError {
    if e.status_code().is_server_error() {
        error!(code = e.error_code(), error = %e, "Prediction failed");
    } else {
        warn!(code = e.error_code(), error = %e, "Prediction request rejected");
    }
    e
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Build prediction routes
pub fn predict_routes() -> Router<AppState> {
    Router::new().route("/predict", post(predict))
}

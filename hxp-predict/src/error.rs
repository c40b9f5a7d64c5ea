//! Error types for hxp-predict
//!
//! [`PredictError`] is the closed set of ways a prediction request can fail.
//! [`ApiError`] wraps it for the HTTP layer and renders the JSON error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hxp_common::FeatureKind;
use serde_json::json;
use thiserror::Error;

use crate::acquire::LoadError;

/// Pipeline failure taxonomy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    /// One or more required fields are absent (or empty)
    #[error("Missing required fields: {}", .missing_fields.join(", "))]
    Validation { missing_fields: Vec<String> },

    /// A present field cannot be coerced to its declared kind
    #[error("Field '{field}' has value {raw_value} which cannot be converted to {expected}")]
    Conversion {
        field: String,
        raw_value: String,
        expected: FeatureKind,
    },

    /// The gateway has no ready artifact
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The classifier itself failed on a well-formed vector
    #[error("Prediction failed: {0}")]
    PredictionFailure(String),

    /// The classifier produced a label outside {0, 1}
    #[error("Classifier returned unexpected label {label}")]
    ModelContractViolation { label: i64 },
}

impl PredictError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PredictError::Validation { .. } | PredictError::Conversion { .. } => {
                StatusCode::BAD_REQUEST
            }
            PredictError::ModelUnavailable(_)
            | PredictError::PredictionFailure(_)
            | PredictError::ModelContractViolation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            PredictError::Validation { .. } => "VALIDATION_ERROR",
            PredictError::Conversion { .. } => "CONVERSION_ERROR",
            PredictError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            PredictError::PredictionFailure(_) => "PREDICTION_FAILURE",
            PredictError::ModelContractViolation { .. } => "MODEL_CONTRACT_VIOLATION",
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Prediction pipeline failure (400 or 500 depending on kind)
    #[error(transparent)]
    Predict(#[from] PredictError),

    /// Request body is not a JSON object (400)
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Operator-triggered model load failed (500)
    #[error("Model load failed: {0}")]
    ModelLoad(#[from] LoadError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();

        let (status, body) = match self {
            ApiError::Predict(err) => {
                let mut body = json!({
                    "error": message,
                    "code": err.error_code(),
                });
                match &err {
                    PredictError::Validation { missing_fields } => {
                        body["missing_fields"] = json!(missing_fields);
                    }
                    PredictError::Conversion { field, .. } => {
                        body["field"] = json!(field);
                    }
                    _ => {}
                }
                (err.status_code(), body)
            }
            ApiError::InvalidPayload(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "code": "INVALID_PAYLOAD" }),
            ),
            ApiError::ModelLoad(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": message, "code": "MODEL_LOAD_FAILED" }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

//! Prediction pipeline orchestration
//!
//! readiness → validate → build → predict → interpret. The first failing
//! stage ends the request; later stages are never reached. Raw-label callers
//! stop before interpretation.

use std::sync::Arc;

use hxp_common::config::LabelPolicy;
use hxp_common::FeatureSchema;
use tracing::{debug, info};

use crate::error::PredictError;
use crate::features;
use crate::gateway::ModelGateway;
use crate::interpreter::{self, PredictionResult};
use crate::validator::{self, RawRequest};

/// Runs one request through the full pipeline
#[derive(Debug, Clone)]
pub struct PredictionService {
    schema: &'static FeatureSchema,
    gateway: Arc<ModelGateway>,
    label_policy: LabelPolicy,
}

impl PredictionService {
    pub fn new(gateway: Arc<ModelGateway>, label_policy: LabelPolicy) -> Self {
        Self {
            schema: gateway.schema(),
            gateway,
            label_policy,
        }
    }

    pub fn schema(&self) -> &'static FeatureSchema {
        self.schema
    }

    /// Validate, convert and classify one request
    ///
    /// Returns the classifier's label as-is; no label policy is applied.
    pub fn predict_label(&self, request: &RawRequest) -> Result<i64, PredictError> {
        self.gateway.check_ready()?;
        validator::validate(request, self.schema)?;

        let vector = features::build(request, self.schema)?;
        debug!(n_features = vector.len(), "Feature vector built");

        self.gateway.predict(&vector)
    }

    /// Validate, convert, classify and interpret one request
    pub fn handle_prediction(
        &self,
        request: &RawRequest,
    ) -> Result<PredictionResult, PredictError> {
        let label = self.predict_label(request)?;
        let result = interpreter::interpret(label, self.label_policy)?;

        info!(label = result.label, tier = ?result.tier, "Prediction complete");
        Ok(result)
    }
}

//! Model gateway
//!
//! Owns the process-wide classifier and its lifecycle:
//!
//! ```text
//! Unloaded ──► Loading ──► Ready
//!                 │
//!                 └──────► Failed   (terminal until reload())
//! ```
//!
//! Loads are serialised by `load_lock`, so there is never more than one
//! acquisition in flight. Callers that find a load already running are not
//! queued; they see `Loading` and get `ModelUnavailable`.
//!
//! The `Ready` state holds an `Arc<ModelArtifact>`. Predictions clone the
//! `Arc` under a short read lock and evaluate without holding any lock, so a
//! reload that swaps in a new artifact never disturbs in-flight predictions.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use hxp_common::FeatureSchema;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::acquire::{ArtifactAcquirer, LoadError};
use crate::error::PredictError;
use crate::features::FeatureVector;
use crate::model::{ArtifactSource, ModelArtifact};

/// Gateway lifecycle state
#[derive(Debug, Clone)]
pub enum GatewayState {
    Unloaded,
    Loading,
    Ready(Arc<ModelArtifact>),
    Failed(String),
}

impl GatewayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayState::Unloaded => "unloaded",
            GatewayState::Loading => "loading",
            GatewayState::Ready(_) => "ready",
            GatewayState::Failed(_) => "failed",
        }
    }
}

/// Model status as reported by `GET /model`
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub state: &'static str,
    pub schema_version: &'static str,
    pub n_features: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ArtifactSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Single owner of the classifier artifact
#[derive(Debug)]
pub struct ModelGateway {
    schema: &'static FeatureSchema,
    acquirer: ArtifactAcquirer,
    state: RwLock<GatewayState>,
    last_error: RwLock<Option<String>>,
    load_lock: Mutex<()>,
}

impl ModelGateway {
    /// Gateway that acquires its artifact through `acquirer` (starts `Unloaded`)
    pub fn new(schema: &'static FeatureSchema, acquirer: ArtifactAcquirer) -> Self {
        Self {
            schema,
            acquirer,
            state: RwLock::new(GatewayState::Unloaded),
            last_error: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    /// Gateway already `Ready` with `artifact`; reloads go to a path that never exists
    #[cfg(test)]
    pub(crate) fn with_artifact(schema: &'static FeatureSchema, artifact: ModelArtifact) -> Self {
        let config = hxp_common::config::ModelSourceConfig::local("/nonexistent/hxp/model.json");
        let gateway = Self::new(schema, ArtifactAcquirer::new(config).unwrap());
        *gateway.write_state() = GatewayState::Ready(Arc::new(artifact));
        gateway
    }

    pub fn schema(&self) -> &'static FeatureSchema {
        self.schema
    }

    pub fn state(&self) -> GatewayState {
        self.read_state().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.read_state(), GatewayState::Ready(_))
    }

    /// The current artifact, if `Ready`
    pub fn artifact(&self) -> Option<Arc<ModelArtifact>> {
        match &*self.read_state() {
            GatewayState::Ready(artifact) => Some(Arc::clone(artifact)),
            _ => None,
        }
    }

    /// Run the classifier on one vector
    ///
    /// Outside `Ready` this returns `ModelUnavailable` without touching any
    /// artifact.
    pub fn predict(&self, features: &FeatureVector) -> Result<i64, PredictError> {
        let artifact = match &*self.read_state() {
            GatewayState::Ready(artifact) => Arc::clone(artifact),
            other => return Err(unavailable(other)),
        };

        artifact.predict(features).map_err(|e| {
            error!(
                error = %e,
                kind = artifact.kind(),
                n_features = features.len(),
                "Classifier invocation failed"
            );
            PredictError::PredictionFailure(e.to_string())
        })
    }

    /// `Ok` when `Ready`, otherwise the `ModelUnavailable` a caller should see
    pub fn check_ready(&self) -> Result<(), PredictError> {
        match &*self.read_state() {
            GatewayState::Ready(_) => Ok(()),
            other => Err(unavailable(other)),
        }
    }

    /// Perform the initial load if nobody has started one yet
    ///
    /// Returns immediately when the gateway is already `Loading`, `Ready` or
    /// `Failed`; a failed gateway stays failed until [`reload`](Self::reload).
    pub async fn ensure_loaded(&self) {
        if !matches!(*self.read_state(), GatewayState::Unloaded) {
            return;
        }
        let Ok(_guard) = self.load_lock.try_lock() else {
            return;
        };
        // Another task may have finished a load between the check and the lock
        if !matches!(*self.read_state(), GatewayState::Unloaded) {
            return;
        }

        if let Err(e) = self.load_locked().await {
            error!(error = %e, "Initial model load failed; predictions disabled until reload");
        }
    }

    /// Operator-triggered reload from the configured source
    ///
    /// From `Ready`, the current artifact keeps serving until the new one is
    /// decoded; if the reload fails the old artifact stays in place.
    pub async fn reload(&self) -> Result<Arc<ModelArtifact>, LoadError> {
        let Ok(_guard) = self.load_lock.try_lock() else {
            warn!("Reload requested while a model load is in progress");
            return Err(LoadError::InProgress);
        };
        info!("Model reload requested");
        self.load_locked().await
    }

    /// Acquire and install an artifact; caller must hold `load_lock`
    async fn load_locked(&self) -> Result<Arc<ModelArtifact>, LoadError> {
        let previous = self.artifact();
        if previous.is_none() {
            *self.write_state() = GatewayState::Loading;
        }

        let result = self.acquirer.load(self.schema).await.map(Arc::new);

        match result {
            Ok(artifact) => {
                *self.write_state() = GatewayState::Ready(Arc::clone(&artifact));
                *self.write_last_error() = None;
                info!(
                    schema_version = %artifact.schema_version,
                    replaced = previous.is_some(),
                    "Model gateway ready"
                );
                Ok(artifact)
            }
            Err(e) => {
                let reason = e.to_string();
                *self.write_last_error() = Some(reason.clone());
                if previous.is_some() {
                    warn!(error = %reason, "Reload failed; keeping the current artifact");
                } else {
                    *self.write_state() = GatewayState::Failed(reason.clone());
                    error!(error = %reason, "Model gateway failed");
                }
                Err(e)
            }
        }
    }

    pub fn status(&self) -> ModelStatus {
        let state = self.state();
        let last_error = self
            .last_error
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let artifact = match &state {
            GatewayState::Ready(artifact) => Some(Arc::clone(artifact)),
            _ => None,
        };

        ModelStatus {
            state: state.as_str(),
            schema_version: self.schema.version(),
            n_features: self.schema.len(),
            name: artifact.as_ref().and_then(|a| a.name.clone()),
            kind: artifact.as_ref().map(|a| a.kind()),
            sha256: artifact.as_ref().and_then(|a| a.sha256.clone()),
            source: artifact.as_ref().map(|a| a.source),
            loaded_at: artifact.as_ref().map(|a| a.loaded_at),
            last_error,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, GatewayState> {
        // State is only ever replaced wholesale, so a poisoned lock still holds a valid value
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, GatewayState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_last_error(&self) -> RwLockWriteGuard<'_, Option<String>> {
        self.last_error
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn unavailable(state: &GatewayState) -> PredictError {
    let reason = match state {
        GatewayState::Unloaded => "model has not been loaded".to_string(),
        GatewayState::Loading => "model is still loading".to_string(),
        GatewayState::Failed(reason) => format!("model load failed: {}", reason),
        GatewayState::Ready(_) => "model is ready".to_string(),
    };
    PredictError::ModelUnavailable(reason)
}

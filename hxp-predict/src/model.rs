//! Classifier artifacts
//!
//! An artifact is a JSON envelope carrying the schema version it was trained
//! against, its input width and the model itself:
//!
//! ```json
//! {
//!   "format": "hxp-classifier",
//!   "schema_version": "sedation-hypoxemia-v1",
//!   "n_features": 26,
//!   "name": "rf-2024-03",
//!   "model": { "type": "logistic", "coefficients": [...], "intercept": -1.2 }
//! }
//! ```
//!
//! Two model types are supported: `logistic` (linear decision function with
//! a sigmoid threshold) and `forest` (averaged per-class leaf weights over a
//! set of binary decision trees). Everything is validated before the
//! classifier is handed out, so prediction itself can only fail on a vector
//! of the wrong width.

use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hxp_common::FeatureSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::FeatureVector;

/// Value of the envelope's `format` field
pub const ARTIFACT_FORMAT: &str = "hxp-classifier";

/// Errors raised while evaluating a classifier
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("malformed model: {0}")]
    Malformed(String),
}

/// A trained binary classifier
///
/// Implementations must be pure: the same vector always yields the same label.
pub trait Classifier: Send + Sync + Debug {
    /// Raw class label for one feature vector
    fn predict(&self, features: &FeatureVector) -> Result<i64, ClassifierError>;

    /// Short model family name for diagnostics
    fn kind(&self) -> &'static str;
}

/// Serialized artifact envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEnvelope {
    pub format: String,
    pub schema_version: String,
    pub n_features: usize,
    #[serde(default)]
    pub name: Option<String>,
    pub model: ModelSpec,
}

/// Serialized model body, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSpec {
    Logistic(LogisticModel),
    Forest(ForestModel),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    pub trees: Vec<DecisionTree>,
    /// Class label for each leaf weight column
    #[serde(default = "default_classes")]
    pub classes: Vec<i64>,
}

fn default_classes() -> Vec<i64> {
    vec![0, 1]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Node 0 is the root; children always have larger indices than parents
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    /// Go `left` when `x[feature] <= threshold`, else `right`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Per-class weights (counts or probabilities)
    Leaf { value: Vec<f64> },
}

impl ArtifactEnvelope {
    /// Check the envelope against the schema and validate the model body
    pub fn into_classifier(self, schema: &FeatureSchema) -> Result<Arc<dyn Classifier>, String> {
        if self.format != ARTIFACT_FORMAT {
            return Err(format!(
                "unsupported artifact format '{}' (expected '{}')",
                self.format, ARTIFACT_FORMAT
            ));
        }
        if self.schema_version != schema.version() {
            return Err(format!(
                "artifact was trained for schema '{}', service uses '{}'",
                self.schema_version,
                schema.version()
            ));
        }
        if self.n_features != schema.len() {
            return Err(format!(
                "artifact expects {} features, schema defines {}",
                self.n_features,
                schema.len()
            ));
        }

        match self.model {
            ModelSpec::Logistic(model) => {
                model.validate(self.n_features)?;
                Ok(Arc::new(model))
            }
            ModelSpec::Forest(model) => {
                model.validate(self.n_features)?;
                Ok(Arc::new(model))
            }
        }
    }
}

impl LogisticModel {
    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.coefficients.len() != n_features {
            return Err(format!(
                "logistic model has {} coefficients for {} features",
                self.coefficients.len(),
                n_features
            ));
        }
        let finite = self.coefficients.iter().all(|c| c.is_finite())
            && self.intercept.is_finite()
            && self.threshold.is_finite();
        if !finite {
            return Err("logistic model contains non-finite parameters".to_string());
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(format!("threshold {} outside [0, 1]", self.threshold));
        }
        Ok(())
    }

    /// Probability of the positive class
    pub fn probability(&self, features: &[f64]) -> f64 {
        let z = self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}

impl Classifier for LogisticModel {
    fn predict(&self, features: &FeatureVector) -> Result<i64, ClassifierError> {
        check_width(self.coefficients.len(), features)?;
        let p = self.probability(features.as_slice());
        Ok(if p >= self.threshold { 1 } else { 0 })
    }

    fn kind(&self) -> &'static str {
        "logistic"
    }
}

impl ForestModel {
    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        if self.classes.is_empty() {
            return Err("forest declares no classes".to_string());
        }
        let width = self.classes.len();

        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(format!("tree {} has no nodes", t));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                match node {
                    TreeNode::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if *feature >= n_features {
                            return Err(format!(
                                "tree {} node {} splits on feature {} of {}",
                                t, i, feature, n_features
                            ));
                        }
                        if !threshold.is_finite() {
                            return Err(format!("tree {} node {} has non-finite threshold", t, i));
                        }
                        for child in [left, right] {
                            if *child <= i || *child >= tree.nodes.len() {
                                return Err(format!(
                                    "tree {} node {} has invalid child {}",
                                    t, i, child
                                ));
                            }
                        }
                    }
                    TreeNode::Leaf { value } => {
                        if value.len() != width {
                            return Err(format!(
                                "tree {} leaf {} has {} weights for {} classes",
                                t,
                                i,
                                value.len(),
                                width
                            ));
                        }
                        if value.iter().any(|w| !w.is_finite() || *w < 0.0) {
                            return Err(format!("tree {} leaf {} has invalid weights", t, i));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn leaf<'a>(&self, tree: &'a DecisionTree, x: &[f64]) -> Result<&'a [f64], ClassifierError> {
        let mut index = 0;
        // Children are strictly deeper, so this walk is bounded by the node count
        for _ in 0..tree.nodes.len() {
            match tree.nodes.get(index) {
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = x.get(*feature).ok_or_else(|| {
                        ClassifierError::Malformed(format!("feature {} out of range", feature))
                    })?;
                    index = if *value <= *threshold { *left } else { *right };
                }
                Some(TreeNode::Leaf { value }) => return Ok(value.as_slice()),
                None => {
                    return Err(ClassifierError::Malformed(format!(
                        "node {} out of range",
                        index
                    )))
                }
            }
        }
        Err(ClassifierError::Malformed("tree walk did not reach a leaf".to_string()))
    }

    /// Averaged class distribution across trees
    pub fn class_distribution(
        &self,
        features: &FeatureVector,
    ) -> Result<Vec<f64>, ClassifierError> {
        let mut totals = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let weights = self.leaf(tree, features.as_slice())?;
            let sum: f64 = weights.iter().sum();
            if sum > 0.0 {
                for (total, w) in totals.iter_mut().zip(weights) {
                    *total += w / sum;
                }
            }
        }
        let n = self.trees.len() as f64;
        Ok(totals.into_iter().map(|t| t / n).collect())
    }
}

impl Classifier for ForestModel {
    fn predict(&self, features: &FeatureVector) -> Result<i64, ClassifierError> {
        let distribution = self.class_distribution(features)?;

        // First maximum wins on ties
        let mut best = 0;
        for (i, p) in distribution.iter().enumerate() {
            if *p > distribution[best] {
                best = i;
            }
        }
        Ok(self.classes[best])
    }

    fn kind(&self) -> &'static str {
        "forest"
    }
}

fn check_width(expected: usize, features: &FeatureVector) -> Result<(), ClassifierError> {
    if features.len() == expected {
        Ok(())
    } else {
        Err(ClassifierError::DimensionMismatch {
            expected,
            actual: features.len(),
        })
    }
}

/// Where a loaded artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    Local,
    Remote,
}

/// A ready-to-use classifier with its provenance
///
/// Immutable once built; the gateway replaces the whole `Arc` on reload.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub name: Option<String>,
    pub schema_version: String,
    pub n_features: usize,
    /// Hex SHA-256 of the bytes the artifact was decoded from
    pub sha256: Option<String>,
    pub source: ArtifactSource,
    pub loaded_at: DateTime<Utc>,
    classifier: Arc<dyn Classifier>,
}

impl ModelArtifact {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        schema: &FeatureSchema,
        source: ArtifactSource,
    ) -> Self {
        Self {
            name: None,
            schema_version: schema.version().to_string(),
            n_features: schema.len(),
            sha256: None,
            source,
            loaded_at: Utc::now(),
            classifier,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn kind(&self) -> &'static str {
        self.classifier.kind()
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<i64, ClassifierError> {
        check_width(self.n_features, features)?;
        self.classifier.predict(features)
    }
}

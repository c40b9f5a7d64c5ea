//! Feature schema for the sedation hypoxemia classifier
//!
//! The schema is the exact, ordered list of inputs the trained classifier
//! consumes. Positions are the column order of the classifier's input vector,
//! and names are the JSON keys clients send (spelling, spacing and casing are
//! part of the contract).
//!
//! Any change to names, kinds or order invalidates every artifact trained
//! against the previous layout, so the layout is tagged with
//! [`SCHEMA_VERSION`] and every model artifact must carry the same tag.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::{Error, Result};

/// Version tag shared by this schema and every compatible model artifact.
pub const SCHEMA_VERSION: &str = "sedation-hypoxemia-v1";

/// How a raw request value is coerced into the feature vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Real-valued measurement (dose, pressure, rate, ...)
    Numeric,
    /// Base-10 integer; fractional input is rejected, never rounded
    Integer,
    /// Parsed as a real number, then truncated toward zero
    ///
    /// Used for indicators that were float-encoded in the training data.
    TruncatedInteger,
}

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Numeric => "numeric",
            FeatureKind::Integer => "integer",
            FeatureKind::TruncatedInteger => "truncated_integer",
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classifier input dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub kind: FeatureKind,
    pub position: usize,
}

/// Ordered, versioned set of classifier inputs
///
/// Positions are assigned from declaration order, so they always form the
/// contiguous range `0..len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureSchema {
    version: &'static str,
    features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    /// Build a schema from `(name, kind)` pairs in classifier input order
    ///
    /// Fails on an empty field list, an empty name or a duplicate name.
    pub fn new(version: &'static str, fields: &[(&'static str, FeatureKind)]) -> Result<Self> {
        if version.trim().is_empty() {
            return Err(Error::Schema("schema version must not be empty".to_string()));
        }
        if fields.is_empty() {
            return Err(Error::Schema("schema must declare at least one feature".to_string()));
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for (name, _) in fields {
            if name.trim().is_empty() {
                return Err(Error::Schema("feature names must not be empty".to_string()));
            }
            if !seen.insert(*name) {
                return Err(Error::Schema(format!("duplicate feature name '{}'", name)));
            }
        }

        let features = fields
            .iter()
            .enumerate()
            .map(|(position, &(name, kind))| FeatureSpec { name, kind, position })
            .collect();

        Ok(Self { version, features })
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features in position order
    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureSpec> {
        self.features.iter()
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|spec| spec.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Field names in position order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.features.iter().map(|spec| spec.name)
    }
}

/// Classifier input layout for `sedation-hypoxemia-v1`, in input order.
const SEDATION_FEATURES: [(&str, FeatureKind); 26] = [
    ("Propofol Dosage", FeatureKind::Numeric),
    ("Height", FeatureKind::Numeric),
    ("Years of Surgical Experience", FeatureKind::Integer),
    ("STOP-BANG", FeatureKind::Integer),
    ("BMI", FeatureKind::Numeric),
    ("NC", FeatureKind::Integer),
    ("Diastolic Blood Pressure", FeatureKind::Numeric),
    ("SPO2", FeatureKind::Numeric),
    ("Systolic Blood Pressure", FeatureKind::Numeric),
    ("Age", FeatureKind::Integer),
    ("RR", FeatureKind::Numeric),
    ("HR", FeatureKind::Numeric),
    ("ASA", FeatureKind::Integer),
    ("Snoring", FeatureKind::Integer),
    ("Surgery Type-3", FeatureKind::Integer),
    ("Drinking", FeatureKind::Integer),
    ("BP", FeatureKind::Integer),
    ("Smoking", FeatureKind::Integer),
    ("Inpatient", FeatureKind::Integer),
    ("Observed", FeatureKind::Integer),
    ("Gender", FeatureKind::Integer),
    ("Cardiovascular Disease-1", FeatureKind::Integer),
    ("Tired", FeatureKind::Integer),
    ("Other Disease-1.0", FeatureKind::TruncatedInteger),
    ("Oxygen Flow Rate", FeatureKind::Numeric),
    ("Surgery Type-4", FeatureKind::Integer),
];

/// Process-wide sedation schema; built on first access, never mutated.
pub static SEDATION_SCHEMA: Lazy<FeatureSchema> = Lazy::new(|| {
    let features = SEDATION_FEATURES
        .iter()
        .enumerate()
        .map(|(position, &(name, kind))| FeatureSpec { name, kind, position })
        .collect();
    FeatureSchema {
        version: SCHEMA_VERSION,
        features,
    }
});

/// The schema the service validates requests against
pub fn sedation_schema() -> &'static FeatureSchema {
    &SEDATION_SCHEMA
}

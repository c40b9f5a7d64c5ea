//! Feature vector construction
//!
//! Converts a validated request into the exact numeric layout the classifier
//! was trained on. Coercion is pinned per [`FeatureKind`]:
//!
//! | kind | JSON number | JSON string | bool |
//! |------|-------------|-------------|------|
//! | `Numeric` | as `f64` | trimmed, parsed as `f64` | 1.0 / 0.0 |
//! | `Integer` | integral values only | trimmed, base-10 `i64` | 1 / 0 |
//! | `TruncatedInteger` | truncated toward zero | parsed as `f64`, truncated | 1 / 0 |
//!
//! Non-finite values are always rejected. Conversion stops at the first
//! malformed field.

use hxp_common::{FeatureKind, FeatureSchema, FeatureSpec};
use serde_json::Value;

use crate::error::PredictError;
use crate::validator::RawRequest;

/// Classifier input in schema position order
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Build the feature vector for a request that passed validation
pub fn build(request: &RawRequest, schema: &FeatureSchema) -> Result<FeatureVector, PredictError> {
    let mut values = Vec::with_capacity(schema.len());
    for spec in schema.iter() {
        let raw = request.get(spec.name).unwrap_or(&Value::Null);
        values.push(coerce(spec, raw)?);
    }
    Ok(FeatureVector(values))
}

/// Coerce one raw value under its feature kind
pub fn coerce(spec: &FeatureSpec, raw: &Value) -> Result<f64, PredictError> {
    let converted = match spec.kind {
        FeatureKind::Numeric => to_real(raw),
        FeatureKind::Integer => to_integer(raw).map(|v| v as f64),
        FeatureKind::TruncatedInteger => to_real(raw).map(f64::trunc),
    };

    converted.ok_or_else(|| PredictError::Conversion {
        field: spec.name.to_string(),
        raw_value: raw.to_string(),
        expected: spec.kind,
    })
}

fn to_real(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => bool_value(*b) as f64,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn to_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                return Some(v);
            }
            // 3.0 is accepted, 3.5 is not; nothing is rounded
            let v = n.as_f64()?;
            let in_range = v >= i64::MIN as f64 && v <= i64::MAX as f64;
            (v.is_finite() && v.fract() == 0.0 && in_range).then_some(v as i64)
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(bool_value(*b)),
        _ => None,
    }
}

fn bool_value(b: bool) -> i64 {
    if b {
        1
    } else {
        0
    }
}

//! Request completeness check
//!
//! Reports every missing schema field in one pass, in schema order, so a
//! client can fix a request in a single round trip. Type problems are not
//! checked here; see [`crate::features`].

use hxp_common::FeatureSchema;
use serde_json::Value;
use tracing::debug;

use crate::error::PredictError;

/// Inbound prediction payload: field name → JSON scalar
pub type RawRequest = serde_json::Map<String, Value>;

/// Check that every schema field is present and non-empty
///
/// A field counts as missing when its key is absent, its value is `null`,
/// or its value is a string that is empty after trimming.
pub fn validate(request: &RawRequest, schema: &FeatureSchema) -> Result<(), PredictError> {
    let missing_fields: Vec<String> = schema
        .names()
        .filter(|name| request.get(*name).map_or(true, is_blank))
        .map(str::to_string)
        .collect();

    let unknown = request.keys().filter(|key| !schema.contains(key)).count();
    if unknown > 0 {
        debug!(unknown_fields = unknown, "Ignoring fields outside the feature schema");
    }

    if missing_fields.is_empty() {
        Ok(())
    } else {
        Err(PredictError::Validation { missing_fields })
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

//! Label → risk tier interpretation

use hxp_common::config::LabelPolicy;
use serde::Serialize;
use tracing::warn;

use crate::error::PredictError;

const HIGH_RISK_MESSAGE: &str = "Patient is at higher risk of hypoxemia during sedation.";
const LOW_RISK_MESSAGE: &str = "Patient is at lower risk of hypoxemia during sedation.";

const HIGH_RISK_SUGGESTIONS: [&str; 5] = [
    "Use enhanced SpO2 monitoring throughout the procedure, with continuous pulse oximetry and capnography where available.",
    "Keep emergency oxygen delivery and airway equipment prepared and within reach before induction.",
    "Consider reducing or titrating the sedative dose more slowly, and reassess depth of sedation frequently.",
    "Coordinate with anesthesiology or respiratory specialists ahead of the procedure.",
    "Continue observation after the procedure and watch for delayed hypoxemia during recovery.",
];

const LOW_RISK_SUGGESTIONS: [&str; 3] = [
    "Follow standard intraoperative monitoring, including routine pulse oximetry.",
    "Maintain patient comfort and safety during sedation and recovery.",
    "Educate the patient on symptoms of hypoxemia, such as shortness of breath or confusion, to report after discharge.",
];

/// Coarse risk category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    High,
}

/// Interpreted classifier output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    #[serde(rename = "prediction")]
    pub label: i64,
    pub tier: RiskTier,
    pub message: String,
    pub suggestions: Vec<String>,
}

/// Map a raw label to its tier, message and recommendations
///
/// Labels other than 0 and 1 are a contract violation under
/// [`LabelPolicy::Strict`]; under [`LabelPolicy::Permissive`] they are
/// reported as label 0.
pub fn interpret(label: i64, policy: LabelPolicy) -> Result<PredictionResult, PredictError> {
    let label = match (label, policy) {
        (0 | 1, _) => label,
        (other, LabelPolicy::Strict) => {
            return Err(PredictError::ModelContractViolation { label: other })
        }
        (other, LabelPolicy::Permissive) => {
            warn!(label = other, "Unexpected classifier label reported as low risk");
            0
        }
    };

    let (tier, message, suggestions) = if label == 1 {
        (RiskTier::High, HIGH_RISK_MESSAGE, &HIGH_RISK_SUGGESTIONS[..])
    } else {
        (RiskTier::Low, LOW_RISK_MESSAGE, &LOW_RISK_SUGGESTIONS[..])
    };

    Ok(PredictionResult {
        label,
        tier,
        message: message.to_string(),
        suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_risk() {
        let result = interpret(1, LabelPolicy::Strict).unwrap();
        assert_eq!(result.tier, RiskTier::High);
        assert!(result.message.contains("higher risk"));
        assert_eq!(result.suggestions.len(), 5);
        assert!(result.suggestions[0].contains("SpO2"));
    }

    #[test]
    fn test_low_risk() {
        let result = interpret(0, LabelPolicy::Strict).unwrap();
        assert_eq!(result.label, 0);
        assert_eq!(result.tier, RiskTier::Low);
        assert!(result.message.contains("lower risk"));
        assert_eq!(result.suggestions.len(), 3);
    }

    #[test]
    fn test_strict_policy_rejects_unexpected_label() {
        assert_eq!(
            interpret(2, LabelPolicy::Strict),
            Err(PredictError::ModelContractViolation { label: 2 })
        );
        assert_eq!(
            interpret(-1, LabelPolicy::Strict),
            Err(PredictError::ModelContractViolation { label: -1 })
        );
    }

    #[test]
    fn test_permissive_policy_reports_low() {
        let result = interpret(7, LabelPolicy::Permissive).unwrap();
        assert_eq!(result.label, 0);
        assert_eq!(result.tier, RiskTier::Low);
        assert_eq!(result, interpret(0, LabelPolicy::Strict).unwrap());
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(interpret(1, LabelPolicy::Strict).unwrap()).unwrap();
        assert_eq!(value["prediction"], 1);
        assert_eq!(value["tier"], "high");
        assert_eq!(value["suggestions"].as_array().unwrap().len(), 5);
    }
}

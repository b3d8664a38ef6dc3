//! Assessment types: risk levels, analyzer results, medication warnings,
//! the fused risk assessment, and specialist advice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Risk Levels
// ============================================================================

/// Final risk tiers, ordered so `max()` picks the worse tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low = 0,
    Moderate = 1,
    High = 2,
    Critical = 3,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Moderate => write!(f, "MODERATE"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl RiskLevel {
    /// Tier mapping from calibrated probability:
    /// [0, 0.30) low, [0.30, 0.55) moderate, [0.55, 0.80) high, [0.80, 1.0] critical
    pub fn from_probability(p: f64) -> Self {
        if p >= 0.80 {
            RiskLevel::Critical
        } else if p >= 0.55 {
            RiskLevel::High
        } else if p >= 0.30 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    /// Fallback score used when no model probability is available
    pub fn default_score(&self) -> f64 {
        match self {
            RiskLevel::Critical => 1.0,
            RiskLevel::High => 0.70,
            RiskLevel::Moderate => 0.45,
            RiskLevel::Low => 0.15,
        }
    }
}

// ============================================================================
// Rule Guardrail Result
// ============================================================================

/// Output of the deterministic rule guardrail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub triggered: bool,
    /// Worst candidate tier across triggered rules; null when nothing fired
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    /// Human-readable reasons in rule-table order
    pub reasons: Vec<String>,
    /// True when a critical rule fired: the model tier is suppressed from
    /// final selection (its probability is still recorded for transparency)
    pub override_ml: bool,
}

impl RuleResult {
    pub fn clean() -> Self {
        Self {
            triggered: false,
            risk_level: None,
            reasons: Vec::new(),
            override_ml: false,
        }
    }
}

// ============================================================================
// Risk Model Result
// ============================================================================

/// One per-feature signed attribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapFeature {
    /// Engineered feature name (e.g. "shock_index")
    pub feature: String,
    /// Human-readable label (e.g. "Shock index (HR/SBP)")
    pub label: String,
    /// Original feature value before centering/scaling
    pub value: f64,
    /// Signed contribution to the log-odds
    pub contribution: f64,
}

/// Output of the probabilistic risk model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlResult {
    /// Calibrated probability in [0, 1]
    pub risk_probability: f64,
    pub risk_level: RiskLevel,
    /// Top-k features by absolute contribution, descending
    pub shap_features: Vec<ShapFeature>,
    /// One-sentence summary joining the top two attributions
    pub shap_text: String,
    pub model_version: String,
}

// ============================================================================
// Medication Warnings
// ============================================================================

/// Pattern family that produced a warning
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    DrugDrug,
    DrugCondition,
    DrugSymptom,
}

/// Interaction severity, ordered mild < moderate < severe < contraindicated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Mild = 0,
    Moderate = 1,
    Severe = 2,
    Contraindicated = 3,
}

impl std::fmt::Display for WarningSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarningSeverity::Mild => write!(f, "MILD"),
            WarningSeverity::Moderate => write!(f, "MODERATE"),
            WarningSeverity::Severe => write!(f, "SEVERE"),
            WarningSeverity::Contraindicated => write!(f, "CONTRAINDICATED"),
        }
    }
}

/// One medication safety warning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedWarning {
    pub drug1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drug2: Option<String>,
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub severity: WarningSeverity,
    pub message: String,
    pub action_required: String,
    /// Propagates to the aggregator: severe/contraindicated severity or a
    /// named danger pattern forces escalation
    pub override_triggered: bool,
}

// ============================================================================
// Fused Assessment
// ============================================================================

/// The immutable output of one analyze call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub assessment_id: Uuid,
    pub case_id: Uuid,
    pub rule_engine: RuleResult,
    /// Absent when the model artifact is unavailable or timed out
    #[serde(default)]
    pub ml_result: Option<MlResult>,
    pub med_warnings: Vec<MedWarning>,
    pub med_override_triggered: bool,
    /// True when the med engine failed and warnings could not be evaluated
    #[serde(default)]
    pub med_engine_degraded: bool,
    pub final_risk_level: RiskLevel,
    pub final_risk_score: f64,
    pub recommendation: String,
    pub escalation_suggested: bool,
    pub model_version: String,
    /// SBAR handover text, persisted when the case escalates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbar: Option<super::SbarHandover>,
    pub assessed_at: DateTime<Utc>,
}

// ============================================================================
// Specialist Advice
// ============================================================================

/// Advice verbs a specialist can return
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdviceType {
    UrgentReferral,
    Observe2h,
    ManageLocally,
    StartIvFluids,
    Admit,
    Custom,
}

/// One appended advice row; multiple per case, the latest is authoritative
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistAdvice {
    pub advice_id: Uuid,
    pub case_id: Uuid,
    pub risk_assessment_id: Uuid,
    pub specialist_id: String,
    pub advice_type: AdviceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub medications_advised: Vec<String>,
    #[serde(default)]
    pub investigations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_hours: Option<u32>,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Moderate);
        assert!(RiskLevel::Moderate > RiskLevel::Low);
    }

    #[test]
    fn test_tier_mapping_boundaries() {
        assert_eq!(RiskLevel::from_probability(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.299), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.30), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_probability(0.549), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_probability(0.55), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(0.799), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(0.80), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_probability(1.0), RiskLevel::Critical);
    }

    #[test]
    fn test_warning_severity_ordering() {
        assert!(WarningSeverity::Contraindicated > WarningSeverity::Severe);
        assert!(WarningSeverity::Severe > WarningSeverity::Moderate);
        assert!(WarningSeverity::Moderate > WarningSeverity::Mild);
    }

    #[test]
    fn test_risk_level_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&RiskLevel::Critical).unwrap(),
            "\"critical\""
        );
        let parsed: RiskLevel = serde_json::from_str("\"moderate\"").unwrap();
        assert_eq!(parsed, RiskLevel::Moderate);
    }
}

//! Decision Aggregator - concurrent analyzer fan-out and override precedence
//!
//! Each analyze request forks the rule guardrail, the risk model, and the
//! medication engine onto blocking-pool tasks, joins them under a composite
//! deadline, and fuses the results:
//!
//! 1. rule critical -> final critical (model tier suppressed, probability
//!    still recorded)
//! 2. else any overriding med warning -> final = at least high
//! 3. else model tier when available, else worst of rule tier and low
//!
//! The rule guardrail is the safety floor: its failure (or a 50 ms deadline
//! miss) fails the whole request. Model and medication failures degrade.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{error, warn};

use super::features;
use super::medication::MedicationEngine;
use super::model::RiskModel;
use super::rules;
use crate::config::EngineConfig;
use crate::error::ServiceError;
use crate::types::{
    MedWarning, MedicationEntry, MlResult, PatientSnapshot, RiskLevel, RuleResult, SymptomEntry,
    VitalsSnapshot,
};

/// Fused output of one analyze call, before persistence stamps ids onto it
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub rule: RuleResult,
    pub ml: Option<MlResult>,
    pub med_warnings: Vec<MedWarning>,
    pub med_engine_degraded: bool,
    pub med_override_triggered: bool,
    pub final_risk_level: RiskLevel,
    pub final_risk_score: f64,
    pub recommendation: String,
    pub escalation_suggested: bool,
    pub model_version: String,
}

/// The hybrid decision engine: rule guardrail + risk model + medication
/// patterns behind one concurrent entry point.
#[derive(Clone)]
pub struct DecisionEngine {
    model: Arc<RiskModel>,
    medication: Arc<MedicationEngine>,
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(model: RiskModel, medication: MedicationEngine, config: EngineConfig) -> Self {
        Self {
            model: Arc::new(model),
            medication: Arc::new(medication),
            config,
        }
    }

    pub fn model_available(&self) -> bool {
        self.model.is_available()
    }

    /// Run the full fan-out for one validated intake.
    pub async fn analyze(
        &self,
        patient: &PatientSnapshot,
        vitals: &VitalsSnapshot,
        medications: &[MedicationEntry],
        symptoms: &[SymptomEntry],
    ) -> Result<AnalysisOutcome, ServiceError> {
        let deadline = Duration::from_millis(self.config.analyze_deadline_ms);
        timeout(deadline, self.fan_out(patient, vitals, medications, symptoms))
            .await
            .map_err(|_| ServiceError::Internal("analyzer composite deadline exceeded".to_string()))?
    }

    async fn fan_out(
        &self,
        patient: &PatientSnapshot,
        vitals: &VitalsSnapshot,
        medications: &[MedicationEntry],
        symptoms: &[SymptomEntry],
    ) -> Result<AnalysisOutcome, ServiceError> {
        // Rule task: CPU-bound, hard 50 ms deadline, fatal on miss
        let rule_task = {
            let vitals = vitals.clone();
            let symptoms = symptoms.to_vec();
            let flags = patient.vulnerability_flags.clone();
            timeout(
                Duration::from_millis(self.config.rule_timeout_ms),
                spawn_blocking(move || rules::evaluate(&vitals, &symptoms, &flags)),
            )
        };

        // Model task: CPU-bound, degrades to unavailable on timeout
        let model_task = {
            let model = Arc::clone(&self.model);
            let feature_vector = features::build(patient, vitals, medications, symptoms);
            timeout(
                Duration::from_millis(self.config.model_timeout_ms),
                spawn_blocking(move || model.predict(&feature_vector)),
            )
        };

        // Medication task: reads the interaction cache, degrades on timeout
        let med_task = {
            let engine = Arc::clone(&self.medication);
            let medications = medications.to_vec();
            let flags = patient.vulnerability_flags.clone();
            let symptoms = symptoms.to_vec();
            timeout(
                Duration::from_millis(self.config.med_timeout_ms),
                spawn_blocking(move || engine.evaluate(&medications, &flags, &symptoms)),
            )
        };

        let (rule_joined, model_joined, med_joined) =
            tokio::join!(rule_task, model_task, med_task);

        // Safety floor: any rule failure is fatal
        let rule = match rule_joined {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!(error = %join_err, "Rule guardrail task failed");
                return Err(ServiceError::Internal(
                    "rule guardrail task failed".to_string(),
                ));
            }
            Err(_) => {
                error!(
                    deadline_ms = self.config.rule_timeout_ms,
                    "Rule guardrail missed its deadline"
                );
                return Err(ServiceError::Internal(
                    "rule guardrail deadline exceeded".to_string(),
                ));
            }
        };

        let ml: Option<MlResult> = match model_joined {
            Ok(Ok(Ok(result))) => Some(result),
            Ok(Ok(Err(ServiceError::Unavailable { reason, .. }))) => {
                warn!(reason = %reason, "Risk model unavailable; proceeding without ml_result");
                None
            }
            Ok(Ok(Err(other))) => {
                warn!(error = %other, "Risk model prediction failed; proceeding without ml_result");
                None
            }
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "Risk model task failed; proceeding without ml_result");
                None
            }
            Err(_) => {
                warn!(
                    deadline_ms = self.config.model_timeout_ms,
                    "Risk model timed out; proceeding without ml_result"
                );
                None
            }
        };

        let (med_warnings, med_engine_degraded) = match med_joined {
            Ok(Ok(warnings)) => (warnings, false),
            Ok(Err(join_err)) => {
                error!(error = %join_err, "Medication engine task failed; producing warning-less assessment");
                (Vec::new(), true)
            }
            Err(_) => {
                error!(
                    deadline_ms = self.config.med_timeout_ms,
                    "Medication engine timed out; producing warning-less assessment"
                );
                (Vec::new(), true)
            }
        };

        Ok(fuse(rule, ml, med_warnings, med_engine_degraded))
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// Apply override precedence and compose the recommendation.
/// Pure and deterministic; exposed for direct property testing.
pub fn fuse(
    rule: RuleResult,
    ml: Option<MlResult>,
    med_warnings: Vec<MedWarning>,
    med_engine_degraded: bool,
) -> AnalysisOutcome {
    let med_override_triggered = med_warnings.iter().any(|w| w.override_triggered);

    let final_risk_level = if rule.risk_level == Some(RiskLevel::Critical) {
        RiskLevel::Critical
    } else if med_override_triggered {
        let mut level = RiskLevel::High;
        if let Some(ml_result) = &ml {
            level = level.max(ml_result.risk_level);
        }
        if let Some(rule_level) = rule.risk_level {
            level = level.max(rule_level);
        }
        level
    } else if let Some(ml_result) = &ml {
        ml_result.risk_level
    } else {
        rule.risk_level.unwrap_or(RiskLevel::Low).max(RiskLevel::Low)
    };

    let final_risk_score = ml
        .as_ref()
        .map(|m| m.risk_probability)
        .unwrap_or_else(|| final_risk_level.default_score());

    let escalation_suggested = med_override_triggered
        || matches!(final_risk_level, RiskLevel::High | RiskLevel::Critical);

    let recommendation = compose_recommendation(final_risk_level, &rule, ml.as_ref(), &med_warnings);

    let model_version = ml
        .as_ref()
        .map(|m| m.model_version.clone())
        .unwrap_or_else(|| "none".to_string());

    AnalysisOutcome {
        rule,
        ml,
        med_warnings,
        med_engine_degraded,
        med_override_triggered,
        final_risk_level,
        final_risk_score,
        recommendation,
        escalation_suggested,
        model_version,
    }
}

fn level_tag(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Critical => "[CRITICAL] Immediate clinician review required.",
        RiskLevel::High => "[HIGH] Urgent clinical review advised.",
        RiskLevel::Moderate => "[MODERATE] Clinical review recommended.",
        RiskLevel::Low => "[LOW] Routine care appropriate.",
    }
}

/// Template-driven: the same assessment inputs yield byte-identical output.
fn compose_recommendation(
    level: RiskLevel,
    rule: &RuleResult,
    ml: Option<&MlResult>,
    med_warnings: &[MedWarning],
) -> String {
    let mut segments: Vec<String> = vec![level_tag(level).to_string()];

    if let Some(first_reason) = rule.reasons.first() {
        segments.push(format!("Primary finding: {first_reason}."));
    }

    if let Some(ml_result) = ml {
        segments.push(ml_result.shap_text.clone());
    }

    for warning in med_warnings {
        segments.push(format!("{}: {}.", warning.severity, warning.message));
    }

    segments.push("Advisory only — final judgment rests with the treating clinician.".to_string());
    segments.join(" ")
}

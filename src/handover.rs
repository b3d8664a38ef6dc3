//! Handover Generator - SBAR summaries for specialist escalation
//!
//! May delegate prose generation to an external text service; any failure or
//! timeout (default 5 s) falls back to a deterministic local template so
//! escalation is never blocked on a third party. Generation never mutates
//! case state; the caller persists the result inside the escalation
//! transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::timeout;
use tracing::warn;

use crate::config::HandoverConfig;
use crate::types::{Case, RiskAssessment, SbarHandover, VulnerabilityFlag};

// ============================================================================
// Text Service Seam
// ============================================================================

/// Payload sent to the external text service
#[derive(Debug, Serialize)]
pub struct HandoverRequest<'a> {
    pub case: &'a Case,
    pub assessment: &'a RiskAssessment,
}

/// External prose generator. The deterministic fallback makes every
/// implementation optional.
#[async_trait]
pub trait HandoverTextService: Send + Sync {
    async fn generate(&self, request: &HandoverRequest<'_>) -> anyhow::Result<SbarHandover>;
}

/// HTTP binding of the text service: POST the handover request as JSON,
/// expect SBAR JSON back.
pub struct HttpTextService {
    client: reqwest::Client,
    url: String,
}

impl HttpTextService {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl HandoverTextService for HttpTextService {
    async fn generate(&self, request: &HandoverRequest<'_>) -> anyhow::Result<SbarHandover> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<SbarHandover>().await?)
    }
}

// ============================================================================
// Generator
// ============================================================================

pub struct HandoverGenerator {
    service: Option<Arc<dyn HandoverTextService>>,
    service_timeout: Duration,
}

impl HandoverGenerator {
    pub fn from_config(config: &HandoverConfig) -> Self {
        let service: Option<Arc<dyn HandoverTextService>> = config
            .service_url
            .as_ref()
            .map(|url| Arc::new(HttpTextService::new(url.clone())) as Arc<dyn HandoverTextService>);
        Self {
            service,
            service_timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Template-only generator (no external collaborator).
    pub fn template_only() -> Self {
        Self {
            service: None,
            service_timeout: Duration::from_millis(0),
        }
    }

    #[cfg(test)]
    pub fn with_service(service: Arc<dyn HandoverTextService>, service_timeout: Duration) -> Self {
        Self {
            service: Some(service),
            service_timeout,
        }
    }

    /// Produce the four-field handover. Infallible: the deterministic
    /// template covers every failure path.
    pub async fn generate(&self, case: &Case, assessment: &RiskAssessment) -> SbarHandover {
        if let Some(service) = &self.service {
            let request = HandoverRequest { case, assessment };
            match timeout(self.service_timeout, service.generate(&request)).await {
                Ok(Ok(sbar)) => return sbar,
                Ok(Err(e)) => {
                    warn!(case_id = %case.case_id, error = %e, "Handover text service failed; using template");
                }
                Err(_) => {
                    warn!(
                        case_id = %case.case_id,
                        timeout_ms = self.service_timeout.as_millis() as u64,
                        "Handover text service timed out; using template"
                    );
                }
            }
        }
        fallback_template(case, assessment)
    }
}

// ============================================================================
// Deterministic Template
// ============================================================================

fn flag_list(flags: &[VulnerabilityFlag]) -> String {
    if flags.is_empty() {
        "no recorded vulnerability flags".to_string()
    } else {
        flags
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The local SBAR template. Byte-identical output for identical inputs.
pub fn fallback_template(case: &Case, assessment: &RiskAssessment) -> SbarHandover {
    let patient = &case.patient;
    let vitals = &case.vitals;

    let situation = format!(
        "{}-year-old {:?} patient at {} presenting with: {}. Current risk level {} (score {:.2}).",
        patient.age,
        patient.sex,
        case.facility,
        case.chief_complaint,
        assessment.final_risk_level,
        assessment.final_risk_score
    );

    let medications = if case.medications.is_empty() {
        "none reported".to_string()
    } else {
        case.medications
            .iter()
            .map(|m| m.drug_name.clone())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let symptoms = if case.symptoms.is_empty() {
        "none reported".to_string()
    } else {
        case.symptoms
            .iter()
            .map(|s| s.symptom_name.clone())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let background = format!(
        "Vulnerability: {}. Current medications: {}. Reported symptoms: {}.",
        flag_list(&patient.vulnerability_flags),
        medications,
        symptoms
    );

    let mut findings: Vec<String> = Vec::new();
    findings.push(format!(
        "Vitals: BP {}/{} mmHg, HR {} bpm, RR {}/min, SpO2 {:.1}%, temp {:.1} C.",
        vitals.systolic_bp,
        vitals.diastolic_bp,
        vitals.heart_rate,
        vitals.respiratory_rate,
        vitals.spo2,
        vitals.temperature
    ));
    if !assessment.rule_engine.reasons.is_empty() {
        findings.push(format!(
            "Guardrail findings: {}.",
            assessment.rule_engine.reasons.join("; ")
        ));
    }
    if let Some(ml) = &assessment.ml_result {
        findings.push(format!(
            "Model risk probability {:.2}. {}",
            ml.risk_probability, ml.shap_text
        ));
    }
    if !assessment.med_warnings.is_empty() {
        findings.push(format!(
            "Medication warnings: {}.",
            assessment
                .med_warnings
                .iter()
                .map(|w| w.message.clone())
                .collect::<Vec<_>>()
                .join("; ")
        ));
    }
    let assessment_text = findings.join(" ");

    SbarHandover {
        situation,
        background,
        assessment: assessment_text,
        recommendation: assessment.recommendation.clone(),
    }
}

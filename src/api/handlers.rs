//! Request handlers for the decision support surface.
//!
//! Mutating handlers follow one shape: take the per-case lock, validate,
//! commit through the store (state + audit in one transaction), then publish
//! events in commit order.

use axum::extract::{Path, State};
use axum::http::request::Parts;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::auth::{self, PhwAuth};
use super::{ApiError, ApiState};
use crate::error::ServiceError;
use crate::store::AuditCtx;
use crate::token;
use crate::types::{
    AdviceType, Case, CaseEvent, CaseStatus, MedicationEntry, PatientSnapshot, RiskAssessment,
    SbarHandover, SpecialistAdvice, SymptomEntry, VitalsSnapshot,
};

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IntakePayload {
    /// When present, a fresh reading is appended to this existing case
    /// instead of opening a new one
    #[serde(default)]
    pub case_id: Option<Uuid>,
    pub patient: PatientSnapshot,
    pub vitals: VitalsSnapshot,
    #[serde(default)]
    pub medications: Vec<MedicationEntry>,
    #[serde(default)]
    pub symptoms: Vec<SymptomEntry>,
    pub chief_complaint: String,
}

impl IntakePayload {
    /// Collect every field error so the client can fix them in one pass.
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.patient.validate());
        errors.extend(self.vitals.validate());
        for (i, med) in self.medications.iter().enumerate() {
            errors.extend(med.validate(i));
        }
        for (i, symptom) in self.symptoms.iter().enumerate() {
            errors.extend(symptom.validate(i));
        }
        if self.chief_complaint.trim().is_empty() {
            errors.push("chief_complaint is required".to_string());
        }
        errors
    }
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub case_id: Uuid,
    pub escalation_reason: String,
    #[serde(default)]
    pub specialist_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EscalateResponse {
    pub case_id: Uuid,
    pub specialist_magic_link: String,
    pub sbar: SbarHandover,
    pub escalated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AdvicePayload {
    pub advice_type: AdviceType,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub medications_advised: Vec<String>,
    #[serde(default)]
    pub investigations: Vec<String>,
    #[serde(default)]
    pub follow_up_hours: Option<u32>,
    #[serde(default)]
    pub specialist_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdviceResponse {
    pub status: &'static str,
    pub case_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CaseSummary {
    pub case_id: Uuid,
    pub status: CaseStatus,
    pub chief_complaint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_risk_level: Option<crate::types::RiskLevel>,
    pub escalation_suggested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CaseDetail {
    pub case: Case,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment: Option<RiskAssessment>,
    pub advice: Vec<SpecialistAdvice>,
}

#[derive(Debug, Serialize)]
pub struct PortalBundle {
    pub case_id: Uuid,
    pub status: CaseStatus,
    pub chief_complaint: String,
    pub patient: PatientSnapshot,
    pub vitals: VitalsSnapshot,
    pub symptoms: Vec<SymptomEntry>,
    pub medications: Vec<MedicationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment: Option<RiskAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbar: Option<SbarHandover>,
    pub phw_name: String,
    pub facility: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub uptime_secs: i64,
    pub version: &'static str,
}

// ============================================================================
// Analyze
// ============================================================================

/// POST /api/v1/analyze/risk
pub async fn analyze_risk(
    State(state): State<ApiState>,
    auth: PhwAuth,
    Json(payload): Json<IntakePayload>,
) -> Result<Json<RiskAssessment>, ApiError> {
    let errors = payload.validate();
    if !errors.is_empty() {
        return Err(ServiceError::Validation(errors).into());
    }

    let ctx = auth.audit_ctx();
    let case = match payload.case_id {
        // Re-analysis: append the fresh reading to the existing case
        Some(case_id) => {
            let _guard = state.store.lock_case(case_id).await;
            let existing = owned_case(&state, &auth, case_id)?;
            if !existing.status.can_transition(CaseStatus::Analyzed) {
                return Err(ServiceError::State { current: existing.status }.into());
            }
            state.store.append_vitals(
                case_id,
                payload.vitals.clone(),
                payload.medications.clone(),
                payload.symptoms.clone(),
                &ctx,
            )?
        }
        None => state.store.create_case(
            &auth.phw_id,
            &auth.name,
            &auth.facility,
            &payload.chief_complaint,
            payload.patient.clone(),
            payload.vitals.clone(),
            payload.medications.clone(),
            payload.symptoms.clone(),
            &ctx,
        )?,
    };

    let outcome = match state
        .engine
        .analyze(
            &payload.patient,
            &payload.vitals,
            &payload.medications,
            &payload.symptoms,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            // 500-class responses leave an audit trail with the request id
            let _ = state.store.record_internal_error(
                &format!("case/{}", case.case_id),
                &e.to_string(),
                &ctx,
            );
            return Err(e.into());
        }
    };

    let assessment = RiskAssessment {
        assessment_id: Uuid::new_v4(),
        case_id: case.case_id,
        rule_engine: outcome.rule,
        ml_result: outcome.ml,
        med_warnings: outcome.med_warnings,
        med_override_triggered: outcome.med_override_triggered,
        med_engine_degraded: outcome.med_engine_degraded,
        final_risk_level: outcome.final_risk_level,
        final_risk_score: outcome.final_risk_score,
        recommendation: outcome.recommendation,
        escalation_suggested: outcome.escalation_suggested,
        model_version: outcome.model_version,
        sbar: None,
        assessed_at: Utc::now(),
    };

    let updated = {
        let _guard = state.store.lock_case(case.case_id).await;
        state.store.write_assessment(&assessment, &ctx)?
    };
    publish_status(&state, &updated);

    info!(
        case_id = %updated.case_id,
        final_risk_level = %assessment.final_risk_level,
        escalation_suggested = assessment.escalation_suggested,
        "Assessment written"
    );
    Ok(Json(assessment))
}

// ============================================================================
// Escalation
// ============================================================================

/// POST /api/v1/escalate
pub async fn escalate(
    State(state): State<ApiState>,
    auth: PhwAuth,
    Json(request): Json<EscalateRequest>,
) -> Result<Json<EscalateResponse>, ApiError> {
    if request.escalation_reason.trim().is_empty() {
        return Err(
            ServiceError::Validation(vec!["escalation_reason is required".to_string()]).into(),
        );
    }

    let ctx = auth.audit_ctx();
    let _guard = state.store.lock_case(request.case_id).await;

    let case = state
        .store
        .get_case(request.case_id)?
        .ok_or_else(|| ApiError::not_found("case not found"))?;
    if case.phw_id != auth.phw_id {
        return Err(ApiError::forbidden("case belongs to another health worker"));
    }
    if !case.status.can_transition(CaseStatus::Escalated) {
        return Err(ServiceError::State { current: case.status }.into());
    }
    let assessment = state
        .store
        .latest_assessment(&case)?
        .ok_or(ServiceError::State { current: case.status })?;

    let config = crate::config::get();
    let minted = token::mint(config.escalation.token_ttl_hours);

    // Synchronous within the escalation span; the generator's own timeout
    // and fallback guarantee this never blocks escalation
    let sbar = state.handover.generate(&case, &assessment).await;

    let previous_status = case.status;
    let updated = state.store.mint_escalation(
        request.case_id,
        &request.escalation_reason,
        request.specialist_id.clone(),
        &minted,
        Some(&sbar),
        &ctx,
    )?;
    if updated.status != previous_status {
        publish_status(&state, &updated);
    }

    let magic_link = format!(
        "{}/api/v1/specialist/portal/{}",
        config.server.public_base_url, minted.token
    );
    info!(case_id = %updated.case_id, "Case escalated");

    Ok(Json(EscalateResponse {
        case_id: updated.case_id,
        specialist_magic_link: magic_link,
        sbar,
        escalated_at: updated.escalated_at.unwrap_or(updated.updated_at),
    }))
}

/// GET /api/v1/specialist/portal/{token}; the token is the auth
pub async fn specialist_portal(
    State(state): State<ApiState>,
    parts: Parts,
    Path(presented): Path<String>,
) -> Result<Json<PortalBundle>, ApiError> {
    // Resolve first so the lock key is known; revalidated under the lock
    let case = state
        .store
        .validate_token(&presented)
        .map_err(ApiError::for_portal)?;

    let ctx = specialist_ctx(&case, &parts);
    let _guard = state.store.lock_case(case.case_id).await;
    let previous_status = state
        .store
        .get_case(case.case_id)?
        .map(|c| c.status)
        .unwrap_or(case.status);
    let consumed = state
        .store
        .consume_escalation(&presented, &ctx)
        .map_err(ApiError::for_portal)?;
    if consumed.status != previous_status {
        publish_status(&state, &consumed);
    }

    let assessment = state.store.latest_assessment(&consumed)?;
    let sbar = assessment.as_ref().and_then(|a| a.sbar.clone());

    Ok(Json(PortalBundle {
        case_id: consumed.case_id,
        status: consumed.status,
        chief_complaint: consumed.chief_complaint.clone(),
        patient: consumed.patient.clone(),
        vitals: consumed.vitals.clone(),
        symptoms: consumed.symptoms.clone(),
        medications: consumed.medications.clone(),
        assessment,
        sbar,
        phw_name: consumed.phw_name.clone(),
        facility: consumed.facility.clone(),
        escalated_at: consumed.escalated_at,
    }))
}

/// POST /api/v1/specialist/advice (token auth via bearer header)
pub async fn submit_advice(
    State(state): State<ApiState>,
    parts: Parts,
    Json(payload): Json<AdvicePayload>,
) -> Result<Json<AdviceResponse>, ApiError> {
    let presented = auth::bearer_value(&parts)
        .or_else(|| {
            parts
                .headers
                .get("x-escalation-token")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .ok_or_else(|| ApiError::forbidden("missing escalation token"))?;

    let case = state.store.validate_token(&presented)?;
    let ctx = specialist_ctx(&case, &parts);

    let _guard = state.store.lock_case(case.case_id).await;
    // Revalidate under the lock; records first use if the portal was skipped
    let previous_status = state
        .store
        .get_case(case.case_id)?
        .map(|c| c.status)
        .unwrap_or(case.status);
    let case = state.store.consume_escalation(&presented, &ctx)?;
    if case.status != previous_status {
        publish_status(&state, &case);
    }

    let assessment_id = case.latest_assessment_id.ok_or_else(|| {
        ServiceError::Internal("escalated case has no assessment".to_string())
    })?;

    let specialist_id = payload
        .specialist_id
        .clone()
        .or_else(|| {
            case.escalation
                .as_ref()
                .and_then(|b| b.specialist_id.clone())
        })
        .unwrap_or_else(|| "specialist".to_string());

    let advice = SpecialistAdvice {
        advice_id: Uuid::new_v4(),
        case_id: case.case_id,
        risk_assessment_id: assessment_id,
        specialist_id,
        advice_type: payload.advice_type,
        notes: payload.notes,
        medications_advised: payload.medications_advised,
        investigations: payload.investigations,
        follow_up_hours: payload.follow_up_hours,
        submitted_at: Utc::now(),
    };

    let config = crate::config::get();
    let before = case.status;
    let updated = state
        .store
        .append_advice(&advice, config.escalation.single_use_tokens, &ctx)?;
    if updated.status != before {
        publish_status(&state, &updated);
    }
    state.bus.publish(
        updated.case_id,
        CaseEvent::AdvicePush {
            case_id: updated.case_id,
            advice: advice.clone(),
        },
    );

    info!(case_id = %updated.case_id, advice_type = ?advice.advice_type, "Advice submitted");
    Ok(Json(AdviceResponse {
        status: "ok",
        case_id: updated.case_id,
    }))
}

// ============================================================================
// Case CRUD & Lifecycle
// ============================================================================

/// GET /api/v1/cases
pub async fn list_cases(
    State(state): State<ApiState>,
    auth: PhwAuth,
) -> Result<Json<Vec<CaseSummary>>, ApiError> {
    let cases = state.store.list_cases(&auth.phw_id)?;
    let mut summaries = Vec::with_capacity(cases.len());
    for case in cases {
        let assessment = state.store.latest_assessment(&case)?;
        summaries.push(CaseSummary {
            case_id: case.case_id,
            status: case.status,
            chief_complaint: case.chief_complaint,
            final_risk_level: assessment.as_ref().map(|a| a.final_risk_level),
            escalation_suggested: assessment
                .as_ref()
                .map(|a| a.escalation_suggested)
                .unwrap_or(false),
            created_at: case.created_at,
            updated_at: case.updated_at,
        });
    }
    Ok(Json(summaries))
}

/// GET /api/v1/cases/{id}
pub async fn get_case(
    State(state): State<ApiState>,
    auth: PhwAuth,
    Path(case_id): Path<Uuid>,
) -> Result<Json<CaseDetail>, ApiError> {
    let case = owned_case(&state, &auth, case_id)?;
    let assessment = state.store.latest_assessment(&case)?;
    let advice = state.store.advice_for_case(case_id)?;
    Ok(Json(CaseDetail {
        case,
        assessment,
        advice,
    }))
}

/// GET /api/v1/cases/{id}/advice
pub async fn list_advice(
    State(state): State<ApiState>,
    auth: PhwAuth,
    Path(case_id): Path<Uuid>,
) -> Result<Json<Vec<SpecialistAdvice>>, ApiError> {
    owned_case(&state, &auth, case_id)?;
    Ok(Json(state.store.advice_for_case(case_id)?))
}

/// POST /api/v1/cases/{id}/close
pub async fn close_case(
    State(state): State<ApiState>,
    auth: PhwAuth,
    Path(case_id): Path<Uuid>,
) -> Result<Json<CaseSummary>, ApiError> {
    transition_case(state, auth, case_id, CaseStatus::Closed).await
}

/// POST /api/v1/cases/{id}/cancel
pub async fn cancel_case(
    State(state): State<ApiState>,
    auth: PhwAuth,
    Path(case_id): Path<Uuid>,
) -> Result<Json<CaseSummary>, ApiError> {
    transition_case(state, auth, case_id, CaseStatus::Cancelled).await
}

async fn transition_case(
    state: ApiState,
    auth: PhwAuth,
    case_id: Uuid,
    to: CaseStatus,
) -> Result<Json<CaseSummary>, ApiError> {
    let ctx = auth.audit_ctx();
    let _guard = state.store.lock_case(case_id).await;
    owned_case(&state, &auth, case_id)?;
    let updated = state.store.update_status(case_id, to, &ctx)?;
    publish_status(&state, &updated);

    let assessment = state.store.latest_assessment(&updated)?;
    Ok(Json(CaseSummary {
        case_id: updated.case_id,
        status: updated.status,
        chief_complaint: updated.chief_complaint,
        final_risk_level: assessment.as_ref().map(|a| a.final_risk_level),
        escalation_suggested: assessment
            .as_ref()
            .map(|a| a.escalation_suggested)
            .unwrap_or(false),
        created_at: updated.created_at,
        updated_at: updated.updated_at,
    }))
}

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_loaded: state.engine.model_available(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Helpers
// ============================================================================

fn owned_case(state: &ApiState, auth: &PhwAuth, case_id: Uuid) -> Result<Case, ApiError> {
    let case = state
        .store
        .get_case(case_id)?
        .ok_or_else(|| ApiError::not_found("case not found"))?;
    if case.phw_id != auth.phw_id {
        return Err(ApiError::forbidden("case belongs to another health worker"));
    }
    Ok(case)
}

fn specialist_ctx(case: &Case, parts: &Parts) -> AuditCtx {
    let user_id = case
        .escalation
        .as_ref()
        .and_then(|b| b.specialist_id.clone())
        .unwrap_or_else(|| "specialist".to_string());
    AuditCtx {
        user_id,
        ip: super::auth::client_ip(parts),
        request_id: super::auth::request_id_of(parts),
    }
}

fn publish_status(state: &ApiState, case: &Case) {
    state.bus.publish(
        case.case_id,
        CaseEvent::StatusUpdate {
            case_id: case.case_id,
            status: case.status,
            timestamp: case.updated_at,
        },
    );
}

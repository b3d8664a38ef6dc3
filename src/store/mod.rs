//! Case Store - transactional persistence for cases, assessments, advice,
//! escalation tokens, and the audit trail.
//!
//! Backed by one sled database with separate trees. Every state transition
//! commits together with its audit record through a two-tree transaction on
//! (cases, audit); that pair is the commit point. Data rows (assessments,
//! advice) are written before the commit point; an orphan row whose case
//! never referenced it is invisible to reads. The token lookup index is
//! written after; a dangling index entry fails the constant-time digest
//! check against the case binding and is therefore harmless.
//!
//! Concurrent writes on one case are serialized through a per-case async
//! mutex; callers take the lock for the whole read-modify-write span.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sled::transaction::TransactionError;
use sled::Transactional;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::token::{self, MintedToken};
use crate::types::{
    AuditAction, AuditRecord, Case, CaseStatus, EscalationBinding, MedicationEntry,
    PatientSnapshot, RiskAssessment, SbarHandover, SpecialistAdvice, SymptomEntry, VitalsSnapshot,
};

/// Audit context threaded through every mutation
#[derive(Debug, Clone)]
pub struct AuditCtx {
    pub user_id: String,
    pub ip: Option<String>,
    pub request_id: String,
}

impl AuditCtx {
    pub fn system(request_id: impl Into<String>) -> Self {
        Self {
            user_id: "system".to_string(),
            ip: None,
            request_id: request_id.into(),
        }
    }
}

pub struct CaseStore {
    db: sled::Db,
    cases: sled::Tree,
    vitals: sled::Tree,
    assessments: sled::Tree,
    advice: sled::Tree,
    tokens: sled::Tree,
    audit: sled::Tree,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CaseStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ServiceError> {
        let db = sled::open(path)?;
        let cases = db.open_tree("cases")?;
        let vitals = db.open_tree("vitals")?;
        let assessments = db.open_tree("assessments")?;
        let advice = db.open_tree("advice")?;
        let tokens = db.open_tree("tokens")?;
        let audit = db.open_tree("audit")?;
        Ok(Self {
            db,
            cases,
            vitals,
            assessments,
            advice,
            tokens,
            audit,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire the per-case write lock. Hold the guard for the whole
    /// read-modify-write span so transitions on one case stay totally
    /// ordered.
    pub async fn lock_case(&self, case_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(case_id).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        lock.lock_owned().await
    }

    // ========================================================================
    // Commit point
    // ========================================================================

    /// Atomically write the case row and its audit record.
    fn commit_case(
        &self,
        case: &Case,
        action: AuditAction,
        ctx: &AuditCtx,
        old_status: Option<CaseStatus>,
    ) -> Result<(), ServiceError> {
        let record = AuditRecord {
            audit_id: Uuid::new_v4(),
            user_id: ctx.user_id.clone(),
            action,
            resource: format!("case/{}", case.case_id),
            ip: ctx.ip.clone(),
            request_id: ctx.request_id.clone(),
            old_value: old_status.map(|s| serde_json::json!({ "status": s })),
            new_value: Some(serde_json::json!({ "status": case.status })),
            timestamp: Utc::now(),
        };

        let case_key = case.case_id.as_bytes().to_vec();
        let case_value = serde_json::to_vec(case)?;
        let audit_key = audit_key(&record);
        let audit_value = serde_json::to_vec(&record)?;

        (&self.cases, &self.audit)
            .transaction(|(cases, audit)| {
                cases.insert(case_key.as_slice(), case_value.as_slice())?;
                audit.insert(audit_key.as_slice(), audit_value.as_slice())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| {
                ServiceError::Internal(format!("case transaction failed: {e:?}"))
            })?;

        Ok(())
    }

    // ========================================================================
    // Cases
    // ========================================================================

    /// Create a case in `intake` status from a validated intake payload.
    #[allow(clippy::too_many_arguments)]
    pub fn create_case(
        &self,
        phw_id: &str,
        phw_name: &str,
        facility: &str,
        chief_complaint: &str,
        patient: PatientSnapshot,
        vitals: VitalsSnapshot,
        medications: Vec<MedicationEntry>,
        symptoms: Vec<SymptomEntry>,
        ctx: &AuditCtx,
    ) -> Result<Case, ServiceError> {
        let now = Utc::now();
        let case = Case {
            case_id: Uuid::new_v4(),
            phw_id: phw_id.to_string(),
            phw_name: phw_name.to_string(),
            facility: facility.to_string(),
            assigned_specialist: None,
            status: CaseStatus::Intake,
            chief_complaint: chief_complaint.to_string(),
            escalation_reason: None,
            escalation: None,
            patient,
            vitals,
            medications,
            symptoms,
            latest_assessment_id: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            escalated_at: None,
        };
        self.insert_vitals_row(case.case_id, &case.vitals)?;
        self.commit_case(&case, AuditAction::CreateCase, ctx, None)?;
        Ok(case)
    }

    /// Record a fresh intake reading on an existing case: the new vitals
    /// snapshot is appended to the immutable history, and the case's current
    /// medication and symptom lists are replaced. Caller holds the case lock.
    pub fn append_vitals(
        &self,
        case_id: Uuid,
        vitals: VitalsSnapshot,
        medications: Vec<MedicationEntry>,
        symptoms: Vec<SymptomEntry>,
        ctx: &AuditCtx,
    ) -> Result<Case, ServiceError> {
        let mut case = self
            .get_case(case_id)?
            .ok_or_else(|| ServiceError::Internal("case not found".to_string()))?;
        if case.status.is_terminal() {
            return Err(ServiceError::State { current: case.status });
        }

        self.insert_vitals_row(case_id, &vitals)?;

        case.vitals = vitals;
        case.medications = medications;
        case.symptoms = symptoms;
        case.updated_at = Utc::now();
        self.commit_case(&case, AuditAction::AppendVitals, ctx, Some(case.status))?;
        Ok(case)
    }

    /// All vitals snapshots recorded for a case, oldest first.
    pub fn vitals_history(&self, case_id: Uuid) -> Result<Vec<VitalsSnapshot>, ServiceError> {
        let mut rows = Vec::new();
        for item in self.vitals.scan_prefix(case_id.as_bytes()) {
            let (_, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn insert_vitals_row(
        &self,
        case_id: Uuid,
        vitals: &VitalsSnapshot,
    ) -> Result<(), ServiceError> {
        let seq = self.db.generate_id()?;
        let mut key = case_id.as_bytes().to_vec();
        key.extend_from_slice(&seq.to_be_bytes());
        self.vitals.insert(key, serde_json::to_vec(vitals)?)?;
        Ok(())
    }

    /// Fetch a case; soft-deleted cases are invisible.
    pub fn get_case(&self, case_id: Uuid) -> Result<Option<Case>, ServiceError> {
        let Some(bytes) = self.cases.get(case_id.as_bytes())? else {
            return Ok(None);
        };
        let case: Case = serde_json::from_slice(&bytes)?;
        if case.deleted_at.is_some() {
            return Ok(None);
        }
        Ok(Some(case))
    }

    /// List live cases owned by one PHW, newest first.
    pub fn list_cases(&self, phw_id: &str) -> Result<Vec<Case>, ServiceError> {
        let mut cases: Vec<Case> = Vec::new();
        for item in self.cases.iter() {
            let (_, value) = item?;
            let case: Case = serde_json::from_slice(&value)?;
            if case.phw_id == phw_id && case.deleted_at.is_none() {
                cases.push(case);
            }
        }
        cases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(cases)
    }

    // ========================================================================
    // Assessments
    // ========================================================================

    /// Persist an assessment and move the case to `analyzed`.
    /// Caller holds the case lock.
    pub fn write_assessment(
        &self,
        assessment: &RiskAssessment,
        ctx: &AuditCtx,
    ) -> Result<Case, ServiceError> {
        let mut case = self
            .get_case(assessment.case_id)?
            .ok_or_else(|| ServiceError::Internal("case vanished during analyze".to_string()))?;

        let old_status = case.status;
        if !old_status.can_transition(CaseStatus::Analyzed) {
            return Err(ServiceError::State { current: old_status });
        }

        // Data row before the commit point
        self.assessments.insert(
            assessment.assessment_id.as_bytes(),
            serde_json::to_vec(assessment)?,
        )?;

        case.status = CaseStatus::Analyzed;
        case.latest_assessment_id = Some(assessment.assessment_id);
        case.updated_at = Utc::now();
        self.commit_case(&case, AuditAction::WriteAssessment, ctx, Some(old_status))?;
        Ok(case)
    }

    pub fn get_assessment(
        &self,
        assessment_id: Uuid,
    ) -> Result<Option<RiskAssessment>, ServiceError> {
        match self.assessments.get(assessment_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn latest_assessment(&self, case: &Case) -> Result<Option<RiskAssessment>, ServiceError> {
        match case.latest_assessment_id {
            Some(id) => self.get_assessment(id),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Escalation
    // ========================================================================

    /// Bind a freshly-minted token to the case, persist the SBAR on the
    /// latest assessment, and move the case to `escalated`. A previous
    /// binding is replaced, which invalidates the earlier token.
    /// Caller holds the case lock.
    pub fn mint_escalation(
        &self,
        case_id: Uuid,
        escalation_reason: &str,
        specialist_id: Option<String>,
        minted: &MintedToken,
        sbar: Option<&SbarHandover>,
        ctx: &AuditCtx,
    ) -> Result<Case, ServiceError> {
        let mut case = self
            .get_case(case_id)?
            .ok_or_else(|| ServiceError::Internal("case not found for escalation".to_string()))?;

        let old_status = case.status;
        if !old_status.can_transition(CaseStatus::Escalated) {
            return Err(ServiceError::State { current: old_status });
        }

        // Persist the handover on the latest assessment (data row first)
        if let Some(sbar) = sbar {
            if let Some(mut assessment) = self.latest_assessment(&case)? {
                assessment.sbar = Some(sbar.clone());
                self.assessments.insert(
                    assessment.assessment_id.as_bytes(),
                    serde_json::to_vec(&assessment)?,
                )?;
            }
        }

        // Replace any previous binding; the old digest stops resolving
        if let Some(old_binding) = &case.escalation {
            self.tokens.remove(old_binding.token_digest.as_bytes())?;
        }

        let now = Utc::now();
        case.escalation = Some(EscalationBinding {
            token_digest: minted.digest.clone(),
            expires_at: minted.expires_at,
            revoked: false,
            specialist_id: specialist_id.clone(),
        });
        case.assigned_specialist = specialist_id;
        case.escalation_reason = Some(escalation_reason.to_string());
        case.escalated_at = Some(now);
        case.updated_at = now;
        // Re-mint keeps a later status in place; first mint moves to escalated
        if old_status == CaseStatus::Analyzed {
            case.status = CaseStatus::Escalated;
        }

        self.commit_case(&case, AuditAction::MintEscalation, ctx, Some(old_status))?;

        // Lookup index after the commit point
        self.tokens
            .insert(minted.digest.as_bytes(), case_id.as_bytes().to_vec())?;

        info!(case_id = %case_id, expires_at = %minted.expires_at, "Escalation token minted");
        Ok(case)
    }

    /// Resolve a presented token to its live case without transitioning.
    /// Fails `TokenInvalid` for unknown, mismatched, revoked, or expired
    /// tokens, and for deleted cases.
    pub fn validate_token(&self, presented: &str) -> Result<Case, ServiceError> {
        let digest = token::digest_hex(presented);
        let Some(case_id_bytes) = self.tokens.get(digest.as_bytes())? else {
            return Err(ServiceError::TokenInvalid);
        };
        let case_id = Uuid::from_slice(&case_id_bytes)
            .map_err(|e| ServiceError::Internal(format!("corrupt token index: {e}")))?;
        let case = self.get_case(case_id)?.ok_or(ServiceError::TokenInvalid)?;

        let Some(binding) = &case.escalation else {
            return Err(ServiceError::TokenInvalid);
        };
        if !token::digests_match(&digest, &binding.token_digest) {
            return Err(ServiceError::TokenInvalid);
        }
        if binding.revoked || binding.expires_at <= Utc::now() {
            return Err(ServiceError::TokenInvalid);
        }
        Ok(case)
    }

    /// Validate a token and record its first use: `escalated` moves to
    /// `specialist_reviewing`. Caller holds the case lock.
    pub fn consume_escalation(
        &self,
        presented: &str,
        ctx: &AuditCtx,
    ) -> Result<Case, ServiceError> {
        let mut case = self.validate_token(presented)?;
        if case.status == CaseStatus::Escalated {
            let old_status = case.status;
            case.status = CaseStatus::SpecialistReviewing;
            case.updated_at = Utc::now();
            self.commit_case(&case, AuditAction::ConsumeEscalation, ctx, Some(old_status))?;
        }
        Ok(case)
    }

    // ========================================================================
    // Advice
    // ========================================================================

    /// Append an advice row and move the case to `advised`. With
    /// `single_use` set, the binding is revoked as part of the same commit.
    /// Caller holds the case lock.
    pub fn append_advice(
        &self,
        advice: &SpecialistAdvice,
        single_use: bool,
        ctx: &AuditCtx,
    ) -> Result<Case, ServiceError> {
        let mut case = self
            .get_case(advice.case_id)?
            .ok_or_else(|| ServiceError::Internal("case vanished during advice".to_string()))?;

        let old_status = case.status;
        if !old_status.accepts_advice() {
            return Err(ServiceError::State { current: old_status });
        }

        // Append-only data row, ordered by a monotonic sequence
        let seq = self.db.generate_id()?;
        let mut key = advice.case_id.as_bytes().to_vec();
        key.extend_from_slice(&seq.to_be_bytes());
        self.advice.insert(key, serde_json::to_vec(advice)?)?;

        case.status = CaseStatus::Advised;
        case.updated_at = Utc::now();
        if single_use {
            if let Some(binding) = case.escalation.as_mut() {
                binding.revoked = true;
                self.tokens.remove(binding.token_digest.as_bytes())?;
            }
        }

        self.commit_case(&case, AuditAction::AppendAdvice, ctx, Some(old_status))?;
        Ok(case)
    }

    /// All advice for one case in submission order; the last row is
    /// authoritative.
    pub fn advice_for_case(&self, case_id: Uuid) -> Result<Vec<SpecialistAdvice>, ServiceError> {
        let mut rows = Vec::new();
        for item in self.advice.scan_prefix(case_id.as_bytes()) {
            let (_, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Generic validated transition (close / cancel). Closing or cancelling
    /// revokes any live token. Caller holds the case lock.
    pub fn update_status(
        &self,
        case_id: Uuid,
        to: CaseStatus,
        ctx: &AuditCtx,
    ) -> Result<Case, ServiceError> {
        let mut case = self
            .get_case(case_id)?
            .ok_or_else(|| ServiceError::Internal("case not found".to_string()))?;

        let old_status = case.status;
        if !old_status.can_transition(to) {
            return Err(ServiceError::State { current: old_status });
        }

        case.status = to;
        case.updated_at = Utc::now();
        if to.is_terminal() {
            if let Some(binding) = case.escalation.as_mut() {
                binding.revoked = true;
                self.tokens.remove(binding.token_digest.as_bytes())?;
            }
        }

        self.commit_case(&case, AuditAction::UpdateStatus, ctx, Some(old_status))?;
        Ok(case)
    }

    /// Soft delete: the case keeps its storage row but disappears from
    /// reads. Caller holds the case lock.
    pub fn soft_delete(&self, case_id: Uuid, ctx: &AuditCtx) -> Result<(), ServiceError> {
        let mut case = self
            .get_case(case_id)?
            .ok_or_else(|| ServiceError::Internal("case not found".to_string()))?;
        case.deleted_at = Some(Utc::now());
        if let Some(binding) = case.escalation.as_mut() {
            binding.revoked = true;
            self.tokens.remove(binding.token_digest.as_bytes())?;
        }
        self.commit_case(&case, AuditAction::SoftDelete, ctx, Some(case.status))?;
        Ok(())
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Remove audit records older than the retention window. Returns the
    /// number deleted.
    pub fn prune_audit(&self, retention_days: u64) -> Result<usize, ServiceError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let cutoff_nanos = cutoff.timestamp_nanos_opt().unwrap_or(0);
        let cutoff_key = (cutoff_nanos as u64).to_be_bytes();

        let stale: Vec<Vec<u8>> = self
            .audit
            .range(..cutoff_key.to_vec())
            .filter_map(|item| item.ok().map(|(k, _)| k.to_vec()))
            .collect();

        let deleted = stale.len();
        for key in stale {
            self.audit.remove(key)?;
        }
        Ok(deleted)
    }

    /// Drop expired token index entries so dead digests stop resolving.
    pub fn sweep_expired_tokens(&self) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let mut swept = 0;
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .tokens
            .iter()
            .filter_map(|item| item.ok().map(|(k, v)| (k.to_vec(), v.to_vec())))
            .collect();

        for (digest_key, case_id_bytes) in entries {
            let Ok(case_id) = Uuid::from_slice(&case_id_bytes) else {
                self.tokens.remove(&digest_key)?;
                swept += 1;
                continue;
            };
            let live = self
                .get_case(case_id)?
                .map(|case| case.has_live_token(now))
                .unwrap_or(false);
            if !live {
                self.tokens.remove(&digest_key)?;
                swept += 1;
            }
        }
        Ok(swept)
    }

    pub fn flush(&self) -> Result<(), ServiceError> {
        self.db.flush()?;
        Ok(())
    }

    /// Record an unexpected failure against a resource so the audit trail
    /// carries the request id of every 500-class response.
    pub fn record_internal_error(
        &self,
        resource: &str,
        message: &str,
        ctx: &AuditCtx,
    ) -> Result<(), ServiceError> {
        let record = AuditRecord {
            audit_id: Uuid::new_v4(),
            user_id: ctx.user_id.clone(),
            action: AuditAction::InternalError,
            resource: resource.to_string(),
            ip: ctx.ip.clone(),
            request_id: ctx.request_id.clone(),
            old_value: None,
            new_value: Some(serde_json::json!({ "error": message })),
            timestamp: Utc::now(),
        };
        self.audit
            .insert(audit_key(&record), serde_json::to_vec(&record)?)?;
        Ok(())
    }

    /// Most recent audit records, newest first (ops/debug surface).
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, ServiceError> {
        let mut records = Vec::with_capacity(limit);
        for item in self.audit.iter().rev() {
            if records.len() >= limit {
                break;
            }
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

fn audit_key(record: &AuditRecord) -> Vec<u8> {
    let nanos = record.timestamp.timestamp_nanos_opt().unwrap_or(0) as u64;
    let mut key = nanos.to_be_bytes().to_vec();
    key.extend_from_slice(record.audit_id.as_bytes());
    key
}

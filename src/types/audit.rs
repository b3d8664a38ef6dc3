//! Audit records, written synchronously with every state transition,
//! assessment write, and advice submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Action verbs recorded in the audit trail
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CreateCase,
    AppendVitals,
    WriteAssessment,
    MintEscalation,
    ConsumeEscalation,
    AppendAdvice,
    UpdateStatus,
    RevokeToken,
    SoftDelete,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    /// Acting principal: PHW id, specialist id, or "system"
    pub user_id: String,
    pub action: AuditAction,
    /// Resource reference, e.g. "case/<uuid>" or "assessment/<uuid>"
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub request_id: String,
    /// State snapshots around the mutation, when meaningful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

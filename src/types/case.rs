//! Case lifecycle: the unit of work from intake through close.
//!
//! Status transitions are monotonic except `Cancelled`, which is terminal
//! from any non-closed state. The transition table lives on `CaseStatus` so
//! the store, the API layer, and the tests all validate against one source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Status State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Intake,
    Analyzed,
    Escalated,
    SpecialistReviewing,
    Advised,
    Closed,
    Cancelled,
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaseStatus::Intake => write!(f, "intake"),
            CaseStatus::Analyzed => write!(f, "analyzed"),
            CaseStatus::Escalated => write!(f, "escalated"),
            CaseStatus::SpecialistReviewing => write!(f, "specialist_reviewing"),
            CaseStatus::Advised => write!(f, "advised"),
            CaseStatus::Closed => write!(f, "closed"),
            CaseStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl CaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Closed | CaseStatus::Cancelled)
    }

    /// Whether advice rows may still be appended in this state
    pub fn accepts_advice(&self) -> bool {
        matches!(
            self,
            CaseStatus::Escalated | CaseStatus::SpecialistReviewing | CaseStatus::Advised
        )
    }

    /// Whether a `self` → `to` transition is permitted.
    ///
    /// Same-state writes are allowed for `Analyzed` (re-analysis), `Escalated`
    /// (token re-mint) and `Advised` (further advice); everything else moves
    /// strictly forward.
    pub fn can_transition(&self, to: CaseStatus) -> bool {
        use CaseStatus::*;
        match (self, to) {
            // Cancellation is terminal from any non-closed state
            (Closed, Cancelled) => false,
            (Cancelled, Cancelled) => false,
            (_, Cancelled) => true,
            // The owning PHW may close from any live state
            (from, Closed) => !from.is_terminal(),
            (Intake, Analyzed) => true,
            (Analyzed, Analyzed) => true,
            (Analyzed, Escalated) => true,
            (Escalated, Escalated) => true,
            (Escalated, SpecialistReviewing) => true,
            (Escalated, Advised) => true,
            // Token re-mint gate while the specialist session is open; the
            // store keeps the later status in place, only the binding rotates
            (SpecialistReviewing, Escalated) => true,
            (SpecialistReviewing, SpecialistReviewing) => true,
            (SpecialistReviewing, Advised) => true,
            (Advised, Advised) => true,
            (Advised, Escalated) => false,
            _ => false,
        }
    }
}

// ============================================================================
// Case
// ============================================================================

/// Escalation token binding stored on the case.
///
/// Only the SHA-256 digest of the token is persisted; the opaque value goes
/// to the specialist link and is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationBinding {
    /// Hex-encoded SHA-256 digest of the minted token
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    /// Set when the token was explicitly revoked (close / single-use consume)
    #[serde(default)]
    pub revoked: bool,
    /// Pending specialist the link was minted for, when named at escalation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialist_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_id: Uuid,
    /// Owning peripheral health worker
    pub phw_id: String,
    pub phw_name: String,
    pub facility: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_specialist: Option<String>,
    pub status: CaseStatus,
    pub chief_complaint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationBinding>,
    /// Latest intake snapshots (the assessment row keeps its own copy)
    pub patient: super::PatientSnapshot,
    pub vitals: super::VitalsSnapshot,
    #[serde(default)]
    pub medications: Vec<super::MedicationEntry>,
    #[serde(default)]
    pub symptoms: Vec<super::SymptomEntry>,
    /// Id of the most recent assessment written for this case
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_assessment_id: Option<Uuid>,
    /// Soft-delete marker; deleted cases are invisible to reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
}

impl Case {
    /// Whether the case currently carries a live (unexpired, unrevoked) token
    pub fn has_live_token(&self, now: DateTime<Utc>) -> bool {
        self.escalation
            .as_ref()
            .map(|b| !b.revoked && b.expires_at > now)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        use CaseStatus::*;
        assert!(Intake.can_transition(Analyzed));
        assert!(Analyzed.can_transition(Escalated));
        assert!(Escalated.can_transition(SpecialistReviewing));
        assert!(SpecialistReviewing.can_transition(Advised));
        assert!(Advised.can_transition(Closed));
    }

    #[test]
    fn test_no_backward_transitions() {
        use CaseStatus::*;
        assert!(!Analyzed.can_transition(Intake));
        assert!(!Escalated.can_transition(Analyzed));
        assert!(!Advised.can_transition(Escalated));
        assert!(!SpecialistReviewing.can_transition(Analyzed));
    }

    #[test]
    fn test_cancelled_terminal_from_any_live_state() {
        use CaseStatus::*;
        for from in [Intake, Analyzed, Escalated, SpecialistReviewing, Advised] {
            assert!(from.can_transition(Cancelled), "{from} -> cancelled");
        }
        assert!(!Closed.can_transition(Cancelled));
        assert!(!Cancelled.can_transition(Closed));
        assert!(!Cancelled.can_transition(Cancelled));
    }

    #[test]
    fn test_remint_and_reanalyze_are_same_state_writes() {
        use CaseStatus::*;
        assert!(Analyzed.can_transition(Analyzed));
        assert!(Escalated.can_transition(Escalated));
        assert!(Advised.can_transition(Advised));
        assert!(!Intake.can_transition(Intake));
    }

    #[test]
    fn test_remint_gate_open_through_specialist_review_only() {
        use CaseStatus::*;
        // Re-minting is permitted while analyzed, escalated, or under review
        assert!(Analyzed.can_transition(Escalated));
        assert!(Escalated.can_transition(Escalated));
        assert!(SpecialistReviewing.can_transition(Escalated));
        // but not once advice has landed or the case has ended
        assert!(!Advised.can_transition(Escalated));
        assert!(!Closed.can_transition(Escalated));
        assert!(!Cancelled.can_transition(Escalated));
    }

    #[test]
    fn test_advice_window() {
        use CaseStatus::*;
        assert!(Escalated.accepts_advice());
        assert!(SpecialistReviewing.accepts_advice());
        assert!(Advised.accepts_advice());
        assert!(!Analyzed.accepts_advice());
        assert!(!Closed.accepts_advice());
        assert!(!Cancelled.accepts_advice());
    }
}

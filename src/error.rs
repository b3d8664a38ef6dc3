//! Service error kinds and their HTTP status mapping.
//!
//! Six kinds cover the whole surface: validation, auth, token, state,
//! unavailable, internal. The API layer renders every kind as
//! `{ "detail": "..." }` with the mapped status code.

use axum::http::StatusCode;
use thiserror::Error;

use crate::types::CaseStatus;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Client input out of range or missing required fields; no side effects
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Missing or invalid PHW session credential
    #[error("{0}")]
    Auth(String),

    /// Escalation token unknown, expired, or revoked.
    /// Maps to 404 on portal reads and 403 on advice submission.
    #[error("escalation token is invalid or expired")]
    TokenInvalid,

    /// Transition not permitted from the current case status
    #[error("operation not permitted while case status is '{current}'")]
    State { current: CaseStatus },

    /// A collaborator (model artifact, handover service) is unavailable.
    /// Only fatal when the rule guardrail itself fails.
    #[error("{component} unavailable: {reason}")]
    Unavailable { component: &'static str, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ServiceError::Internal(err.to_string())
    }

    /// Status for the default (non-portal) rendering of this error
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServiceError::TokenInvalid => StatusCode::FORBIDDEN,
            ServiceError::State { .. } => StatusCode::CONFLICT,
            ServiceError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sled::Error> for ServiceError {
    fn from(err: sled::Error) -> Self {
        ServiceError::Internal(format!("storage error: {err}"))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(format!("serialization error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServiceError::Validation(vec!["x".into()]).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::Auth("no".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ServiceError::TokenInvalid.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ServiceError::State { current: CaseStatus::Closed }.status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_validation_message_enumerates_fields() {
        let err = ServiceError::Validation(vec![
            "vitals.spo2 45 outside range 50.0-100.0 %".into(),
            "patient.age 200 outside range 0-150".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("spo2"));
        assert!(msg.contains("age"));
    }
}

//! Case event bus message types.
//!
//! Wire format matches the live-event surface: every server→client message
//! carries a `type` tag (`STATUS_UPDATE`, `ADVICE_PUSH`, `PING`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CaseStatus, SpecialistAdvice};

/// Subscriber role on a case room, derived from the connection's credential
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberRole {
    Phw,
    Specialist,
}

/// Server→client event on a case room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseEvent {
    /// Broadcast on any case status transition
    StatusUpdate {
        case_id: Uuid,
        status: CaseStatus,
        timestamp: DateTime<Utc>,
    },
    /// Broadcast on advice submission
    AdvicePush {
        case_id: Uuid,
        advice: SpecialistAdvice,
    },
    /// Keepalive, emitted after 30 s of room idle
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_tags() {
        let event = CaseEvent::StatusUpdate {
            case_id: Uuid::nil(),
            status: CaseStatus::Escalated,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "STATUS_UPDATE");
        assert_eq!(json["status"], "escalated");

        let ping = serde_json::to_value(CaseEvent::Ping).unwrap();
        assert_eq!(ping["type"], "PING");
    }
}

//! Audit event types

use chrono::{DateTime, Local};
use parkgate_api::{Amount, Lane};
use parkgate_util::{IdentifierToken, SessionId, TicketNumber};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Configuration loaded
    ConfigLoaded { rate_count: usize },

    /// Vehicle entered and a session was opened
    EntryRecorded {
        session_id: SessionId,
        identifier: IdentifierToken,
        ticket_number: TicketNumber,
        caller: String,
    },

    /// Vehicle left and its session was closed
    ExitCompleted {
        session_id: SessionId,
        identifier: IdentifierToken,
        fee: Amount,
        caller: String,
    },

    /// Entry or exit pipeline stopped before completion
    PipelineAborted {
        lane: Lane,
        token: String,
        stage: String,
        reason: String,
        caller: String,
    },

    /// Gate did not open after the session was persisted; needs an operator
    GateFailed {
        lane: Lane,
        session_id: SessionId,
        identifier: IdentifierToken,
        reason: String,
        caller: String,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: parkgate_util::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_event_json_is_tagged() {
        let event = AuditEventType::GateFailed {
            lane: Lane::Exit,
            session_id: SessionId::new(3),
            identifier: IdentifierToken::new("ABC123"),
            reason: "relay timeout".into(),
            caller: "10.0.0.9:4411".into(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "gate_failed");
        assert_eq!(json["lane"], "exit");
        assert_eq!(json["session_id"], 3);
    }
}

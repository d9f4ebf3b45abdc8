//! Session events as streamed to clients.
//!
//! Wire shape: `{"sequence", "timestamp", "sessionId", "type", "payload"}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::decision::DecisionKind;
use crate::ids::{ArtifactId, PhaseId, SessionId};
use crate::mode::Mode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Abandoned,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    WorkProducer,
    Cancelled,
    Validation,
    VersionConflict,
    Persistence,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum EventKind {
    #[serde(rename = "session.started")]
    SessionStarted { mode: Mode, phase: PhaseId },

    #[serde(rename = "session.resumed")]
    SessionResumed { phase: PhaseId },

    #[serde(rename = "session.ended")]
    SessionEnded {
        phase: PhaseId,
        outcome: SessionOutcome,
        summary: String,
    },

    #[serde(rename = "phase.changed")]
    PhaseChanged {
        from: PhaseId,
        to: PhaseId,
        is_backward: bool,
        reason: String,
    },

    #[serde(rename = "checkpoint.required")]
    CheckpointRequired {
        checkpoint_id: String,
        name: String,
        message: String,
        options: Vec<String>,
        from: PhaseId,
        to: PhaseId,
        blocking: bool,
    },

    #[serde(rename = "checkpoint.resolved")]
    CheckpointResolved {
        checkpoint_id: String,
        decision: DecisionKind,
    },

    #[serde(rename = "work.progress")]
    WorkInProgress { phase: PhaseId, content: String },

    #[serde(rename = "artifact.added")]
    ArtifactAdded {
        phase: PhaseId,
        artifact_id: ArtifactId,
        artifact: Artifact,
    },

    #[serde(rename = "artifact.replaced")]
    ArtifactReplaced {
        artifact_id: ArtifactId,
        artifact: Artifact,
    },

    #[serde(rename = "error")]
    Error {
        code: ErrorCode,
        message: String,
        recoverable: bool,
    },
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::SessionStarted { .. } => "session.started",
            EventKind::SessionResumed { .. } => "session.resumed",
            EventKind::SessionEnded { .. } => "session.ended",
            EventKind::PhaseChanged { .. } => "phase.changed",
            EventKind::CheckpointRequired { .. } => "checkpoint.required",
            EventKind::CheckpointResolved { .. } => "checkpoint.resolved",
            EventKind::WorkInProgress { .. } => "work.progress",
            EventKind::ArtifactAdded { .. } => "artifact.added",
            EventKind::ArtifactReplaced { .. } => "artifact.replaced",
            EventKind::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase_changed() -> Event {
        Event {
            sequence: 7,
            timestamp: Utc::now(),
            session_id: SessionId::new(),
            kind: EventKind::PhaseChanged {
                from: PhaseId::from_static("answer"),
                to: PhaseId::from_static("decompose"),
                is_backward: true,
                reason: "new_category_discovered".to_string(),
            },
        }
    }

    #[test]
    fn test_event_wire_shape() {
        let event = phase_changed();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "phase.changed");
        assert_eq!(json["sequence"], 7);
        assert!(json.get("sessionId").is_some());
        assert_eq!(json["payload"]["isBackward"], true);
        assert_eq!(json["payload"]["from"], "answer");
    }

    #[test]
    fn test_event_deserializes_from_wire() {
        let event = phase_changed();
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_type_name_matches_serialized_tag() {
        let kind = EventKind::Error {
            code: ErrorCode::WorkProducer,
            message: "timeout".to_string(),
            recoverable: true,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], kind.type_name());
        assert_eq!(json["payload"]["code"], "work_producer");
    }
}

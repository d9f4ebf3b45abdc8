use std::fmt;

use chrono::{DateTime, Utc};
use journey_common::{JourneyBrief, Mode, PhaseId, SessionId, SessionOutcome};
use serde::{Deserialize, Serialize};

use crate::context::PhaseContext;
use crate::gates::{CheckpointGate, PendingCheckpoint, ResolvedCheckpoint};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Abandoned,
    Failed {
        reason: String,
    },
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Active)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
            SessionStatus::Failed { .. } => "failed",
        }
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        match self {
            SessionStatus::Active => None,
            SessionStatus::Completed => Some(SessionOutcome::Completed),
            SessionStatus::Abandoned => Some(SessionOutcome::Abandoned),
            SessionStatus::Failed { .. } => Some(SessionOutcome::Failed),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Failed { reason } => write!(f, "failed ({})", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// Engine-owned session state. The phase context lives in the context store.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: SessionId,
    pub mode: Mode,
    pub brief: JourneyBrief,
    pub current_phase: PhaseId,
    pub status: SessionStatus,
    pub gate: CheckpointGate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(id: SessionId, mode: Mode, brief: JourneyBrief, initial: PhaseId) -> Self {
        let now = Utc::now();
        Self {
            id,
            mode,
            brief,
            current_phase: initial,
            status: SessionStatus::Active,
            gate: CheckpointGate::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub phase: PhaseId,
}

/// One line per session for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub mode: Mode,
    pub phase: PhaseId,
    pub status: SessionStatus,
    pub awaiting_decision: bool,
    pub question: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&SessionState> for SessionSummary {
    fn from(state: &SessionState) -> Self {
        Self {
            session_id: state.id,
            mode: state.mode,
            phase: state.current_phase.clone(),
            status: state.status.clone(),
            awaiting_decision: state.gate.is_awaiting(),
            question: state.brief.question.clone(),
            updated_at: state.updated_at,
        }
    }
}

/// Read-only view of a session at its last commit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub mode: Mode,
    pub brief: JourneyBrief,
    pub current_phase: PhaseId,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_checkpoint: Option<PendingCheckpoint>,
    pub checkpoints: Vec<ResolvedCheckpoint>,
    pub context: PhaseContext,
    pub context_version: u64,
    pub last_sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

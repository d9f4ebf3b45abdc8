//! Typed error hierarchy for the journey engine.
//!
//! Library layers return these enums; the CLI wraps them in `anyhow` and the
//! HTTP layer maps them to status codes.

use std::path::PathBuf;
use std::time::Duration;

use journey_common::{ArtifactId, DecisionError, Mode, PhaseId, SessionId};
use thiserror::Error;

/// Structural problems in an agent definition, detected when it is registered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Agent {mode} declares no phases")]
    NoPhases { mode: Mode },

    #[error("Agent {mode} declares phase {phase} twice")]
    DuplicatePhase { mode: Mode, phase: PhaseId },

    #[error("Agent {mode} has no initial phase")]
    MissingInitial { mode: Mode },

    #[error("Agent {mode} has no terminal phase")]
    MissingTerminal { mode: Mode },

    #[error("Agent {mode} uses the same phase {phase} as initial and terminal")]
    InitialIsTerminal { mode: Mode, phase: PhaseId },

    #[error("Agent {mode} references unknown phase {phase}")]
    UnknownPhase { mode: Mode, phase: PhaseId },

    #[error("Agent {mode} has a transition leaving terminal phase {phase}")]
    TerminalHasExit { mode: Mode, phase: PhaseId },

    #[error("Agent {mode}: phase {phase} has no outgoing transition")]
    DeadEnd { mode: Mode, phase: PhaseId },

    #[error("Agent {mode}: phase {phase} is unreachable from the initial phase")]
    Unreachable { mode: Mode, phase: PhaseId },

    #[error("Agent {mode}: phase {phase} has no path to the terminal phase")]
    NoPathToTerminal { mode: Mode, phase: PhaseId },

    #[error("Agent {mode}: checkpoint {checkpoint} is attached to missing edge {from} -> {to}")]
    CheckpointWithoutEdge {
        mode: Mode,
        checkpoint: String,
        from: PhaseId,
        to: PhaseId,
    },

    #[error("Agent {mode} is already registered")]
    AlreadyRegistered { mode: Mode },
}

/// Caller mistakes. Rejected before any state is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error("Checkpoint {checkpoint_id} is awaiting a decision")]
    DecisionRequired { checkpoint_id: String },

    #[error("No artifact with id {0}")]
    UnknownArtifact(ArtifactId),

    #[error("Artifact {id} is a {existing}, cannot replace it with a {replacement}")]
    ArtifactKindMismatch {
        id: ArtifactId,
        existing: String,
        replacement: String,
    },
}

/// Checkpoint gate state machine violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("No checkpoint is awaiting a decision")]
    NotAwaiting,

    #[error("Checkpoint {0} is already awaiting a decision")]
    AlreadyAwaiting(String),

    #[error("Checkpoint {0} was already resolved")]
    AlreadyResolved(String),

    #[error("Unknown checkpoint {0}")]
    UnknownCheckpoint(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No context stored for session {0}")]
    NotFound(SessionId),

    #[error("Context for session {0} already exists")]
    AlreadyExists(SessionId),

    #[error("Version conflict for session {session}: expected {expected}, found {actual}")]
    VersionConflict {
        session: SessionId,
        expected: u64,
        actual: u64,
    },

    #[error("Snapshot checksum mismatch (expected {expected}, computed {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported snapshot format {0}")]
    UnsupportedFormat(u32),

    #[error("Snapshot belongs to session {found}, expected {expected}")]
    SessionMismatch {
        expected: SessionId,
        found: SessionId,
    },

    #[error("Snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode session {id}: {source}")]
    Encode {
        id: SessionId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Corrupt session file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Session file {path} has unsupported format {found}")]
    UnsupportedFormat { path: PathBuf, found: u32 },

    #[error("Session file {path} has an invalid context snapshot: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("Session persistence is not configured")]
    Disabled,

    #[error("Session {0} is already loaded")]
    AlreadyLoaded(SessionId),
}

/// Failure reported by a work producer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProducerError {
    #[error("Transient producer failure: {0}")]
    Transient(String),

    #[error("Producer attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Producer failed: {0}")]
    Permanent(String),
}

impl ProducerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProducerError::Transient(_) | ProducerError::Timeout(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Phase work failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ProducerError },

    #[error("Phase work failed: {0}")]
    Failed(ProducerError),

    #[error("Phase work was cancelled")]
    Cancelled,
}

/// Replay cursor problems on an event channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Cursor {requested} is older than the retained window (oldest sequence {oldest})")]
    CursorExpired { requested: u64, oldest: u64 },

    #[error("Cursor {requested} is ahead of the last sequence {last}")]
    CursorAhead { requested: u64, last: u64 },
}

/// Errors returned by the orchestration engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("No agent registered for mode {0}")]
    UnknownAgent(Mode),

    #[error("Session {id} is {status} and read-only")]
    SessionTerminated { id: SessionId, status: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Agent table for {mode} has no transition {from} -> {to}")]
    MissingTransition {
        mode: Mode,
        from: PhaseId,
        to: PhaseId,
    },
}

impl From<DecisionError> for EngineError {
    fn from(err: DecisionError) -> Self {
        EngineError::Validation(ValidationError::Decision(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_dead_end_carries_phase() {
        let err = ConfigurationError::DeadEnd {
            mode: Mode::Research,
            phase: PhaseId::from_static("answer"),
        };
        match &err {
            ConfigurationError::DeadEnd { phase, .. } => assert_eq!(phase.as_str(), "answer"),
            _ => panic!("Expected DeadEnd"),
        }
        assert!(err.to_string().contains("answer"));
        assert!(err.to_string().contains("research"));
    }

    #[test]
    fn producer_error_transience() {
        assert!(ProducerError::Transient("rate limited".into()).is_transient());
        assert!(ProducerError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ProducerError::Permanent("bad request".into()).is_transient());
    }

    #[test]
    fn engine_error_converts_from_gate_error() {
        let err: EngineError = GateError::AlreadyResolved("cp-1".into()).into();
        match &err {
            EngineError::Gate(GateError::AlreadyResolved(id)) => assert_eq!(id, "cp-1"),
            _ => panic!("Expected EngineError::Gate(AlreadyResolved)"),
        }
    }

    #[test]
    fn engine_error_converts_from_decision_error() {
        let err: EngineError = DecisionError::EmptyReason.into();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::Decision(DecisionError::EmptyReason))
        ));
    }

    #[test]
    fn store_error_version_conflict_message() {
        let session = SessionId::new();
        let err = StoreError::VersionConflict {
            session,
            expected: 3,
            actual: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("found 4"));
    }
}

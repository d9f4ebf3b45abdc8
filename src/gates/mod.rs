//! Checkpoint gate: the per-session state machine that holds a proposed
//! transition until a decision arrives.
//!
//! `Idle -> AwaitingDecision -> Resolved -> (Idle | AwaitingDecision)`.
//! Each raised checkpoint gets a fresh instance id and accepts exactly one
//! decision.

pub mod prompt;

use chrono::{DateTime, Utc};
use journey_common::{DecisionKind, PhaseId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::GateError;
use crate::phase::{CheckpointSpec, Transition};

pub use prompt::{InteractiveGate, PromptedDecision};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCheckpoint {
    pub checkpoint_id: String,
    pub spec: CheckpointSpec,
    pub from: PhaseId,
    pub to: PhaseId,
    /// Condition name of the proposed transition.
    pub reason: String,
    pub raised_at: DateTime<Utc>,
}

impl PendingCheckpoint {
    pub fn new(spec: &CheckpointSpec, transition: &Transition) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            spec: spec.clone(),
            from: transition.from.clone(),
            to: transition.to.clone(),
            reason: transition.condition.name().to_string(),
            raised_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCheckpoint {
    pub checkpoint_id: String,
    pub name: String,
    pub decision: DecisionKind,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    #[default]
    Idle,
    AwaitingDecision { pending: PendingCheckpoint },
    Resolved { last: ResolvedCheckpoint },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointGate {
    state: GateState,
    #[serde(default)]
    history: Vec<ResolvedCheckpoint>,
}

impl CheckpointGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn history(&self) -> &[ResolvedCheckpoint] {
        &self.history
    }

    pub fn pending(&self) -> Option<&PendingCheckpoint> {
        match &self.state {
            GateState::AwaitingDecision { pending } => Some(pending),
            _ => None,
        }
    }

    pub fn is_awaiting(&self) -> bool {
        self.pending().is_some()
    }

    pub fn raise(&mut self, pending: PendingCheckpoint) -> Result<(), GateError> {
        if let Some(current) = self.pending() {
            return Err(GateError::AlreadyAwaiting(current.checkpoint_id.clone()));
        }
        self.state = GateState::AwaitingDecision { pending };
        Ok(())
    }

    /// Checks that `checkpoint_id` is the instance awaiting a decision,
    /// without changing state.
    pub fn check(&self, checkpoint_id: &str) -> Result<&PendingCheckpoint, GateError> {
        if self.history.iter().any(|r| r.checkpoint_id == checkpoint_id) {
            return Err(GateError::AlreadyResolved(checkpoint_id.to_string()));
        }
        match self.pending() {
            Some(pending) if pending.checkpoint_id == checkpoint_id => Ok(pending),
            Some(_) => Err(GateError::UnknownCheckpoint(checkpoint_id.to_string())),
            None => Err(GateError::NotAwaiting),
        }
    }

    /// Records the decision and returns the checkpoint it resolved.
    pub fn resolve(
        &mut self,
        checkpoint_id: &str,
        decision: DecisionKind,
    ) -> Result<PendingCheckpoint, GateError> {
        let pending = self.check(checkpoint_id)?.clone();
        let resolved = ResolvedCheckpoint {
            checkpoint_id: pending.checkpoint_id.clone(),
            name: pending.spec.id.clone(),
            decision,
            resolved_at: Utc::now(),
        };
        self.history.push(resolved.clone());
        self.state = GateState::Resolved { last: resolved };
        Ok(pending)
    }
}

//! Per-session phase context: visit counts, transition history, backward
//! trigger, artifacts, milestones and pending flags.
//!
//! The context is only mutated by the engine. Producers influence it through
//! the outputs they stream, which the engine applies to a working copy before
//! committing it to a [`store::ContextStore`].

pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use journey_common::{Amendment, Artifact, ArtifactId, ArtifactKind, PhaseId};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::phase::Transition;

/// Trigger name recorded when a checkpoint decision rejects a proposal.
pub const CHECKPOINT_REJECTED: &str = "checkpoint_rejected";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub from_phase: PhaseId,
    pub to_phase: PhaseId,
    pub reason: String,
    pub is_backward: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackwardTrigger {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl BackwardTrigger {
    pub fn describe(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}", self.name, detail),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub id: ArtifactId,
    pub phase: PhaseId,
    pub visit: u32,
    pub artifact: Artifact,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u32,
}

/// Completion marker raised by a producer during a phase visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    pub phase: PhaseId,
    pub visit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseContext {
    visit_counts: BTreeMap<PhaseId, u32>,
    transition_history: Vec<TransitionRecord>,
    #[serde(default)]
    backward_trigger: Option<BackwardTrigger>,
    #[serde(default)]
    artifacts: Vec<ArtifactRecord>,
    #[serde(default)]
    milestones: Vec<Milestone>,
    #[serde(default)]
    pending_flags: BTreeMap<String, Option<String>>,
}

impl PhaseContext {
    /// Fresh context for a session sitting in `initial` for the first time.
    pub fn new(initial: &PhaseId) -> Self {
        let mut visit_counts = BTreeMap::new();
        visit_counts.insert(initial.clone(), 1);
        Self {
            visit_counts,
            ..Self::default()
        }
    }

    pub fn visits(&self, phase: &PhaseId) -> u32 {
        self.visit_counts.get(phase).copied().unwrap_or(0)
    }

    pub fn visit_counts(&self) -> &BTreeMap<PhaseId, u32> {
        &self.visit_counts
    }

    pub fn total_visits(&self) -> u32 {
        self.visit_counts.values().sum()
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.transition_history
    }

    pub fn backward_trigger(&self) -> Option<&BackwardTrigger> {
        self.backward_trigger.as_ref()
    }

    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }

    pub fn artifact(&self, id: &ArtifactId) -> Option<&ArtifactRecord> {
        self.artifacts.iter().find(|r| &r.id == id)
    }

    pub fn artifacts_in(&self, phase: &PhaseId) -> impl Iterator<Item = &ArtifactRecord> {
        self.artifacts.iter().filter(move |r| &r.phase == phase)
    }

    pub fn count(&self, kind: ArtifactKind) -> usize {
        self.artifacts
            .iter()
            .filter(|r| r.artifact.kind() == kind)
            .count()
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    /// True when `name` was raised during the latest visit of the phase that
    /// raised it. Re-entering that phase makes the milestone stale.
    pub fn milestone_current(&self, name: &str) -> bool {
        self.milestones
            .iter()
            .any(|m| m.name == name && m.visit == self.visits(&m.phase))
    }

    pub fn milestone_ever(&self, name: &str) -> bool {
        self.milestones.iter().any(|m| m.name == name)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.pending_flags.contains_key(name)
    }

    pub fn pending_flags(&self) -> &BTreeMap<String, Option<String>> {
        &self.pending_flags
    }

    pub(crate) fn add_artifact(&mut self, phase: &PhaseId, artifact: Artifact) -> ArtifactId {
        let id = ArtifactId::new();
        self.artifacts.push(ArtifactRecord {
            id: id.clone(),
            phase: phase.clone(),
            visit: self.visits(phase),
            artifact,
            created_at: Utc::now(),
            revision: 0,
        });
        id
    }

    pub(crate) fn reach_milestone(&mut self, phase: &PhaseId, name: &str, detail: Option<String>) {
        let visit = self.visits(phase);
        if let Some(existing) = self
            .milestones
            .iter_mut()
            .find(|m| m.name == name && &m.phase == phase && m.visit == visit)
        {
            existing.detail = detail;
            return;
        }
        self.milestones.push(Milestone {
            name: name.to_string(),
            phase: phase.clone(),
            visit,
            detail,
        });
    }

    pub(crate) fn raise_flag(&mut self, name: &str, detail: Option<String>) {
        self.pending_flags.insert(name.to_string(), detail);
    }

    pub(crate) fn set_backward_trigger(&mut self, name: &str, detail: Option<String>) {
        self.backward_trigger = Some(BackwardTrigger {
            name: name.to_string(),
            detail,
        });
    }

    /// Checks every amendment before touching anything, then applies them all.
    pub(crate) fn apply_amendments(
        &mut self,
        amendments: &[Amendment],
    ) -> Result<(), ValidationError> {
        for amendment in amendments {
            let record = self
                .artifact(&amendment.artifact_id)
                .ok_or_else(|| ValidationError::UnknownArtifact(amendment.artifact_id.clone()))?;
            let (existing, replacement) = (record.artifact.kind(), amendment.artifact.kind());
            if existing != replacement {
                return Err(ValidationError::ArtifactKindMismatch {
                    id: amendment.artifact_id.clone(),
                    existing: existing.to_string(),
                    replacement: replacement.to_string(),
                });
            }
        }
        for amendment in amendments {
            if let Some(record) = self
                .artifacts
                .iter_mut()
                .find(|r| r.id == amendment.artifact_id)
            {
                record.artifact = amendment.artifact.clone();
                record.revision += 1;
            }
        }
        Ok(())
    }

    /// Appends the transition to history and enters `to`.
    ///
    /// A backward transition records its condition as the trigger, taking the
    /// detail from a matching pending flag. Without one it keeps the current
    /// trigger's detail when the names agree or the current trigger is a
    /// checkpoint rejection, so the learner's reason reaches the target phase.
    /// A forward transition clears the trigger. Pending flags never survive a
    /// transition.
    pub(crate) fn record_transition(&mut self, transition: &Transition) -> TransitionRecord {
        let reason = transition.condition.name().to_string();
        if transition.is_backward {
            let detail = match self.pending_flags.get(&reason) {
                Some(Some(detail)) => Some(detail.clone()),
                flagged => self
                    .backward_trigger
                    .as_ref()
                    .filter(|t| t.name == reason || t.name == CHECKPOINT_REJECTED)
                    .and_then(|t| t.detail.clone())
                    .or_else(|| flagged.cloned().flatten()),
            };
            self.set_backward_trigger(&reason, detail);
        } else {
            self.backward_trigger = None;
        }
        self.pending_flags.clear();
        *self.visit_counts.entry(transition.to.clone()).or_insert(0) += 1;

        let record = TransitionRecord {
            from_phase: transition.from.clone(),
            to_phase: transition.to.clone(),
            reason,
            is_backward: transition.is_backward,
            timestamp: Utc::now(),
        };
        self.transition_history.push(record.clone());
        record
    }
}

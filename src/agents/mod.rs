//! Built-in mode-agents and the registry that validates them.

pub mod build;
pub mod research;
pub mod understand;

use std::collections::HashMap;
use std::sync::Arc;

use journey_common::{Mode, PhaseId};
use serde::Serialize;

use crate::context::PhaseContext;
use crate::errors::{ConfigurationError, EngineError};
use crate::phase::{AgentBuilder, AgentDefinition};

/// Validated agent definitions keyed by mode.
///
/// Registration runs the full graph validation; a definition that fails is
/// never stored.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<Mode, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the research, understand and build agents.
    pub fn builtin() -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        registry.register(research::definition())?;
        registry.register(understand::definition())?;
        registry.register(build::definition())?;
        Ok(registry)
    }

    pub fn register(&mut self, builder: AgentBuilder) -> Result<Arc<AgentDefinition>, ConfigurationError> {
        let mode = builder.mode();
        if self.agents.contains_key(&mode) {
            return Err(ConfigurationError::AlreadyRegistered { mode });
        }
        let def = Arc::new(builder.build()?);
        tracing::debug!(%mode, phases = def.phases().len(), "registered agent");
        self.agents.insert(mode, Arc::clone(&def));
        Ok(def)
    }

    pub fn get(&self, mode: Mode) -> Result<Arc<AgentDefinition>, EngineError> {
        self.agents
            .get(&mode)
            .cloned()
            .ok_or(EngineError::UnknownAgent(mode))
    }

    /// Registered modes in canonical order.
    pub fn modes(&self) -> Vec<Mode> {
        Mode::ALL
            .iter()
            .copied()
            .filter(|m| self.agents.contains_key(m))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Serializable view of an agent's phase graph.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub mode: Mode,
    pub initial: PhaseId,
    pub terminal: PhaseId,
    pub phases: Vec<PhaseId>,
    pub transitions: Vec<TransitionSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSummary {
    pub from: PhaseId,
    pub to: PhaseId,
    pub condition: &'static str,
    pub is_backward: bool,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
}

impl From<&AgentDefinition> for AgentSummary {
    fn from(def: &AgentDefinition) -> Self {
        let transitions = def
            .transitions()
            .iter()
            .map(|t| TransitionSummary {
                from: t.from.clone(),
                to: t.to.clone(),
                condition: t.condition.name(),
                is_backward: t.is_backward,
                priority: t.priority,
                checkpoint: def.checkpoint_for(&t.from, &t.to).map(|c| c.id.clone()),
            })
            .collect();
        Self {
            mode: def.mode(),
            initial: def.initial().clone(),
            terminal: def.terminal().clone(),
            phases: def.phases().to_vec(),
            transitions,
        }
    }
}

impl AgentRegistry {
    pub fn summaries(&self) -> Vec<AgentSummary> {
        self.modes()
            .into_iter()
            .filter_map(|mode| self.agents.get(&mode))
            .map(|def| AgentSummary::from(def.as_ref()))
            .collect()
    }
}

/// Shared objective-loop predicates for the understand and build agents.
///
/// Each pass through the wrap-up phase finishes one learning objective, so the
/// visit count of that phase is the number of objectives done.
pub(crate) mod objectives {
    use journey_common::{ArtifactKind, PhaseId};

    use super::PhaseContext;

    pub const SLO_COMPLETE: PhaseId = PhaseId::from_static("slo_complete");
    pub const WRAPPED_UP: &str = "slo_wrapped_up";

    fn remaining(ctx: &PhaseContext) -> bool {
        ctx.count(ArtifactKind::LearningObjective) > ctx.visits(&SLO_COMPLETE) as usize
    }

    pub fn next_slo_available(ctx: &PhaseContext) -> bool {
        ctx.milestone_current(WRAPPED_UP) && remaining(ctx)
    }

    pub fn all_slos_complete(ctx: &PhaseContext) -> bool {
        ctx.milestone_current(WRAPPED_UP) && !remaining(ctx)
    }

    pub fn slos_selected(ctx: &PhaseContext) -> bool {
        ctx.milestone_current("slos_selected") && ctx.count(ArtifactKind::LearningObjective) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{Condition, Transition};
    use journey_common::PhaseId;

    #[test]
    fn test_builtin_agents_validate() {
        let registry = AgentRegistry::builtin().unwrap();
        assert_eq!(registry.modes(), Mode::ALL.to_vec());
        for mode in Mode::ALL {
            let def = registry.get(mode).unwrap();
            assert_eq!(def.mode(), mode);
            assert!(def.outgoing(def.terminal()).next().is_none());
        }
    }

    #[test]
    fn test_summaries_mark_checkpointed_edges() {
        let registry = AgentRegistry::builtin().unwrap();
        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 3);

        let research = &summaries[0];
        assert_eq!(research.mode, Mode::Research);
        let gated: Vec<_> = research
            .transitions
            .iter()
            .filter_map(|t| t.checkpoint.as_deref())
            .collect();
        assert_eq!(gated, vec!["decompose_approval"]);
        assert!(research.transitions.iter().any(|t| t.is_backward));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = AgentRegistry::builtin().unwrap();
        let err = registry.register(research::definition()).unwrap_err();
        assert_eq!(err, ConfigurationError::AlreadyRegistered { mode: Mode::Research });
    }

    #[test]
    fn test_invalid_definition_is_never_stored() {
        fn never(_: &PhaseContext) -> bool {
            false
        }
        const A: PhaseId = PhaseId::from_static("a");
        const B: PhaseId = PhaseId::from_static("b");
        const ORPHAN: PhaseId = PhaseId::from_static("orphan");

        let mut registry = AgentRegistry::new();
        let builder = AgentDefinition::builder(Mode::Build)
            .phases(&[A, B, ORPHAN])
            .initial(A)
            .terminal(B)
            .transition(Transition::forward(A, B, Condition::new("go", never)))
            .transition(Transition::forward(ORPHAN, B, Condition::new("go", never)));
        assert!(registry.register(builder).is_err());
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get(Mode::Build),
            Err(EngineError::UnknownAgent(Mode::Build))
        ));
    }
}

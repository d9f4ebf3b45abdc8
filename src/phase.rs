//! Agent definitions: the static phase graph each mode-agent runs on.
//!
//! This module provides:
//! - `Condition` and `Transition`, the edges of a phase graph
//! - `CheckpointSpec`, approval gates attached to edges
//! - `PhaseProgram`, the per-phase instructions and operation scope
//! - `AgentDefinition` and its builder, which validates the graph

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use journey_common::{ArtifactKind, Mode, PhaseId};
use serde::{Deserialize, Serialize};

use crate::context::PhaseContext;
use crate::errors::ConfigurationError;

pub type Predicate = fn(&PhaseContext) -> bool;

/// A named, pure predicate over the phase context.
#[derive(Clone, Copy)]
pub struct Condition {
    name: &'static str,
    predicate: Predicate,
}

impl Condition {
    pub const fn new(name: &'static str, predicate: Predicate) -> Self {
        Self { name, predicate }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn holds(&self, ctx: &PhaseContext) -> bool {
        (self.predicate)(ctx)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub from: PhaseId,
    pub to: PhaseId,
    pub condition: Condition,
    pub is_backward: bool,
    pub priority: i32,
}

impl Transition {
    pub fn forward(from: PhaseId, to: PhaseId, condition: Condition) -> Self {
        Self {
            from,
            to,
            condition,
            is_backward: false,
            priority: 0,
        }
    }

    pub fn backward(from: PhaseId, to: PhaseId, condition: Condition) -> Self {
        Self {
            from,
            to,
            condition,
            is_backward: true,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Same edge and same condition.
    pub fn same_as(&self, other: &Transition) -> bool {
        self.from == other.from
            && self.to == other.to
            && self.condition.name() == other.condition.name()
    }
}

/// Approval gate attached to a transition edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSpec {
    pub id: String,
    pub message: String,
    pub options: Vec<String>,
    pub blocking: bool,
}

impl CheckpointSpec {
    pub fn blocking(id: &str, message: &str) -> Self {
        Self {
            id: id.to_string(),
            message: message.to_string(),
            options: vec![
                "Approve".to_string(),
                "Modify".to_string(),
                "Reject".to_string(),
            ],
            blocking: true,
        }
    }

    pub fn informational(id: &str, message: &str) -> Self {
        Self {
            blocking: false,
            options: Vec::new(),
            ..Self::blocking(id, message)
        }
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }
}

/// What a phase asks of the work producer, and what it allows back.
#[derive(Debug, Clone, Default)]
pub struct PhaseProgram {
    pub title: &'static str,
    /// Instructions for the first visit.
    pub instructions: &'static str,
    /// Extra guidance appended on re-entry.
    pub reentry: &'static str,
    pub artifacts: Vec<ArtifactKind>,
    pub milestones: Vec<&'static str>,
    pub flags: Vec<&'static str>,
}

impl PhaseProgram {
    pub fn new(title: &'static str, instructions: &'static str) -> Self {
        Self {
            title,
            instructions,
            ..Self::default()
        }
    }

    pub fn reentry(mut self, text: &'static str) -> Self {
        self.reentry = text;
        self
    }

    pub fn artifacts(mut self, kinds: &[ArtifactKind]) -> Self {
        self.artifacts = kinds.to_vec();
        self
    }

    pub fn milestones(mut self, names: &[&'static str]) -> Self {
        self.milestones = names.to_vec();
        self
    }

    pub fn flags(mut self, names: &[&'static str]) -> Self {
        self.flags = names.to_vec();
        self
    }

    pub fn allows_artifact(&self, kind: ArtifactKind) -> bool {
        self.artifacts.contains(&kind)
    }

    pub fn allows_milestone(&self, name: &str) -> bool {
        self.milestones.contains(&name)
    }

    pub fn allows_flag(&self, name: &str) -> bool {
        self.flags.contains(&name)
    }
}

/// A validated, immutable phase graph for one mode.
#[derive(Debug)]
pub struct AgentDefinition {
    mode: Mode,
    system_prompt: &'static str,
    phases: Vec<PhaseId>,
    initial: PhaseId,
    terminal: PhaseId,
    transitions: Vec<Transition>,
    checkpoints: HashMap<(PhaseId, PhaseId), CheckpointSpec>,
    programs: HashMap<PhaseId, PhaseProgram>,
}

impl AgentDefinition {
    pub fn builder(mode: Mode) -> AgentBuilder {
        AgentBuilder::new(mode)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn system_prompt(&self) -> &'static str {
        self.system_prompt
    }

    pub fn phases(&self) -> &[PhaseId] {
        &self.phases
    }

    pub fn initial(&self) -> &PhaseId {
        &self.initial
    }

    pub fn terminal(&self) -> &PhaseId {
        &self.terminal
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn contains(&self, phase: &PhaseId) -> bool {
        self.phases.contains(phase)
    }

    /// Outgoing transitions of `phase`, in table order.
    pub fn outgoing<'a>(&'a self, phase: &'a PhaseId) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |t| &t.from == phase)
    }

    pub fn find_transition(&self, from: &PhaseId, to: &PhaseId, reason: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| &t.from == from && &t.to == to && t.condition.name() == reason)
    }

    pub fn checkpoint_for(&self, from: &PhaseId, to: &PhaseId) -> Option<&CheckpointSpec> {
        self.checkpoints.get(&(from.clone(), to.clone()))
    }

    pub fn program(&self, phase: &PhaseId) -> Option<&PhaseProgram> {
        self.programs.get(phase)
    }
}

pub struct AgentBuilder {
    mode: Mode,
    system_prompt: &'static str,
    phases: Vec<PhaseId>,
    initial: Option<PhaseId>,
    terminal: Option<PhaseId>,
    transitions: Vec<Transition>,
    checkpoints: Vec<(PhaseId, PhaseId, CheckpointSpec)>,
    programs: HashMap<PhaseId, PhaseProgram>,
}

impl AgentBuilder {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            system_prompt: "",
            phases: Vec::new(),
            initial: None,
            terminal: None,
            transitions: Vec::new(),
            checkpoints: Vec::new(),
            programs: HashMap::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn system_prompt(mut self, prompt: &'static str) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn phases(mut self, phases: &[PhaseId]) -> Self {
        self.phases = phases.to_vec();
        self
    }

    pub fn initial(mut self, phase: PhaseId) -> Self {
        self.initial = Some(phase);
        self
    }

    pub fn terminal(mut self, phase: PhaseId) -> Self {
        self.terminal = Some(phase);
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn checkpoint(mut self, from: PhaseId, to: PhaseId, spec: CheckpointSpec) -> Self {
        self.checkpoints.push((from, to, spec));
        self
    }

    pub fn program(mut self, phase: PhaseId, program: PhaseProgram) -> Self {
        self.programs.insert(phase, program);
        self
    }

    /// Validates the graph and freezes it.
    pub fn build(self) -> Result<AgentDefinition, ConfigurationError> {
        let mode = self.mode;
        if self.phases.is_empty() {
            return Err(ConfigurationError::NoPhases { mode });
        }
        let mut seen = BTreeSet::new();
        for phase in &self.phases {
            if !seen.insert(phase) {
                return Err(ConfigurationError::DuplicatePhase {
                    mode,
                    phase: phase.clone(),
                });
            }
        }
        let known = |phase: &PhaseId| -> Result<(), ConfigurationError> {
            if seen.contains(phase) {
                Ok(())
            } else {
                Err(ConfigurationError::UnknownPhase {
                    mode,
                    phase: phase.clone(),
                })
            }
        };

        let initial = self
            .initial
            .clone()
            .ok_or(ConfigurationError::MissingInitial { mode })?;
        let terminal = self
            .terminal
            .clone()
            .ok_or(ConfigurationError::MissingTerminal { mode })?;
        known(&initial)?;
        known(&terminal)?;
        if initial == terminal {
            return Err(ConfigurationError::InitialIsTerminal {
                mode,
                phase: initial,
            });
        }

        for t in &self.transitions {
            known(&t.from)?;
            known(&t.to)?;
            if t.from == terminal {
                return Err(ConfigurationError::TerminalHasExit {
                    mode,
                    phase: terminal,
                });
            }
        }
        for phase in self.programs.keys() {
            known(phase)?;
        }

        for phase in &self.phases {
            if phase != &terminal && !self.transitions.iter().any(|t| &t.from == phase) {
                return Err(ConfigurationError::DeadEnd {
                    mode,
                    phase: phase.clone(),
                });
            }
        }

        let forward_reach = reachable(&initial, |p| {
            self.transitions
                .iter()
                .filter(|t| &t.from == p)
                .map(|t| t.to.clone())
                .collect()
        });
        if let Some(phase) = self.phases.iter().find(|p| !forward_reach.contains(*p)) {
            return Err(ConfigurationError::Unreachable {
                mode,
                phase: phase.clone(),
            });
        }

        let reaches_terminal = reachable(&terminal, |p| {
            self.transitions
                .iter()
                .filter(|t| &t.to == p)
                .map(|t| t.from.clone())
                .collect()
        });
        if let Some(phase) = self.phases.iter().find(|p| !reaches_terminal.contains(*p)) {
            return Err(ConfigurationError::NoPathToTerminal {
                mode,
                phase: phase.clone(),
            });
        }

        let mut checkpoints = HashMap::new();
        for (from, to, spec) in self.checkpoints {
            if !self
                .transitions
                .iter()
                .any(|t| t.from == from && t.to == to)
            {
                return Err(ConfigurationError::CheckpointWithoutEdge {
                    mode,
                    checkpoint: spec.id,
                    from,
                    to,
                });
            }
            checkpoints.insert((from, to), spec);
        }

        Ok(AgentDefinition {
            mode,
            system_prompt: self.system_prompt,
            phases: self.phases,
            initial,
            terminal,
            transitions: self.transitions,
            checkpoints,
            programs: self.programs,
        })
    }
}

fn reachable(start: &PhaseId, next: impl Fn(&PhaseId) -> Vec<PhaseId>) -> BTreeSet<PhaseId> {
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::from([start.clone()]);
    while let Some(phase) = queue.pop_front() {
        if visited.insert(phase.clone()) {
            queue.extend(next(&phase));
        }
    }
    visited
}

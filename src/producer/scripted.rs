//! Deterministic producer that replays scripted turns per phase.
//!
//! Each call to `generate` for a phase pops that phase's next turn. A phase
//! with no turns left produces nothing, which leaves the session where it is.
//! Scripts can be built in code or loaded from YAML:
//!
//! ```yaml
//! phases:
//!   decompose:
//!     - steps:
//!         - step: progress
//!           text: "Breaking the question down"
//!         - step: artifact
//!           artifact: { kind: question, question: "Why are there two tides a day?" }
//!         - step: milestone
//!           name: decompose_complete
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use journey_common::Artifact;
use serde::{Deserialize, Serialize};

use super::{GenerateRequest, OutputStream, ProducerOutput, WorkProducer};
use crate::errors::ProducerError;
use crate::signals::NamedSignal;

fn default_transient() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScriptStep {
    Progress {
        text: String,
    },
    Artifact {
        artifact: Artifact,
    },
    Milestone {
        name: String,
    },
    Flag {
        name: String,
        #[serde(default)]
        detail: Option<String>,
    },
    /// Ends the turn with an error.
    Fail {
        message: String,
        #[serde(default = "default_transient")]
        transient: bool,
    },
    /// Never finishes; used to exercise cancellation and timeouts.
    Stall,
}

impl ScriptStep {
    pub fn progress(text: &str) -> Self {
        ScriptStep::Progress {
            text: text.to_string(),
        }
    }

    pub fn artifact(artifact: Artifact) -> Self {
        ScriptStep::Artifact { artifact }
    }

    pub fn milestone(name: &str) -> Self {
        ScriptStep::Milestone {
            name: name.to_string(),
        }
    }

    pub fn flag(name: &str, detail: Option<&str>) -> Self {
        ScriptStep::Flag {
            name: name.to_string(),
            detail: detail.map(str::to_string),
        }
    }

    pub fn transient(message: &str) -> Self {
        ScriptStep::Fail {
            message: message.to_string(),
            transient: true,
        }
    }

    pub fn permanent(message: &str) -> Self {
        ScriptStep::Fail {
            message: message.to_string(),
            transient: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptTurn {
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptFile {
    #[serde(default)]
    pub phases: BTreeMap<String, Vec<ScriptTurn>>,
}

#[derive(Default)]
pub struct ScriptedProducer {
    turns: Mutex<HashMap<String, VecDeque<Vec<ScriptStep>>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(script: ScriptFile) -> Self {
        let producer = Self::new();
        for (phase, turns) in script.phases {
            for turn in turns {
                producer.push_turn(&phase, turn.steps);
            }
        }
        producer
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str::<ScriptFile>(text).map(Self::from_script)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid script {}", path.display()))
    }

    pub fn with_turn(self, phase: &str, steps: Vec<ScriptStep>) -> Self {
        self.push_turn(phase, steps);
        self
    }

    pub fn push_turn(&self, phase: &str, steps: Vec<ScriptStep>) {
        lock(&self.turns)
            .entry(phase.to_string())
            .or_default()
            .push_back(steps);
    }

    pub fn remaining(&self, phase: &str) -> usize {
        lock(&self.turns).get(phase).map_or(0, VecDeque::len)
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl WorkProducer for ScriptedProducer {
    async fn generate(&self, request: GenerateRequest) -> Result<OutputStream, ProducerError> {
        let steps = lock(&self.turns)
            .get_mut(request.phase.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        lock(&self.requests).push(request);

        let mut items = Vec::new();
        let mut stalled = false;
        for step in steps {
            match step {
                ScriptStep::Progress { text } => items.push(Ok(ProducerOutput::Progress(text))),
                ScriptStep::Artifact { artifact } => {
                    items.push(Ok(ProducerOutput::Artifact(artifact)))
                }
                ScriptStep::Milestone { name } => items.push(Ok(ProducerOutput::Milestone(
                    NamedSignal::new(&name, None),
                ))),
                ScriptStep::Flag { name, detail } => items.push(Ok(ProducerOutput::Flag(
                    NamedSignal::new(&name, detail.as_deref()),
                ))),
                ScriptStep::Fail { message, transient } => {
                    items.push(Err(if transient {
                        ProducerError::Transient(message)
                    } else {
                        ProducerError::Permanent(message)
                    }));
                    break;
                }
                ScriptStep::Stall => {
                    stalled = true;
                    break;
                }
            }
        }

        let outputs = futures::stream::iter(items);
        if stalled {
            Ok(outputs.chain(futures::stream::pending()).boxed())
        } else {
            Ok(outputs.boxed())
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

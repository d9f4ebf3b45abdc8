//! Structured signals embedded in a producer's text output.
//!
//! Language-model producers report their work inline:
//!
//! - `<artifact>{"kind": "question", ...}</artifact>` - an artifact, as JSON
//! - `<milestone>decompose_complete</milestone>` - phase work is done
//! - `<flag name="new_category_discovered">details</flag>` - a discovery that
//!   may send the session backward
//!
//! Everything outside the tags is narrative and is streamed as progress.

mod parser;

pub use parser::{SignalParser, extract_signals};

use journey_common::Artifact;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSignal {
    pub name: String,
    pub detail: Option<String>,
}

impl NamedSignal {
    pub fn new(name: &str, detail: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            detail: detail.map(str::to_string),
        }
    }
}

/// Everything extracted from one block of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSignals {
    pub artifacts: Vec<Artifact>,
    pub milestones: Vec<NamedSignal>,
    pub flags: Vec<NamedSignal>,
    /// Artifact payloads that failed to parse, with the parse error.
    pub malformed: Vec<String>,
    /// Text with all signal tags removed.
    pub narrative: String,
}

impl TextSignals {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.milestones.is_empty() && self.flags.is_empty()
    }
}

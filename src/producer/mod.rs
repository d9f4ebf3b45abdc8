//! The work-producer boundary.
//!
//! A producer turns a rendered phase prompt into a stream of outputs. The
//! engine never lets a producer touch session state directly: artifacts,
//! milestones and flags are buffered by the executor and only committed
//! when the whole phase run succeeds.

pub mod claude;
pub mod scripted;

use async_trait::async_trait;
use futures::stream::BoxStream;
use journey_common::{Artifact, PhaseId, SessionId};

use crate::errors::ProducerError;
use crate::executor::PromptVariant;
use crate::signals::NamedSignal;

pub use claude::{ClaudeProducer, ClaudeSettings};
pub use scripted::{ScriptStep, ScriptedProducer};

/// An operation the current phase allows the producer to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub session_id: SessionId,
    pub phase: PhaseId,
    pub variant: PromptVariant,
    pub system: String,
    pub prompt: String,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProducerOutput {
    Progress(String),
    Artifact(Artifact),
    Milestone(NamedSignal),
    Flag(NamedSignal),
}

pub type OutputStream = BoxStream<'static, Result<ProducerOutput, ProducerError>>;

/// Source of phase work. Dropping the returned stream must stop the work.
#[async_trait]
pub trait WorkProducer: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<OutputStream, ProducerError>;

    fn name(&self) -> &str;
}

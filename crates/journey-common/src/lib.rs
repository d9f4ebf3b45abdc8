//! Shared domain and wire types for journey-forge.
//!
//! Everything in this crate crosses a boundary: it is persisted in session
//! records, streamed to clients as events, or accepted from callers as input.

pub mod artifact;
pub mod decision;
pub mod event;
pub mod ids;
pub mod input;
pub mod mode;

pub use artifact::{Artifact, ArtifactKind, Priority};
pub use decision::{Amendment, CheckpointDecision, DecisionError, DecisionKind, DecisionRequest};
pub use event::{ErrorCode, Event, EventKind, SessionOutcome};
pub use ids::{ArtifactId, PhaseId, SessionId};
pub use input::UserInput;
pub use mode::{JourneyBrief, Mode, UnknownMode};

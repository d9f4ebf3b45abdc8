pub mod engine;
pub mod evaluator;
pub mod session;

pub use engine::{AdvanceOutcome, Engine, EngineConfig};
pub use session::{SessionHandle, SessionSnapshot, SessionState, SessionStatus, SessionSummary};

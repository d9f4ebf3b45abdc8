//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `serve`    | `Serve`          |
//! | `run`      | `Run`            |
//! | `agents`   | `Agents`         |
//! | `sessions` | `Sessions`       |

pub mod agents;
pub mod run;
pub mod serve;
pub mod sessions;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use journey_forge::agents::AgentRegistry;
use journey_forge::config::JourneyConfig;
use journey_forge::orchestrator::Engine;
use journey_forge::persistence::FileSessionStore;
use journey_forge::producer::{ClaudeProducer, ScriptedProducer, WorkProducer};

pub use agents::cmd_agents;
pub use run::{RunArgs, cmd_run};
pub use serve::cmd_serve;
pub use sessions::cmd_sessions;

/// Scripted producer when a script is given, otherwise the claude CLI.
fn producer(config: &JourneyConfig, script: Option<&Path>) -> Result<Arc<dyn WorkProducer>> {
    match script {
        Some(path) => {
            let scripted = ScriptedProducer::load(path)?;
            tracing::info!(script = %path.display(), "using scripted producer");
            Ok(Arc::new(scripted))
        }
        None => Ok(Arc::new(ClaudeProducer::new(config.claude.clone()))),
    }
}

fn build_engine(config: &JourneyConfig, producer: Arc<dyn WorkProducer>) -> Result<Engine> {
    let registry = AgentRegistry::builtin().context("Built-in agent definitions are invalid")?;
    Ok(Engine::new(registry, producer, config.engine.clone())
        .with_persistence(FileSessionStore::new(&config.data_dir)))
}

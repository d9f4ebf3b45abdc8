//! HTTP server command: `journey-forge serve`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use journey_forge::config::JourneyConfig;
use journey_forge::orchestrator::Engine;
use journey_forge::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: &JourneyConfig,
    host: Option<String>,
    port: Option<u16>,
    script: Option<&Path>,
    dev: bool,
) -> Result<()> {
    let producer = super::producer(config, script)?;
    let engine = Arc::new(super::build_engine(config, producer)?);

    let restored = restore_sessions(&engine);
    if restored > 0 {
        println!("Restored {} active session(s)", restored);
    }

    start_server(
        ServerConfig {
            host: host.unwrap_or_else(|| config.host.clone()),
            port: port.unwrap_or(config.port),
            dev_mode: dev,
        },
        engine,
    )
    .await
}

/// Loads every saved session that is still active. Unreadable files are
/// skipped with a warning.
fn restore_sessions(engine: &Engine) -> usize {
    let Some(files) = engine.persistence() else {
        return 0;
    };
    let records = match files.list() {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(dir = %files.dir().display(), error = %e, "could not list saved sessions");
            return 0;
        }
    };

    let mut restored = 0;
    for record in records.iter().filter(|r| r.status.is_active()) {
        let path = files.path_for(&record.id);
        match engine.load(&path) {
            Ok(id) => {
                tracing::info!(session_id = %id, phase = %record.current_phase, "restored session");
                restored += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping saved session"),
        }
    }
    restored
}

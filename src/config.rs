//! Layered configuration from `journey.toml` files, the environment and CLI
//! flags.
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. the global file, `<config dir>/journey-forge/journey.toml`
//! 3. the project file, `<data_dir>/journey.toml` or `--config PATH`
//! 4. `JOURNEY_CLAUDE_CMD`, `JOURNEY_DATA_DIR`, `JOURNEY_PORT`
//! 5. CLI flags
//!
//! A file only overrides the keys it sets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_RETAINED_EVENTS;
use crate::executor::{ExecutorConfig, RetryPolicy};
use crate::orchestrator::EngineConfig;
use crate::producer::ClaudeSettings;

pub const CONFIG_FILE: &str = "journey.toml";
pub const DEFAULT_DATA_DIR: &str = ".journey";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4180;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub attempt_timeout_secs: Option<u64>,
    pub max_steps_per_advance: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsSection {
    /// Events kept per session for replay.
    pub retained: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProducerSection {
    pub claude_cmd: Option<String>,
    pub skip_permissions: Option<bool>,
    pub extra_flags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    pub data_dir: Option<PathBuf>,
    pub autosave: Option<bool>,
}

/// One `journey.toml` file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JourneyToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub producer: ProducerSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
}

impl JourneyToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse journey.toml")
    }

    /// `other` on top of `self`: keys set in `other` win.
    pub fn overlay(self, other: JourneyToml) -> Self {
        Self {
            engine: EngineSection {
                max_attempts: other.engine.max_attempts.or(self.engine.max_attempts),
                base_delay_ms: other.engine.base_delay_ms.or(self.engine.base_delay_ms),
                max_delay_ms: other.engine.max_delay_ms.or(self.engine.max_delay_ms),
                attempt_timeout_secs: other
                    .engine
                    .attempt_timeout_secs
                    .or(self.engine.attempt_timeout_secs),
                max_steps_per_advance: other
                    .engine
                    .max_steps_per_advance
                    .or(self.engine.max_steps_per_advance),
            },
            events: EventsSection {
                retained: other.events.retained.or(self.events.retained),
            },
            producer: ProducerSection {
                claude_cmd: other.producer.claude_cmd.or(self.producer.claude_cmd),
                skip_permissions: other
                    .producer
                    .skip_permissions
                    .or(self.producer.skip_permissions),
                extra_flags: other.producer.extra_flags.or(self.producer.extra_flags),
            },
            server: ServerSection {
                host: other.server.host.or(self.server.host),
                port: other.server.port.or(self.server.port),
            },
            storage: StorageSection {
                data_dir: other.storage.data_dir.or(self.storage.data_dir),
                autosave: other.storage.autosave.or(self.storage.autosave),
            },
        }
    }

    /// Applies the `JOURNEY_*` variables read through `env`.
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(cmd) = env("JOURNEY_CLAUDE_CMD").filter(|v| !v.is_empty()) {
            self.producer.claude_cmd = Some(cmd);
        }
        if let Some(dir) = env("JOURNEY_DATA_DIR").filter(|v| !v.is_empty()) {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(port) = env("JOURNEY_PORT").filter(|v| !v.is_empty()) {
            let port = port
                .parse()
                .with_context(|| format!("JOURNEY_PORT is not a port number: {}", port))?;
            self.server.port = Some(port);
        }
        Ok(self)
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct JourneyConfig {
    pub data_dir: PathBuf,
    pub autosave: bool,
    pub engine: EngineConfig,
    pub claude: ClaudeSettings,
    pub host: String,
    pub port: u16,
    /// Files that contributed, lowest precedence first.
    pub sources: Vec<PathBuf>,
}

/// Values from the command line that take part in loading.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("journey-forge").join(CONFIG_FILE))
}

impl JourneyConfig {
    /// Loads every layer from the real filesystem and process environment.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        Self::load_from(
            global_config_path().as_deref(),
            overrides,
            |key| std::env::var(key).ok(),
        )
    }

    pub fn load_from(
        global: Option<&Path>,
        overrides: &ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut merged = JourneyToml::default();
        let mut sources = Vec::new();

        if let Some(path) = global.filter(|p| p.is_file()) {
            merged = merged.overlay(JourneyToml::load(path)?);
            sources.push(path.to_path_buf());
        }

        let project = match &overrides.config_file {
            Some(path) => {
                if !path.is_file() {
                    bail!("Config file not found: {}", path.display());
                }
                Some(path.clone())
            }
            None => {
                let data_dir = overrides
                    .data_dir
                    .clone()
                    .or_else(|| env("JOURNEY_DATA_DIR").map(PathBuf::from))
                    .or_else(|| merged.storage.data_dir.clone())
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
                Some(data_dir.join(CONFIG_FILE)).filter(|p| p.is_file())
            }
        };
        if let Some(path) = project {
            merged = merged.overlay(JourneyToml::load(&path)?);
            sources.push(path);
        }

        let mut merged = merged.with_env(env)?;
        if let Some(dir) = &overrides.data_dir {
            merged.storage.data_dir = Some(dir.clone());
        }

        let mut config = Self::resolve(merged)?;
        config.sources = sources;
        Ok(config)
    }

    /// Fills unset keys with defaults and checks ranges.
    pub fn resolve(toml: JourneyToml) -> Result<Self> {
        let retry_defaults = RetryPolicy::default();
        let executor_defaults = ExecutorConfig::default();
        let engine_defaults = EngineConfig::default();
        let claude_defaults = ClaudeSettings::default();

        let retry = RetryPolicy {
            max_attempts: toml.engine.max_attempts.unwrap_or(retry_defaults.max_attempts),
            base_delay: toml
                .engine
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.base_delay),
            max_delay: toml
                .engine
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
        };
        if retry.max_attempts == 0 {
            bail!("engine.max_attempts must be at least 1");
        }
        if retry.max_delay < retry.base_delay {
            bail!("engine.max_delay_ms must not be smaller than engine.base_delay_ms");
        }

        let max_steps = toml
            .engine
            .max_steps_per_advance
            .unwrap_or(engine_defaults.max_steps_per_advance);
        if max_steps == 0 {
            bail!("engine.max_steps_per_advance must be at least 1");
        }

        let autosave = toml.storage.autosave.unwrap_or(true);
        let engine = EngineConfig {
            executor: ExecutorConfig {
                retry,
                attempt_timeout: toml
                    .engine
                    .attempt_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(executor_defaults.attempt_timeout),
            },
            max_steps_per_advance: max_steps,
            retained_events: toml.events.retained.unwrap_or(DEFAULT_RETAINED_EVENTS).max(1),
            autosave,
        };

        let claude = ClaudeSettings {
            claude_cmd: toml.producer.claude_cmd.unwrap_or(claude_defaults.claude_cmd),
            skip_permissions: toml
                .producer
                .skip_permissions
                .unwrap_or(claude_defaults.skip_permissions),
            extra_flags: toml.producer.extra_flags.unwrap_or_default(),
            working_dir: claude_defaults.working_dir,
        };

        Ok(Self {
            data_dir: toml
                .storage
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            autosave,
            engine,
            claude,
            host: toml.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: toml.server.port.unwrap_or(DEFAULT_PORT),
            sources: Vec::new(),
        })
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

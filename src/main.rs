use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use journey_common::{Mode, SessionId};
use journey_forge::config::{ConfigOverrides, JourneyConfig};
use journey_forge::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "journey-forge")]
#[command(version, about = "Phase-graph engine for guided learning journeys")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to a journey.toml. Defaults to <data-dir>/journey.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for saved sessions and logs (default: .journey)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP and streaming API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Replay a YAML script instead of calling claude
        #[arg(long)]
        script: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a local front end)
        #[arg(long)]
        dev: bool,
    },
    /// Drive a session from the terminal
    Run {
        /// research, understand or build
        #[arg(short, long, required_unless_present = "resume")]
        mode: Option<Mode>,

        /// The learner's question
        #[arg(short, long, required_unless_present = "resume")]
        question: Option<String>,

        /// Replay a YAML script instead of calling claude
        #[arg(long)]
        script: Option<PathBuf>,

        /// Approve every checkpoint without prompting
        #[arg(long)]
        yes: bool,

        /// Continue a saved session file
        #[arg(long, conflicts_with_all = ["mode", "question"])]
        resume: Option<PathBuf>,
    },
    /// List the built-in agents and validate their phase graphs
    Agents {
        /// Also print every transition
        #[arg(long)]
        transitions: bool,
    },
    /// Inspect saved sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum SessionsCommands {
    /// List saved sessions, newest first
    List,
    /// Show one saved session
    Show { id: SessionId },
    /// Write a saved session record as JSON
    Export {
        id: SessionId,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = JourneyConfig::load(&ConfigOverrides {
        config_file: cli.config.clone(),
        data_dir: cli.data_dir.clone(),
    })?;

    let log_dir = matches!(cli.command, Commands::Serve { .. }).then(|| config.log_dir());
    let _log_guard = logging::init_logging(
        LogFormat::from_flag(cli.log_json),
        cli.verbose,
        log_dir.as_deref(),
    );
    tracing::debug!(sources = ?config.sources, data_dir = %config.data_dir.display(), "configuration loaded");

    match &cli.command {
        Commands::Serve {
            host,
            port,
            script,
            dev,
        } => {
            cmd::cmd_serve(&config, host.clone(), *port, script.as_deref(), *dev).await?;
        }
        Commands::Run {
            mode,
            question,
            script,
            yes,
            resume,
        } => {
            let args = cmd::RunArgs {
                mode: *mode,
                question: question.clone(),
                script: script.clone(),
                yes: *yes,
                resume: resume.clone(),
            };
            return cmd::cmd_run(&config, args).await;
        }
        Commands::Agents { transitions } => cmd::cmd_agents(*transitions)?,
        Commands::Sessions { command } => cmd::cmd_sessions(&config, command.clone())?,
    }

    Ok(ExitCode::SUCCESS)
}

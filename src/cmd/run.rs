//! Terminal session driver: `journey-forge run`.
//!
//! Events are printed by a background task as they arrive. After each engine
//! call the driver waits for the printer to catch up to the last sequence, so
//! checkpoint prompts never interleave with event output.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use dialoguer::{Input, theme::ColorfulTheme};
use journey_common::{
    DecisionRequest, Event, EventKind, JourneyBrief, Mode, SessionId, SessionOutcome, UserInput,
};
use journey_forge::channel::Subscription;
use journey_forge::config::JourneyConfig;
use journey_forge::errors::EngineError;
use journey_forge::gates::{InteractiveGate, PendingCheckpoint, PromptedDecision};
use journey_forge::orchestrator::{AdvanceOutcome, Engine};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const EXIT_ABANDONED: u8 = 1;
const EXIT_PRODUCER_FAILED: u8 = 2;
const EXIT_PERSISTENCE: u8 = 3;

pub struct RunArgs {
    pub mode: Option<Mode>,
    pub question: Option<String>,
    pub script: Option<PathBuf>,
    pub yes: bool,
    pub resume: Option<PathBuf>,
}

#[derive(Debug, Clone)]
enum Next {
    Advance(UserInput),
    Decide(PendingCheckpoint),
}

pub async fn cmd_run(config: &JourneyConfig, args: RunArgs) -> Result<ExitCode> {
    let producer = super::producer(config, args.script.as_deref())?;
    let engine = Arc::new(super::build_engine(config, producer)?);

    let id = match &args.resume {
        Some(path) => engine
            .load(path)
            .with_context(|| format!("Failed to resume {}", path.display()))?,
        None => {
            let mode = args.mode.context("--mode is required")?;
            let question = args.question.clone().context("--question is required")?;
            engine
                .create_session(mode, JourneyBrief::new(question))
                .await?
                .session_id
        }
    };

    let snapshot = engine.snapshot(id)?;
    // A resumed session only replays its resume notice.
    let after = match args.resume {
        Some(_) => snapshot.last_sequence.saturating_sub(1),
        None => 0,
    };
    let mut printer = EventPrinter::spawn(engine.subscribe(id, after)?);
    printer.catch_up(snapshot.last_sequence).await;

    if !snapshot.status.is_active() {
        println!("Session {} is {}; nothing to do.", id, snapshot.status);
        return Ok(ExitCode::SUCCESS);
    }

    let _interrupt = spawn_interrupt_handler(Arc::clone(&engine), id);
    let gate = InteractiveGate::new(args.yes);
    let mut next = match snapshot.pending_checkpoint {
        Some(pending) => Next::Decide(pending),
        None => Next::Advance(UserInput::new(snapshot.brief.question.clone())),
    };

    loop {
        let current = next.clone();
        let result = match current {
            Next::Advance(input) => engine.advance(id, input).await,
            Next::Decide(pending) => match gate.decide(&pending)? {
                PromptedDecision::Approve => {
                    engine
                        .resolve_checkpoint(id, DecisionRequest::approve(&pending.checkpoint_id))
                        .await
                }
                PromptedDecision::Reject { reason } => {
                    engine
                        .resolve_checkpoint(
                            id,
                            DecisionRequest::reject(&pending.checkpoint_id, reason),
                        )
                        .await
                }
                PromptedDecision::Abandon => {
                    let ended = engine.abandon(id).await;
                    printer.catch_up(engine.snapshot(id)?.last_sequence).await;
                    if let Err(e) = ended {
                        return fatal(e);
                    }
                    return Ok(ExitCode::from(EXIT_ABANDONED));
                }
            },
        };
        printer.catch_up(engine.snapshot(id)?.last_sequence).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(EngineError::Validation(e)) => {
                // Caller mistake, e.g. an empty rejection reason. Ask again.
                eprintln!("{} {}", console::style("Invalid input:").red(), e);
                continue;
            }
            Err(e) => return fatal(e),
        };

        next = match outcome {
            AdvanceOutcome::Completed { phase } => {
                println!("{} reached {}", console::style("✓").green().bold(), phase);
                return finish(&engine, id, ExitCode::SUCCESS);
            }
            AdvanceOutcome::CheckpointPending { checkpoint } => Next::Decide(checkpoint),
            AdvanceOutcome::Stayed { phase } | AdvanceOutcome::Amended { phase } => {
                match prompt_reply(&phase, args.yes)? {
                    Some(input) => Next::Advance(input),
                    None => return pause(&engine, id, &phase),
                }
            }
            AdvanceOutcome::Failed {
                phase,
                message,
                attempts,
            } => {
                eprintln!(
                    "{} phase {} failed after {} attempt(s): {}",
                    console::style("✗").red().bold(),
                    phase,
                    attempts,
                    message
                );
                return finish(&engine, id, ExitCode::from(EXIT_PRODUCER_FAILED));
            }
            AdvanceOutcome::Cancelled { phase } => return pause(&engine, id, &phase),
            AdvanceOutcome::StepLimit { phase } => {
                println!(
                    "{} step limit reached in {}",
                    console::style("!").yellow(),
                    phase
                );
                return pause(&engine, id, &phase);
            }
        };
    }
}

/// Asks the learner for the next message. `None` pauses the session.
fn prompt_reply(phase: &journey_common::PhaseId, non_interactive: bool) -> Result<Option<UserInput>> {
    if non_interactive {
        return Ok(None);
    }
    let reply: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("[{}] Your reply (empty to pause)", phase))
        .allow_empty(true)
        .interact_text()?;
    if reply.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(UserInput::new(reply)))
    }
}

fn pause(engine: &Engine, id: SessionId, phase: &journey_common::PhaseId) -> Result<ExitCode> {
    println!("Session paused in {}", phase);
    finish(engine, id, ExitCode::SUCCESS)
}

/// Saves the session and reports where, mapping a save failure to its exit code.
fn finish(engine: &Engine, id: SessionId, code: ExitCode) -> Result<ExitCode> {
    match engine.save(id) {
        Ok(path) => {
            println!("Saved to {}", path.display());
            println!("Resume with: journey-forge run --resume {}", path.display());
            Ok(code)
        }
        Err(e) => fatal(e),
    }
}

fn fatal(err: EngineError) -> Result<ExitCode> {
    match err {
        EngineError::Persistence(e) => {
            eprintln!("{} {}", console::style("Persistence failure:").red().bold(), e);
            Ok(ExitCode::from(EXIT_PERSISTENCE))
        }
        other => Err(other.into()),
    }
}

/// First Ctrl+C cancels the running step; a second one with nothing running exits.
fn spawn_interrupt_handler(engine: Arc<Engine>, id: SessionId) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match engine.cancel(id) {
                Ok(true) => eprintln!("\nCancelling the running step..."),
                _ => std::process::exit(130),
            }
        }
    })
}

struct EventPrinter {
    cursor: watch::Receiver<u64>,
    _task: JoinHandle<()>,
}

impl EventPrinter {
    fn spawn(mut subscription: Subscription) -> Self {
        let (tx, cursor) = watch::channel(subscription.cursor());
        let task = tokio::spawn(async move {
            while let Some(next) = subscription.next().await {
                match next {
                    Ok(event) => {
                        print_event(&event);
                        let _ = tx.send(event.sequence);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "event printer fell behind");
                        break;
                    }
                }
            }
        });
        Self {
            cursor,
            _task: task,
        }
    }

    async fn catch_up(&mut self, last: u64) {
        let _ = self.cursor.wait_for(|seen| *seen >= last).await;
    }
}

fn print_event(event: &Event) {
    match &event.kind {
        EventKind::SessionStarted { mode, phase } => {
            println!(
                "{} {} session started in {}",
                console::style("▶").cyan().bold(),
                mode,
                phase
            );
        }
        EventKind::SessionResumed { phase } => {
            println!("{} resumed in {}", console::style("▶").cyan().bold(), phase);
        }
        EventKind::SessionEnded {
            outcome, summary, ..
        } => {
            let mark = match outcome {
                SessionOutcome::Completed => console::style("■ completed").green(),
                SessionOutcome::Abandoned => console::style("■ abandoned").yellow(),
                SessionOutcome::Failed => console::style("■ failed").red(),
            };
            println!("{} {}", mark, summary);
        }
        EventKind::PhaseChanged {
            from,
            to,
            is_backward,
            reason,
        } => {
            if *is_backward {
                println!(
                    "{} {} → {} ({})",
                    console::style("↩").yellow().bold(),
                    from,
                    to,
                    reason
                );
            } else {
                println!(
                    "{} {} → {} ({})",
                    console::style("→").green().bold(),
                    from,
                    to,
                    reason
                );
            }
        }
        EventKind::CheckpointRequired {
            name,
            message,
            blocking: false,
            ..
        } => {
            println!("  {} {}: {}", console::style("ℹ").blue(), name, message);
        }
        // Blocking checkpoints are shown by the prompt.
        EventKind::CheckpointRequired { .. } => {}
        EventKind::CheckpointResolved { decision, .. } => {
            println!("  {} {}", console::style("checkpoint").dim(), decision);
        }
        EventKind::WorkInProgress { content, .. } => {
            println!("  {}", console::style(content.trim_end()).dim());
        }
        EventKind::ArtifactAdded { artifact, .. } => {
            println!(
                "  {} {} {}",
                console::style("+").green(),
                artifact.kind(),
                artifact.summary()
            );
        }
        EventKind::ArtifactReplaced {
            artifact_id,
            artifact,
        } => {
            println!(
                "  {} {} {}",
                console::style("~").yellow(),
                artifact_id,
                artifact.summary()
            );
        }
        EventKind::Error {
            code,
            message,
            recoverable,
        } => {
            let label = if *recoverable { "warning" } else { "error" };
            eprintln!(
                "  {} [{:?}] {}",
                console::style(label).red(),
                code,
                message
            );
        }
    }
}

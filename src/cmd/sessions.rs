//! Saved session inspection: `journey-forge sessions list|show|export`.

use anyhow::{Context, Result};
use journey_common::SessionId;
use journey_forge::config::JourneyConfig;
use journey_forge::persistence::{FileSessionStore, SessionRecord};

use super::super::SessionsCommands;

pub fn cmd_sessions(config: &JourneyConfig, command: SessionsCommands) -> Result<()> {
    let files = FileSessionStore::new(&config.data_dir);
    match command {
        SessionsCommands::List => list(&files),
        SessionsCommands::Show { id } => show(&files, &id),
        SessionsCommands::Export { id, output } => {
            let record = files
                .load_id(&id)
                .with_context(|| format!("Failed to load session {}", id))?;
            let json = serde_json::to_string_pretty(&record)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported session {} to {}", id, path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }
    }
}

fn list(files: &FileSessionStore) -> Result<()> {
    let records = files.list().context("Failed to list saved sessions")?;
    if records.is_empty() {
        println!();
        println!("No saved sessions in {}", files.dir().display());
        println!();
        return Ok(());
    }

    println!();
    println!(
        "{:<36}  {:<10} {:<18} {:<22} Question",
        "Session", "Mode", "Phase", "Status"
    );
    for record in &records {
        let summary = record.summary();
        let status = if summary.awaiting_decision {
            format!("{} (checkpoint)", summary.status.label())
        } else {
            summary.status.label().to_string()
        };
        println!(
            "{:<36}  {:<10} {:<18} {:<22} {}",
            summary.session_id.to_string(),
            summary.mode.to_string(),
            summary.phase.as_str(),
            status,
            truncate(&summary.question, 48)
        );
    }
    println!();
    Ok(())
}

fn show(files: &FileSessionStore, id: &SessionId) -> Result<()> {
    let record = files
        .load_id(id)
        .with_context(|| format!("Failed to load session {}", id))?;
    print_record(&record);
    Ok(())
}

fn print_record(record: &SessionRecord) {
    println!();
    println!("{} {}", console::style("Session").bold(), record.id);
    println!("  Mode:     {}", record.mode);
    println!("  Question: {}", record.brief.question);
    if let Some(ideal) = &record.brief.ideal_answer {
        println!("  Ideal:    {}", ideal);
    }
    println!("  Phase:    {}", record.current_phase);
    println!("  Status:   {}", record.status);
    println!("  Updated:  {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Events:   {} (last sequence {})", record.events.len(), record.last_sequence);

    if let Some(pending) = record.gate.pending() {
        println!(
            "  {} {} ({} → {})",
            console::style("Awaiting:").yellow(),
            pending.spec.id,
            pending.from,
            pending.to
        );
    }

    let history = record.context().history();
    if !history.is_empty() {
        println!();
        println!("  History:");
        for t in history {
            let arrow = if t.is_backward { "↩" } else { "→" };
            println!(
                "    {} {} {} {}  ({})",
                t.timestamp.format("%H:%M:%S"),
                t.from_phase,
                arrow,
                t.to_phase,
                t.reason
            );
        }
    }

    let artifacts = record.context().artifacts();
    if !artifacts.is_empty() {
        println!();
        println!("  Artifacts:");
        for a in artifacts {
            println!("    [{}] {} {}", a.phase, a.artifact.kind(), a.artifact.summary());
        }
    }

    let checkpoints = record.gate.history();
    if !checkpoints.is_empty() {
        println!();
        println!("  Checkpoints:");
        for c in checkpoints {
            println!("    {} {}", c.name, c.decision);
        }
    }
    println!();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

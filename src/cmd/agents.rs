//! Agent listing: `journey-forge agents`.

use anyhow::{Context, Result};
use journey_forge::agents::{AgentRegistry, AgentSummary};

pub fn cmd_agents(show_transitions: bool) -> Result<()> {
    let registry = AgentRegistry::builtin().context("Built-in agent definitions are invalid")?;

    println!();
    for summary in registry.summaries() {
        print_agent(&summary, show_transitions);
    }
    println!(
        "{} {} agent(s) registered, all phase graphs valid",
        console::style("✓").green(),
        registry.len()
    );
    Ok(())
}

fn print_agent(summary: &AgentSummary, show_transitions: bool) {
    println!("{}", console::style(summary.mode).bold());
    let phases: Vec<&str> = summary.phases.iter().map(|p| p.as_str()).collect();
    println!("  phases:   {}", phases.join(" → "));
    println!("  initial:  {}", summary.initial);
    println!("  terminal: {}", summary.terminal);

    let gated: Vec<String> = summary
        .transitions
        .iter()
        .filter_map(|t| {
            t.checkpoint
                .as_ref()
                .map(|c| format!("{} ({} → {})", c, t.from, t.to))
        })
        .collect();
    if !gated.is_empty() {
        println!("  checkpoints: {}", gated.join(", "));
    }

    if show_transitions {
        println!(
            "  {:<18} {:<18} {:<36} {:>4}",
            "From", "To", "Condition", "Prio"
        );
        for t in &summary.transitions {
            let to = if t.is_backward {
                format!("↩ {}", t.to)
            } else {
                t.to.to_string()
            };
            println!(
                "  {:<18} {:<18} {:<36} {:>4}",
                t.from.as_str(),
                to,
                t.condition,
                t.priority
            );
        }
    }
    println!();
}

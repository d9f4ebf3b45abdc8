//! Terminal prompt for checkpoint decisions, used by `journey-forge run`.

use anyhow::Result;
use dialoguer::{Input, Select, theme::ColorfulTheme};

use super::PendingCheckpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptedDecision {
    Approve,
    Reject { reason: String },
    Abandon,
}

pub struct InteractiveGate {
    pub auto_approve: bool,
}

impl InteractiveGate {
    pub fn new(auto_approve: bool) -> Self {
        Self { auto_approve }
    }

    pub fn decide(&self, pending: &PendingCheckpoint) -> Result<PromptedDecision> {
        println!();
        println!(
            "{} {}",
            console::style("Checkpoint").yellow().bold(),
            console::style(&pending.spec.id).bold()
        );
        println!("  {}", pending.spec.message);
        println!(
            "  {} {} -> {}",
            console::style("Proposed:").dim(),
            pending.from,
            pending.to
        );

        if self.auto_approve {
            println!("  {} (--yes flag)", console::style("Auto-approved").dim());
            return Ok(PromptedDecision::Approve);
        }

        let options = &[
            "Approve and continue",
            "Reject with feedback",
            "Abandon session",
        ];
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Decision")
            .items(options)
            .default(0)
            .interact()?;

        match selection {
            0 => Ok(PromptedDecision::Approve),
            1 => {
                let reason: String = Input::with_theme(&ColorfulTheme::default())
                    .with_prompt("What should change?")
                    .interact_text()?;
                Ok(PromptedDecision::Reject { reason })
            }
            _ => Ok(PromptedDecision::Abandon),
        }
    }
}

//! Prompt rendering for phase runs.
//!
//! The variant (first visit or re-entry) is decided by the caller and passed
//! in explicitly; rendering never infers it.

use journey_common::{JourneyBrief, PhaseId, UserInput};
use serde::{Deserialize, Serialize};

use crate::context::{ArtifactRecord, BackwardTrigger, PhaseContext};
use crate::phase::{AgentDefinition, PhaseProgram};
use crate::producer::ToolSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum PromptVariant {
    Initial,
    ReEntry {
        trigger: Option<BackwardTrigger>,
        prior_visits: u32,
    },
}

impl PromptVariant {
    /// `Initial` on a first visit with no pending trigger and nothing committed
    /// in the phase yet, `ReEntry` otherwise. A phase re-run after a stay or a
    /// modify decision is a re-entry without a trigger.
    pub fn select(phase: &PhaseId, ctx: &PhaseContext) -> Self {
        let visits = ctx.visits(phase);
        let has_work = ctx.artifacts_in(phase).next().is_some()
            || ctx.milestones().iter().any(|m| &m.phase == phase);
        match ctx.backward_trigger() {
            None if visits <= 1 && !has_work => PromptVariant::Initial,
            trigger => PromptVariant::ReEntry {
                trigger: trigger.cloned(),
                prior_visits: visits.saturating_sub(1),
            },
        }
    }

    pub fn is_reentry(&self) -> bool {
        matches!(self, PromptVariant::ReEntry { .. })
    }
}

pub struct PromptParts<'a> {
    pub def: &'a AgentDefinition,
    pub phase: &'a PhaseId,
    pub brief: &'a JourneyBrief,
    pub input: &'a UserInput,
    pub context: &'a PhaseContext,
    pub variant: &'a PromptVariant,
}

/// Operations exposed to the producer while in a phase.
pub fn tools_for(program: Option<&PhaseProgram>) -> Vec<ToolSpec> {
    let Some(program) = program else {
        return Vec::new();
    };
    let mut tools: Vec<ToolSpec> = program
        .artifacts
        .iter()
        .map(|kind| ToolSpec {
            name: format!("emit_{}", kind),
            description: format!("<artifact>{}</artifact>", kind.example()),
        })
        .collect();
    tools.extend(program.milestones.iter().map(|name| ToolSpec {
        name: name.to_string(),
        description: format!("<milestone>{}</milestone>", name),
    }));
    tools.extend(program.flags.iter().map(|name| ToolSpec {
        name: name.to_string(),
        description: format!("<flag name=\"{}\">what you found</flag>", name),
    }));
    tools
}

pub fn render_system(def: &AgentDefinition) -> String {
    format!(
        "{}\n\nYou are the {} agent of a learning assistant. Report work only through the \
         operations listed in each prompt.",
        def.system_prompt().trim(),
        def.mode()
    )
    .trim()
    .to_string()
}

pub fn render(parts: &PromptParts<'_>, tools: &[ToolSpec]) -> String {
    let program = parts.def.program(parts.phase);
    let title = program.map_or(parts.phase.as_str(), |p| p.title);
    let mut out = String::new();

    match parts.variant {
        PromptVariant::Initial => {
            out.push_str(&format!("## PHASE: {}\n\n", title));
            if let Some(program) = program {
                out.push_str(program.instructions.trim());
                out.push_str("\n\n");
            }
        }
        PromptVariant::ReEntry {
            trigger,
            prior_visits,
        } => {
            out.push_str(&format!(
                "## RE-ENTRY: {} (previous visits: {})\n\n",
                title, prior_visits
            ));
            match trigger {
                Some(trigger) => out.push_str(&format!(
                    "You are back in this phase because: {}\n\n",
                    trigger.describe()
                )),
                None => out.push_str("You are continuing work in this phase.\n\n"),
            }

            let done: Vec<String> = parts
                .context
                .artifacts_in(parts.phase)
                .map(artifact_line)
                .collect();
            out.push_str("## ALREADY COMPLETED IN THIS PHASE\n");
            if done.is_empty() {
                out.push_str("- nothing yet\n");
            } else {
                out.push_str(&done.join("\n"));
                out.push('\n');
            }

            let revised: Vec<String> = parts
                .context
                .artifacts()
                .iter()
                .filter(|r| r.revision > 0 && &r.phase != parts.phase)
                .map(artifact_line)
                .collect();
            if !revised.is_empty() {
                out.push_str("\n## REVISED BY THE LEARNER\n");
                out.push_str(&revised.join("\n"));
                out.push('\n');
            }

            if trigger.is_some() {
                out.push_str(
                    "\nAddress ONLY the reason above. Do not redo or repeat completed work.\n\n",
                );
            } else {
                out.push_str(
                    "\nBuild on the work above as it now stands. Do not repeat it.\n\n",
                );
            }
            if let Some(program) = program.filter(|p| !p.reentry.is_empty()) {
                out.push_str(program.reentry.trim());
                out.push_str("\n\n");
            }
        }
    }

    out.push_str("## JOURNEY\n");
    out.push_str(&format!("Question: {}\n", parts.brief.question));
    if let Some(ideal) = &parts.brief.ideal_answer {
        out.push_str(&format!("Ideal answer: {}\n", ideal));
    }
    if let Some(learner) = &parts.brief.learner_context {
        out.push_str(&format!("Learner: {}\n", learner));
    }

    if !parts.input.is_empty() {
        out.push_str("\n## LEARNER INPUT\n");
        out.push_str(parts.input.message.trim());
        out.push('\n');
        if !parts.input.context.is_null() {
            out.push_str(&format!("Context: {}\n", parts.input.context));
        }
    }

    if !tools.is_empty() {
        out.push_str("\n## OPERATIONS\n");
        for tool in tools {
            out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
    }
    out
}

fn artifact_line(record: &ArtifactRecord) -> String {
    let revised = if record.revision > 0 { ", revised" } else { "" };
    format!(
        "- [{}] {} ({}{})",
        record.artifact.kind(),
        record.artifact.summary(),
        record.id,
        revised
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{Condition, Transition};
    use journey_common::{Artifact, ArtifactKind, Mode};

    const A: PhaseId = PhaseId::from_static("a");
    const DONE: PhaseId = PhaseId::from_static("done");

    fn yes(_: &PhaseContext) -> bool {
        true
    }

    fn def() -> AgentDefinition {
        AgentDefinition::builder(Mode::Research)
            .system_prompt("Be precise.")
            .phases(&[A, DONE])
            .initial(A)
            .terminal(DONE)
            .transition(Transition::forward(A, DONE, Condition::new("a_done", yes)))
            .program(
                A,
                PhaseProgram::new("Decompose", "List the categories.")
                    .reentry("Add only the missing category.")
                    .artifacts(&[ArtifactKind::Category])
                    .milestones(&["a_done"]),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_variant_selection() {
        let mut ctx = PhaseContext::new(&A);
        assert_eq!(PromptVariant::select(&A, &ctx), PromptVariant::Initial);

        ctx.set_backward_trigger("checkpoint_rejected", Some("too broad".into()));
        match PromptVariant::select(&A, &ctx) {
            PromptVariant::ReEntry {
                trigger,
                prior_visits,
            } => {
                assert_eq!(trigger.unwrap().name, "checkpoint_rejected");
                assert_eq!(prior_visits, 0);
            }
            other => panic!("Expected ReEntry, got {other:?}"),
        }
    }

    #[test]
    fn test_initial_prompt_sections() {
        let def = def();
        let ctx = PhaseContext::new(&A);
        let brief = JourneyBrief::new("How do tides work?");
        let input = UserInput::new("start");
        let variant = PromptVariant::Initial;
        let tools = tools_for(def.program(&A));
        let prompt = render(
            &PromptParts {
                def: &def,
                phase: &A,
                brief: &brief,
                input: &input,
                context: &ctx,
                variant: &variant,
            },
            &tools,
        );
        assert!(prompt.starts_with("## PHASE: Decompose"));
        assert!(prompt.contains("List the categories."));
        assert!(prompt.contains("Question: How do tides work?"));
        assert!(prompt.contains("emit_category"));
        assert!(prompt.contains("<milestone>a_done</milestone>"));
        assert!(!prompt.contains("RE-ENTRY"));
    }

    #[test]
    fn test_reentry_prompt_lists_trigger_and_prior_work() {
        let def = def();
        let mut ctx = PhaseContext::new(&A);
        ctx.add_artifact(
            &A,
            Artifact::Category {
                name: "astronomy".into(),
                insight_question: None,
            },
        );
        ctx.set_backward_trigger("gap_found", Some("no geology category".into()));
        let variant = PromptVariant::select(&A, &ctx);
        let brief = JourneyBrief::new("How do tides work?");
        let input = UserInput::continuation();
        let prompt = render(
            &PromptParts {
                def: &def,
                phase: &A,
                brief: &brief,
                input: &input,
                context: &ctx,
                variant: &variant,
            },
            &[],
        );
        assert!(prompt.starts_with("## RE-ENTRY: Decompose"));
        assert!(prompt.contains("gap_found: no geology category"));
        assert!(prompt.contains("[category] astronomy"));
        assert!(prompt.contains("Address ONLY the reason above"));
        assert!(prompt.contains("Add only the missing category."));
        assert!(!prompt.contains("LEARNER INPUT"));
    }

    #[test]
    fn test_rerun_of_first_visit_with_work_is_reentry() {
        let def = def();
        let mut ctx = PhaseContext::new(&A);
        ctx.reach_milestone(&A, "a_done", None);
        assert_eq!(
            PromptVariant::select(&A, &ctx),
            PromptVariant::ReEntry {
                trigger: None,
                prior_visits: 0,
            }
        );

        let id = ctx.add_artifact(
            &A,
            Artifact::Category {
                name: "astronomy".into(),
                insight_question: None,
            },
        );
        ctx.apply_amendments(&[journey_common::Amendment {
            artifact_id: id,
            artifact: Artifact::Category {
                name: "orbital mechanics".into(),
                insight_question: None,
            },
        }])
        .unwrap();

        let variant = PromptVariant::select(&A, &ctx);
        let brief = JourneyBrief::new("How do tides work?");
        let input = UserInput::continuation();
        let prompt = render(
            &PromptParts {
                def: &def,
                phase: &A,
                brief: &brief,
                input: &input,
                context: &ctx,
                variant: &variant,
            },
            &[],
        );
        assert!(prompt.starts_with("## RE-ENTRY: Decompose"));
        assert!(prompt.contains("You are continuing work in this phase."));
        assert!(prompt.contains("orbital mechanics"));
        assert!(prompt.contains(", revised)"));
        assert!(prompt.contains("Do not repeat it."));
        assert!(!prompt.contains("List the categories."));
    }

    #[test]
    fn test_system_prompt_names_mode() {
        let system = render_system(&def());
        assert!(system.starts_with("Be precise."));
        assert!(system.contains("research agent"));
    }
}

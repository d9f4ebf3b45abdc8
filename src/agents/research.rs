//! Research mode: decompose a question, answer it, synthesize, expand.

use journey_common::{ArtifactKind, Mode, PhaseId};

use crate::context::PhaseContext;
use crate::phase::{AgentBuilder, AgentDefinition, CheckpointSpec, Condition, PhaseProgram, Transition};

pub const DECOMPOSE: PhaseId = PhaseId::from_static("decompose");
pub const ANSWER: PhaseId = PhaseId::from_static("answer");
pub const RISE_ABOVE: PhaseId = PhaseId::from_static("rise_above");
pub const EXPAND: PhaseId = PhaseId::from_static("expand");
pub const COMPLETE: PhaseId = PhaseId::from_static("complete");

pub const NEW_CATEGORY_DISCOVERED: &str = "new_category_discovered";
pub const NEEDS_MORE_ANSWERS: &str = "synthesis_requires_more_answers";
pub const MISSING_CATEGORY: &str = "synthesis_reveals_missing_category";

const SYSTEM_PROMPT: &str = "You are a research guide. Break the learner's question into \
categories of sub-questions, answer them with cited sources, then rise above the answers \
to name what each category teaches. Emit structured results with the operations listed \
in each phase; prose outside them is shown to the learner as progress.";

fn question_tree_ready(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("decompose_complete") && ctx.count(ArtifactKind::Question) > 0
}

fn high_priority_answered(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("answers_complete")
}

fn insights_generated(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("insights_complete") && ctx.count(ArtifactKind::CategoryInsight) > 0
}

fn frontier_populated(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("frontier_populated")
}

fn new_category(ctx: &PhaseContext) -> bool {
    ctx.has_flag(NEW_CATEGORY_DISCOVERED)
}

fn more_answers(ctx: &PhaseContext) -> bool {
    ctx.has_flag(NEEDS_MORE_ANSWERS)
}

fn missing_category(ctx: &PhaseContext) -> bool {
    ctx.has_flag(MISSING_CATEGORY)
}

pub fn definition() -> AgentBuilder {
    AgentDefinition::builder(Mode::Research)
        .system_prompt(SYSTEM_PROMPT)
        .phases(&[DECOMPOSE, ANSWER, RISE_ABOVE, EXPAND, COMPLETE])
        .initial(DECOMPOSE)
        .terminal(COMPLETE)
        .transition(Transition::forward(
            DECOMPOSE,
            ANSWER,
            Condition::new("question_tree_ready", question_tree_ready),
        ))
        .transition(Transition::forward(
            ANSWER,
            RISE_ABOVE,
            Condition::new("high_priority_questions_answered", high_priority_answered),
        ))
        .transition(Transition::forward(
            RISE_ABOVE,
            EXPAND,
            Condition::new("category_insights_generated", insights_generated),
        ))
        .transition(Transition::forward(
            EXPAND,
            COMPLETE,
            Condition::new("frontier_populated", frontier_populated),
        ))
        .transition(
            Transition::backward(
                ANSWER,
                DECOMPOSE,
                Condition::new(NEW_CATEGORY_DISCOVERED, new_category),
            )
            .with_priority(10),
        )
        .transition(
            Transition::backward(RISE_ABOVE, ANSWER, Condition::new(NEEDS_MORE_ANSWERS, more_answers))
                .with_priority(10),
        )
        .transition(
            Transition::backward(
                RISE_ABOVE,
                DECOMPOSE,
                Condition::new(MISSING_CATEGORY, missing_category),
            )
            .with_priority(5),
        )
        .checkpoint(
            DECOMPOSE,
            ANSWER,
            CheckpointSpec::blocking(
                "decompose_approval",
                "Review the question tree before research begins.",
            ),
        )
        .program(
            DECOMPOSE,
            PhaseProgram::new(
                "Decompose",
                "Split the question into 3-6 categories. Under each, list the concrete \
                 sub-questions a learner must answer, marking each high, medium or low \
                 priority. Declare decompose_complete once the tree is ready for review.",
            )
            .reentry(
                "Add only the missing category and its questions. Keep existing categories \
                 unless the learner asked to change them.",
            )
            .artifacts(&[ArtifactKind::Category, ArtifactKind::Question])
            .milestones(&["decompose_complete"]),
        )
        .program(
            ANSWER,
            PhaseProgram::new(
                "Answer",
                "Answer the sub-questions, high priority first, citing sources. If an answer \
                 reveals a category the tree lacks, raise new_category_discovered with its name. \
                 Declare answers_complete when every high priority question is answered.",
            )
            .reentry("Answer only the questions named in the reason above.")
            .artifacts(&[ArtifactKind::Answer])
            .milestones(&["answers_complete"])
            .flags(&[NEW_CATEGORY_DISCOVERED]),
        )
        .program(
            RISE_ABOVE,
            PhaseProgram::new(
                "Rise Above",
                "For each category, state the insight its answers add up to, then the key \
                 insights across categories. Raise synthesis_requires_more_answers or \
                 synthesis_reveals_missing_category if the synthesis cannot stand yet. \
                 Declare insights_complete when done.",
            )
            .artifacts(&[ArtifactKind::CategoryInsight, ArtifactKind::KeyInsight])
            .milestones(&["insights_complete"])
            .flags(&[NEEDS_MORE_ANSWERS, MISSING_CATEGORY]),
        )
        .program(
            EXPAND,
            PhaseProgram::new(
                "Expand",
                "Propose adjacent questions worth exploring next and say which answer each \
                 grew from. Declare frontier_populated when the list is useful.",
            )
            .artifacts(&[ArtifactKind::AdjacentQuestion])
            .milestones(&["frontier_populated"]),
        )
}

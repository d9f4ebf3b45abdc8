//! Understand mode: Socratic tutoring, one learning objective at a time.

use journey_common::{ArtifactKind, Mode, PhaseId};

use super::objectives::{self, SLO_COMPLETE, WRAPPED_UP};
use crate::context::PhaseContext;
use crate::phase::{AgentBuilder, AgentDefinition, CheckpointSpec, Condition, PhaseProgram, Transition};

pub const SELF_ASSESS: PhaseId = PhaseId::from_static("self_assess");
pub const CONFIGURE: PhaseId = PhaseId::from_static("configure");
pub const CLASSIFY: PhaseId = PhaseId::from_static("classify");
pub const CALIBRATE: PhaseId = PhaseId::from_static("calibrate");
pub const DIAGNOSE: PhaseId = PhaseId::from_static("diagnose");
pub const COMPLETE: PhaseId = PhaseId::from_static("complete");

pub const NEEDS_RECALIBRATION: &str = "slo_skipped_needs_recalibration";

const SYSTEM_PROMPT: &str = "You are a Socratic tutor. Find out what the learner already \
believes, choose learning objectives with them, and work through each objective by \
asking questions rather than lecturing. Record what you learn about the learner with \
the operations listed in each phase.";

fn confidence_established(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("self_assessed")
}

fn preferences_set(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("preferences_set")
}

fn calibration_complete(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("calibrated")
}

fn mastery_met(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("mastery_met")
}

fn needs_recalibration(ctx: &PhaseContext) -> bool {
    ctx.has_flag(NEEDS_RECALIBRATION)
}

pub fn definition() -> AgentBuilder {
    AgentDefinition::builder(Mode::Understand)
        .system_prompt(SYSTEM_PROMPT)
        .phases(&[SELF_ASSESS, CONFIGURE, CLASSIFY, CALIBRATE, DIAGNOSE, SLO_COMPLETE, COMPLETE])
        .initial(SELF_ASSESS)
        .terminal(COMPLETE)
        .transition(Transition::forward(
            SELF_ASSESS,
            CONFIGURE,
            Condition::new("knowledge_confidence_established", confidence_established),
        ))
        .transition(Transition::forward(
            CONFIGURE,
            CLASSIFY,
            Condition::new("session_preferences_set", preferences_set),
        ))
        .transition(Transition::forward(
            CLASSIFY,
            CALIBRATE,
            Condition::new("slos_selected", objectives::slos_selected),
        ))
        .transition(Transition::forward(
            CALIBRATE,
            DIAGNOSE,
            Condition::new("calibration_complete", calibration_complete),
        ))
        .transition(Transition::forward(
            DIAGNOSE,
            SLO_COMPLETE,
            Condition::new("mastery_criteria_met", mastery_met),
        ))
        .transition(Transition::backward(
            SLO_COMPLETE,
            CALIBRATE,
            Condition::new("next_slo_available", objectives::next_slo_available),
        ))
        .transition(Transition::forward(
            SLO_COMPLETE,
            COMPLETE,
            Condition::new("all_slos_complete", objectives::all_slos_complete),
        ))
        .transition(Transition::backward(
            DIAGNOSE,
            CALIBRATE,
            Condition::new(NEEDS_RECALIBRATION, needs_recalibration),
        ))
        .checkpoint(
            CONFIGURE,
            CLASSIFY,
            CheckpointSpec::blocking(
                "configure_approval",
                "Confirm the pace and style agreed for this session.",
            ),
        )
        .checkpoint(
            CLASSIFY,
            CALIBRATE,
            CheckpointSpec::blocking(
                "classify_approval",
                "Confirm the learning objectives to work through.",
            ),
        )
        .checkpoint(
            CALIBRATE,
            DIAGNOSE,
            CheckpointSpec::informational(
                "calibrate_approval",
                "Calibration done; diagnostic rounds start with the weakest facets.",
            ),
        )
        .program(
            SELF_ASSESS,
            PhaseProgram::new(
                "Self-Assessment",
                "Ask the learner how confident they feel about the topic and what they \
                 already know. Record their stated assumptions. Declare self_assessed once \
                 their starting point is clear.",
            )
            .artifacts(&[ArtifactKind::Assumption])
            .milestones(&["self_assessed"]),
        )
        .program(
            CONFIGURE,
            PhaseProgram::new(
                "Configure",
                "Agree on pace and style for the session. Declare preferences_set when agreed.",
            )
            .artifacts(&[ArtifactKind::Note])
            .milestones(&["preferences_set"]),
        )
        .program(
            CLASSIFY,
            PhaseProgram::new(
                "Classify",
                "Classify the topic and propose 2-4 learning objectives, each a single \
                 testable statement. Declare slos_selected when the list is ready for review.",
            )
            .reentry("Revise the objectives to address the reason above.")
            .artifacts(&[ArtifactKind::LearningObjective])
            .milestones(&["slos_selected"]),
        )
        .program(
            CALIBRATE,
            PhaseProgram::new(
                "Calibrate",
                "Work on the next learning objective not yet completed. Probe what the \
                 learner believes about it, naming concepts and mental models involved. \
                 Declare calibrated when you know where to start.",
            )
            .reentry(
                "Move to the next learning objective; earlier objectives are done.",
            )
            .artifacts(&[ArtifactKind::Concept, ArtifactKind::MentalModel])
            .milestones(&["calibrated"]),
        )
        .program(
            DIAGNOSE,
            PhaseProgram::new(
                "Diagnose",
                "Ask diagnostic questions and assess each facet of understanding with \
                 evidence. Declare mastery_met when the objective is mastered, or raise \
                 slo_skipped_needs_recalibration if the learner skipped ahead.",
            )
            .artifacts(&[ArtifactKind::FacetAssessment])
            .milestones(&["mastery_met"])
            .flags(&[NEEDS_RECALIBRATION]),
        )
        .program(
            SLO_COMPLETE,
            PhaseProgram::new(
                "Objective Complete",
                "Summarize what the learner now understands about this objective. \
                 Declare slo_wrapped_up when done.",
            )
            .artifacts(&[ArtifactKind::KeyInsight])
            .milestones(&[WRAPPED_UP]),
        )
}

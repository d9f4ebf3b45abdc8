//! Build mode: construct new understanding on top of what the learner knows.

use journey_common::{ArtifactKind, Mode, PhaseId};

use super::objectives::{self, SLO_COMPLETE, WRAPPED_UP};
use crate::context::PhaseContext;
use crate::phase::{AgentBuilder, AgentDefinition, CheckpointSpec, Condition, PhaseProgram, Transition};

pub const ANCHOR_DISCOVERY: PhaseId = PhaseId::from_static("anchor_discovery");
pub const CLASSIFY: PhaseId = PhaseId::from_static("classify");
pub const SEQUENCE_DESIGN: PhaseId = PhaseId::from_static("sequence_design");
pub const CONSTRUCTION: PhaseId = PhaseId::from_static("construction");
pub const CONSOLIDATION: PhaseId = PhaseId::from_static("consolidation");
pub const COMPLETE: PhaseId = PhaseId::from_static("complete");

pub const ANCHOR_GAP: &str = "anchor_gap_detected";

const SYSTEM_PROMPT: &str = "You are a constructivist coach. Discover the learner's \
existing anchors, design a sequence of objectives that builds from them, and guide the \
learner to construct each new idea themselves. Record anchors, constructs and decisions \
with the operations listed in each phase.";

fn anchors_confirmed(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("anchors_found") && ctx.count(ArtifactKind::Anchor) > 0
}

fn sequence_designed(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("sequence_designed")
}

fn construction_verified(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("construction_verified")
}

fn consolidation_complete(ctx: &PhaseContext) -> bool {
    ctx.milestone_current("consolidated")
}

fn anchor_gap(ctx: &PhaseContext) -> bool {
    ctx.has_flag(ANCHOR_GAP)
}

pub fn definition() -> AgentBuilder {
    AgentDefinition::builder(Mode::Build)
        .system_prompt(SYSTEM_PROMPT)
        .phases(&[
            ANCHOR_DISCOVERY,
            CLASSIFY,
            SEQUENCE_DESIGN,
            CONSTRUCTION,
            SLO_COMPLETE,
            CONSOLIDATION,
            COMPLETE,
        ])
        .initial(ANCHOR_DISCOVERY)
        .terminal(COMPLETE)
        .transition(Transition::forward(
            ANCHOR_DISCOVERY,
            CLASSIFY,
            Condition::new("anchors_confirmed", anchors_confirmed),
        ))
        .transition(Transition::forward(
            CLASSIFY,
            SEQUENCE_DESIGN,
            Condition::new("slos_selected", objectives::slos_selected),
        ))
        .transition(Transition::forward(
            SEQUENCE_DESIGN,
            CONSTRUCTION,
            Condition::new("sequence_designed", sequence_designed),
        ))
        .transition(Transition::forward(
            CONSTRUCTION,
            SLO_COMPLETE,
            Condition::new("construction_verified", construction_verified),
        ))
        .transition(Transition::backward(
            SLO_COMPLETE,
            CONSTRUCTION,
            Condition::new("next_slo_available", objectives::next_slo_available),
        ))
        .transition(Transition::forward(
            SLO_COMPLETE,
            CONSOLIDATION,
            Condition::new("all_slos_complete", objectives::all_slos_complete),
        ))
        .transition(Transition::forward(
            CONSOLIDATION,
            COMPLETE,
            Condition::new("consolidation_complete", consolidation_complete),
        ))
        .transition(Transition::backward(
            CONSTRUCTION,
            ANCHOR_DISCOVERY,
            Condition::new(ANCHOR_GAP, anchor_gap),
        ))
        .checkpoint(
            ANCHOR_DISCOVERY,
            CLASSIFY,
            CheckpointSpec::blocking(
                "anchor_approval",
                "Confirm these are the experiences to build from.",
            ),
        )
        .checkpoint(
            CLASSIFY,
            SEQUENCE_DESIGN,
            CheckpointSpec::blocking(
                "classify_approval",
                "Confirm the learning objectives and the anchors they connect to.",
            ),
        )
        .program(
            ANCHOR_DISCOVERY,
            PhaseProgram::new(
                "Anchor Discovery",
                "Find experiences and knowledge the learner already has that relate to the \
                 topic. Rate each anchor's strength from 1 to 5. Declare anchors_found when \
                 there are enough to build on.",
            )
            .reentry("Find anchors for the gap named above; keep confirmed anchors.")
            .artifacts(&[ArtifactKind::Anchor])
            .milestones(&["anchors_found"]),
        )
        .program(
            CLASSIFY,
            PhaseProgram::new(
                "Classify",
                "Propose learning objectives reachable from the anchors and name the \
                 grounding concepts each relies on. Declare slos_selected when ready.",
            )
            .artifacts(&[ArtifactKind::LearningObjective, ArtifactKind::GroundingConcept])
            .milestones(&["slos_selected"]),
        )
        .program(
            SEQUENCE_DESIGN,
            PhaseProgram::new(
                "Sequence Design",
                "Order the objectives so each builds on the last and record why. Declare \
                 sequence_designed when the order is set.",
            )
            .artifacts(&[ArtifactKind::Decision])
            .milestones(&["sequence_designed"]),
        )
        .program(
            CONSTRUCTION,
            PhaseProgram::new(
                "Construction",
                "Guide the learner to construct the next objective from their anchors. \
                 Record each construct they form. Declare construction_verified once they \
                 can use it, or raise anchor_gap_detected if no anchor supports it.",
            )
            .reentry("Continue with the next objective in the sequence.")
            .artifacts(&[ArtifactKind::Construct])
            .milestones(&["construction_verified"])
            .flags(&[ANCHOR_GAP]),
        )
        .program(
            SLO_COMPLETE,
            PhaseProgram::new(
                "Objective Complete",
                "Name the capability this objective unlocked. Declare slo_wrapped_up when done.",
            )
            .artifacts(&[ArtifactKind::Capability])
            .milestones(&[WRAPPED_UP]),
        )
        .program(
            CONSOLIDATION,
            PhaseProgram::new(
                "Consolidation",
                "Connect the constructs into one picture and list what the learner can now \
                 do. Declare consolidated when done.",
            )
            .artifacts(&[ArtifactKind::Capability, ArtifactKind::KeyInsight])
            .milestones(&["consolidated"]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::evaluator::evaluate;
    use journey_common::Artifact;

    #[test]
    fn test_anchor_and_objective_checkpoints_block() {
        let def = definition().build().unwrap();
        let anchors = def.checkpoint_for(&ANCHOR_DISCOVERY, &CLASSIFY).unwrap();
        assert_eq!(anchors.id, "anchor_approval");
        assert!(anchors.blocking);

        let objectives = def.checkpoint_for(&CLASSIFY, &SEQUENCE_DESIGN).unwrap();
        assert_eq!(objectives.id, "classify_approval");
        assert!(objectives.blocking);
    }

    #[test]
    fn test_anchor_gap_beats_verification() {
        let def = definition().build().unwrap();
        let mut ctx = PhaseContext::new(&ANCHOR_DISCOVERY);
        ctx.reach_milestone(&CONSTRUCTION, "construction_verified", None);
        ctx.raise_flag(ANCHOR_GAP, None);
        let next = evaluate(&def, &CONSTRUCTION, &ctx).unwrap();
        assert_eq!(next.to, ANCHOR_DISCOVERY);
    }

    #[test]
    fn test_anchors_need_an_anchor_artifact() {
        let def = definition().build().unwrap();
        let mut ctx = PhaseContext::new(&ANCHOR_DISCOVERY);
        ctx.reach_milestone(&ANCHOR_DISCOVERY, "anchors_found", None);
        assert!(evaluate(&def, &ANCHOR_DISCOVERY, &ctx).is_none());

        ctx.add_artifact(
            &ANCHOR_DISCOVERY,
            Artifact::Anchor {
                description: "Riding a bike downhill".into(),
                strength: 4,
            },
        );
        assert_eq!(evaluate(&def, &ANCHOR_DISCOVERY, &ctx).unwrap().to, CLASSIFY);
    }
}

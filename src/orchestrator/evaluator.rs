//! Transition selection.
//!
//! Outgoing transitions are tried backward-first, then by descending
//! priority; table order breaks any remaining tie. The first transition whose
//! condition holds wins. Evaluation never mutates anything.

use journey_common::PhaseId;

use crate::context::PhaseContext;
use crate::phase::{AgentDefinition, Transition};

pub fn evaluate<'a>(
    def: &'a AgentDefinition,
    from: &PhaseId,
    ctx: &PhaseContext,
) -> Option<&'a Transition> {
    evaluate_excluding(def, from, ctx, None)
}

/// Like [`evaluate`], skipping `excluded` (a proposal that was just rejected).
pub fn evaluate_excluding<'a>(
    def: &'a AgentDefinition,
    from: &PhaseId,
    ctx: &PhaseContext,
    excluded: Option<&Transition>,
) -> Option<&'a Transition> {
    ordered(def, from)
        .into_iter()
        .filter(|t| excluded.is_none_or(|x| !t.same_as(x)))
        .find(|t| t.condition.holds(ctx))
}

/// Outgoing transitions of `from` in evaluation order.
pub fn ordered<'a>(def: &'a AgentDefinition, from: &PhaseId) -> Vec<&'a Transition> {
    let mut candidates: Vec<&Transition> = def
        .transitions()
        .iter()
        .filter(|t| &t.from == from)
        .collect();
    // sort_by is stable, so table order survives among equals
    candidates.sort_by(|a, b| {
        b.is_backward
            .cmp(&a.is_backward)
            .then(b.priority.cmp(&a.priority))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Condition;
    use journey_common::Mode;

    const A: PhaseId = PhaseId::from_static("a");
    const B: PhaseId = PhaseId::from_static("b");
    const C: PhaseId = PhaseId::from_static("c");
    const DONE: PhaseId = PhaseId::from_static("done");

    fn yes(_: &PhaseContext) -> bool {
        true
    }

    fn no(_: &PhaseContext) -> bool {
        false
    }

    fn def_with(transitions: Vec<Transition>) -> AgentDefinition {
        let mut builder = AgentDefinition::builder(Mode::Research)
            .phases(&[A, B, C, DONE])
            .initial(A)
            .terminal(DONE)
            .transition(Transition::forward(A, B, Condition::new("to_b", yes)))
            .transition(Transition::forward(C, DONE, Condition::new("c_done", yes)));
        for t in transitions {
            builder = builder.transition(t);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_backward_beats_forward_at_equal_priority() {
        let def = def_with(vec![
            Transition::forward(B, C, Condition::new("forward", yes)),
            Transition::backward(B, A, Condition::new("backward", yes)),
        ]);
        let ctx = PhaseContext::new(&B);
        let chosen = evaluate(&def, &B, &ctx).unwrap();
        assert!(chosen.is_backward);
        assert_eq!(chosen.to, A);
    }

    #[test]
    fn test_backward_beats_higher_priority_forward() {
        let def = def_with(vec![
            Transition::forward(B, C, Condition::new("forward", yes)).with_priority(100),
            Transition::backward(B, A, Condition::new("backward", yes)),
        ]);
        let chosen = evaluate(&def, &B, &PhaseContext::new(&B)).unwrap();
        assert_eq!(chosen.condition.name(), "backward");
    }

    #[test]
    fn test_priority_orders_within_direction() {
        let def = def_with(vec![
            Transition::forward(B, C, Condition::new("forward", yes)),
            Transition::backward(B, A, Condition::new("low", yes)).with_priority(5),
            Transition::backward(B, C, Condition::new("high", yes)).with_priority(10),
        ]);
        let order: Vec<_> = ordered(&def, &B)
            .iter()
            .map(|t| t.condition.name())
            .collect();
        assert_eq!(order, vec!["high", "low", "forward"]);
    }

    #[test]
    fn test_falls_through_to_first_holding_condition() {
        let def = def_with(vec![
            Transition::backward(B, A, Condition::new("backward", no)),
            Transition::forward(B, C, Condition::new("forward", yes)),
        ]);
        let chosen = evaluate(&def, &B, &PhaseContext::new(&B)).unwrap();
        assert_eq!(chosen.condition.name(), "forward");
    }

    #[test]
    fn test_no_condition_holds_means_stay() {
        let def = def_with(vec![Transition::forward(B, C, Condition::new("forward", no))]);
        assert!(evaluate(&def, &B, &PhaseContext::new(&B)).is_none());
    }

    #[test]
    fn test_excluding_skips_rejected_proposal() {
        let def = def_with(vec![
            Transition::forward(B, C, Condition::new("first", yes)).with_priority(2),
            Transition::forward(B, DONE, Condition::new("second", yes)),
        ]);
        let ctx = PhaseContext::new(&B);
        let first = evaluate(&def, &B, &ctx).unwrap().clone();
        assert_eq!(first.condition.name(), "first");

        let next = evaluate_excluding(&def, &B, &ctx, Some(&first)).unwrap();
        assert_eq!(next.condition.name(), "second");

        let to_b = evaluate(&def, &A, &ctx);
        assert!(evaluate_excluding(&def, &A, &ctx, to_b).is_none());
    }
}

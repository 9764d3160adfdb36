//! The evolver: pure fold of events into state.
//!
//! `evolve` reads no clock; timestamps come from the event being applied.
//! Impossible inputs (unknown artifact id, regressing phase, mismatched
//! checkpoint id) leave the state unchanged apart from `last_activity_at`,
//! so replay over a log containing them stays total.

use crate::model::{
    has_converged, Event, EventPayload, Phase, SessionState, TurnBudget,
};

/// Apply one event to a state, producing the next state.
pub fn evolve(state: &SessionState, event: &Event) -> SessionState {
    let mut next = state.clone();
    next.last_activity_at = event.at;

    match &event.payload {
        EventPayload::Initialized {
            prompt,
            checklist,
            budgets,
        } => {
            next.prompt = prompt.clone();
            next.checklist = checklist.clone();
            next.budgets = normalize_budgets(budgets);
            next.phase = Phase::Requirements;
            next.turn = 0;
            next.started_at = event.at;
        }

        EventPayload::PhaseStarted { phase, max_turns } => {
            if phase.index() >= next.phase.index() {
                next.phase = *phase;
                replace_budget(&mut next.budgets, TurnBudget::new(*phase, *max_turns));
            }
        }

        EventPayload::PhaseCompleted { phase, turns_used } => {
            if let Some(budget) = next.budgets.iter_mut().find(|b| b.phase == *phase) {
                budget.used_turns = (*turns_used).min(budget.max_turns);
            }
            if let Some(following) = next.phase.next() {
                next.phase = following;
            }
        }

        EventPayload::TurnStarted { turn } => {
            // The authoritative counter lives in events; it never regresses.
            next.turn = next.turn.max(*turn);
        }

        EventPayload::TurnCompleted { .. } => {
            let phase = next.phase;
            if let Some(budget) = next.budgets.iter_mut().find(|b| b.phase == phase) {
                budget.used_turns = (budget.used_turns + 1).min(budget.max_turns);
            }
        }

        EventPayload::ArtifactCreated { artifact } => {
            next.artifacts.push(artifact.clone());
        }

        EventPayload::ArtifactUpdated { id, hash } => {
            if let Some(artifact) = next.artifacts.iter_mut().find(|a| a.id == *id) {
                artifact.hash = hash.clone();
                artifact.updated_at = event.at;
            }
        }

        EventPayload::ChecklistItemCompleted { item_id, evidence } => {
            if let Some(item) = next.checklist.iter_mut().find(|i| i.id == *item_id) {
                item.completed = true;
                item.evidence = Some(evidence.clone());
                item.completed_at = Some(event.at);
            }
            next.confidence.checklist_complete = next.checklist.iter().all(|i| i.completed);
            next.confidence.rescore();
        }

        EventPayload::TestsPassed { coverage, .. } => {
            next.confidence.tests_pass = true;
            if let Some(coverage) = coverage {
                next.confidence.coverage = *coverage;
            }
            next.convergence_streak += 1;
            next.confidence.rescore();
            next.converged =
                has_converged(next.confidence.overall_score, next.convergence_streak);
        }

        EventPayload::TestsFailed { coverage, .. } => {
            next.confidence.tests_pass = false;
            if let Some(coverage) = coverage {
                next.confidence.coverage = *coverage;
            }
            next.convergence_streak = 0;
            next.confidence.rescore();
            next.converged =
                has_converged(next.confidence.overall_score, next.convergence_streak);
        }

        EventPayload::TypeCheckPassed => {
            next.confidence.types_safe = true;
            next.confidence.rescore();
        }

        EventPayload::TypeCheckFailed { .. } => {
            next.confidence.types_safe = false;
            next.convergence_streak = 0;
            next.confidence.rescore();
            next.converged =
                has_converged(next.confidence.overall_score, next.convergence_streak);
        }

        EventPayload::ConfidenceUpdated { confidence } => {
            next.confidence = confidence.clone();
            next.converged =
                has_converged(next.confidence.overall_score, next.convergence_streak);
        }

        EventPayload::CheckpointCreated { summary } => {
            next.pending_checkpoint = Some(summary.clone());
        }

        EventPayload::CheckpointApproved { checkpoint_id } => {
            if next
                .pending_checkpoint
                .as_ref()
                .is_some_and(|p| p.id == *checkpoint_id)
            {
                next.last_approved_checkpoint = next.pending_checkpoint.take();
            }
        }

        EventPayload::CheckpointRejected { checkpoint_id, .. } => {
            if next
                .pending_checkpoint
                .as_ref()
                .is_some_and(|p| p.id == *checkpoint_id)
            {
                next.pending_checkpoint = None;
            }
        }

        EventPayload::ConvergenceReached { score } => {
            next.converged = true;
            next.confidence.overall_score = *score;
        }

        EventPayload::BudgetExhausted { phase, turns_used } => {
            if let Some(budget) = next.budgets.iter_mut().find(|b| b.phase == *phase) {
                budget.used_turns = (*turns_used).min(budget.max_turns);
            }
        }

        EventPayload::ErrorOccurred { .. } => {}
    }

    next
}

/// Fold a whole event sequence over an initial state.
pub fn replay(events: &[Event], initial: &SessionState) -> SessionState {
    events
        .iter()
        .fold(initial.clone(), |state, event| evolve(&state, event))
}

/// Fold only the first `k` events.
pub fn replay_until(events: &[Event], initial: &SessionState, k: usize) -> SessionState {
    replay(&events[..k.min(events.len())], initial)
}

/// Exactly one budget entry per phase: start from the defaults and overlay
/// the provided entries.
fn normalize_budgets(provided: &[TurnBudget]) -> Vec<TurnBudget> {
    let mut budgets = TurnBudget::defaults();
    for entry in provided {
        replace_budget(&mut budgets, *entry);
    }
    budgets
}

fn replace_budget(budgets: &mut [TurnBudget], entry: TurnBudget) {
    if let Some(slot) = budgets.iter_mut().find(|b| b.phase == entry.phase) {
        *slot = entry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Artifact, CheckpointSummary, ChecklistItem, Confidence, Event, EventPayload,
    };
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs)
    }

    fn event(secs: i64, payload: EventPayload) -> Event {
        Event::new(at(secs), payload)
    }

    fn green_state() -> SessionState {
        let mut state = SessionState::initial("p");
        state.confidence = Confidence {
            types_safe: true,
            schema_valid: true,
            tests_pass: true,
            coverage: 95.0,
            checklist_complete: true,
            overall_score: 0.0,
        };
        state.confidence.rescore();
        state
    }

    #[test]
    fn test_initialized_sets_the_aggregate() {
        let state = SessionState::initial("ignored");
        let checklist = vec![ChecklistItem::new("requirements-1", Phase::Requirements, "x")];
        let next = evolve(
            &state,
            &event(
                10,
                EventPayload::Initialized {
                    prompt: "hello".into(),
                    checklist: checklist.clone(),
                    budgets: vec![TurnBudget::new(Phase::Design, 99)],
                },
            ),
        );

        assert_eq!(next.prompt, "hello");
        assert_eq!(next.checklist, checklist);
        assert_eq!(next.phase, Phase::Requirements);
        assert_eq!(next.turn, 0);
        assert_eq!(next.started_at, at(10));
        assert_eq!(next.budgets.len(), 6);
        assert_eq!(next.budget_for(Phase::Design).unwrap().max_turns, 99);
    }

    #[test]
    fn test_convergence_in_three_ticks() {
        let mut state = green_state();
        for i in 0..3 {
            state = evolve(
                &state,
                &event(
                    i,
                    EventPayload::TestsPassed {
                        total: 10,
                        coverage: Some(95.0),
                    },
                ),
            );
        }

        assert_eq!(state.confidence.overall_score, 1.0);
        assert_eq!(state.convergence_streak, 3);
        assert!(state.converged);
    }

    #[test]
    fn test_failure_resets_streak() {
        let mut state = green_state();
        state.convergence_streak = 2;

        let next = evolve(
            &state,
            &event(
                1,
                EventPayload::TestsFailed {
                    total: 10,
                    failed: 3,
                    coverage: None,
                },
            ),
        );
        assert_eq!(next.convergence_streak, 0);
        assert!(!next.confidence.tests_pass);
        assert!(next.confidence.overall_score <= 0.3);
    }

    #[test]
    fn test_failure_after_convergence_clears_converged() {
        let mut state = green_state();
        for i in 0..3 {
            state = evolve(
                &state,
                &event(
                    i,
                    EventPayload::TestsPassed {
                        total: 10,
                        coverage: Some(95.0),
                    },
                ),
            );
        }
        assert!(state.converged);

        let next = evolve(
            &state,
            &event(
                4,
                EventPayload::TestsFailed {
                    total: 10,
                    failed: 1,
                    coverage: None,
                },
            ),
        );
        assert!(!next.converged);
        assert_eq!(next.convergence_streak, 0);
        assert!(next.confidence.overall_score <= 0.3);
    }

    #[test]
    fn test_type_check_failure_resets_streak() {
        let mut state = green_state();
        state.convergence_streak = 2;

        let next = evolve(
            &state,
            &event(1, EventPayload::TypeCheckFailed { errors: vec![] }),
        );
        assert_eq!(next.convergence_streak, 0);
        assert_eq!(next.confidence.overall_score, 0.0);
    }

    #[test]
    fn test_checkpoint_approval_is_idempotent() {
        let mut state = SessionState::initial("p");
        let summary = CheckpointSummary {
            id: "c-1".into(),
            phase: Phase::Requirements,
            turn: 3,
            completed_items: 0,
            total_items: 2,
            artifact_count: 0,
            confidence_score: 0.0,
            created_at: at(0),
        };
        state = evolve(
            &state,
            &event(
                1,
                EventPayload::CheckpointCreated {
                    summary: summary.clone(),
                },
            ),
        );
        assert!(state.pending_checkpoint.is_some());

        let approved = evolve(
            &state,
            &event(
                2,
                EventPayload::CheckpointApproved {
                    checkpoint_id: "c-1".into(),
                },
            ),
        );
        assert!(approved.pending_checkpoint.is_none());
        assert_eq!(
            approved.last_approved_checkpoint.as_ref().map(|c| c.id.as_str()),
            Some("c-1")
        );

        // Replay collision: a second approval with the same id is a no-op.
        let again = evolve(
            &approved,
            &event(
                3,
                EventPayload::CheckpointApproved {
                    checkpoint_id: "c-1".into(),
                },
            ),
        );
        let mut expected = approved.clone();
        expected.last_activity_at = at(3);
        assert_eq!(again, expected);
    }

    #[test]
    fn test_checkpoint_rejection_requires_matching_id() {
        let mut state = SessionState::initial("p");
        let summary = CheckpointSummary {
            id: "c-1".into(),
            phase: Phase::Requirements,
            turn: 3,
            completed_items: 0,
            total_items: 0,
            artifact_count: 0,
            confidence_score: 0.0,
            created_at: at(0),
        };
        state = evolve(
            &state,
            &event(1, EventPayload::CheckpointCreated { summary }),
        );

        let mismatched = evolve(
            &state,
            &event(
                2,
                EventPayload::CheckpointRejected {
                    checkpoint_id: "c-other".into(),
                    reason: "timeout".into(),
                },
            ),
        );
        assert!(mismatched.pending_checkpoint.is_some());

        let rejected = evolve(
            &state,
            &event(
                2,
                EventPayload::CheckpointRejected {
                    checkpoint_id: "c-1".into(),
                    reason: "timeout".into(),
                },
            ),
        );
        assert!(rejected.pending_checkpoint.is_none());
        assert!(rejected.last_approved_checkpoint.is_none());
    }

    #[test]
    fn test_artifact_update_patches_by_id() {
        let mut state = SessionState::initial("p");
        let artifact = Artifact {
            id: "a-1".into(),
            path: "src/lib.rs".into(),
            hash: "old".into(),
            phase: Phase::Implementation,
            created_at: at(1),
            updated_at: at(1),
        };
        state = evolve(
            &state,
            &event(1, EventPayload::ArtifactCreated { artifact }),
        );

        let next = evolve(
            &state,
            &event(
                5,
                EventPayload::ArtifactUpdated {
                    id: "a-1".into(),
                    hash: "new".into(),
                },
            ),
        );
        assert_eq!(next.artifacts[0].hash, "new");
        assert_eq!(next.artifacts[0].updated_at, at(5));

        // Unknown id leaves the artifact list untouched.
        let unknown = evolve(
            &next,
            &event(
                6,
                EventPayload::ArtifactUpdated {
                    id: "a-404".into(),
                    hash: "x".into(),
                },
            ),
        );
        assert_eq!(unknown.artifacts, next.artifacts);
    }

    #[test]
    fn test_checklist_completion_recomputes_confidence() {
        let mut state = green_state();
        state.checklist = vec![
            ChecklistItem::new("requirements-1", Phase::Requirements, "a"),
            ChecklistItem::new("requirements-2", Phase::Requirements, "b"),
        ];
        state.confidence.checklist_complete = false;
        state.confidence.rescore();
        assert_eq!(state.confidence.overall_score, 0.75);

        state = evolve(
            &state,
            &event(
                1,
                EventPayload::ChecklistItemCompleted {
                    item_id: "requirements-1".into(),
                    evidence: "reviewed".into(),
                },
            ),
        );
        assert!(!state.confidence.checklist_complete);

        state = evolve(
            &state,
            &event(
                2,
                EventPayload::ChecklistItemCompleted {
                    item_id: "requirements-2".into(),
                    evidence: "reviewed".into(),
                },
            ),
        );
        assert!(state.confidence.checklist_complete);
        assert_eq!(state.confidence.overall_score, 1.0);
        assert_eq!(state.checklist[1].completed_at, Some(at(2)));
    }

    #[test]
    fn test_phase_completed_advances_and_records_usage() {
        let mut state = SessionState::initial("p");
        state = evolve(
            &state,
            &event(
                1,
                EventPayload::PhaseCompleted {
                    phase: Phase::Requirements,
                    turns_used: 4,
                },
            ),
        );
        assert_eq!(state.phase, Phase::Design);
        assert_eq!(state.budget_for(Phase::Requirements).unwrap().used_turns, 4);

        // At the terminal phase the state stays put.
        state.phase = Phase::Verification;
        let next = evolve(
            &state,
            &event(
                2,
                EventPayload::PhaseCompleted {
                    phase: Phase::Verification,
                    turns_used: 1,
                },
            ),
        );
        assert_eq!(next.phase, Phase::Verification);
    }

    #[test]
    fn test_replay_matches_stepwise_application() {
        let initial = SessionState::initial("p");
        let events = vec![
            event(
                1,
                EventPayload::Initialized {
                    prompt: "p".into(),
                    checklist: vec![ChecklistItem::new("requirements-1", Phase::Requirements, "x")],
                    budgets: TurnBudget::defaults(),
                },
            ),
            event(2, EventPayload::TurnStarted { turn: 1 }),
            event(3, EventPayload::TypeCheckPassed),
            event(4, EventPayload::TurnCompleted { turn: 1 }),
        ];

        let mut stepwise = initial.clone();
        for e in &events {
            stepwise = evolve(&stepwise, e);
        }

        assert_eq!(replay(&events, &initial), stepwise);
        assert_eq!(replay(&events, &initial), replay(&events, &initial));
    }

    #[test]
    fn test_replay_until_is_a_prefix_fold() {
        let initial = SessionState::initial("p");
        let events = vec![
            event(1, EventPayload::TurnStarted { turn: 1 }),
            event(2, EventPayload::TurnCompleted { turn: 1 }),
            event(3, EventPayload::TurnStarted { turn: 2 }),
        ];

        let prefix = replay_until(&events, &initial, 2);
        assert_eq!(prefix, replay(&events[..2], &initial));
        assert_eq!(replay_until(&events, &initial, 99), replay(&events, &initial));

        // Splitting at any point and folding the halves in order is the
        // same as folding the whole sequence.
        for n in 0..=events.len() {
            let head = replay(&events[..n], &initial);
            let full = replay(&events[n..], &head);
            assert_eq!(full, replay(&events, &initial));
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_phase() -> impl Strategy<Value = Phase> {
            prop::sample::select(Phase::ORDER.to_vec())
        }

        fn arb_lifecycle_payload() -> impl Strategy<Value = EventPayload> {
            prop_oneof![
                (arb_phase(), 1u32..50).prop_map(|(phase, max_turns)| {
                    EventPayload::PhaseStarted { phase, max_turns }
                }),
                (arb_phase(), 0u32..50).prop_map(|(phase, turns_used)| {
                    EventPayload::PhaseCompleted { phase, turns_used }
                }),
                (0u64..100).prop_map(|turn| EventPayload::TurnStarted { turn }),
                (0u64..100).prop_map(|turn| EventPayload::TurnCompleted { turn }),
                (arb_phase(), 0u32..50).prop_map(|(phase, turns_used)| {
                    EventPayload::BudgetExhausted { phase, turns_used }
                }),
                Just(EventPayload::ErrorOccurred {
                    message: "boom".into(),
                    recoverable: true,
                }),
                "[a-z]{1,8}".prop_map(|checkpoint_id| EventPayload::CheckpointApproved {
                    checkpoint_id,
                }),
            ]
        }

        fn arb_signal_payload() -> impl Strategy<Value = EventPayload> {
            prop_oneof![
                (0u32..20, prop::option::of(0.0f64..100.0)).prop_map(|(total, coverage)| {
                    EventPayload::TestsPassed { total, coverage }
                }),
                (1u32..20, 1u32..5, prop::option::of(0.0f64..100.0)).prop_map(
                    |(total, failed, coverage)| EventPayload::TestsFailed {
                        total,
                        failed,
                        coverage,
                    }
                ),
                Just(EventPayload::TypeCheckPassed),
                Just(EventPayload::TypeCheckFailed { errors: vec![] }),
                // An all-green confidence makes convergence reachable so the
                // invariant properties are exercised, not vacuous.
                Just(EventPayload::ConfidenceUpdated {
                    confidence: {
                        let mut confidence = Confidence {
                            types_safe: true,
                            schema_valid: true,
                            tests_pass: true,
                            coverage: 95.0,
                            checklist_complete: true,
                            overall_score: 0.0,
                        };
                        confidence.rescore();
                        confidence
                    },
                }),
            ]
        }

        fn arb_payload() -> impl Strategy<Value = EventPayload> {
            prop_oneof![arb_lifecycle_payload(), arb_signal_payload()]
        }

        fn arb_events() -> impl Strategy<Value = Vec<Event>> {
            prop::collection::vec((0i64..10_000, arb_payload()), 0..40).prop_map(|entries| {
                entries
                    .into_iter()
                    .map(|(secs, payload)| {
                        Event::new(
                            DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs),
                            payload,
                        )
                    })
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn prop_exactly_one_budget_per_phase(events in arb_events()) {
                let mut state = SessionState::initial("p");
                for event in &events {
                    state = evolve(&state, event);
                    for phase in Phase::ORDER {
                        prop_assert_eq!(
                            state.budgets.iter().filter(|b| b.phase == phase).count(),
                            1
                        );
                    }
                }
            }

            #[test]
            fn prop_turn_and_phase_are_monotonic(events in arb_events()) {
                let mut state = SessionState::initial("p");
                for event in &events {
                    let next = evolve(&state, event);
                    prop_assert!(next.turn >= state.turn);
                    prop_assert!(next.phase.index() >= state.phase.index());
                    state = next;
                }
            }

            #[test]
            fn prop_budgets_never_overflow(events in arb_events()) {
                let mut state = SessionState::initial("p");
                for event in &events {
                    state = evolve(&state, event);
                    for budget in &state.budgets {
                        prop_assert!(budget.used_turns <= budget.max_turns);
                    }
                }
            }

            #[test]
            fn prop_convergence_implies_score_and_streak(events in arb_events()) {
                let mut state = SessionState::initial("p");
                for event in &events {
                    state = evolve(&state, event);
                    // The implication must hold after every application,
                    // including failures arriving after a convergence run.
                    if state.converged {
                        prop_assert!(state.confidence.overall_score >= 0.9);
                        prop_assert!(state.convergence_streak >= 3);
                    }
                }
            }

            #[test]
            fn prop_replay_is_deterministic(events in arb_events()) {
                let initial = SessionState::initial("p");
                prop_assert_eq!(replay(&events, &initial), replay(&events, &initial));
            }

            #[test]
            fn prop_ordered_split_replay_equals_full_replay(
                events in arb_events(),
                split in 0usize..40
            ) {
                let initial = SessionState::initial("p");
                let n = split.min(events.len());
                let head = replay(&events[..n], &initial);
                prop_assert_eq!(replay(&events[n..], &head), replay(&events, &initial));
            }
        }
    }
}

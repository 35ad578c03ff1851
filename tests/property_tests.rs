//! Property-based tests for core scenario types.
//!
//! These tests use proptest to verify properties hold across
//! many randomly generated inputs.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;
use switchboard::core::{
    Directive, HistoryEntry, Stage, StateHistory, Trigger, TransitionStatus, HISTORY_CAPACITY,
};
use switchboard::stages::{RunResult, StageResult, StageStatus, Stages};
use switchboard::ExecutionError;
use uuid::Uuid;

fn entry(to: String) -> HistoryEntry {
    HistoryEntry::new(
        Uuid::new_v4(),
        None,
        to,
        Value::Null,
        TransitionStatus::Executed,
        Value::Null,
    )
}

prop_compose! {
    fn arbitrary_id()(id in "[a-z][a-z0-9_]{0,12}") -> String {
        id
    }
}

prop_compose! {
    fn arbitrary_trigger()(id in proptest::option::of(arbitrary_id())) -> Trigger {
        match id {
            Some(id) => Trigger::to(id),
            None => Trigger::None,
        }
    }
}

prop_compose! {
    fn arbitrary_stage()(variant in 0..5u8) -> Stage {
        match variant {
            0 => Stage::Idle,
            1 => Stage::Running,
            2 => Stage::ErrorHandling,
            3 => Stage::Terminating,
            _ => Stage::Terminated,
        }
    }
}

prop_compose! {
    fn arbitrary_stage_status()(variant in 0..4u8) -> StageStatus {
        match variant {
            0 => StageStatus::Skipped,
            1 => StageStatus::Success,
            2 => StageStatus::Failure,
            _ => StageStatus::Tripped,
        }
    }
}

fn stage_result(status: StageStatus) -> StageResult {
    let error = match status {
        StageStatus::Failure => Some(ExecutionError::illegal_state("failed")),
        StageStatus::Tripped => Some(ExecutionError::unrecoverable("tripped")),
        _ => None,
    };
    StageResult {
        status,
        value: Value::Null,
        error,
        duration: Duration::ZERO,
    }
}

proptest! {
    #[test]
    fn history_never_exceeds_capacity(
        capacity in 1..150usize,
        targets in prop::collection::vec(arbitrary_id(), 0..300)
    ) {
        let mut history = StateHistory::with_capacity(capacity);
        for to in &targets {
            history.record(entry(to.clone()));
        }

        let bound = capacity.min(HISTORY_CAPACITY);
        prop_assert!(history.len() <= HISTORY_CAPACITY);
        prop_assert_eq!(history.len(), targets.len().min(bound));
    }

    #[test]
    fn history_keeps_the_newest_entries_in_order(
        targets in prop::collection::vec(arbitrary_id(), 0..250)
    ) {
        let mut history = StateHistory::new();
        for to in &targets {
            history.record(entry(to.clone()));
        }

        let kept = targets.len().min(HISTORY_CAPACITY);
        let expected: Vec<&str> = targets[targets.len() - kept..]
            .iter()
            .map(String::as_str)
            .collect();
        prop_assert_eq!(history.path(), expected);
    }

    #[test]
    fn bare_string_parses_as_move_without_hints(id in arbitrary_id()) {
        let trigger: Trigger = serde_json::from_value(json!(id.clone())).unwrap();
        let next = trigger.into_next().unwrap();
        prop_assert_eq!(next.id, id);
        prop_assert_eq!(next.hints, Value::Null);
    }

    #[test]
    fn trigger_survives_json(id in arbitrary_id(), hint in any::<i64>()) {
        let trigger = Trigger::go(id, json!({ "n": hint }));
        let json = serde_json::to_value(&trigger).unwrap();
        let restored: Trigger = serde_json::from_value(json).unwrap();
        prop_assert_eq!(trigger, restored);
    }

    #[test]
    fn directive_override_takes_precedence(
        transition in arbitrary_trigger(),
        trigger in arbitrary_trigger()
    ) {
        let directive = Directive {
            transition: transition.clone(),
            trigger: trigger.clone(),
            value: Value::Null,
        };

        let expected = if transition.is_none() { trigger } else { transition };
        prop_assert_eq!(directive.next(), expected);
    }

    #[test]
    fn terminal_stages_are_restricted(stage in arbitrary_stage()) {
        if stage.is_terminal() {
            prop_assert!(stage.is_restricted());
        }
    }

    #[test]
    fn run_reports_most_severe_stage(
        initialization in arbitrary_stage_status(),
        scenario in arbitrary_stage_status(),
        termination in arbitrary_stage_status()
    ) {
        let result = RunResult::aggregate(
            Stages {
                initialization: stage_result(initialization),
                scenario: stage_result(scenario),
                termination: stage_result(termination),
            },
            Duration::ZERO,
        );

        let expected = initialization.max(scenario).max(termination);
        prop_assert_eq!(result.status, expected);
        prop_assert_eq!(result.error.is_some(), expected >= StageStatus::Failure);
    }
}

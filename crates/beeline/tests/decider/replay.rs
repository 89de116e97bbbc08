//! Replay passes over hand-built histories.

use beeline::history::HistoryRecord;
use beeline::{
    Arguments, Decision, JsonCodec, PassOutcome, RetryCause, ScheduleActivity, WorkflowExecution,
    replay,
};
use serde_json::json;
use test_utils::HistoryBuilder;

use crate::support::workflows::{
    PIPELINE, StageControl, TASKLIST, meta, pipeline, stage_call_id, stage_id,
};

fn execution() -> WorkflowExecution {
    WorkflowExecution::new("order-17", "run-1")
}

fn run(records: &[HistoryRecord]) -> PassOutcome {
    run_with_retries(records, 3)
}

fn run_with_retries(records: &[HistoryRecord], max_retries: u32) -> PassOutcome {
    let definition = pipeline(StageControl::new(), max_retries);
    replay(&definition, &meta(&execution()), records, &JsonCodec)
}

fn scheduled(outcome: &PassOutcome) -> &ScheduleActivity {
    match outcome {
        PassOutcome::Suspended(Some(Decision::ScheduleActivityTask(schedule)))
        | PassOutcome::Retrying {
            decision: Decision::ScheduleActivityTask(schedule),
            ..
        } => schedule,
        other => panic!("expected an activity to be scheduled, got {other:?}"),
    }
}

fn failure_reason(outcome: &PassOutcome) -> &str {
    match outcome {
        PassOutcome::Failed { reason, .. } => reason,
        other => panic!("expected a failed pass, got {other:?}"),
    }
}

/// History builder with the run started at `version` with input 21.
fn started(version: &str) -> HistoryBuilder {
    let mut history = HistoryBuilder::new(JsonCodec);
    history.started(PIPELINE, version, Some(json!(21)));
    history
}

fn schedule_stage(history: &mut HistoryBuilder, stage: &str, attempt: u32, arg: serde_json::Value) -> u64 {
    history.scheduled(
        &stage_id(&execution(), stage, attempt),
        stage,
        "0.0.1",
        TASKLIST,
        Arguments::new().arg(arg),
    )
}

#[test]
fn first_pass_schedules_first_attempt() {
    let history = started("0.0.1");

    let outcome = run(&history.records());

    let schedule = scheduled(&outcome);
    assert!(matches!(outcome, PassOutcome::Suspended(Some(_))));
    assert_eq!(
        schedule.activity_id.to_string(),
        "test-domain.Pipeline.order-17.run-1.stage1@0.0.1-0"
    );
    assert_eq!(schedule.activity_type.to_string(), "stage1@0.0.1");
    assert_eq!(schedule.tasklist, TASKLIST);
    assert_eq!(
        schedule.input.as_deref(),
        Some(r#"{"args":[21],"kwargs":{}}"#)
    );
}

#[test]
fn completed_attempt_feeds_next_call() {
    let mut history = started("0.0.1");
    let s = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.activity_started(s);
    history.completed(s, json!(42));

    let outcome = run(&history.records());

    let schedule = scheduled(&outcome);
    assert_eq!(schedule.activity_type.name, "stage2");
    assert_eq!(schedule.activity_id.attempt(), 0);
    assert_eq!(
        schedule.input.as_deref(),
        Some(r#"{"args":[42],"kwargs":{}}"#)
    );
}

#[test]
fn fully_recorded_history_completes() {
    let mut history = started("0.0.1");
    let s1 = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.activity_started(s1);
    history.completed(s1, json!(42));
    let s2 = schedule_stage(&mut history, "stage2", 0, json!(42));
    history.activity_started(s2);
    history.completed(s2, json!("result 42"));

    let outcome = run(&history.records());

    assert_eq!(outcome, PassOutcome::Completed(json!("result 42")));
    assert!(outcome.is_terminal());
}

#[test]
fn pending_activity_suspends_without_decision() {
    let mut history = started("0.0.1");
    let s = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.activity_started(s);

    let outcome = run(&history.records());

    assert_eq!(outcome, PassOutcome::Suspended(None));
    assert!(outcome.into_decisions(&JsonCodec).is_empty());
}

#[test]
fn timed_out_attempt_is_retried_with_next_suffix() {
    let mut history = started("0.0.1");
    let s = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.timed_out(s);

    let outcome = run(&history.records());

    assert!(matches!(
        outcome,
        PassOutcome::Retrying {
            cause: RetryCause::TimedOut,
            ..
        }
    ));
    let schedule = scheduled(&outcome);
    assert_eq!(schedule.activity_id.to_string(), stage_id(&execution(), "stage1", 1));
    assert_eq!(
        schedule.input.as_deref(),
        Some(r#"{"args":[21],"kwargs":{}}"#)
    );
}

#[test]
fn failed_attempts_count_every_recorded_retry() {
    let mut history = started("0.0.1");
    let s0 = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.activity_started(s0);
    history.failed(s0, "stage1 unavailable");
    let s1 = schedule_stage(&mut history, "stage1", 1, json!(21));
    history.activity_started(s1);
    history.failed(s1, "stage1 unavailable");

    let outcome = run(&history.records());

    assert!(matches!(
        outcome,
        PassOutcome::Retrying {
            cause: RetryCause::Failed,
            ..
        }
    ));
    assert_eq!(scheduled(&outcome).activity_id.attempt(), 2);
}

#[test]
fn recorded_retry_waits_for_its_outcome() {
    let mut history = started("0.0.1");
    let s0 = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.timed_out(s0);
    let s1 = schedule_stage(&mut history, "stage1", 1, json!(21));
    history.activity_started(s1);

    assert_eq!(run(&history.records()), PassOutcome::Suspended(None));
}

#[test]
fn retried_attempt_result_is_returned() {
    let mut history = started("0.0.1");
    let s0 = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.failed(s0, "stage1 unavailable");
    let s1 = schedule_stage(&mut history, "stage1", 1, json!(21));
    history.completed(s1, json!(42));

    let outcome = run(&history.records());

    assert_eq!(scheduled(&outcome).activity_type.name, "stage2");
}

#[test]
fn exhausted_budget_fails_the_workflow() {
    let mut history = started("0.0.1");
    let s0 = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.failed(s0, "stage1 unavailable");
    let s1 = schedule_stage(&mut history, "stage1", 1, json!(21));
    history.failed(s1, "stage1 unavailable");

    let outcome = run_with_retries(&history.records(), 1);

    assert_eq!(failure_reason(&outcome), "RetryBudgetExhausted");
    let decisions = outcome.into_decisions(&JsonCodec);
    assert!(matches!(
        decisions.as_slice(),
        [Decision::FailWorkflowExecution { reason, .. }] if reason == "RetryBudgetExhausted"
    ));
}

#[test]
fn back_to_back_schedules_count_as_attempts() {
    let mut history = started("0.0.1");
    let mut last = 0;
    for attempt in 0..4 {
        last = schedule_stage(&mut history, "stage1", attempt, json!(21));
    }
    history.timed_out(last);

    let outcome = run_with_retries(&history.records(), 3);
    assert_eq!(failure_reason(&outcome), "RetryBudgetExhausted");

    let outcome = run_with_retries(&history.records(), 4);
    assert_eq!(scheduled(&outcome).activity_id.attempt(), 4);
}

#[test]
fn double_schedule_then_timeout_retries_with_suffix_two() {
    let mut history = started("0.0.1");
    schedule_stage(&mut history, "stage1", 0, json!(21));
    let s1 = schedule_stage(&mut history, "stage1", 1, json!(21));
    history.timed_out(s1);

    let outcome = run(&history.records());

    assert!(matches!(
        outcome,
        PassOutcome::Retrying {
            cause: RetryCause::TimedOut,
            ..
        }
    ));
    assert_eq!(scheduled(&outcome).activity_id.to_string(), stage_id(&execution(), "stage1", 2));
}

#[test]
fn repeated_call_gets_its_own_activity_id() {
    let mut history = started("0.0.6");
    let s = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.completed(s, json!(42));

    let outcome = run_with_retries(&history.records(), 1);

    let schedule = scheduled(&outcome);
    assert_eq!(schedule.activity_id.to_string(), stage_call_id(&execution(), "stage1", 1, 0));
    assert_ne!(schedule.activity_id.to_string(), stage_id(&execution(), "stage1", 0));
    assert_eq!(
        schedule.input.as_deref(),
        Some(r#"{"args":[42],"kwargs":{}}"#)
    );
}

#[test]
fn repeated_call_has_its_own_retry_budget() {
    let mut history = started("0.0.6");
    let s = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.completed(s, json!(42));
    let second = history.scheduled(
        &stage_call_id(&execution(), "stage1", 1, 0),
        "stage1",
        "0.0.1",
        TASKLIST,
        Arguments::new().arg(json!(42)),
    );
    history.failed(second, "stage1 unavailable");

    let outcome = run_with_retries(&history.records(), 1);

    assert!(matches!(
        outcome,
        PassOutcome::Retrying {
            cause: RetryCause::Failed,
            ..
        }
    ));
    assert_eq!(
        scheduled(&outcome).activity_id.to_string(),
        stage_call_id(&execution(), "stage1", 1, 1)
    );

    let retry = history.scheduled(
        &stage_call_id(&execution(), "stage1", 1, 1),
        "stage1",
        "0.0.1",
        TASKLIST,
        Arguments::new().arg(json!(42)),
    );
    history.failed(retry, "stage1 unavailable");

    let outcome = run_with_retries(&history.records(), 1);
    assert_eq!(failure_reason(&outcome), "RetryBudgetExhausted");
    let PassOutcome::Failed { details, .. } = outcome else {
        unreachable!();
    };
    assert!(details.contains("2 attempts"), "details: {details}");
}

#[test]
fn zero_retries_fail_on_first_failure() {
    let mut history = started("0.0.1");
    let s = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.timed_out(s);

    let outcome = run_with_retries(&history.records(), 0);

    assert_eq!(failure_reason(&outcome), "RetryBudgetExhausted");
}

#[test]
fn started_version_selects_entrypoint() {
    let mut history = started("0.0.2");
    let s = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.completed(s, json!(42));

    let outcome = run(&history.records());

    let PassOutcome::Suspended(Some(Decision::StartTimer {
        timer_id,
        start_to_fire_timeout,
        control,
    })) = &outcome
    else {
        panic!("expected a timer, got {outcome:?}");
    };
    assert_eq!(timer_id, "test-domain.Pipeline.order-17.run-1");
    assert_eq!(*start_to_fire_timeout, 5);
    assert_eq!(*control, None);
}

#[test]
fn fired_timer_resumes_the_entrypoint() {
    let mut history = started("0.0.2");
    let s1 = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.completed(s1, json!(42));
    let timer = history.timer_started("test-domain.Pipeline.order-17.run-1", 5, None);
    history.timer_fired("test-domain.Pipeline.order-17.run-1", timer);
    let s2 = schedule_stage(&mut history, "stage2", 0, json!(42));
    history.completed(s2, json!("result 42"));

    let outcome = run(&history.records());

    assert_eq!(outcome, PassOutcome::Completed(json!({ "v2": "result 42" })));
}

#[test]
fn timer_control_is_encoded_and_recovered() {
    let history = started("0.0.7");

    let outcome = run(&history.records());

    let PassOutcome::Suspended(Some(Decision::StartTimer { control, .. })) = &outcome else {
        panic!("expected a timer, got {outcome:?}");
    };
    assert_eq!(control.as_deref(), Some(r#"{"next":"stage2"}"#));

    let mut history = started("0.0.7");
    let timer = history.timer_started(
        "test-domain.Pipeline.order-17.run-1",
        5,
        Some(json!({ "next": "stage2" })),
    );
    history.timer_fired("test-domain.Pipeline.order-17.run-1", timer);

    let outcome = run(&history.records());

    assert_eq!(
        outcome,
        PassOutcome::Completed(json!({ "control": { "next": "stage2" } }))
    );
}

#[test]
fn fractional_sleep_rounds_up_to_whole_seconds() {
    let history = started("0.0.9");

    let outcome = run(&history.records());

    assert!(matches!(
        outcome,
        PassOutcome::Suspended(Some(Decision::StartTimer {
            start_to_fire_timeout: 2,
            ..
        }))
    ));
}

#[test]
fn typed_result_mismatch_is_unhandled() {
    let mut history = started("0.0.8");
    let s = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.completed(s, json!(42));

    let outcome = run(&history.records());

    assert_eq!(failure_reason(&outcome), "unhandled");
}

#[test]
fn pending_timer_suspends_without_decision() {
    let mut history = started("0.0.2");
    let s1 = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.completed(s1, json!(42));
    history.timer_started("test-domain.Pipeline.order-17.run-1", 5, None);

    assert_eq!(run(&history.records()), PassOutcome::Suspended(None));
}

#[test]
fn unknown_version_is_a_decider_failure() {
    let history = started("9.9.9");

    let outcome = run(&history.records());

    assert_eq!(failure_reason(&outcome), "DeciderException");
}

#[test]
fn unregistered_activity_is_a_decider_failure() {
    let history = started("0.0.3");

    assert_eq!(failure_reason(&run(&history.records())), "DeciderException");
}

#[test]
fn entrypoint_panic_is_unhandled() {
    let history = started("0.0.4");

    let outcome = run(&history.records());

    assert_eq!(failure_reason(&outcome), "unhandled");
    let PassOutcome::Failed { details, .. } = outcome else {
        unreachable!();
    };
    assert!(details.contains("entrypoint blew up"), "details: {details}");
}

#[test]
fn history_that_diverges_from_code_is_a_decider_failure() {
    let mut history = started("0.0.1");
    schedule_stage(&mut history, "stage2", 0, json!(21));

    assert_eq!(failure_reason(&run(&history.records())), "DeciderException");
}

#[test]
fn unrecognized_event_is_an_event_failure() {
    let mut history = started("0.0.1");
    history.push("WorkflowExecutionSignaled", json!({ "signalName": "poke" }));

    assert_eq!(failure_reason(&run(&history.records())), "EventException");
}

#[test]
fn refused_schedule_is_an_event_failure() {
    let mut history = started("0.0.1");
    history.push(
        "ScheduleActivityTaskFailed",
        json!({
            "activityId": stage_id(&execution(), "stage1", 0),
            "activityType": { "name": "stage1", "version": "0.0.1" },
            "cause": "ACTIVITY_TYPE_DOES_NOT_EXIST",
        }),
    );

    let outcome = run(&history.records());

    assert_eq!(failure_reason(&outcome), "EventException");
    let PassOutcome::Failed { details, .. } = outcome else {
        unreachable!();
    };
    assert!(details.contains("ACTIVITY_TYPE_DOES_NOT_EXIST"), "details: {details}");
}

#[test]
fn replay_is_deterministic() {
    let mut history = started("0.0.1");
    let s = schedule_stage(&mut history, "stage1", 0, json!(21));
    history.timed_out(s);
    let records = history.records();

    let first = run(&records);
    let second = run(&records);

    assert_eq!(first, second);
}

#[test]
fn activity_ids_are_scoped_by_run() {
    let history = started("0.0.1");
    let definition = pipeline(StageControl::new(), 3);

    let a = replay(
        &definition,
        &meta(&WorkflowExecution::new("order-17", "run-1")),
        &history.records(),
        &JsonCodec,
    );
    let b = replay(
        &definition,
        &meta(&WorkflowExecution::new("order-17", "run-2")),
        &history.records(),
        &JsonCodec,
    );

    assert_ne!(scheduled(&a).activity_id, scheduled(&b).activity_id);
}

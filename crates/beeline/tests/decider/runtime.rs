//! Deciders and activity workers running against the in-memory service.

use std::sync::Arc;
use std::time::Duration;

use beeline::runtime::{ActivityOutcome, NOT_FOUND_REASON};
use beeline::{
    ActivityId, ActivityTimeouts, Decision, PassOutcome, RetryCause, RuntimeConfig,
    ScheduleActivity, StartOptions, TypeRef, WorkflowRuntime,
};
use serde_json::json;
use test_utils::{ExecutionStatus, MemoryDispatch};

use crate::support::helpers::{
    DEFAULT_TEST_TIMEOUT, TestApp, assert_event_types, decode, init_test_tracing,
    test_runtime_config,
};
use crate::support::workflows::{PIPELINE, StageControl, TASKLIST, pipeline, stage_id};

fn completed_result(status: ExecutionStatus) -> serde_json::Value {
    match status {
        ExecutionStatus::Completed {
            result: Some(result),
        } => decode(&result),
        other => panic!("expected completion with a result, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_runs_to_completion() -> anyhow::Result<()> {
    init_test_tracing();

    let dispatch = Arc::new(MemoryDispatch::new());
    let control = StageControl::new();
    let app = TestApp::start(Arc::clone(&dispatch), pipeline(Arc::clone(&control), 3));

    let execution = app
        .service
        .start_execution(StartOptions::default().input(json!(21)))
        .await?;
    let status = dispatch
        .wait_for_close(&execution, DEFAULT_TEST_TIMEOUT)
        .await?;

    assert_eq!(completed_result(status), json!("result 42"));
    assert_eq!(control.calls(), 1);
    assert_event_types(
        &dispatch.event_types(&execution),
        &[
            "WorkflowExecutionStarted",
            "ActivityTaskScheduled",
            "ActivityTaskStarted",
            "ActivityTaskCompleted",
            "ActivityTaskScheduled",
            "ActivityTaskStarted",
            "ActivityTaskCompleted",
            "WorkflowExecutionCompleted",
        ],
    );

    app.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_are_retried() -> anyhow::Result<()> {
    init_test_tracing();

    let dispatch = Arc::new(MemoryDispatch::new());
    let control = StageControl::failing(2);
    let app = TestApp::start(Arc::clone(&dispatch), pipeline(Arc::clone(&control), 3));

    let execution = app
        .service
        .start_execution(StartOptions::default().input(json!(5)))
        .await?;
    let status = dispatch
        .wait_for_close(&execution, DEFAULT_TEST_TIMEOUT)
        .await?;

    assert_eq!(completed_result(status), json!("result 10"));
    assert_eq!(control.calls(), 3);

    let scheduled_ids: Vec<String> = dispatch
        .history(&execution)
        .iter()
        .filter(|record| record.event_type == "ActivityTaskScheduled")
        .filter_map(|record| {
            record.event_attributes()?["activityId"]
                .as_str()
                .map(str::to_string)
        })
        .collect();
    assert_eq!(
        scheduled_ids,
        vec![
            stage_id(&execution, "stage1", 0),
            stage_id(&execution, "stage1", 1),
            stage_id(&execution, "stage1", 2),
            stage_id(&execution, "stage2", 0),
        ]
    );

    app.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_fail_the_run() -> anyhow::Result<()> {
    init_test_tracing();

    let dispatch = Arc::new(MemoryDispatch::new());
    let control = StageControl::failing(u32::MAX);
    let app = TestApp::start(Arc::clone(&dispatch), pipeline(Arc::clone(&control), 2));

    let execution = app
        .service
        .start_execution(StartOptions::default().input(json!(5)))
        .await?;
    let status = dispatch
        .wait_for_close(&execution, DEFAULT_TEST_TIMEOUT)
        .await?;

    let ExecutionStatus::Failed { reason, details } = &status else {
        panic!("expected failure, got {status:?}");
    };
    assert_eq!(reason, "RetryBudgetExhausted");
    assert!(details.contains("stage1@0.0.1"), "details: {details}");
    assert_eq!(control.calls(), 3);

    let failures = dispatch
        .history(&execution)
        .into_iter()
        .filter(|record| record.event_type == "ActivityTaskFailed")
        .inspect(|record| {
            let attrs = record.event_attributes().expect("failure attributes");
            assert_eq!(attrs["reason"], "stage1 unavailable");
            assert_eq!(attrs["details"], "injected failure");
        })
        .count();
    assert_eq!(failures, 3);

    app.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_activity_fails_the_attempt() -> anyhow::Result<()> {
    init_test_tracing();

    let dispatch = Arc::new(MemoryDispatch::new());
    let app = TestApp::start(Arc::clone(&dispatch), pipeline(StageControl::new(), 3));

    let execution = app
        .service
        .start_execution(StartOptions::default().version("0.0.5"))
        .await?;
    let status = dispatch
        .wait_for_close(&execution, DEFAULT_TEST_TIMEOUT)
        .await?;

    assert!(
        matches!(&status, ExecutionStatus::Failed { reason, .. } if reason == "RetryBudgetExhausted"),
        "status: {status:?}"
    );
    let failed = dispatch
        .history(&execution)
        .into_iter()
        .find(|record| record.event_type == "ActivityTaskFailed")
        .expect("attempt should be reported failed");
    assert_eq!(
        failed.event_attributes().expect("failure attributes")["reason"],
        "activity panicked"
    );

    app.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn sleep_waits_for_the_timer() -> anyhow::Result<()> {
    init_test_tracing();

    let dispatch = Arc::new(MemoryDispatch::new());
    let app = TestApp::start(Arc::clone(&dispatch), pipeline(StageControl::new(), 3));

    let execution = app
        .service
        .start_execution(StartOptions::default().version("0.0.2").input(json!(4)))
        .await?;

    let timer_id = format!(
        "test-domain.{PIPELINE}.{}.{}",
        execution.workflow_id, execution.run_id
    );
    dispatch
        .wait_for(&execution, DEFAULT_TEST_TIMEOUT, |history, _| {
            history
                .iter()
                .any(|record| record.event_type == "TimerStarted")
                .then_some(())
        })
        .await?;
    assert_eq!(dispatch.open_timers(&execution), vec![timer_id.clone()]);
    assert_eq!(dispatch.status(&execution), Some(ExecutionStatus::Open));

    dispatch.fire_timer(&execution, &timer_id)?;
    let status = dispatch
        .wait_for_close(&execution, DEFAULT_TEST_TIMEOUT)
        .await?;

    assert_eq!(completed_result(status), json!({ "v2": "result 8" }));

    app.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn paged_histories_replay_the_same() -> anyhow::Result<()> {
    init_test_tracing();

    let dispatch = Arc::new(MemoryDispatch::new().with_page_size(2));
    let app = TestApp::start(Arc::clone(&dispatch), pipeline(StageControl::failing(1), 3));

    let execution = app
        .service
        .start_execution(StartOptions::default().input(json!(21)))
        .await?;
    let status = dispatch
        .wait_for_close(&execution, DEFAULT_TEST_TIMEOUT)
        .await?;

    assert_eq!(completed_result(status), json!("result 42"));

    app.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_failures_back_off_and_recover() -> anyhow::Result<()> {
    init_test_tracing();

    let dispatch = Arc::new(MemoryDispatch::new());
    dispatch.fail_next_polls(5);
    let app = TestApp::start(Arc::clone(&dispatch), pipeline(StageControl::new(), 3));

    let execution = app
        .service
        .start_execution(StartOptions::default().input(json!(1)))
        .await?;
    let status = dispatch
        .wait_for_close(&execution, DEFAULT_TEST_TIMEOUT)
        .await?;

    assert_eq!(completed_result(status), json!("result 2"));
    assert_eq!(dispatch.pending_poll_errors(), 0);

    app.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn several_runs_progress_together() -> anyhow::Result<()> {
    init_test_tracing();

    let dispatch = Arc::new(MemoryDispatch::new());
    let config = RuntimeConfig {
        deciders: 2,
        activity_workers: 3,
        ..test_runtime_config()
    };
    let app = TestApp::start_with(
        Arc::clone(&dispatch),
        pipeline(StageControl::new(), 3),
        config,
    );

    let mut executions = Vec::new();
    for n in 0..5 {
        executions.push(
            app.service
                .start_execution(StartOptions::default().input(json!(n)))
                .await?,
        );
    }

    for (n, execution) in executions.iter().enumerate() {
        let status = dispatch
            .wait_for_close(execution, DEFAULT_TEST_TIMEOUT)
            .await?;
        assert_eq!(completed_result(status), json!(format!("result {}", n * 2)));
    }

    app.shutdown().await
}

#[tokio::test]
async fn decider_schedules_then_retries_timeout() -> anyhow::Result<()> {
    let dispatch = Arc::new(MemoryDispatch::new());
    let runtime = WorkflowRuntime::builder(Arc::clone(&dispatch), pipeline(StageControl::new(), 3))
        .config(test_runtime_config())
        .build_runtime();
    let decider = runtime.decider();

    let execution = runtime
        .service()
        .start_execution(StartOptions::default().input(json!(3)))
        .await?;

    let outcome = decider.poll_once().await?.expect("a decision task");
    let PassOutcome::Suspended(Some(Decision::ScheduleActivityTask(first))) = &outcome else {
        panic!("expected the first attempt to be scheduled, got {outcome:?}");
    };
    assert_eq!(first.activity_id.to_string(), stage_id(&execution, "stage1", 0));

    dispatch.time_out_activity(&execution, &stage_id(&execution, "stage1", 0))?;

    let outcome = decider.poll_once().await?.expect("a decision task");
    let PassOutcome::Retrying {
        cause: RetryCause::TimedOut,
        decision: Decision::ScheduleActivityTask(retry),
    } = &outcome
    else {
        panic!("expected a retry, got {outcome:?}");
    };
    assert_eq!(retry.activity_id.to_string(), stage_id(&execution, "stage1", 1));
    assert_eq!(retry.input, first.input);
    assert_eq!(dispatch.queued_activity_tasks(), 1);

    Ok(())
}

#[tokio::test]
async fn no_new_events_means_no_decisions() -> anyhow::Result<()> {
    let dispatch = Arc::new(MemoryDispatch::new());
    let runtime = WorkflowRuntime::builder(Arc::clone(&dispatch), pipeline(StageControl::new(), 3))
        .config(test_runtime_config())
        .build_runtime();
    let decider = runtime.decider();

    let execution = runtime
        .service()
        .start_execution(StartOptions::default().version("0.0.2").input(json!(3)))
        .await?;

    // schedule stage1, complete it, start the timer
    decider.poll_once().await?;
    runtime
        .activity_worker(TASKLIST)
        .poll_once()
        .await?
        .expect("an activity task");
    let outcome = decider.poll_once().await?.expect("a decision task");
    assert!(matches!(outcome, PassOutcome::Suspended(Some(Decision::StartTimer { .. }))));

    // redelivered with nothing new recorded
    let before = dispatch.event_types(&execution);
    dispatch.schedule_decision_task(&execution)?;
    let outcome = decider.poll_once().await?.expect("a decision task");

    assert_eq!(outcome, PassOutcome::Suspended(None));
    assert_eq!(dispatch.decision_responses(&execution).last(), Some(&Vec::new()));
    assert_eq!(dispatch.event_types(&execution), before);

    Ok(())
}

#[tokio::test]
async fn unknown_activity_type_is_reported_not_found() -> anyhow::Result<()> {
    let dispatch = Arc::new(MemoryDispatch::new());
    let runtime = WorkflowRuntime::builder(Arc::clone(&dispatch), pipeline(StageControl::new(), 3))
        .config(test_runtime_config())
        .build_runtime();

    let execution = runtime
        .service()
        .start_execution(StartOptions::default())
        .await?;
    dispatch.schedule_activity(
        &execution,
        &ScheduleActivity {
            activity_id: ActivityId::with_attempt("other.resize@2.0", 0),
            activity_type: TypeRef::new("resize", "2.0"),
            tasklist: TASKLIST.into(),
            input: None,
            timeouts: ActivityTimeouts::default(),
            priority: 0,
        },
    )?;

    let outcome = runtime
        .activity_worker(TASKLIST)
        .poll_once()
        .await?
        .expect("an activity task");

    let ActivityOutcome::Failed { reason, details } = &outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(reason, NOT_FOUND_REASON);
    assert!(details.contains("resize@2.0"), "details: {details}");
    assert_eq!(
        dispatch.event_types(&execution).last().map(String::as_str),
        Some("ActivityTaskFailed")
    );

    Ok(())
}

#[tokio::test]
async fn empty_poll_returns_none() -> anyhow::Result<()> {
    let dispatch = Arc::new(MemoryDispatch::new().with_poll_timeout(Duration::from_millis(5)));
    let runtime = WorkflowRuntime::builder(dispatch, pipeline(StageControl::new(), 3))
        .config(test_runtime_config())
        .build_runtime();

    assert!(runtime.decider().poll_once().await?.is_none());
    assert!(runtime.activity_worker(TASKLIST).poll_once().await?.is_none());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_completes_promptly() -> anyhow::Result<()> {
    let dispatch = Arc::new(MemoryDispatch::new());
    let app = TestApp::start(dispatch, pipeline(StageControl::new(), 3));

    tokio::time::timeout(Duration::from_secs(2), app.shutdown())
        .await
        .expect("shutdown should complete within timeout")?;

    Ok(())
}

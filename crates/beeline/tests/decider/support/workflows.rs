//! Workflows exercised by the integration tests.
//!
//! `Pipeline` entrypoints:
//! - `0.0.1`: `stage1(input)` then `stage2(doubled)`
//! - `0.0.2`: `stage1`, a 5 second sleep, then `stage2`
//! - `0.0.3`: calls an activity that is not registered
//! - `0.0.4`: panics
//! - `0.0.5`: calls `explode`, whose handler panics
//! - `0.0.6`: calls `stage1` twice, feeding the first result to the second
//! - `0.0.7`: sleeps with a control payload and returns the recovered payload
//! - `0.0.8`: reads `stage1`'s numeric result as a string
//! - `0.0.9`: sleeps for one and a half seconds

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beeline::{
    ActivityContext, ActivityDefinition, ActivityError, ActivityHandler, ActivityId, Arguments,
    TaskMeta, TypeRef, WorkflowDefinition, WorkflowExecution,
};
use serde_json::{Value, json};

pub const DOMAIN: &str = "test-domain";
pub const TASKLIST: &str = "test-tasks";
pub const PIPELINE: &str = "Pipeline";
pub const STAGE_VERSION: &str = "0.0.1";

/// Controls and observes the `stage1` activity.
#[derive(Default)]
pub struct StageControl {
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl StageControl {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// `stage1` fails its first `times` calls.
    pub fn failing(times: u32) -> Arc<Self> {
        let control = Self::default();
        control.failures_left.store(times, Ordering::SeqCst);
        Arc::new(control)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

struct Explode;

#[async_trait]
impl ActivityHandler for Explode {
    async fn handle(&self, _args: Arguments, _ctx: &ActivityContext) -> Result<Value, ActivityError> {
        panic!("kaboom");
    }
}

fn number(args: &Arguments) -> Result<i64, ActivityError> {
    args.get(0)
        .and_then(Value::as_i64)
        .ok_or_else(|| ActivityError::new("expected a number"))
}

/// The `Pipeline` workflow, with `stage1` retried up to `max_retries` times.
pub fn pipeline(control: Arc<StageControl>, max_retries: u32) -> WorkflowDefinition {
    WorkflowDefinition::builder(PIPELINE, DOMAIN, TASKLIST)
        .activity(
            ActivityDefinition::from_fn("stage1", STAGE_VERSION, move |args: Arguments, _ctx| {
                let control = Arc::clone(&control);
                async move {
                    control.calls.fetch_add(1, Ordering::SeqCst);
                    if control.should_fail() {
                        return Err(ActivityError::new("stage1 unavailable")
                            .with_details("injected failure"));
                    }
                    Ok(json!(number(&args)? * 2))
                }
            })
            .max_retries(max_retries),
        )
        .activity(ActivityDefinition::from_fn(
            "stage2",
            STAGE_VERSION,
            |args: Arguments, _ctx| async move {
                Ok::<_, ActivityError>(json!(format!("result {}", number(&args)?)))
            },
        ))
        .activity(ActivityDefinition::new("explode", STAGE_VERSION, Explode).max_retries(0))
        .entrypoint("0.0.1", |ctx, input| {
            let doubled = ctx.call_activity("stage1", STAGE_VERSION, Arguments::new().arg(input))?;
            ctx.call_activity("stage2", STAGE_VERSION, Arguments::new().arg(doubled))
        })
        .entrypoint("0.0.2", |ctx, input| {
            let doubled = ctx.call_activity("stage1", STAGE_VERSION, Arguments::new().arg(input))?;
            ctx.sleep(Duration::from_secs(5))?;
            let result = ctx.call_activity("stage2", STAGE_VERSION, Arguments::new().arg(doubled))?;
            Ok(json!({ "v2": result }))
        })
        .entrypoint("0.0.3", |ctx, _input| {
            ctx.call_activity("missing", "1.0", Arguments::new())
        })
        .entrypoint("0.0.4", |_ctx, _input| panic!("entrypoint blew up"))
        .entrypoint("0.0.5", |ctx, _input| {
            ctx.call_activity("explode", STAGE_VERSION, Arguments::new())
        })
        .entrypoint("0.0.6", |ctx, input| {
            let doubled = ctx.call_activity("stage1", STAGE_VERSION, Arguments::new().arg(input))?;
            ctx.call_activity("stage1", STAGE_VERSION, Arguments::new().arg(doubled))
        })
        .entrypoint("0.0.7", |ctx, _input| {
            let control = ctx.sleep_with_control(Duration::from_secs(5), &json!({ "next": "stage2" }))?;
            Ok(json!({ "control": control }))
        })
        .entrypoint("0.0.8", |ctx, input| {
            let label: String =
                ctx.call_activity_as("stage1", STAGE_VERSION, Arguments::new().arg(input))?;
            Ok(json!(label))
        })
        .entrypoint("0.0.9", |ctx, _input| {
            ctx.sleep(Duration::from_millis(1500))?;
            Ok(Value::Null)
        })
        .build()
        .expect("pipeline definition is valid")
}

/// Task metadata for a decision task of `execution`.
pub fn meta(execution: &WorkflowExecution) -> TaskMeta {
    TaskMeta {
        task_token: "token".into(),
        run_id: execution.run_id.clone(),
        workflow_id: execution.workflow_id.clone(),
        domain: DOMAIN.into(),
        tasklist: TASKLIST.into(),
    }
}

/// Wire id of attempt `attempt` of a pipeline stage called by `execution`.
pub fn stage_id(execution: &WorkflowExecution, stage: &str, attempt: u32) -> String {
    stage_call_id(execution, stage, 0, attempt)
}

/// Wire id of attempt `attempt` of the `call`-th call to a pipeline stage.
pub fn stage_call_id(execution: &WorkflowExecution, stage: &str, call: u32, attempt: u32) -> String {
    let identifier = meta(execution).workflow_identifier(PIPELINE);
    let first = ActivityId::for_call(&identifier, &TypeRef::new(stage, STAGE_VERSION), call);
    ActivityId::with_attempt(first.prefix(), attempt).to_string()
}

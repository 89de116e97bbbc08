//! Activity worker for executing scheduled activity tasks.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::RuntimeConfig;
use crate::activity::ActivityContext;
use crate::codec::PayloadCodec;
use crate::decision::{MAX_DETAILS_LEN, MAX_REASON_LEN, clip};
use crate::dispatch::{ActivityTask, PollRequest, TaskDispatch};
use crate::workflow::{Arguments, WorkflowDefinition};

/// Reason reported for activity types this worker has no handler for.
pub const NOT_FOUND_REASON: &str = "not found";

/// What the worker reported for one activity task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// Reported `ActivityTaskCompleted` with this encoded result.
    Completed(String),
    /// Reported `ActivityTaskFailed`.
    Failed { reason: String, details: String },
}

/// Activity worker that polls one tasklist.
///
/// # Lifecycle
///
/// 1. Long-poll for an activity task
/// 2. Look up the handler by exact `name@version`
/// 3. Decode `{args, kwargs}` and run the handler on its own task
/// 4. Report completion with the encoded result, or failure with the error
///    message as reason
/// 5. Repeat until shutdown signal
///
/// Nothing is retried locally: the decider reschedules failed attempts.
pub struct ActivityWorker<D>
where
    D: TaskDispatch,
{
    dispatch: Arc<D>,
    definition: Arc<WorkflowDefinition>,
    codec: Arc<dyn PayloadCodec>,
    config: RuntimeConfig,
    tasklist: String,
    identity: String,
}

impl<D> ActivityWorker<D>
where
    D: TaskDispatch,
{
    pub fn new(
        dispatch: Arc<D>,
        definition: Arc<WorkflowDefinition>,
        codec: Arc<dyn PayloadCodec>,
        config: RuntimeConfig,
        tasklist: String,
        identity: String,
    ) -> Self {
        Self {
            dispatch,
            definition,
            codec,
            config,
            tasklist,
            identity,
        }
    }

    fn poll_request(&self) -> PollRequest {
        PollRequest {
            domain: self.definition.domain().to_string(),
            tasklist: self.tasklist.clone(),
            identity: self.identity.clone(),
        }
    }

    /// Run the worker until shutdown signal.
    ///
    /// A running activity is finished and reported before the worker exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            identity = %self.identity,
            tasklist = %self.tasklist,
            "Activity worker started"
        );

        let request = self.poll_request();
        let mut failures = 0u32;

        while !*shutdown.borrow() {
            let polled = tokio::select! {
                polled = self.dispatch.poll_activity_task(&request) => polled,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match polled {
                Ok(Some(task)) => {
                    failures = 0;
                    self.handle(task).await;
                }
                Ok(None) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.poll_backoff.delay(failures);
                    warn!(
                        error = %e,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "Activity task poll failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(identity = %self.identity, tasklist = %self.tasklist, "Activity worker shutting down");
    }

    /// Poll once and execute the task, if any.
    pub async fn poll_once(&self) -> crate::Result<Option<ActivityOutcome>> {
        let Some(task) = self.dispatch.poll_activity_task(&self.poll_request()).await? else {
            return Ok(None);
        };
        Ok(Some(self.handle(task).await))
    }

    async fn handle(&self, task: ActivityTask) -> ActivityOutcome {
        let outcome = self.execute(&task).await;

        let reported = match &outcome {
            ActivityOutcome::Completed(result) => {
                debug!(activity_id = %task.activity_id, "Activity completed");
                self.dispatch
                    .respond_activity_task_completed(&task.task_token, Some(result.clone()))
                    .await
            }
            ActivityOutcome::Failed { reason, details } => {
                warn!(
                    activity_id = %task.activity_id,
                    reason = %reason,
                    "Activity failed"
                );
                self.dispatch
                    .respond_activity_task_failed(&task.task_token, reason, details)
                    .await
            }
        };

        if let Err(e) = reported {
            error!(
                activity_id = %task.activity_id,
                error = %e,
                "Unable to report activity result"
            );
        }

        outcome
    }

    async fn execute(&self, task: &ActivityTask) -> ActivityOutcome {
        let activity_type = &task.activity_type;
        let Some(definition) = self
            .definition
            .activity(&activity_type.name, &activity_type.version)
        else {
            error!(
                activity_id = %task.activity_id,
                activity = %activity_type,
                "No handler registered for activity"
            );
            return failed(
                NOT_FOUND_REASON,
                format!(
                    "no activity {activity_type} registered with workflow {}",
                    self.definition.name()
                ),
            );
        };

        let args = match self.decode_arguments(task.input.as_deref()) {
            Ok(args) => args,
            Err(message) => return failed(message, ""),
        };

        let ctx = ActivityContext::new(
            task.task_token.clone(),
            task.activity_id.clone(),
            activity_type.clone(),
            task.workflow_execution.clone(),
        );

        debug!(
            activity_id = %task.activity_id,
            attempt = ctx.attempt,
            "Executing activity"
        );

        // a panicking handler only takes down its own task
        let handler = definition.handler();
        let joined = tokio::spawn(async move { handler.handle(args, &ctx).await }).await;

        match joined {
            Ok(Ok(value)) => match self.codec.serialize(&value) {
                Ok(encoded) => ActivityOutcome::Completed(encoded),
                Err(e) => failed(format!("unable to encode activity result: {e}"), ""),
            },
            Ok(Err(e)) => failed(e.message(), e.details().unwrap_or_default()),
            Err(e) if e.is_panic() => failed("activity panicked", e.to_string()),
            Err(e) => failed(format!("activity task aborted: {e}"), ""),
        }
    }

    fn decode_arguments(&self, input: Option<&str>) -> Result<Arguments, String> {
        let Some(input) = input else {
            return Ok(Arguments::default());
        };
        let value = self
            .codec
            .deserialize(input)
            .map_err(|e| format!("unable to decode activity input: {e}"))?;
        Arguments::from_value(value).map_err(|e| format!("invalid activity input: {e}"))
    }
}

fn failed(reason: impl Into<String>, details: impl Into<String>) -> ActivityOutcome {
    ActivityOutcome::Failed {
        reason: clip(reason.into(), MAX_REASON_LEN),
        details: clip(details.into(), MAX_DETAILS_LEN),
    }
}

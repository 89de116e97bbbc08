//! Decider worker: poll decision tasks, replay, respond.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::RuntimeConfig;
use crate::codec::PayloadCodec;
use crate::decider::{PassOutcome, replay};
use crate::dispatch::{DispatchError, PollRequest, TaskDispatch};
use crate::history::{HistoryRecord, filter_decision_records};
use crate::task::{TaskMeta, TypeRef, WorkflowExecution};
use crate::workflow::WorkflowDefinition;

/// A decision task with every page fetched and bookkeeping removed.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTask {
    pub task_token: String,
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: TypeRef,
    /// Filtered history, oldest first.
    pub events: Vec<HistoryRecord>,
}

/// Poll for a decision task and fetch all of its pages.
///
/// Returns `Ok(None)` when the poll returned no task (absent or empty task
/// token). `Decision*` records are dropped from every page.
pub async fn fetch_decision_task<D>(
    dispatch: &D,
    request: &PollRequest,
) -> Result<Option<DecisionTask>, DispatchError>
where
    D: TaskDispatch + ?Sized,
{
    let Some(first) = dispatch.poll_decision_task(request, None).await? else {
        return Ok(None);
    };
    if first.task_token.is_empty() {
        return Ok(None);
    }

    let mut events = filter_decision_records(first.events);
    let mut next_page_token = first.next_page_token;
    let mut pages = 1;

    while let Some(token) = next_page_token.take() {
        let page = dispatch
            .poll_decision_task(request, Some(&token))
            .await?
            .ok_or_else(|| {
                DispatchError::rejected("MissingPage", format!("no page for token '{token}'"))
            })?;
        events.extend(filter_decision_records(page.events));
        next_page_token = page.next_page_token;
        pages += 1;
    }

    debug!(
        workflow_id = %first.workflow_execution.workflow_id,
        pages,
        events = events.len(),
        "Fetched decision task"
    );

    Ok(Some(DecisionTask {
        task_token: first.task_token,
        workflow_execution: first.workflow_execution,
        workflow_type: first.workflow_type,
        events,
    }))
}

/// Decider worker that long-polls the workflow's tasklist.
///
/// # Lifecycle
///
/// 1. Long-poll for a decision task (all pages)
/// 2. Derive [`TaskMeta`] for the run
/// 3. Replay the workflow over the history
/// 4. Respond with the resulting decisions
/// 5. Repeat until shutdown signal
///
/// Poll failures back off and retry; failed responses are logged and the
/// loop moves on. A single workflow never stops the loop.
pub struct DeciderWorker<D>
where
    D: TaskDispatch,
{
    dispatch: Arc<D>,
    definition: Arc<WorkflowDefinition>,
    codec: Arc<dyn PayloadCodec>,
    config: RuntimeConfig,
    identity: String,
}

impl<D> DeciderWorker<D>
where
    D: TaskDispatch,
{
    pub fn new(
        dispatch: Arc<D>,
        definition: Arc<WorkflowDefinition>,
        codec: Arc<dyn PayloadCodec>,
        config: RuntimeConfig,
        identity: String,
    ) -> Self {
        Self {
            dispatch,
            definition,
            codec,
            config,
            identity,
        }
    }

    fn poll_request(&self) -> PollRequest {
        PollRequest {
            domain: self.definition.domain().to_string(),
            tasklist: self.definition.tasklist().to_string(),
            identity: self.identity.clone(),
        }
    }

    /// Run the decider until shutdown signal.
    ///
    /// A pending long poll is abandoned on shutdown; a task already fetched
    /// is replayed and answered before the worker exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            identity = %self.identity,
            workflow = self.definition.name(),
            tasklist = self.definition.tasklist(),
            "Decider started"
        );

        let request = self.poll_request();
        let mut failures = 0u32;

        while !*shutdown.borrow() {
            let polled = tokio::select! {
                polled = fetch_decision_task(self.dispatch.as_ref(), &request) => polled,
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
                        "Decision task poll failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(identity = %self.identity, "Decider shutting down");
    }

    /// Poll once and handle the task, if any.
    ///
    /// Returns the replay outcome of the handled task. Only poll failures
    /// are returned as errors.
    pub async fn poll_once(&self) -> crate::Result<Option<PassOutcome>> {
        let Some(task) = fetch_decision_task(self.dispatch.as_ref(), &self.poll_request()).await?
        else {
            return Ok(None);
        };
        Ok(Some(self.handle(task).await))
    }

    async fn handle(&self, task: DecisionTask) -> PassOutcome {
        let meta = TaskMeta {
            task_token: task.task_token,
            run_id: task.workflow_execution.run_id,
            workflow_id: task.workflow_execution.workflow_id,
            domain: self.definition.domain().to_string(),
            tasklist: self.definition.tasklist().to_string(),
        };

        let outcome = replay(&self.definition, &meta, &task.events, self.codec.as_ref());

        match &outcome {
            PassOutcome::Suspended(decision) => debug!(
                workflow_id = %meta.workflow_id,
                run_id = %meta.run_id,
                decision = decision.as_ref().map(|d| d.kind()).unwrap_or("none"),
                "Workflow suspended"
            ),
            PassOutcome::Retrying { cause, .. } => debug!(
                workflow_id = %meta.workflow_id,
                run_id = %meta.run_id,
                cause = %cause,
                "Activity rescheduled"
            ),
            PassOutcome::Completed(_) => info!(
                workflow_id = %meta.workflow_id,
                run_id = %meta.run_id,
                "Workflow completed"
            ),
            // logged by replay
            PassOutcome::Failed { .. } => {}
        }

        let decisions = outcome.clone().into_decisions(self.codec.as_ref());
        if let Err(e) = self
            .dispatch
            .respond_decision_task_completed(&meta.task_token, &decisions)
            .await
        {
            error!(
                workflow_id = %meta.workflow_id,
                run_id = %meta.run_id,
                error = %e,
                decisions = decisions.len(),
                "Unable to respond to decision task"
            );
        }

        outcome
    }
}

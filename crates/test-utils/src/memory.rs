//! In-memory task-dispatch service.
//!
//! Behaves like the managed history service closely enough for the engine:
//! - Assigns event ids and timestamps, including `Decision*` bookkeeping.
//! - Schedules a decision task whenever a run's history grows, at most one
//!   queued or in flight per run.
//! - Queues activity tasks per tasklist.
//! - Splits histories into pages when a page size is set.
//! - Can fail the next N polls to exercise worker backoff.
//!
//! Timers never fire and activities never time out on their own; tests
//! drive both with [`MemoryDispatch::fire_timer`] and
//! [`MemoryDispatch::time_out_activity`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use beeline::Decision;
use beeline::dispatch::{
    ActivityTask, DecisionTaskPage, DispatchError, PollRequest, StartExecutionRequest,
    TaskDispatch, TerminateExecutionRequest,
};
use beeline::history::HistoryRecord;
use beeline::{ScheduleActivity, TypeRef, WorkflowExecution};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::Notify;
use uuid::Uuid;

/// How long an empty poll waits for work before returning `None`.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Where a run stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Open,
    Completed { result: Option<String> },
    Failed { reason: String, details: String },
    Canceled { details: String },
    Terminated { reason: String, details: String },
}

impl ExecutionStatus {
    pub fn is_closed(&self) -> bool {
        !matches!(self, ExecutionStatus::Open)
    }
}

struct Run {
    domain: String,
    execution: WorkflowExecution,
    workflow_type: TypeRef,
    tasklist: String,
    history: Vec<HistoryRecord>,
    status: ExecutionStatus,
    decision_queued: bool,
    decision_in_flight: Option<String>,
    needs_decision: bool,
    responses: Vec<Vec<Decision>>,
    open_timers: HashMap<String, u64>,
}

impl Run {
    fn append(&mut self, event_type: &str, attributes: Value) -> u64 {
        let event_id = self.history.len() as u64 + 1;
        self.history.push(
            HistoryRecord::new(event_id, event_type, attributes).at(OffsetDateTime::now_utc()),
        );
        event_id
    }
}

struct QueuedActivity {
    run_id: String,
    tasklist: String,
    scheduled_event_id: u64,
    task: ActivityTask,
}

enum TokenTarget {
    Decision { run_id: String },
    Activity { run_id: String, scheduled_event_id: u64 },
}

#[derive(Default)]
struct State {
    runs: HashMap<String, Run>,
    decision_queue: VecDeque<String>,
    activity_queue: VecDeque<QueuedActivity>,
    tokens: HashMap<String, TokenTarget>,
    pages: HashMap<String, DecisionTaskPage>,
    start_requests: Vec<StartExecutionRequest>,
    poll_errors: u32,
}

impl State {
    fn run(&self, execution: &WorkflowExecution) -> Result<&Run, DispatchError> {
        self.runs
            .get(&execution.run_id)
            .filter(|run| run.execution.workflow_id == execution.workflow_id)
            .ok_or_else(|| unknown_resource(format!("unknown execution {execution}")))
    }

    fn run_mut(&mut self, run_id: &str) -> Result<&mut Run, DispatchError> {
        self.runs
            .get_mut(run_id)
            .ok_or_else(|| unknown_resource(format!("unknown run {run_id}")))
    }

    fn open_run_mut(&mut self, run_id: &str) -> Result<&mut Run, DispatchError> {
        let run = self.run_mut(run_id)?;
        if run.status.is_closed() {
            return Err(unknown_resource(format!(
                "execution {} is closed",
                run.execution
            )));
        }
        Ok(run)
    }

    fn schedule_decision(&mut self, run_id: &str) {
        let Some(run) = self.runs.get_mut(run_id) else {
            return;
        };
        if run.status.is_closed() || run.decision_queued {
            return;
        }
        if run.decision_in_flight.is_some() {
            run.needs_decision = true;
            return;
        }
        run.append(
            "DecisionTaskScheduled",
            json!({ "taskList": { "name": run.tasklist } }),
        );
        run.decision_queued = true;
        self.decision_queue.push_back(run_id.to_string());
    }

    fn schedule_activity(
        &mut self,
        run_id: &str,
        schedule: &ScheduleActivity,
    ) -> Result<u64, DispatchError> {
        let run = self.open_run_mut(run_id)?;
        let mut attributes = json!({
            "activityId": schedule.activity_id.to_string(),
            "activityType": {
                "name": schedule.activity_type.name,
                "version": schedule.activity_type.version,
            },
            "taskList": { "name": schedule.tasklist },
            "taskPriority": schedule.priority.to_string(),
            "scheduleToCloseTimeout": schedule.timeouts.schedule_to_close.to_string(),
            "scheduleToStartTimeout": schedule.timeouts.schedule_to_start.to_string(),
            "startToCloseTimeout": schedule.timeouts.start_to_close.to_string(),
            "heartbeatTimeout": schedule.timeouts.heartbeat.to_string(),
        });
        if let Some(input) = &schedule.input {
            attributes["input"] = json!(input);
        }
        let scheduled_event_id = run.append("ActivityTaskScheduled", attributes);
        let task = ActivityTask {
            task_token: Uuid::new_v4().to_string(),
            activity_id: schedule.activity_id.to_string(),
            activity_type: schedule.activity_type.clone(),
            workflow_execution: run.execution.clone(),
            input: schedule.input.clone(),
        };

        self.activity_queue.push_back(QueuedActivity {
            run_id: run_id.to_string(),
            tasklist: schedule.tasklist.clone(),
            scheduled_event_id,
            task,
        });
        Ok(scheduled_event_id)
    }

    fn apply_decision(&mut self, run_id: &str, decision: &Decision) -> Result<(), DispatchError> {
        match decision {
            Decision::ScheduleActivityTask(schedule) => {
                self.schedule_activity(run_id, schedule)?;
            }
            Decision::StartTimer {
                timer_id,
                start_to_fire_timeout,
                control,
            } => {
                let run = self.open_run_mut(run_id)?;
                if run.open_timers.contains_key(timer_id) {
                    run.append(
                        "StartTimerFailed",
                        json!({ "timerId": timer_id, "cause": "TIMER_ID_ALREADY_IN_USE" }),
                    );
                    return Ok(());
                }
                let mut attributes = json!({
                    "timerId": timer_id,
                    "startToFireTimeout": start_to_fire_timeout.to_string(),
                });
                if let Some(control) = control {
                    attributes["control"] = json!(control);
                }
                let started_event_id = run.append("TimerStarted", attributes);
                run.open_timers.insert(timer_id.clone(), started_event_id);
            }
            Decision::CompleteWorkflowExecution { result } => {
                let run = self.open_run_mut(run_id)?;
                run.append("WorkflowExecutionCompleted", json!({ "result": result }));
                run.status = ExecutionStatus::Completed {
                    result: result.clone(),
                };
            }
            Decision::FailWorkflowExecution { reason, details } => {
                let run = self.open_run_mut(run_id)?;
                run.append(
                    "WorkflowExecutionFailed",
                    json!({ "reason": reason, "details": details }),
                );
                run.status = ExecutionStatus::Failed {
                    reason: reason.clone(),
                    details: details.clone(),
                };
            }
            Decision::CancelWorkflowExecution { details } => {
                let run = self.open_run_mut(run_id)?;
                run.append("WorkflowExecutionCanceled", json!({ "details": details }));
                run.status = ExecutionStatus::Canceled {
                    details: details.clone(),
                };
            }
        }
        Ok(())
    }

    fn take_decision_task(
        &mut self,
        request: &PollRequest,
        page_size: Option<usize>,
    ) -> Option<DecisionTaskPage> {
        let position = self.decision_queue.iter().position(|run_id| {
            self.runs
                .get(run_id)
                .is_some_and(|run| run.domain == request.domain && run.tasklist == request.tasklist)
        })?;
        let run_id = self.decision_queue.remove(position)?;
        let task_token = Uuid::new_v4().to_string();

        let run = self.runs.get_mut(&run_id)?;
        run.decision_queued = false;
        run.decision_in_flight = Some(task_token.clone());
        run.append(
            "DecisionTaskStarted",
            json!({ "identity": request.identity }),
        );

        let chunks: Vec<Vec<HistoryRecord>> = match page_size {
            Some(size) if size > 0 => run.history.chunks(size).map(<[_]>::to_vec).collect(),
            _ => vec![run.history.clone()],
        };
        let execution = run.execution.clone();
        let workflow_type = run.workflow_type.clone();

        self.tokens
            .insert(task_token.clone(), TokenTarget::Decision { run_id });

        let page_tokens: Vec<String> = (1..chunks.len())
            .map(|_| Uuid::new_v4().to_string())
            .collect();
        let mut pages = chunks.into_iter().enumerate().map(|(i, events)| DecisionTaskPage {
            task_token: task_token.clone(),
            workflow_execution: execution.clone(),
            workflow_type: workflow_type.clone(),
            events,
            next_page_token: page_tokens.get(i).cloned(),
        });

        let first = pages.next()?;
        for (token, page) in page_tokens.iter().zip(pages) {
            self.pages.insert(token.clone(), page);
        }
        Some(first)
    }

    fn take_activity_task(&mut self, request: &PollRequest) -> Option<ActivityTask> {
        let position = self.activity_queue.iter().position(|queued| {
            queued.tasklist == request.tasklist
                && self
                    .runs
                    .get(&queued.run_id)
                    .is_some_and(|run| run.domain == request.domain && !run.status.is_closed())
        })?;
        let queued = self.activity_queue.remove(position)?;

        let run = self.runs.get_mut(&queued.run_id)?;
        run.append(
            "ActivityTaskStarted",
            json!({
                "scheduledEventId": queued.scheduled_event_id,
                "identity": request.identity,
            }),
        );
        self.tokens.insert(
            queued.task.task_token.clone(),
            TokenTarget::Activity {
                run_id: queued.run_id,
                scheduled_event_id: queued.scheduled_event_id,
            },
        );
        Some(queued.task)
    }

    fn activity_target(&mut self, task_token: &str) -> Result<(String, u64), DispatchError> {
        match self.tokens.remove(task_token) {
            Some(TokenTarget::Activity {
                run_id,
                scheduled_event_id,
            }) => Ok((run_id, scheduled_event_id)),
            Some(target) => {
                self.tokens.insert(task_token.to_string(), target);
                Err(unknown_resource(format!("'{task_token}' is not an activity task token")))
            }
            None => Err(unknown_resource(format!("unknown task token '{task_token}'"))),
        }
    }
}

fn unknown_resource(message: String) -> DispatchError {
    DispatchError::rejected("UnknownResourceFault", message)
}

/// In-memory [`TaskDispatch`] implementation.
pub struct MemoryDispatch {
    state: Mutex<State>,
    notify: Notify,
    page_size: Option<usize>,
    poll_timeout: Duration,
}

impl Default for MemoryDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDispatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            page_size: None,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Split decision-task histories into pages of at most `page_size`
    /// records.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// How long an empty poll waits before returning `None`.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory dispatch state poisoned")
    }

    fn changed(&self) {
        self.notify.notify_waiters();
    }

    /// Fail the next `count` polls (decision or activity) with a transport
    /// error.
    pub fn fail_next_polls(&self, count: u32) {
        self.state().poll_errors += count;
    }

    /// Polls still set to fail.
    pub fn pending_poll_errors(&self) -> u32 {
        self.state().poll_errors
    }

    /// Full history of a run, bookkeeping included.
    pub fn history(&self, execution: &WorkflowExecution) -> Vec<HistoryRecord> {
        self.state()
            .run(execution)
            .map(|run| run.history.clone())
            .unwrap_or_default()
    }

    /// Event types of a run's history, bookkeeping excluded.
    pub fn event_types(&self, execution: &WorkflowExecution) -> Vec<String> {
        self.history(execution)
            .into_iter()
            .filter(|record| !record.is_decision_bookkeeping())
            .map(|record| record.event_type)
            .collect()
    }

    /// Status of a run, `None` if unknown.
    pub fn status(&self, execution: &WorkflowExecution) -> Option<ExecutionStatus> {
        self.state().run(execution).ok().map(|run| run.status.clone())
    }

    /// Every decision list a decider responded with for this run, in order.
    pub fn decision_responses(&self, execution: &WorkflowExecution) -> Vec<Vec<Decision>> {
        self.state()
            .run(execution)
            .map(|run| run.responses.clone())
            .unwrap_or_default()
    }

    /// Every start request received, in order.
    pub fn start_requests(&self) -> Vec<StartExecutionRequest> {
        self.state().start_requests.clone()
    }

    /// Number of activity tasks waiting for a worker.
    pub fn queued_activity_tasks(&self) -> usize {
        self.state().activity_queue.len()
    }

    /// Ids of a run's timers that were started and have not fired.
    pub fn open_timers(&self, execution: &WorkflowExecution) -> Vec<String> {
        let mut timers: Vec<String> = self
            .state()
            .run(execution)
            .map(|run| run.open_timers.keys().cloned().collect())
            .unwrap_or_default();
        timers.sort();
        timers
    }

    /// Fire an open timer and schedule a decision task.
    pub fn fire_timer(&self, execution: &WorkflowExecution, timer_id: &str) -> Result<()> {
        {
            let mut state = self.state();
            let run_id = state.run(execution)?.execution.run_id.clone();
            let run = state.open_run_mut(&run_id)?;
            let started_event_id = run
                .open_timers
                .remove(timer_id)
                .ok_or_else(|| anyhow!("timer '{timer_id}' is not open on {execution}"))?;
            run.append(
                "TimerFired",
                json!({ "timerId": timer_id, "startedEventId": started_event_id }),
            );
            state.schedule_decision(&run_id);
        }
        self.changed();
        Ok(())
    }

    /// Time out the attempt with this wire activity id and schedule a
    /// decision task. A still-queued attempt is withdrawn from the queue.
    pub fn time_out_activity(&self, execution: &WorkflowExecution, activity_id: &str) -> Result<()> {
        {
            let mut state = self.state();
            let run_id = state.run(execution)?.execution.run_id.clone();
            let scheduled_event_id = state
                .run(execution)?
                .history
                .iter()
                .rev()
                .find(|record| {
                    record.event_type == "ActivityTaskScheduled"
                        && record
                            .event_attributes()
                            .and_then(|a| a.get("activityId"))
                            .and_then(Value::as_str)
                            == Some(activity_id)
                })
                .map(|record| record.event_id)
                .ok_or_else(|| anyhow!("activity '{activity_id}' was never scheduled"))?;

            state
                .activity_queue
                .retain(|queued| queued.task.activity_id != activity_id);
            state.tokens.retain(|_, target| match target {
                TokenTarget::Activity {
                    run_id: target_run,
                    scheduled_event_id: target_event,
                } => *target_run != run_id || *target_event != scheduled_event_id,
                TokenTarget::Decision { .. } => true,
            });

            let run = state.open_run_mut(&run_id)?;
            run.append(
                "ActivityTaskTimedOut",
                json!({
                    "scheduledEventId": scheduled_event_id,
                    "timeoutType": "SCHEDULE_TO_START",
                }),
            );
            state.schedule_decision(&run_id);
        }
        self.changed();
        Ok(())
    }

    /// Queue a decision task for the run without recording anything else,
    /// as the service does when a decision task times out.
    pub fn schedule_decision_task(&self, execution: &WorkflowExecution) -> Result<()> {
        {
            let mut state = self.state();
            let run_id = state.run(execution)?.execution.run_id.clone();
            state.open_run_mut(&run_id)?;
            state.schedule_decision(&run_id);
        }
        self.changed();
        Ok(())
    }

    /// Schedule an activity attempt on a run as if a decider had asked for
    /// it.
    pub fn schedule_activity(
        &self,
        execution: &WorkflowExecution,
        schedule: &ScheduleActivity,
    ) -> Result<u64> {
        let scheduled_event_id = {
            let mut state = self.state();
            let run_id = state.run(execution)?.execution.run_id.clone();
            state.schedule_activity(&run_id, schedule)?
        };
        self.changed();
        Ok(scheduled_event_id)
    }

    /// Wait until the run closes, or fail after `timeout`.
    pub async fn wait_for_close(
        &self,
        execution: &WorkflowExecution,
        timeout: Duration,
    ) -> Result<ExecutionStatus> {
        self.wait_for(execution, timeout, |_, status| {
            status.is_closed().then(|| status.clone())
        })
        .await
    }

    /// Wait until `check` returns `Some` for the run, or fail after
    /// `timeout`.
    pub async fn wait_for<T>(
        &self,
        execution: &WorkflowExecution,
        timeout: Duration,
        check: impl Fn(&[HistoryRecord], &ExecutionStatus) -> Option<T>,
    ) -> Result<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state();
                let run = state.run(execution)?;
                if let Some(found) = check(&run.history, &run.status) {
                    return Ok(found);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let status = self.status(execution);
                return Err(anyhow!(
                    "timeout waiting on {execution} (status {status:?}, events {:?})",
                    self.event_types(execution)
                ));
            }
        }
    }

    /// Run `take` until it yields a task or the poll timeout elapses.
    async fn long_poll<T>(
        &self,
        take: impl Fn(&mut State) -> Option<T>,
    ) -> Result<Option<T>, DispatchError> {
        {
            let mut state = self.state();
            if state.poll_errors > 0 {
                state.poll_errors -= 1;
                return Err(DispatchError::transport("injected poll failure"));
            }
        }

        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = take(&mut self.state()) {
                return Ok(Some(task));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl TaskDispatch for MemoryDispatch {
    async fn poll_decision_task(
        &self,
        request: &PollRequest,
        next_page_token: Option<&str>,
    ) -> Result<Option<DecisionTaskPage>, DispatchError> {
        if let Some(token) = next_page_token {
            return Ok(self.state().pages.remove(token));
        }
        let page_size = self.page_size;
        self.long_poll(|state| state.take_decision_task(request, page_size))
            .await
    }

    async fn poll_activity_task(
        &self,
        request: &PollRequest,
    ) -> Result<Option<ActivityTask>, DispatchError> {
        self.long_poll(|state| state.take_activity_task(request)).await
    }

    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: &[Decision],
    ) -> Result<(), DispatchError> {
        {
            let mut state = self.state();
            let run_id = match state.tokens.remove(task_token) {
                Some(TokenTarget::Decision { run_id }) => run_id,
                Some(target) => {
                    state.tokens.insert(task_token.to_string(), target);
                    return Err(unknown_resource(format!(
                        "'{task_token}' is not a decision task token"
                    )));
                }
                None => return Err(unknown_resource(format!("unknown task token '{task_token}'"))),
            };

            let run = state.open_run_mut(&run_id)?;
            if run.decision_in_flight.as_deref() != Some(task_token) {
                return Err(unknown_resource(format!("decision task '{task_token}' expired")));
            }
            run.append("DecisionTaskCompleted", json!({}));
            run.responses.push(decisions.to_vec());
            run.decision_in_flight = None;
            let needs_decision = std::mem::take(&mut run.needs_decision);

            for decision in decisions {
                state.apply_decision(&run_id, decision)?;
            }
            if needs_decision {
                state.schedule_decision(&run_id);
            }
        }
        self.changed();
        Ok(())
    }

    async fn respond_activity_task_completed(
        &self,
        task_token: &str,
        result: Option<String>,
    ) -> Result<(), DispatchError> {
        {
            let mut state = self.state();
            let (run_id, scheduled_event_id) = state.activity_target(task_token)?;
            let run = state.open_run_mut(&run_id)?;
            let mut attributes = json!({ "scheduledEventId": scheduled_event_id });
            if let Some(result) = result {
                attributes["result"] = json!(result);
            }
            run.append("ActivityTaskCompleted", attributes);
            state.schedule_decision(&run_id);
        }
        self.changed();
        Ok(())
    }

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        reason: &str,
        details: &str,
    ) -> Result<(), DispatchError> {
        {
            let mut state = self.state();
            let (run_id, scheduled_event_id) = state.activity_target(task_token)?;
            let run = state.open_run_mut(&run_id)?;
            run.append(
                "ActivityTaskFailed",
                json!({
                    "scheduledEventId": scheduled_event_id,
                    "reason": reason,
                    "details": details,
                }),
            );
            state.schedule_decision(&run_id);
        }
        self.changed();
        Ok(())
    }

    async fn start_workflow_execution(
        &self,
        request: StartExecutionRequest,
    ) -> Result<WorkflowExecution, DispatchError> {
        let execution = {
            let mut state = self.state();
            let already_open = state.runs.values().any(|run| {
                run.domain == request.domain
                    && run.execution.workflow_id == request.workflow_id
                    && !run.status.is_closed()
            });
            if already_open {
                return Err(DispatchError::rejected(
                    "WorkflowExecutionAlreadyStartedFault",
                    format!("workflow '{}' is already running", request.workflow_id),
                ));
            }

            let execution =
                WorkflowExecution::new(&request.workflow_id, Uuid::new_v4().simple().to_string());
            let mut run = Run {
                domain: request.domain.clone(),
                execution: execution.clone(),
                workflow_type: request.workflow_type.clone(),
                tasklist: request.tasklist.clone(),
                history: Vec::new(),
                status: ExecutionStatus::Open,
                decision_queued: false,
                decision_in_flight: None,
                needs_decision: false,
                responses: Vec::new(),
                open_timers: HashMap::new(),
            };

            let mut attributes = json!({
                "workflowType": {
                    "name": request.workflow_type.name,
                    "version": request.workflow_type.version,
                },
                "taskList": { "name": request.tasklist },
                "taskPriority": request.task_priority.to_string(),
                "childPolicy": request.child_policy.as_str(),
                "executionStartToCloseTimeout": request.execution_start_to_close_timeout.to_string(),
                "taskStartToCloseTimeout": request.task_start_to_close_timeout.to_string(),
            });
            if let Some(input) = &request.input {
                attributes["input"] = json!(input);
            }
            run.append("WorkflowExecutionStarted", attributes);

            state.runs.insert(execution.run_id.clone(), run);
            state.schedule_decision(&execution.run_id);
            state.start_requests.push(request);
            execution
        };
        self.changed();
        Ok(execution)
    }

    async fn terminate_workflow_execution(
        &self,
        request: TerminateExecutionRequest,
    ) -> Result<(), DispatchError> {
        {
            let mut state = self.state();
            let run_id = state.run(&request.execution)?.execution.run_id.clone();
            let run = state.open_run_mut(&run_id)?;
            run.append(
                "WorkflowExecutionTerminated",
                json!({
                    "reason": request.reason,
                    "details": request.details,
                    "childPolicy": request.child_policy.as_str(),
                }),
            );
            run.status = ExecutionStatus::Terminated {
                reason: request.reason,
                details: request.details,
            };
            run.decision_queued = false;
            state.decision_queue.retain(|queued| *queued != run_id);
            state.activity_queue.retain(|queued| queued.run_id != run_id);
        }
        self.changed();
        Ok(())
    }
}

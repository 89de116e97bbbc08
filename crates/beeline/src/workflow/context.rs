//! The per-pass context through which workflow code makes durable calls.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::arguments::Arguments;
use super::interrupt::{Interrupt, RetryCause};
use crate::activity::{ActivityContext, ActivityDefinition, ActivitySet};
use crate::codec::PayloadCodec;
use crate::decision::{Decision, ScheduleActivity};
use crate::history::{ActivityFailure, Event, EventKind, ReplayCursor};
use crate::task::{ActivityId, TaskMeta, TypeRef, WorkflowExecution};

/// State of one replay pass, handed to the entrypoint.
///
/// Each call either returns an outcome already recorded in the history or
/// interrupts the pass with the decision that requests it. Calls must be made
/// in the same order on every pass; a call that does not match the next
/// recorded event fails the workflow with `DeciderException`.
///
/// A context created by [`run_standalone`](crate::run_standalone) has no
/// history: activities run inline and sleeps are local delays.
pub struct WorkflowContext<'a> {
    meta: &'a TaskMeta,
    identifier: String,
    default_tasklist: &'a str,
    activities: &'a ActivitySet,
    codec: &'a dyn PayloadCodec,
    cursor: ReplayCursor,
    /// Calls made so far in this pass, by activity type.
    calls: HashMap<TypeRef, u32>,
    standalone: Option<Handle>,
}

impl<'a> WorkflowContext<'a> {
    pub(crate) fn new(
        meta: &'a TaskMeta,
        workflow_name: &str,
        default_tasklist: &'a str,
        activities: &'a ActivitySet,
        codec: &'a dyn PayloadCodec,
        cursor: ReplayCursor,
    ) -> Self {
        Self {
            meta,
            identifier: meta.workflow_identifier(workflow_name),
            default_tasklist,
            activities,
            codec,
            cursor,
            calls: HashMap::new(),
            standalone: None,
        }
    }

    /// A context that runs outside replay, driving activities on `handle`.
    ///
    /// Must be used from a thread where blocking is allowed.
    pub(crate) fn standalone(
        meta: &'a TaskMeta,
        workflow_name: &str,
        default_tasklist: &'a str,
        activities: &'a ActivitySet,
        codec: &'a dyn PayloadCodec,
        handle: Handle,
    ) -> Self {
        let mut ctx = Self::new(
            meta,
            workflow_name,
            default_tasklist,
            activities,
            codec,
            ReplayCursor::default(),
        );
        ctx.standalone = Some(handle);
        ctx
    }

    /// Whether calls are replayed against a history (as opposed to running
    /// inline).
    pub fn is_decider(&self) -> bool {
        self.standalone.is_none()
    }

    /// Metadata of the decision task being replayed.
    pub fn meta(&self) -> &TaskMeta {
        self.meta
    }

    /// The run being replayed.
    pub fn execution(&self) -> WorkflowExecution {
        self.meta.execution()
    }

    /// `{domain}.{workflow_name}.{workflow_id}.{run_id}`
    pub fn workflow_identifier(&self) -> &str {
        &self.identifier
    }

    /// Call an activity and return its result.
    ///
    /// Schedules the activity the first time the call is reached. Once the
    /// history records a completion, the decoded result is returned. Failed
    /// and timed-out attempts are rescheduled until the activity's
    /// `max_retries` is used up. Each call has its own budget, even when the
    /// same activity is called more than once.
    pub fn call_activity(
        &mut self,
        name: &str,
        version: &str,
        args: Arguments,
    ) -> Result<Value, Interrupt> {
        let activities = self.activities;
        let definition = activities.get(name, version).ok_or_else(|| {
            Interrupt::Decider(format!(
                "activity {name}@{version} is not registered with this workflow"
            ))
        })?;
        if let Some(handle) = self.standalone.clone() {
            return self.call_inline(&handle, definition, args);
        }
        let activity_type = definition.activity_type();
        let call = self.next_call(activity_type);
        let expected = ActivityId::for_call(&self.identifier, activity_type, call);

        let scheduled = self.cursor.expect_next(
            |kind| matches!(kind, EventKind::ActivityTaskScheduled(_)),
            "ActivityTaskScheduled",
        )?;
        let Some(scheduled) = scheduled else {
            let decision = self.schedule_first(definition, expected, &args)?;
            return Err(Interrupt::Suspend(Some(decision)));
        };
        let mut scheduled_id = self.check_scheduled(&scheduled, activity_type, &expected)?;
        let prefix = expected.prefix();
        let mut attempts = 1;

        loop {
            let Some(event) = self.cursor.pop_front() else {
                debug!(
                    workflow_id = %self.meta.workflow_id,
                    activity = %activity_type,
                    "Activity scheduled but not resolved"
                );
                return Err(Interrupt::Suspend(None));
            };

            match event.kind {
                EventKind::ActivityTaskStarted { scheduled_event_id } => {
                    check_join(event.id, scheduled_event_id, scheduled_id)?;
                }
                // a later attempt of the same call
                EventKind::ActivityTaskScheduled(next)
                    if next.activity_id.prefix() == prefix =>
                {
                    scheduled_id = event.id;
                    attempts += 1;
                }
                EventKind::ActivityTaskCompleted {
                    scheduled_event_id,
                    result,
                } => {
                    check_join(event.id, scheduled_event_id, scheduled_id)?;
                    return Ok(result.unwrap_or(Value::Null));
                }
                EventKind::ActivityTaskFailed { failure, reason, .. } => {
                    check_join(event.id, Some(failure.scheduled_event_id), scheduled_id)?;
                    debug!(
                        workflow_id = %self.meta.workflow_id,
                        activity = %activity_type,
                        reason = reason.as_deref().unwrap_or(""),
                        "Activity attempt failed"
                    );
                    match self.retry_recorded(&failure) {
                        Some(next) => {
                            scheduled_id = next;
                            attempts += 1;
                        }
                        None => {
                            return Err(self.retry(definition, failure, attempts, RetryCause::Failed));
                        }
                    }
                }
                EventKind::ActivityTaskTimedOut { failure, .. } => {
                    check_join(event.id, Some(failure.scheduled_event_id), scheduled_id)?;
                    match self.retry_recorded(&failure) {
                        Some(next) => {
                            scheduled_id = next;
                            attempts += 1;
                        }
                        None => {
                            return Err(self.retry(definition, failure, attempts, RetryCause::TimedOut));
                        }
                    }
                }
                other => {
                    return Err(Interrupt::Decider(format!(
                        "replay mismatch at event {}: expected the outcome of {activity_type}, found {}",
                        event.id,
                        other.name()
                    )));
                }
            }
        }
    }

    /// [`call_activity`](Self::call_activity), deserializing the result.
    pub fn call_activity_as<T: DeserializeOwned>(
        &mut self,
        name: &str,
        version: &str,
        args: Arguments,
    ) -> Result<T, Interrupt> {
        let value = self.call_activity(name, version, args)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Sleep for `duration` using a durable timer.
    ///
    /// Timers have whole-second granularity; a fractional duration is
    /// rounded up. Returns the timer id (the workflow identifier) once the
    /// timer fired.
    pub fn sleep(&mut self, duration: Duration) -> Result<String, Interrupt> {
        self.timer(duration, None)?;
        Ok(self.identifier.clone())
    }

    /// Sleep with a control payload attached to the timer.
    ///
    /// Returns the payload recovered from the recorded `TimerStarted` event.
    pub fn sleep_with_control(
        &mut self,
        duration: Duration,
        control: &Value,
    ) -> Result<Option<Value>, Interrupt> {
        self.timer(duration, Some(control))
    }

    fn timer(&mut self, duration: Duration, control: Option<&Value>) -> Result<Option<Value>, Interrupt> {
        let seconds = whole_seconds(duration);
        if let Some(handle) = &self.standalone {
            debug!(workflow_id = %self.meta.workflow_id, seconds, "Sleeping inline");
            handle.block_on(tokio::time::sleep(Duration::from_secs(seconds)));
            return Ok(control.cloned());
        }

        let started = self.cursor.expect_next(
            |kind| matches!(kind, EventKind::TimerStarted(_)),
            "TimerStarted",
        )?;
        let Some(started) = started else {
            let control = control
                .map(|value| self.codec.serialize(value))
                .transpose()
                .map_err(Interrupt::unhandled)?;
            info!(
                workflow_id = %self.meta.workflow_id,
                run_id = %self.meta.run_id,
                seconds,
                "Starting timer"
            );
            return Err(Interrupt::Suspend(Some(Decision::StartTimer {
                timer_id: self.identifier.clone(),
                start_to_fire_timeout: seconds,
                control,
            })));
        };

        let EventKind::TimerStarted(timer) = started.kind else {
            return Err(Interrupt::Decider(format!(
                "event {} is not a TimerStarted event",
                started.id
            )));
        };
        if timer.timer_id != self.identifier {
            return Err(Interrupt::Decider(format!(
                "replay mismatch at event {}: timer '{}' does not belong to {}",
                started.id, timer.timer_id, self.identifier
            )));
        }

        match self.cursor.expect_next(
            |kind| matches!(kind, EventKind::TimerFired(_)),
            "TimerFired",
        )? {
            Some(Event {
                kind: EventKind::TimerFired(fired),
                ..
            }) => Ok(fired.control),
            Some(event) => Err(Interrupt::Decider(format!(
                "event {} is not a TimerFired event",
                event.id
            ))),
            // requested on an earlier pass and still pending
            None => Err(Interrupt::Suspend(None)),
        }
    }

    fn schedule_first(
        &self,
        definition: &ActivityDefinition,
        activity_id: ActivityId,
        args: &Arguments,
    ) -> Result<Decision, Interrupt> {
        let input = self
            .codec
            .serialize(&args.to_value())
            .map_err(Interrupt::unhandled)?;
        let options = definition.options();
        let tasklist = options
            .tasklist
            .clone()
            .unwrap_or_else(|| self.default_tasklist.to_string());

        info!(
            workflow_id = %self.meta.workflow_id,
            run_id = %self.meta.run_id,
            activity_id = %activity_id,
            "Scheduling activity"
        );

        Ok(Decision::ScheduleActivityTask(ScheduleActivity {
            activity_id,
            activity_type: definition.activity_type().clone(),
            tasklist,
            input: Some(input),
            timeouts: options.timeouts,
            priority: options.priority,
        }))
    }

    /// Verify a recorded schedule belongs to the call being replayed.
    fn check_scheduled(
        &self,
        event: &Event,
        activity_type: &TypeRef,
        expected: &ActivityId,
    ) -> Result<u64, Interrupt> {
        let EventKind::ActivityTaskScheduled(scheduled) = &event.kind else {
            return Err(Interrupt::Decider(format!(
                "event {} is not an ActivityTaskScheduled event",
                event.id
            )));
        };
        if &scheduled.activity_type != activity_type
            || scheduled.activity_id.prefix() != expected.prefix()
        {
            return Err(Interrupt::Decider(format!(
                "replay mismatch at event {}: history scheduled {} ({}), workflow called {activity_type}",
                event.id, scheduled.activity_type, scheduled.activity_id
            )));
        }
        Ok(event.id)
    }

    /// Zero-based ordinal of this call among the pass's calls to `activity`.
    fn next_call(&mut self, activity: &TypeRef) -> u32 {
        let calls = self.calls.entry(activity.clone()).or_default();
        let ordinal = *calls;
        *calls += 1;
        ordinal
    }

    /// When the retry of `failure` is already in the history, consume it and
    /// return its event id.
    fn retry_recorded(&mut self, failure: &ActivityFailure) -> Option<u64> {
        let prefix = failure.retry.activity_id.prefix();
        let recorded = matches!(
            self.cursor.peek().map(|e| &e.kind),
            Some(EventKind::ActivityTaskScheduled(next)) if next.activity_id.prefix() == prefix
        );
        if !recorded {
            return None;
        }
        self.cursor.pop_front().map(|event| event.id)
    }

    /// Reschedule a failed attempt, or give up once the call has made more
    /// than `max_retries + 1` attempts.
    fn retry(
        &self,
        definition: &ActivityDefinition,
        failure: ActivityFailure,
        attempts: u32,
        cause: RetryCause,
    ) -> Interrupt {
        let max_retries = definition.options().max_retries;
        let activity = failure.retry.activity_type.to_string();

        if attempts > max_retries {
            warn!(
                workflow_id = %self.meta.workflow_id,
                run_id = %self.meta.run_id,
                activity = %activity,
                attempts,
                max_retries,
                "Activity retry budget exhausted"
            );
            return Interrupt::RetryBudgetExhausted {
                activity,
                attempts,
                max_retries,
            };
        }

        let activity_id = ActivityId::with_attempt(failure.retry.activity_id.prefix(), attempts);
        warn!(
            workflow_id = %self.meta.workflow_id,
            run_id = %self.meta.run_id,
            activity_id = %activity_id,
            attempt = attempts,
            max_retries,
            cause = %cause,
            "Retrying activity"
        );

        let options = definition.options();
        Interrupt::Retrying {
            cause,
            decision: Decision::ScheduleActivityTask(ScheduleActivity {
                activity_id,
                activity_type: failure.retry.activity_type,
                tasklist: failure.retry.tasklist,
                input: failure.retry.input,
                timeouts: options.timeouts,
                priority: options.priority,
            }),
        }
    }
}

impl WorkflowContext<'_> {
    /// Run an activity on this thread, retrying failed attempts locally.
    fn call_inline(
        &mut self,
        handle: &Handle,
        definition: &ActivityDefinition,
        args: Arguments,
    ) -> Result<Value, Interrupt> {
        let activity_type = definition.activity_type();
        let call = self.next_call(activity_type);
        let first = ActivityId::for_call(&self.identifier, activity_type, call);
        let max_retries = definition.options().max_retries;
        let mut attempts = 0;

        loop {
            let activity_id = ActivityId::with_attempt(first.prefix(), attempts);
            attempts += 1;

            let ctx = ActivityContext::new(
                "",
                activity_id.to_string(),
                activity_type.clone(),
                self.meta.execution(),
            );
            let handler = definition.handler();
            let attempt_args = args.clone();
            debug!(workflow_id = %self.meta.workflow_id, activity_id = %activity_id, "Running activity inline");

            let joined = handle.block_on(handle.spawn(async move {
                handler.handle(attempt_args, &ctx).await
            }));
            let reason = match joined {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e.message().to_string(),
                Err(e) if e.is_panic() => "activity panicked".to_string(),
                Err(e) => format!("activity task aborted: {e}"),
            };

            if attempts > max_retries {
                warn!(
                    workflow_id = %self.meta.workflow_id,
                    activity = %activity_type,
                    attempts,
                    max_retries,
                    reason = %reason,
                    "Activity retry budget exhausted"
                );
                return Err(Interrupt::RetryBudgetExhausted {
                    activity: activity_type.to_string(),
                    attempts,
                    max_retries,
                });
            }
            warn!(
                workflow_id = %self.meta.workflow_id,
                activity_id = %activity_id,
                reason = %reason,
                "Activity failed, retrying inline"
            );
        }
    }
}

/// Whole seconds for a timer, rounding any fraction up.
fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

fn check_join(event_id: u64, recorded: Option<u64>, scheduled_id: u64) -> Result<(), Interrupt> {
    match recorded {
        Some(recorded) if recorded != scheduled_id => Err(Interrupt::Decider(format!(
            "replay mismatch at event {event_id}: outcome of scheduled event {recorded} found where {scheduled_id} was expected"
        ))),
        _ => Ok(()),
    }
}

//! Replay of one decision task.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;
use tracing::{debug, error};

use crate::codec::PayloadCodec;
use crate::decision::Decision;
use crate::history::{Event, EventKind, HistoryRecord, ReplayCursor, decode_history};
use crate::task::TaskMeta;
use crate::workflow::{Interrupt, RetryCause, WorkflowContext, WorkflowDefinition};

/// How a replay pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The pass stopped at a call whose outcome is not recorded yet.
    ///
    /// Carries the decision requesting it, or `None` when the request was
    /// made on an earlier pass.
    Suspended(Option<Decision>),

    /// A failed or timed-out activity is rescheduled.
    Retrying {
        cause: RetryCause,
        decision: Decision,
    },

    /// The entrypoint returned.
    Completed(Value),

    /// The workflow cannot continue.
    Failed {
        /// `RetryBudgetExhausted`, `EventException`, `DeciderException` or
        /// `unhandled`.
        reason: String,
        details: String,
    },
}

impl PassOutcome {
    /// The decisions answering the decision task.
    ///
    /// A suspended pass with nothing new to request answers with no
    /// decisions, which closes the task until the next history event.
    pub fn into_decisions(self, codec: &dyn PayloadCodec) -> Vec<Decision> {
        match self {
            PassOutcome::Suspended(decision) => decision.into_iter().collect(),
            PassOutcome::Retrying { decision, .. } => vec![decision],
            PassOutcome::Completed(result) => match codec.serialize(&result) {
                Ok(encoded) => vec![Decision::CompleteWorkflowExecution {
                    result: Some(encoded),
                }],
                Err(e) => {
                    error!(error = %e, "Unable to encode workflow result");
                    vec![Decision::fail(
                        "unhandled",
                        format!("unable to encode workflow result: {e}"),
                    )]
                }
            },
            PassOutcome::Failed { reason, details } => vec![Decision::fail(reason, details)],
        }
    }

    /// Whether this outcome closes the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PassOutcome::Completed(_) | PassOutcome::Failed { .. })
    }
}

/// Replay a workflow over the history of one decision task.
///
/// This function:
/// 1. Decodes every record (decision bookkeeping must already be filtered)
/// 2. Takes the leading `WorkflowExecutionStarted` event and its version
/// 3. Selects the entrypoint registered for that version
/// 4. Runs it against a fresh [`WorkflowContext`] over the remaining events
/// 5. Classifies how it returned or unwound
///
/// The pass is synchronous and has no side effects besides logging, so
/// replaying the same history twice yields the same outcome.
pub fn replay(
    definition: &WorkflowDefinition,
    meta: &TaskMeta,
    records: &[HistoryRecord],
    codec: &dyn PayloadCodec,
) -> PassOutcome {
    match run_pass(definition, meta, records, codec) {
        Ok(result) => {
            debug!(workflow_id = %meta.workflow_id, run_id = %meta.run_id, "Entrypoint returned");
            PassOutcome::Completed(result)
        }
        Err(Interrupt::Suspend(decision)) => PassOutcome::Suspended(decision),
        Err(Interrupt::Retrying { cause, decision }) => PassOutcome::Retrying { cause, decision },
        Err(interrupt) => {
            let reason = interrupt.reason().to_string();
            let details = interrupt.to_string();
            error!(
                workflow_id = %meta.workflow_id,
                run_id = %meta.run_id,
                reason = %reason,
                details = %details,
                "Workflow failed"
            );
            PassOutcome::Failed { reason, details }
        }
    }
}

fn run_pass(
    definition: &WorkflowDefinition,
    meta: &TaskMeta,
    records: &[HistoryRecord],
    codec: &dyn PayloadCodec,
) -> Result<Value, Interrupt> {
    let events = decode_history(records, codec)?;
    let mut cursor = ReplayCursor::new(events);

    let started = match cursor.pop_front() {
        Some(Event {
            kind: EventKind::WorkflowExecutionStarted(started),
            ..
        }) => started,
        Some(event) => {
            return Err(Interrupt::Decider(format!(
                "expected first event to be 'WorkflowExecutionStarted', found '{}'",
                event.kind.name()
            )));
        }
        None => {
            return Err(Interrupt::Decider(
                "expected first event to be 'WorkflowExecutionStarted', history is empty".into(),
            ));
        }
    };

    let version = &started.workflow_type.version;
    let entrypoint = definition.entrypoint(version).ok_or_else(|| {
        Interrupt::Decider(format!(
            "no entrypoint registered for {}@{version}",
            definition.name()
        ))
    })?;

    debug!(
        workflow_id = %meta.workflow_id,
        run_id = %meta.run_id,
        version = %version,
        events = cursor.remaining(),
        "Replaying entrypoint"
    );

    let mut ctx = WorkflowContext::new(
        meta,
        definition.name(),
        definition.tasklist(),
        definition.activities(),
        codec,
        cursor,
    );
    let input = started.input.unwrap_or(Value::Null);

    catch_unwind(AssertUnwindSafe(|| (**entrypoint)(&mut ctx, input)))
        .unwrap_or_else(|panic| Err(Interrupt::Unhandled(panic_message(panic.as_ref()))))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("entrypoint panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("entrypoint panicked: {message}")
    } else {
        "entrypoint panicked".to_string()
    }
}

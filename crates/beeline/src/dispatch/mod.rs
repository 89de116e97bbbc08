//! Client-side abstraction over the remote task-dispatch service.
//!
//! The engine never talks to the network itself. Deciders, activity workers
//! and the administrative service all go through [`TaskDispatch`], which a
//! caller implements on top of whatever client reaches the managed
//! workflow-history service. `test-utils` provides an in-memory
//! implementation.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decision::Decision;
use crate::history::HistoryRecord;
use crate::task::{TypeRef, WorkflowExecution};

/// Failure of a task-dispatch service call.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The request did not get an answer (network fault, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with an error.
    #[error("service rejected request ({code}): {message}")]
    Rejected {
        /// Service error code, e.g. `UnknownResourceFault`.
        code: String,
        /// Human readable message.
        message: String,
    },
}

impl DispatchError {
    pub fn transport(message: impl Into<String>) -> Self {
        DispatchError::Transport(message.into())
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Who is polling and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub domain: String,
    pub tasklist: String,
    /// Poller identity recorded on `*TaskStarted` events.
    pub identity: String,
}

/// One page of a polled decision task.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTaskPage {
    /// Token used to respond; identical on every page of a task.
    pub task_token: String,
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: TypeRef,
    /// History records of this page, oldest first.
    pub events: Vec<HistoryRecord>,
    /// Present when more pages follow.
    pub next_page_token: Option<String>,
}

/// A polled activity task.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityTask {
    pub task_token: String,
    /// Wire activity id, `{prefix}-{attempt}`.
    pub activity_id: String,
    pub activity_type: TypeRef,
    pub workflow_execution: WorkflowExecution,
    /// Encoded `{args, kwargs}` payload.
    pub input: Option<String>,
}

/// What happens to child executions when a run is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChildPolicy {
    #[default]
    Terminate,
    RequestCancel,
    Abandon,
}

impl ChildPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildPolicy::Terminate => "TERMINATE",
            ChildPolicy::RequestCancel => "REQUEST_CANCEL",
            ChildPolicy::Abandon => "ABANDON",
        }
    }
}

impl fmt::Display for ChildPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of `StartWorkflowExecution`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartExecutionRequest {
    pub domain: String,
    pub workflow_id: String,
    pub workflow_type: TypeRef,
    pub tasklist: String,
    /// Encoded workflow input.
    pub input: Option<String>,
    /// Seconds the whole run may take.
    pub execution_start_to_close_timeout: u64,
    /// Seconds a decider may hold a decision task.
    pub task_start_to_close_timeout: u64,
    pub task_priority: i32,
    pub child_policy: ChildPolicy,
}

/// Arguments of `TerminateWorkflowExecution`.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminateExecutionRequest {
    pub domain: String,
    pub execution: WorkflowExecution,
    pub reason: String,
    pub details: String,
    pub child_policy: ChildPolicy,
}

/// The operations the engine needs from the task-dispatch service.
///
/// Polls are long polls: implementations may block until a task arrives or a
/// service-side timeout elapses, and return `Ok(None)` when no task arrived.
///
/// # Implementations
///
/// - `test_utils::MemoryDispatch`: in-memory service for tests
#[async_trait]
pub trait TaskDispatch: Send + Sync + 'static {
    /// Poll for a decision task, or fetch a further page of one.
    ///
    /// With `next_page_token` set, returns the page it names.
    async fn poll_decision_task(
        &self,
        request: &PollRequest,
        next_page_token: Option<&str>,
    ) -> Result<Option<DecisionTaskPage>, DispatchError>;

    /// Poll for an activity task.
    async fn poll_activity_task(
        &self,
        request: &PollRequest,
    ) -> Result<Option<ActivityTask>, DispatchError>;

    /// Close a decision task with the given decisions (possibly none).
    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: &[Decision],
    ) -> Result<(), DispatchError>;

    /// Report an activity attempt as completed.
    async fn respond_activity_task_completed(
        &self,
        task_token: &str,
        result: Option<String>,
    ) -> Result<(), DispatchError>;

    /// Report an activity attempt as failed.
    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        reason: &str,
        details: &str,
    ) -> Result<(), DispatchError>;

    /// Start a new run. Returns the execution with the service-assigned run id.
    async fn start_workflow_execution(
        &self,
        request: StartExecutionRequest,
    ) -> Result<WorkflowExecution, DispatchError>;

    /// Terminate a run immediately.
    async fn terminate_workflow_execution(
        &self,
        request: TerminateExecutionRequest,
    ) -> Result<(), DispatchError>;
}

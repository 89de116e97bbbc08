//! Identity types shared by the decider, the activity worker and the
//! administrative service.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `(workflow_id, run_id)` pair naming one run of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    /// Caller-chosen (or generated) workflow id.
    pub workflow_id: String,
    /// Service-assigned id of this run.
    pub run_id: String,
}

impl WorkflowExecution {
    /// Create a new execution reference.
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for WorkflowExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}

/// A registered `name@version` pair.
///
/// Used for both workflow types and activity types, which the service
/// names the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    /// Type name.
    pub name: String,
    /// Type version.
    pub version: String,
}

impl TypeRef {
    /// Create a new type reference.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Per-task metadata, created fresh for every polled decision task.
///
/// Passed by reference through one replay pass and then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMeta {
    /// Opaque token used to respond to this task.
    pub task_token: String,
    /// Run id of the execution the task belongs to.
    pub run_id: String,
    /// Workflow id of the execution the task belongs to.
    pub workflow_id: String,
    /// Domain the decider polls.
    pub domain: String,
    /// Tasklist the decider polls.
    pub tasklist: String,
}

impl TaskMeta {
    /// The execution this task belongs to.
    pub fn execution(&self) -> WorkflowExecution {
        WorkflowExecution::new(&self.workflow_id, &self.run_id)
    }

    /// String scoping domain, workflow type, workflow id and run id.
    ///
    /// Activity ids and timer ids are derived from it, so it must be stable
    /// for every pass over the same run.
    pub fn workflow_identifier(&self, workflow_name: &str) -> String {
        format!(
            "{}.{}.{}.{}",
            self.domain, workflow_name, self.workflow_id, self.run_id
        )
    }
}

/// Activity id with a structurally separate attempt number.
///
/// Rendered on the wire as `{prefix}-{attempt}` where the prefix is
/// `{workflow_identifier}.{activity_name}@{activity_version}`. Every retry
/// of an activity call shares the prefix; only the attempt changes.
///
/// When a run calls the same activity more than once, the second and later
/// calls append `#{ordinal}` to the prefix so each call keeps its own ids,
/// idempotency key and retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivityId {
    prefix: String,
    attempt: u32,
}

impl ActivityId {
    /// First attempt of the `call`-th (zero-based) call to `activity`.
    pub fn for_call(workflow_identifier: &str, activity: &TypeRef, call: u32) -> Self {
        let prefix = match call {
            0 => format!("{workflow_identifier}.{activity}"),
            n => format!("{workflow_identifier}.{activity}#{n}"),
        };
        Self { prefix, attempt: 0 }
    }

    /// An id with an explicit prefix and attempt.
    pub fn with_attempt(prefix: impl Into<String>, attempt: u32) -> Self {
        Self {
            prefix: prefix.into(),
            attempt,
        }
    }

    /// Parse a wire id. Returns `None` unless it ends in `-{number}`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, attempt) = raw.rsplit_once('-')?;
        if prefix.is_empty() {
            return None;
        }
        let attempt = attempt.parse().ok()?;
        Some(Self::with_attempt(prefix, attempt))
    }

    /// The identity shared by all attempts.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Zero-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.attempt)
    }
}

//! Activity execution context with correlation and idempotency metadata.

use crate::task::{ActivityId, TypeRef, WorkflowExecution};

/// Context provided to activity handlers for one attempt.
///
/// # Idempotency
///
/// Use [`idempotency_key()`](Self::idempotency_key) when calling external
/// APIs that support idempotency keys. The key is the activity id without its
/// attempt suffix, so it is stable across retries of the same call.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Token identifying the activity task; used to respond.
    pub task_token: String,

    /// Wire activity id of this attempt.
    pub activity_id: String,

    /// Registered activity type.
    pub activity_type: TypeRef,

    /// Workflow run that scheduled the activity.
    pub workflow: WorkflowExecution,

    /// Zero-based attempt number parsed from the activity id.
    ///
    /// First execution is attempt 0, first retry is attempt 1, etc.
    pub attempt: u32,
}

impl ActivityContext {
    pub fn new(
        task_token: impl Into<String>,
        activity_id: impl Into<String>,
        activity_type: TypeRef,
        workflow: WorkflowExecution,
    ) -> Self {
        let activity_id = activity_id.into();
        let attempt = ActivityId::parse(&activity_id).map_or(0, |id| id.attempt());
        Self {
            task_token: task_token.into(),
            activity_id,
            activity_type,
            workflow,
            attempt,
        }
    }

    /// Key for external service calls.
    ///
    /// Format: `{workflow_identifier}.{name}@{version}`, with `#{n}` appended
    /// for the n-th repeated call to the same activity.
    ///
    /// This key is:
    /// - **Stable across retries**: every attempt shares it
    /// - **Scoped to the run**: other runs produce different keys
    pub fn idempotency_key(&self) -> String {
        match ActivityId::parse(&self.activity_id) {
            Some(id) => id.prefix().to_string(),
            None => self.activity_id.clone(),
        }
    }

    /// Returns `true` if this is a retry (attempt > 0).
    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }
}

//! Administrative operations: starting and terminating executions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info};

use crate::codec::PayloadCodec;
use crate::dispatch::{ChildPolicy, StartExecutionRequest, TaskDispatch, TerminateExecutionRequest};
use crate::error::{Error, Result};
use crate::task::{TypeRef, WorkflowExecution};
use crate::workflow::WorkflowDefinition;

/// Defaults applied to every started execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowServiceConfig {
    /// Total time a run may take. Default: 60 seconds.
    pub execution_timeout: Duration,

    /// Time a decider may hold a decision task before it is handed out
    /// again. Default: 10 seconds.
    pub task_timeout: Duration,

    /// Default: [`ChildPolicy::Terminate`].
    pub child_policy: ChildPolicy,

    /// Default: 0.
    pub task_priority: i32,
}

impl Default for WorkflowServiceConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(60),
            task_timeout: Duration::from_secs(10),
            child_policy: ChildPolicy::Terminate,
            task_priority: 0,
        }
    }
}

/// Per-execution start options.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOptions {
    /// Entrypoint version to run. Default: `0.0.1`.
    pub version: String,
    /// Input passed to the entrypoint.
    pub input: Option<Value>,
    /// Workflow id; generated as `{workflow_name}-{uuid}` when `None`.
    pub workflow_id: Option<String>,
    /// Overrides [`WorkflowServiceConfig::task_priority`].
    pub priority: Option<i32>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            version: "0.0.1".to_string(),
            input: None,
            workflow_id: None,
            priority: None,
        }
    }
}

impl StartOptions {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// App-facing handle for one workflow type.
///
/// Starts and terminates executions; it never polls.
pub struct WorkflowService<D>
where
    D: TaskDispatch,
{
    dispatch: Arc<D>,
    definition: Arc<WorkflowDefinition>,
    codec: Arc<dyn PayloadCodec>,
    config: WorkflowServiceConfig,
}

impl<D> WorkflowService<D>
where
    D: TaskDispatch,
{
    pub(crate) fn new(
        dispatch: Arc<D>,
        definition: Arc<WorkflowDefinition>,
        codec: Arc<dyn PayloadCodec>,
        config: WorkflowServiceConfig,
    ) -> Self {
        Self {
            dispatch,
            definition,
            codec,
            config,
        }
    }

    /// Start a new execution.
    ///
    /// Fails without contacting the service when no entrypoint is registered
    /// for `options.version`.
    pub async fn start_execution(&self, options: StartOptions) -> Result<WorkflowExecution> {
        let name = self.definition.name();
        if self.definition.entrypoint(&options.version).is_none() {
            return Err(Error::unknown_entrypoint(name, &options.version));
        }

        let input = options
            .input
            .as_ref()
            .map(|value| self.codec.serialize(value))
            .transpose()?;
        let workflow_id = options
            .workflow_id
            .unwrap_or_else(|| format!("{name}-{}", uuid::Uuid::new_v4().simple()));

        let request = StartExecutionRequest {
            domain: self.definition.domain().to_string(),
            workflow_id,
            workflow_type: TypeRef::new(name, &options.version),
            tasklist: self.definition.tasklist().to_string(),
            input,
            execution_start_to_close_timeout: self.config.execution_timeout.as_secs(),
            task_start_to_close_timeout: self.config.task_timeout.as_secs(),
            task_priority: options.priority.unwrap_or(self.config.task_priority),
            child_policy: self.config.child_policy,
        };

        let execution = self
            .dispatch
            .start_workflow_execution(request)
            .await
            .inspect_err(|e| {
                error!(workflow = name, version = %options.version, error = %e, "Failed to start workflow");
            })?;

        info!(
            workflow = name,
            version = %options.version,
            workflow_id = %execution.workflow_id,
            run_id = %execution.run_id,
            "Started workflow execution"
        );
        Ok(execution)
    }

    /// Terminate a running execution.
    pub async fn terminate_execution(
        &self,
        execution: &WorkflowExecution,
        reason: impl Into<String>,
        details: impl Into<String>,
        child_policy: ChildPolicy,
    ) -> Result<()> {
        let request = TerminateExecutionRequest {
            domain: self.definition.domain().to_string(),
            execution: execution.clone(),
            reason: reason.into(),
            details: details.into(),
            child_policy,
        };

        self.dispatch
            .terminate_workflow_execution(request)
            .await
            .inspect_err(|e| {
                error!(execution = %execution, error = %e, "Failed to terminate workflow");
            })?;

        info!(execution = %execution, "Terminated workflow execution");
        Ok(())
    }

    /// Returns the workflow definition.
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Returns the service configuration.
    pub fn config(&self) -> &WorkflowServiceConfig {
        &self.config
    }
}

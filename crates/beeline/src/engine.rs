//! Workflow engine bundle.

use std::sync::Arc;

use crate::dispatch::TaskDispatch;
use crate::runtime::WorkflowRuntime;
use crate::service::WorkflowService;

/// Convenience bundle for a service + runtime pair sharing one definition.
pub struct WorkflowEngine<D>
where
    D: TaskDispatch,
{
    pub service: Arc<WorkflowService<D>>,
    pub runtime: WorkflowRuntime<D>,
}

impl<D> Clone for WorkflowEngine<D>
where
    D: TaskDispatch,
{
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            runtime: self.runtime.clone(),
        }
    }
}

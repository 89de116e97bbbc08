//! Runtime builder and worker supervision.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use super::activity_worker::ActivityWorker;
use super::config::RuntimeConfig;
use super::decider_worker::DeciderWorker;
use crate::codec::{GzipJsonCodec, PayloadCodec};
use crate::dispatch::TaskDispatch;
use crate::engine::WorkflowEngine;
use crate::service::{WorkflowService, WorkflowServiceConfig};
use crate::workflow::WorkflowDefinition;

/// Builder for constructing a [`WorkflowRuntime`].
///
/// # Example
///
/// ```ignore
/// let runtime = WorkflowRuntime::builder(dispatch, definition)
///     .config(RuntimeConfig {
///         activity_workers: 4,
///         ..Default::default()
///     })
///     .build_runtime();
/// ```
pub struct WorkflowBuilder<D>
where
    D: TaskDispatch,
{
    dispatch: Arc<D>,
    definition: WorkflowDefinition,
    codec: Arc<dyn PayloadCodec>,
    config: RuntimeConfig,
    service_config: WorkflowServiceConfig,
}

impl<D> WorkflowBuilder<D>
where
    D: TaskDispatch,
{
    fn new(dispatch: Arc<D>, definition: WorkflowDefinition) -> Self {
        Self {
            dispatch,
            definition,
            codec: Arc::new(GzipJsonCodec),
            config: RuntimeConfig::default(),
            service_config: WorkflowServiceConfig::default(),
        }
    }

    /// Set the runtime configuration.
    ///
    /// If not called, uses [`RuntimeConfig::default()`].
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the payload codec. Defaults to [`GzipJsonCodec`].
    ///
    /// Every process working on the same workflows must use the same codec.
    pub fn codec(mut self, codec: impl PayloadCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Set the defaults used when starting executions.
    pub fn service_config(mut self, service_config: WorkflowServiceConfig) -> Self {
        self.service_config = service_config;
        self
    }

    /// Build the workflow engine (service + runtime).
    pub fn build_engine(self) -> WorkflowEngine<D> {
        let runtime = self.build_runtime();
        WorkflowEngine {
            service: Arc::clone(&runtime.service),
            runtime,
        }
    }

    /// Build the administrative service without workers.
    pub fn build_service(self) -> WorkflowService<D> {
        WorkflowService::new(
            self.dispatch,
            Arc::new(self.definition),
            self.codec,
            self.service_config,
        )
    }

    /// Build the runtime.
    pub fn build_runtime(self) -> WorkflowRuntime<D> {
        let identity = self
            .config
            .identity
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let definition = Arc::new(self.definition);
        let service = Arc::new(WorkflowService::new(
            Arc::clone(&self.dispatch),
            Arc::clone(&definition),
            Arc::clone(&self.codec),
            self.service_config,
        ));

        WorkflowRuntime {
            dispatch: self.dispatch,
            definition,
            codec: self.codec,
            service,
            config: self.config,
            identity,
        }
    }
}

/// Decider and activity worker runtime for one workflow type.
///
/// # Lifecycle
///
/// 1. Declare a [`WorkflowDefinition`]
/// 2. Create with [`WorkflowRuntime::builder(dispatch, definition)`](WorkflowRuntime::builder)
/// 3. Configure with [`WorkflowBuilder::config()`] and [`WorkflowBuilder::codec()`]
/// 4. Build with [`WorkflowBuilder::build_runtime()`]
/// 5. Run with [`WorkflowRuntime::run()`]
pub struct WorkflowRuntime<D>
where
    D: TaskDispatch,
{
    dispatch: Arc<D>,
    definition: Arc<WorkflowDefinition>,
    codec: Arc<dyn PayloadCodec>,
    service: Arc<WorkflowService<D>>,
    config: RuntimeConfig,
    identity: String,
}

impl<D> Clone for WorkflowRuntime<D>
where
    D: TaskDispatch,
{
    fn clone(&self) -> Self {
        Self {
            dispatch: Arc::clone(&self.dispatch),
            definition: Arc::clone(&self.definition),
            codec: Arc::clone(&self.codec),
            service: Arc::clone(&self.service),
            config: self.config.clone(),
            identity: self.identity.clone(),
        }
    }
}

impl<D> WorkflowRuntime<D>
where
    D: TaskDispatch,
{
    /// Create a new runtime builder.
    pub fn builder(dispatch: Arc<D>, definition: WorkflowDefinition) -> WorkflowBuilder<D> {
        WorkflowBuilder::new(dispatch, definition)
    }

    /// Returns the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the poller identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Returns the workflow definition.
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Returns the administrative service handle.
    pub fn service(&self) -> &WorkflowService<D> {
        &self.service
    }

    /// Tasklists the activity workers poll: the workflow's own plus every
    /// activity override.
    pub fn activity_tasklists(&self) -> Vec<String> {
        let mut tasklists = BTreeSet::new();
        tasklists.insert(self.definition.tasklist().to_string());
        for activity in self.definition.activity_types() {
            if let Some(tasklist) = &activity.options().tasklist {
                tasklists.insert(tasklist.clone());
            }
        }
        tasklists.into_iter().collect()
    }

    /// A decider sharing this runtime's dispatch, definition and codec.
    pub fn decider(&self) -> DeciderWorker<D> {
        DeciderWorker::new(
            Arc::clone(&self.dispatch),
            Arc::clone(&self.definition),
            Arc::clone(&self.codec),
            self.config.clone(),
            format!("{}-decider", self.identity),
        )
    }

    /// An activity worker polling `tasklist`.
    pub fn activity_worker(&self, tasklist: impl Into<String>) -> ActivityWorker<D> {
        ActivityWorker::new(
            Arc::clone(&self.dispatch),
            Arc::clone(&self.definition),
            Arc::clone(&self.codec),
            self.config.clone(),
            tasklist.into(),
            format!("{}-activity", self.identity),
        )
    }

    /// Run deciders and activity workers until the shutdown future completes.
    ///
    /// The number of workers is controlled by `deciders` and
    /// `activity_workers` in [`RuntimeConfig`]; activity workers are spawned
    /// for every tasklist in [`activity_tasklists`](Self::activity_tasklists).
    ///
    /// # Shutdown Behavior
    ///
    /// When the shutdown future completes:
    /// 1. All workers stop polling
    /// 2. Tasks already fetched are finished and answered
    /// 3. Return after all workers stopped or the timeout elapsed
    ///
    /// # Example
    ///
    /// ```ignore
    /// use tokio::signal;
    ///
    /// runtime.run(async { signal::ctrl_c().await.ok(); }).await?;
    /// ```
    pub async fn run<F>(self, shutdown: F) -> crate::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let decider_count = self.config.deciders.max(1);
        let activity_worker_count = self.config.activity_workers.max(1);
        let tasklists = self.activity_tasklists();

        info!(
            identity = %self.identity,
            workflow = self.definition.name(),
            deciders = decider_count,
            activity_workers = activity_worker_count,
            tasklists = ?tasklists,
            "Runtime starting"
        );

        let mut worker_handles = Vec::new();

        for _ in 0..decider_count {
            let decider = self.decider();
            let decider_shutdown_rx = shutdown_rx.clone();
            worker_handles.push(tokio::spawn(async move {
                decider.run(decider_shutdown_rx).await;
            }));
        }

        for tasklist in &tasklists {
            for _ in 0..activity_worker_count {
                let worker = self.activity_worker(tasklist.clone());
                let worker_shutdown_rx = shutdown_rx.clone();
                worker_handles.push(tokio::spawn(async move {
                    worker.run(worker_shutdown_rx).await;
                }));
            }
        }

        // Wait for shutdown signal
        shutdown.await;

        let _ = shutdown_tx.send(true);

        let shutdown_timeout = self.config.shutdown_timeout;
        let all_workers = async {
            for handle in worker_handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(shutdown_timeout, all_workers).await {
            Ok(()) => {
                info!(identity = %self.identity, "Runtime stopped gracefully");
            }
            Err(_) => {
                warn!(
                    identity = %self.identity,
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Shutdown timeout exceeded, forcing stop"
                );
            }
        }

        Ok(())
    }
}

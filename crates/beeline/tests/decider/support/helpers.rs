use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use beeline::runtime::PollBackoff;
use beeline::{
    GzipJsonCodec, PayloadCodec, RuntimeConfig, WorkflowDefinition, WorkflowRuntime,
    WorkflowService,
};
use serde_json::Value;
use test_utils::MemoryDispatch;
use tokio::task::JoinHandle;

pub use test_utils::init_test_tracing;

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fast runtime config for tests.
pub fn test_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        identity: Some("test-runtime".into()),
        poll_backoff: PollBackoff {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Assert that event types match the expected types in order.
pub fn assert_event_types(events: &[String], expected: &[&str]) {
    assert_eq!(
        events, expected,
        "event type mismatch: expected {expected:?}, got {events:?}"
    );
}

/// Decode a payload written with the default codec.
pub fn decode(encoded: &str) -> Value {
    GzipJsonCodec
        .deserialize(encoded)
        .expect("payload should decode")
}

/// Manages a running runtime for tests. Drop signals shutdown automatically.
pub struct TestApp {
    pub dispatch: Arc<MemoryDispatch>,
    pub service: Arc<WorkflowService<MemoryDispatch>>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestApp {
    /// Build an engine over `dispatch` and spawn its runtime in the
    /// background.
    pub fn start(dispatch: Arc<MemoryDispatch>, definition: WorkflowDefinition) -> Self {
        Self::start_with(dispatch, definition, test_runtime_config())
    }

    pub fn start_with(
        dispatch: Arc<MemoryDispatch>,
        definition: WorkflowDefinition,
        config: RuntimeConfig,
    ) -> Self {
        let engine = WorkflowRuntime::builder(Arc::clone(&dispatch), definition)
            .config(config)
            .build_engine();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let runtime = engine.runtime;
        let handle = tokio::spawn(async move {
            runtime
                .run(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(anyhow::Error::from)
        });

        Self {
            dispatch,
            service: engine.service,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await??;
        }
        Ok(())
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

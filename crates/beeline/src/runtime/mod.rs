//! Runtime for polling and answering tasks.
//!
//! This module provides the long-running side of the engine:
//!
//! - [`WorkflowRuntime`]: coordinator running deciders and activity workers
//! - [`WorkflowBuilder`]: builder for configuring the runtime
//! - [`DeciderWorker`]: poll, replay and respond to decision tasks
//! - [`ActivityWorker`]: execute activity tasks
//! - [`RuntimeConfig`]: worker counts, poll backoff, shutdown timeout
//!
//! # Example
//!
//! ```ignore
//! use beeline::runtime::{RuntimeConfig, WorkflowRuntime};
//!
//! let runtime = WorkflowRuntime::builder(dispatch, definition)
//!     .config(RuntimeConfig::default())
//!     .build_runtime();
//!
//! runtime.run(shutdown_signal).await?;
//! ```

mod activity_worker;
mod builder;
mod config;
mod decider_worker;

pub use activity_worker::{ActivityOutcome, ActivityWorker, NOT_FOUND_REASON};
pub use builder::{WorkflowBuilder, WorkflowRuntime};
pub use config::{PollBackoff, RuntimeConfig};
pub use decider_worker::{DeciderWorker, DecisionTask, fetch_decision_task};

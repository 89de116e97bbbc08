//! Replay-based workflow engine on top of a remote task-dispatch service.
//!
//! Beeline runs long-lived business processes as ordinary sequential code:
//!
//! - **Deterministic replay**: every decision task re-executes the workflow
//!   entrypoint from the top against the run's recorded history
//! - **Durable calls**: [`WorkflowContext::call_activity`] and
//!   [`WorkflowContext::sleep`] return recorded outcomes, or interrupt the
//!   pass with the decision that requests them
//! - **No local state**: durability is delegated to the history service
//! - **Standalone runs**: [`run_standalone`] executes the same entrypoint
//!   in-process, with activities run inline and sleeps as local delays
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            DeciderWorker                                │
//! │                                                                         │
//! │   1. Poll decision task (all pages, bookkeeping events removed)         │
//! │   2. Decode history → typed events → ReplayCursor                       │
//! │   3. Run the entrypoint selected by the started version                 │
//! │   4. Classify: suspended | retrying | completed | failed                │
//! │   5. Respond with the resulting decisions                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            ActivityWorker                               │
//! │                                                                         │
//! │   1. Poll activity task                                                 │
//! │   2. Look up name@version, decode {args, kwargs}                        │
//! │   3. Run the handler, report completion or failure                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use beeline::{ActivityDefinition, Arguments, WorkflowDefinition, WorkflowRuntime};
//!
//! let definition = WorkflowDefinition::builder("Greeter", "demo", "demo-tasks")
//!     .activity(
//!         ActivityDefinition::from_fn("greet", "0.0.1", |args: Arguments, _ctx| async move {
//!             let name = args.get(0).and_then(|v| v.as_str()).unwrap_or("world");
//!             Ok(serde_json::json!(format!("hello {name}")))
//!         })
//!         .max_retries(3),
//!     )
//!     .entrypoint("0.0.1", |ctx, input| {
//!         let greeting = ctx.call_activity("greet", "0.0.1", Arguments::new().arg(input))?;
//!         ctx.sleep(std::time::Duration::from_secs(5))?;
//!         Ok(greeting)
//!     })
//!     .build()?;
//!
//! let engine = WorkflowRuntime::builder(dispatch, definition).build_engine();
//! engine.service.start_execution(StartOptions::default().input(json!("lucy"))).await?;
//! engine.runtime.run(shutdown_signal).await?;
//! ```
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions.

pub mod activity;
pub mod codec;
mod decider;
pub mod decision;
pub mod dispatch;
mod engine;
mod error;
pub mod history;
pub mod runtime;
mod service;
mod standalone;
pub mod task;
pub mod workflow;

pub use activity::{
    ActivityContext, ActivityDefinition, ActivityError, ActivityHandler, ActivityOptions,
    FnActivity,
};
pub use codec::{CodecError, GzipJsonCodec, JsonCodec, PayloadCodec};
pub use decider::{PassOutcome, replay};
pub use decision::{ActivityTimeouts, Decision, ScheduleActivity, Timeout};
pub use dispatch::{ChildPolicy, DispatchError, TaskDispatch};
pub use engine::WorkflowEngine;
pub use error::{Error, Result};
pub use runtime::{RuntimeConfig, WorkflowBuilder, WorkflowRuntime};
pub use service::{StartOptions, WorkflowService, WorkflowServiceConfig};
pub use standalone::run_standalone;
pub use task::{ActivityId, TaskMeta, TypeRef, WorkflowExecution};
pub use workflow::{
    Arguments, Interrupt, RetryCause, WorkflowContext, WorkflowDefinition,
    WorkflowDefinitionBuilder,
};

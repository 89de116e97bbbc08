//! Activities: the side-effecting units of work a workflow schedules.
//!
//! - [`ActivityHandler`]: trait executed by the activity worker
//! - [`ActivityContext`]: per-attempt metadata for correlation and idempotency
//! - [`ActivityDefinition`]: `name@version`, retry budget and handler

mod context;
mod definition;
mod handler;

pub use context::ActivityContext;
pub use definition::{ActivityDefinition, ActivityOptions, ActivitySet};
pub use handler::{ActivityError, ActivityHandler, FnActivity};

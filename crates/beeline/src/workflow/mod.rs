//! Workflow definitions and the replay protocol workflow code runs on.
//!
//! - [`WorkflowDefinition`]: versioned entrypoints and the activity set
//! - [`WorkflowContext`]: durable activity calls and timers for one pass
//! - [`Interrupt`]: how a pass unwinds when it cannot continue

mod arguments;
mod context;
mod definition;
mod interrupt;

pub use arguments::Arguments;
pub use context::WorkflowContext;
pub use definition::{EntrypointFn, WorkflowDefinition, WorkflowDefinitionBuilder};
pub use interrupt::{Interrupt, RetryCause};

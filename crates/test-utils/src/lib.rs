//! Shared test support for beeline: an in-memory task-dispatch service and
//! a builder for raw histories.

pub mod history;
pub mod memory;

pub use history::HistoryBuilder;
pub use memory::{ExecutionStatus, MemoryDispatch};

/// Initialize tracing for tests. Safe to call multiple times.
///
/// The `try_init()` call is idempotent; later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("beeline=debug")
        .with_test_writer()
        .try_init();
}

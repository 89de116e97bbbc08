//! Error types for beeline.

use thiserror::Error;

use crate::codec::CodecError;
use crate::dispatch::DispatchError;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in beeline operations.
///
/// Replay control flow never surfaces here: suspension, retries and
/// workflow failures travel as [`Interrupt`](crate::Interrupt) values and
/// are turned into decisions by the decider.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize a JSON value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The payload codec rejected a value.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The task-dispatch service call failed.
    ///
    /// Preserves the full [`DispatchError`] so callers can distinguish
    /// transport faults from service rejections.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// No entrypoint is registered for the requested workflow version.
    #[error("no entrypoint registered for {workflow}@{version}")]
    UnknownEntrypointVersion {
        /// The workflow type name.
        workflow: String,
        /// The requested version.
        version: String,
    },

    /// An entrypoint version was registered more than once.
    #[error("duplicate entrypoint registration: {workflow}@{version}")]
    DuplicateEntrypoint {
        /// The workflow type name.
        workflow: String,
        /// The duplicated version.
        version: String,
    },

    /// An activity `name@version` was registered more than once.
    #[error("duplicate activity registration: {0}")]
    DuplicateActivity(String),
}

impl Error {
    /// Create an unknown-entrypoint error.
    pub fn unknown_entrypoint(workflow: impl Into<String>, version: impl Into<String>) -> Self {
        Error::UnknownEntrypointVersion {
            workflow: workflow.into(),
            version: version.into(),
        }
    }
}

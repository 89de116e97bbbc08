//! Activity handler trait for executing workflow side effects.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::context::ActivityContext;
use crate::workflow::Arguments;

/// Failure reported by an activity handler.
///
/// The message becomes the `reason` of the `ActivityTaskFailed` record; the
/// decider then reschedules the activity if its retry budget allows.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActivityError {
    message: String,
    details: Option<String>,
}

impl ActivityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    /// Attach free-form details, reported alongside the reason.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(error: serde_json::Error) -> Self {
        ActivityError::new(error.to_string())
    }
}

impl From<String> for ActivityError {
    fn from(message: String) -> Self {
        ActivityError::new(message)
    }
}

impl From<&str> for ActivityError {
    fn from(message: &str) -> Self {
        ActivityError::new(message)
    }
}

/// Handler executing one registered activity.
///
/// # Results
///
/// | Result | Meaning |
/// |--------|---------|
/// | `Ok(value)` | Activity completed; `value` is returned to the workflow |
/// | `Err(_)` | Attempt failed; the decider decides whether to retry |
///
/// Handlers are never retried locally. Each retry arrives as a new activity
/// task with a higher attempt number, so handlers have at-least-once
/// semantics and should use [`ActivityContext::idempotency_key()`] when
/// calling external services.
///
/// # Example
///
/// ```ignore
/// struct ChargeCard {
///     payments: PaymentClient,
/// }
///
/// #[async_trait]
/// impl ActivityHandler for ChargeCard {
///     async fn handle(&self, args: Arguments, ctx: &ActivityContext) -> Result<Value, ActivityError> {
///         let amount = args.get(0).and_then(Value::as_u64).ok_or("missing amount")?;
///         let receipt = self
///             .payments
///             .charge(amount, ctx.idempotency_key())
///             .await
///             .map_err(|e| ActivityError::new(e.to_string()))?;
///         Ok(json!({ "receipt": receipt.id }))
///     }
/// }
/// ```
#[async_trait]
pub trait ActivityHandler: Send + Sync + 'static {
    /// Execute one attempt.
    async fn handle(&self, args: Arguments, ctx: &ActivityContext) -> Result<Value, ActivityError>;
}

/// Adapts an async closure into an [`ActivityHandler`].
pub struct FnActivity<F>(F);

impl<F> FnActivity<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F>
where
    F: Fn(Arguments, ActivityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
{
    async fn handle(&self, args: Arguments, ctx: &ActivityContext) -> Result<Value, ActivityError> {
        (self.0)(args, ctx.clone()).await
    }
}

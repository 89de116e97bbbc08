//! Workflow definitions and their registration builder.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::context::WorkflowContext;
use super::interrupt::Interrupt;
use crate::activity::{ActivityDefinition, ActivitySet};
use crate::error::{Error, Result};

/// A versioned workflow entrypoint.
///
/// Receives the per-pass context and the decoded workflow input
/// (`Value::Null` when the run was started without one). Re-executed from
/// the top on every decision task, so it must only branch on its input and
/// on values returned by the context.
pub type EntrypointFn =
    Arc<dyn Fn(&mut WorkflowContext<'_>, Value) -> std::result::Result<Value, Interrupt> + Send + Sync>;

/// Static description of one workflow type.
///
/// Immutable once built. Shared by the decider (entrypoint selection, retry
/// budgets), the activity worker (handler lookup) and the administrative
/// service (version checks).
#[derive(Clone)]
pub struct WorkflowDefinition {
    name: String,
    domain: String,
    tasklist: String,
    entrypoints: HashMap<String, EntrypointFn>,
    activities: ActivitySet,
}

impl WorkflowDefinition {
    /// Start declaring a workflow type.
    pub fn builder(
        name: impl Into<String>,
        domain: impl Into<String>,
        tasklist: impl Into<String>,
    ) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            name: name.into(),
            domain: domain.into(),
            tasklist: tasklist.into(),
            entrypoints: HashMap::new(),
            activities: ActivitySet::default(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn tasklist(&self) -> &str {
        &self.tasklist
    }

    /// The entrypoint registered under `version`.
    pub fn entrypoint(&self, version: &str) -> Option<&EntrypointFn> {
        self.entrypoints.get(version)
    }

    /// Registered entrypoint versions, sorted.
    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = self.entrypoints.keys().map(String::as_str).collect();
        versions.sort_unstable();
        versions
    }

    /// Exact `name@version` activity lookup.
    pub fn activity(&self, name: &str, version: &str) -> Option<&ActivityDefinition> {
        self.activities.get(name, version)
    }

    pub fn activities(&self) -> &ActivitySet {
        &self.activities
    }

    /// Every activity type with its options, for registering them with the
    /// service.
    pub fn activity_types(&self) -> Vec<&ActivityDefinition> {
        self.activities.definitions()
    }
}

impl fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("tasklist", &self.tasklist)
            .field("versions", &self.versions())
            .field("activities", &self.activities)
            .finish()
    }
}

/// Builder for a [`WorkflowDefinition`].
///
/// Duplicate registrations are recorded and reported by [`build`](Self::build).
///
/// # Example
///
/// ```
/// use beeline::{ActivityDefinition, Arguments, WorkflowDefinition};
/// use serde_json::Value;
///
/// let definition = WorkflowDefinition::builder("Checkout", "shop", "shop-tasks")
///     .activity(
///         ActivityDefinition::from_fn("reserve", "1.0", |args: Arguments, _ctx| async move {
///             Ok(args.to_value())
///         })
///         .max_retries(3),
///     )
///     .entrypoint("1.0", |ctx, input| {
///         let reserved = ctx.call_activity("reserve", "1.0", Arguments::new().arg(input))?;
///         Ok(reserved)
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(definition.versions(), vec!["1.0"]);
/// ```
pub struct WorkflowDefinitionBuilder {
    name: String,
    domain: String,
    tasklist: String,
    entrypoints: HashMap<String, EntrypointFn>,
    activities: ActivitySet,
    error: Option<Error>,
}

impl WorkflowDefinitionBuilder {
    /// Register the entrypoint run for executions started with `version`.
    pub fn entrypoint<F>(mut self, version: impl Into<String>, entrypoint: F) -> Self
    where
        F: Fn(&mut WorkflowContext<'_>, Value) -> std::result::Result<Value, Interrupt>
            + Send
            + Sync
            + 'static,
    {
        let version = version.into();
        if self.entrypoints.contains_key(&version) {
            self.error.get_or_insert(Error::DuplicateEntrypoint {
                workflow: self.name.clone(),
                version,
            });
            return self;
        }
        self.entrypoints.insert(version, Arc::new(entrypoint));
        self
    }

    /// Register an activity the workflow may call.
    pub fn activity(mut self, definition: ActivityDefinition) -> Self {
        if let Err(e) = self.activities.insert(definition) {
            self.error.get_or_insert(e);
        }
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(WorkflowDefinition {
            name: self.name,
            domain: self.domain,
            tasklist: self.tasklist,
            entrypoints: self.entrypoints,
            activities: self.activities,
        })
    }
}

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::context::ActivityContext;
use super::handler::{ActivityError, ActivityHandler, FnActivity};
use crate::decision::ActivityTimeouts;
use crate::error::Error;
use crate::task::TypeRef;
use crate::workflow::Arguments;

/// Scheduling options of an activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityOptions {
    /// Retries allowed after the first attempt fails or times out.
    ///
    /// Default: 0 (a single attempt).
    pub max_retries: u32,

    /// Service-side timeouts sent with every attempt.
    pub timeouts: ActivityTimeouts,

    /// Task priority. Default: 0.
    pub priority: i32,

    /// Tasklist override. `None` routes to the workflow's tasklist.
    pub tasklist: Option<String>,
}

/// A registered activity: `name@version`, its options and its handler.
#[derive(Clone)]
pub struct ActivityDefinition {
    activity_type: TypeRef,
    options: ActivityOptions,
    handler: Arc<dyn ActivityHandler>,
}

impl ActivityDefinition {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        handler: impl ActivityHandler,
    ) -> Self {
        Self {
            activity_type: TypeRef::new(name, version),
            options: ActivityOptions::default(),
            handler: Arc::new(handler),
        }
    }

    /// Register an async closure as the handler.
    pub fn from_fn<F, Fut>(name: impl Into<String>, version: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arguments, ActivityContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
    {
        Self::new(name, version, FnActivity::new(f))
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    pub fn timeouts(mut self, timeouts: ActivityTimeouts) -> Self {
        self.options.timeouts = timeouts;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn tasklist(mut self, tasklist: impl Into<String>) -> Self {
        self.options.tasklist = Some(tasklist.into());
        self
    }

    pub fn activity_type(&self) -> &TypeRef {
        &self.activity_type
    }

    pub fn options(&self) -> &ActivityOptions {
        &self.options
    }

    pub(crate) fn handler(&self) -> Arc<dyn ActivityHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for ActivityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityDefinition")
            .field("activity_type", &self.activity_type)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// The activities a workflow may call, keyed by `name@version`.
#[derive(Debug, Clone, Default)]
pub struct ActivitySet {
    activities: HashMap<TypeRef, ActivityDefinition>,
}

impl ActivitySet {
    pub(crate) fn insert(&mut self, definition: ActivityDefinition) -> Result<(), Error> {
        let key = definition.activity_type.clone();
        if self.activities.contains_key(&key) {
            return Err(Error::DuplicateActivity(key.to_string()));
        }
        self.activities.insert(key, definition);
        Ok(())
    }

    /// Exact `name@version` lookup.
    pub fn get(&self, name: &str, version: &str) -> Option<&ActivityDefinition> {
        self.activities.get(&TypeRef::new(name, version))
    }

    /// All definitions, ordered by name then version.
    pub fn definitions(&self) -> Vec<&ActivityDefinition> {
        let mut definitions: Vec<_> = self.activities.values().collect();
        definitions.sort_by(|a, b| {
            (&a.activity_type.name, &a.activity_type.version)
                .cmp(&(&b.activity_type.name, &b.activity_type.version))
        });
        definitions
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

#![forbid(unsafe_code)]

//! Name-keyed registry of command factories.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::command::{Command, CommandFactory};
use crate::error::CommandError;

/// Factories keyed by command name.
///
/// Registration is first-wins: registering a name a second time is a no-op.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    factories: HashMap<String, CommandFactory>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`.
    ///
    /// Returns `false` (and keeps the existing factory) if the name is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> bool
    where
        F: Fn(&Value) -> Result<Box<dyn Command>, CommandError> + Send + Sync + 'static,
    {
        self.register_shared(name, Arc::new(factory))
    }

    /// Register an already shared factory.
    pub fn register_shared(&mut self, name: impl Into<String>, factory: CommandFactory) -> bool {
        let name = name.into();
        if self.factories.contains_key(&name) {
            trace!(command = %name, "command already registered; keeping first factory");
            return false;
        }
        debug!(command = %name, "command registered");
        self.factories.insert(name, factory);
        true
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate a fresh command, or `None` if `name` is unregistered.
    pub fn create(
        &self,
        name: &str,
        payload: &Value,
    ) -> Option<Result<Box<dyn Command>, CommandError>> {
        self.factories.get(name).map(|factory| factory(payload))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

//! Registration table of callable actions
//!
//! Built once before the configuration is compiled. Each entry binds a name to
//! a handler closure plus its metadata; schemes refer to actions by name only.

use super::ActivationContext;
use crate::config::ConfigError;
use crate::input::Phase;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Failure reported by an action handler
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ActionError(String);

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type ActionHandler =
    Arc<dyn Fn(&ActivationContext<'_>) -> Result<(), ActionError> + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredAction {
    pub name: String,
    pub description: String,
    /// Phases used by maps that do not list their own
    pub default_phases: BTreeSet<Phase>,
    pub handler: ActionHandler,
}

impl fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("default_phases", &self.default_phases)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, RegisteredAction>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        default_phases: impl IntoIterator<Item = Phase>,
        handler: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&ActivationContext<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.actions.contains_key(&name) {
            return Err(ConfigError::DuplicateAction(name));
        }
        debug!("Registering action {}", name);
        self.actions.insert(
            name.clone(),
            RegisteredAction {
                name,
                description: description.into(),
                default_phases: default_phases.into_iter().collect(),
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredAction> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.actions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

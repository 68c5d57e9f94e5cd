// SPDX-License-Identifier: MIT

//! Component registries
//!
//! Maps string type names to node, guard and hook implementations. There is
//! deliberately no process-wide singleton: a [`ComponentRegistry`] is built
//! during startup, then frozen behind an `Arc` and handed to each
//! orchestrator, so graphs with different component sets can coexist in one
//! process. Registration is not idempotent: re-registering a name is an
//! error and the existing entry is left untouched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::hooks::{Plugin, Trigger};
use crate::node::NodeImplementation;
use crate::router::GuardPredicate;

/// A single name -> implementation namespace, preserving registration order.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: HashMap<String, Arc<T>>,
    order: Vec<String>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register an implementation under `name`. Fails with `DuplicateType`
    /// if the name is taken; the existing registration is unchanged.
    pub fn register(&mut self, name: impl Into<String>, value: Arc<T>) -> Result<(), EngineError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(EngineError::DuplicateType {
                kind: self.kind,
                name,
            });
        }
        self.order.push(name.clone());
        self.entries.insert(name, value);
        Ok(())
    }

    /// Look up an implementation by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<T>, EngineError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownType {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterate entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).map(|v| (name.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three independent component namespaces the engine consumes.
pub struct ComponentRegistry {
    pub nodes: Registry<dyn NodeImplementation>,
    pub guards: Registry<dyn GuardPredicate>,
    pub triggers: Registry<dyn Trigger>,
    pub plugins: Registry<dyn Plugin>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            nodes: Registry::new("node"),
            guards: Registry::new("guard"),
            triggers: Registry::new("trigger"),
            plugins: Registry::new("plugin"),
        }
    }

    /// Freeze the registry for sharing with in-flight runs.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// SPDX-License-Identifier: MIT

//! Triggers and plugins
//!
//! Hooks are ordered, best-effort callbacks around node execution and run
//! lifecycle. They never mutate state directly: an `after` trigger may
//! return an amendment, which the orchestrator applies itself so history
//! keeps node outputs and hook interventions apart. A failing hook is
//! logged and swallowed unless it declares itself critical.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::graph::Node;
use crate::node::NodeExecutionResult;
use crate::state::StateContainer;

/// Per-node hook. `before` may veto the node (recorded as a skip);
/// `after` may request a state amendment.
pub trait Trigger: Send + Sync {
    fn name(&self) -> &str;

    fn before(
        &self,
        node: &Node,
        state: &StateContainer,
        ctx: &ExecutionContext,
    ) -> Result<bool, EngineError> {
        let _ = (node, state, ctx);
        Ok(true)
    }

    fn after(
        &self,
        node: &Node,
        state: &StateContainer,
        result: &NodeExecutionResult,
        ctx: &ExecutionContext,
    ) -> Result<Option<Map<String, Value>>, EngineError> {
        let _ = (node, state, result, ctx);
        Ok(None)
    }

    /// Critical hooks abort the run when they fail
    fn critical(&self) -> bool {
        false
    }
}

/// Run-scoped hook for cross-cutting concerns spanning the whole run.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn on_run_start(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let _ = ctx;
        Ok(())
    }

    fn on_run_end(
        &self,
        ctx: &ExecutionContext,
        final_state: &StateContainer,
    ) -> Result<(), EngineError> {
        let _ = (ctx, final_state);
        Ok(())
    }

    fn on_error(&self, ctx: &ExecutionContext, error: &EngineError) -> Result<(), EngineError> {
        let _ = (ctx, error);
        Ok(())
    }

    fn critical(&self) -> bool {
        false
    }
}

/// An amendment requested by a trigger's `after`, tagged with the hook that
/// asked for it.
pub struct Amendment {
    pub hook_name: String,
    pub delta: Map<String, Value>,
}

/// The ordered hooks attached to one orchestrator.
#[derive(Clone, Default)]
pub struct HookSet {
    triggers: Vec<Arc<dyn Trigger>>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Run all `before` triggers in order. Returns false if any hook vetoed
    /// the node. A failing non-critical hook counts as "allow".
    pub fn before_node(
        &self,
        node: &Node,
        state: &StateContainer,
        ctx: &ExecutionContext,
    ) -> Result<bool, EngineError> {
        let mut allow = true;
        for trigger in &self.triggers {
            match trigger.before(node, state, ctx) {
                Ok(true) => {}
                Ok(false) => allow = false,
                Err(e) if trigger.critical() => return Err(e),
                Err(e) => {
                    log::warn!("Trigger '{}' before hook failed: {}", trigger.name(), e);
                }
            }
        }
        Ok(allow)
    }

    /// Run all `after` triggers in order, collecting requested amendments.
    pub fn after_node(
        &self,
        node: &Node,
        state: &StateContainer,
        result: &NodeExecutionResult,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Amendment>, EngineError> {
        let mut amendments = Vec::new();
        for trigger in &self.triggers {
            match trigger.after(node, state, result, ctx) {
                Ok(Some(delta)) => amendments.push(Amendment {
                    hook_name: trigger.name().to_string(),
                    delta,
                }),
                Ok(None) => {}
                Err(e) if trigger.critical() => return Err(e),
                Err(e) => {
                    log::warn!("Trigger '{}' after hook failed: {}", trigger.name(), e);
                }
            }
        }
        Ok(amendments)
    }

    pub fn run_start(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_run_start(ctx) {
                if plugin.critical() {
                    return Err(e);
                }
                log::warn!("Plugin '{}' on_run_start failed: {}", plugin.name(), e);
            }
        }
        Ok(())
    }

    pub fn run_end(&self, ctx: &ExecutionContext, final_state: &StateContainer) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_run_end(ctx, final_state) {
                log::warn!("Plugin '{}' on_run_end failed: {}", plugin.name(), e);
            }
        }
    }

    pub fn run_error(&self, ctx: &ExecutionContext, error: &EngineError) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_error(ctx, error) {
                log::warn!("Plugin '{}' on_error failed: {}", plugin.name(), e);
            }
        }
    }
}

// SPDX-License-Identifier: MIT

//! Execution modes and capability dispatch
//!
//! This is the single place that decides which node entry point gets called.
//! A capability/mode mismatch is a loud, immediate [`EngineError::ModeMismatch`]:
//! the engine never spins up a hidden runtime to run an async node from a
//! blocking call site, and never blocks a scheduler thread to run a sync
//! node from a suspending one.

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::graph::Node;
use crate::node::{NodeExecutionResult, NodeImplementation};
use crate::state::StateContainer;

/// The execution strategy, fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Blocking execution on the calling thread; runs Sync/Both nodes only
    Sync,
    /// Cooperative execution; node work is a suspension point; runs
    /// Async/Both nodes only
    Async,
    /// Dispatches each node to the primitive entry point matching its
    /// capability; never bridges a mismatch
    Hybrid,
}

impl ExecutionMode {
    /// Whether this mode may drive the blocking run loop
    pub fn supports_blocking_loop(self) -> bool {
        matches!(self, Self::Sync | Self::Hybrid)
    }

    /// Whether this mode may drive the suspending run loop
    pub fn supports_suspending_loop(self) -> bool {
        matches!(self, Self::Async | Self::Hybrid)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Run one node from a blocking call site.
pub fn run_node_blocking(
    mode: ExecutionMode,
    implementation: &dyn NodeImplementation,
    node: &Node,
    state: &StateContainer,
    ctx: &ExecutionContext,
) -> Result<NodeExecutionResult, EngineError> {
    if !mode.supports_blocking_loop() {
        return Err(EngineError::mode_mismatch(
            &node.id,
            format!("{} mode cannot drive a blocking call site", mode),
        ));
    }
    if !implementation.capability().supports_sync() {
        return Err(EngineError::mode_mismatch(
            &node.id,
            "async-only node invoked at a blocking call site; no event loop will be created to bridge it",
        ));
    }
    implementation.run_sync(node, state, ctx)
}

/// Run one node from a suspending call site. This is the run loop's only
/// suspension point.
pub async fn run_node_suspending(
    mode: ExecutionMode,
    implementation: &dyn NodeImplementation,
    node: &Node,
    state: &StateContainer,
    ctx: &ExecutionContext,
) -> Result<NodeExecutionResult, EngineError> {
    if !mode.supports_suspending_loop() {
        return Err(EngineError::mode_mismatch(
            &node.id,
            format!("{} mode cannot drive a suspending call site", mode),
        ));
    }

    let capability = implementation.capability();
    match mode {
        ExecutionMode::Async => {
            if !capability.supports_async() {
                return Err(EngineError::mode_mismatch(
                    &node.id,
                    "sync-only node invoked under async mode; the scheduler thread will not be blocked to bridge it",
                ));
            }
            implementation.run_async(node, state, ctx).await
        }
        ExecutionMode::Hybrid => {
            // Route to the matching primitive per node. Sync-only nodes get
            // their own entry point, not a bridged one.
            if capability.supports_async() {
                implementation.run_async(node, state, ctx).await
            } else {
                implementation.run_sync(node, state, ctx)
            }
        }
        ExecutionMode::Sync => unreachable!("rejected above"),
    }
}

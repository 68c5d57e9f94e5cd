// SPDX-License-Identifier: MIT

//! Node execution contract
//!
//! A node implementation declares which entry points it supports via
//! [`ExecutionCapability`] and exposes at most two of them: a blocking
//! `run_sync` and a suspending `run_async`. The execution mode dispatch in
//! [`crate::mode`] is the single place that decides which one is called;
//! implementations must never bridge one to the other themselves.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::graph::Node;
use crate::state::StateContainer;

/// Which entry points a node implementation supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionCapability {
    /// Only `run_sync` is implemented
    Sync,
    /// Only `run_async` is implemented
    Async,
    /// Both entry points are implemented
    Both,
}

impl ExecutionCapability {
    pub fn supports_sync(self) -> bool {
        matches!(self, Self::Sync | Self::Both)
    }

    pub fn supports_async(self) -> bool {
        matches!(self, Self::Async | Self::Both)
    }
}

/// What a node execution produced: a set of state writes and, optionally,
/// an explicit next-node override that bypasses router evaluation.
#[derive(Debug, Clone, Default)]
pub struct NodeExecutionResult {
    /// Key/value writes merged into the live state; this is also the delta
    /// recorded in history for the step.
    pub updates: Map<String, Value>,
    /// The sanctioned escape hatch from declarative routing: when set, these
    /// node ids are used verbatim instead of asking the router.
    pub explicit_next: Option<Vec<String>>,
}

impl NodeExecutionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.updates.insert(key.into(), value);
        self
    }

    pub fn with_next(mut self, next: Vec<String>) -> Self {
        self.explicit_next = Some(next);
        self
    }
}

/// Retry policy owned by a node (the engine never retries on its own)
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Base backoff; doubled after each failed attempt
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Backoff before the given retry attempt (1-based, attempt 1 is the
    /// first retry). Exponential: base * 2^(attempt-1).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// The execution contract a node must satisfy.
///
/// Implementations are registered by type name in a
/// [`crate::registry::ComponentRegistry`] and shared across graphs; per-node
/// configuration arrives through the [`Node`] argument.
#[async_trait]
pub trait NodeImplementation: Send + Sync {
    /// Which entry points this implementation supports
    fn capability(&self) -> ExecutionCapability;

    /// Node-owned retry policy; `None` means fail on first error
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Blocking entry point. Called only when `capability().supports_sync()`.
    fn run_sync(
        &self,
        node: &Node,
        state: &StateContainer,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, EngineError> {
        let _ = (state, ctx);
        Err(EngineError::node(
            &node.id,
            "run_sync called on an implementation that does not provide it",
        ))
    }

    /// Suspending entry point. Called only when `capability().supports_async()`.
    /// This is the run loop's only suspension point.
    async fn run_async(
        &self,
        node: &Node,
        state: &StateContainer,
        ctx: &ExecutionContext,
    ) -> Result<NodeExecutionResult, EngineError> {
        let _ = (state, ctx);
        Err(EngineError::node(
            &node.id,
            "run_async called on an implementation that does not provide it",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_support() {
        assert!(ExecutionCapability::Sync.supports_sync());
        assert!(!ExecutionCapability::Sync.supports_async());
        assert!(ExecutionCapability::Async.supports_async());
        assert!(!ExecutionCapability::Async.supports_sync());
        assert!(ExecutionCapability::Both.supports_sync());
        assert!(ExecutionCapability::Both.supports_async());
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        assert_eq!(policy.delay_before(1), Duration::from_millis(10));
        assert_eq!(policy.delay_before(2), Duration::from_millis(20));
        assert_eq!(policy.delay_before(3), Duration::from_millis(40));
    }

    #[test]
    fn test_result_builder() {
        let result = NodeExecutionResult::empty()
            .with_update("count", serde_json::json!(1))
            .with_next(vec!["b".to_string()]);
        assert_eq!(result.updates.get("count"), Some(&serde_json::json!(1)));
        assert_eq!(result.explicit_next, Some(vec!["b".to_string()]));
    }
}

// SPDX-License-Identifier: MIT

//! Typed error handling for stepgraph-rs
//!
//! One top-level error enum covers the whole engine. Build-time problems
//! (bad graph structure, registry misuse) and run-time problems (mode
//! mismatch, routing dead ends, step budget exhaustion) are distinct
//! variants so callers can match on the failure class.

use thiserror::Error;

/// Top-level error type for stepgraph-rs
#[derive(Debug, Error)]
pub enum EngineError {
    /// Structural graph defects, caught at build time, never at run time
    #[error("Validation error: {0}")]
    Validation(String),

    /// A node's execution capability does not match the active execution mode.
    /// This is always fatal and never bridged with a hidden runtime.
    #[error("Mode mismatch on node '{node_id}': {detail}")]
    ModeMismatch { node_id: String, detail: String },

    /// Lookup of an unregistered component type
    #[error("Unknown {kind} type '{name}'")]
    UnknownType { kind: &'static str, name: String },

    /// Re-registration of an already registered component type
    #[error("Duplicate {kind} type '{name}'")]
    DuplicateType { kind: &'static str, name: String },

    /// Routing reached a non-terminal node with no eligible outgoing edge
    #[error("No eligible edge out of node '{node_id}' (state: {state})")]
    NoEligibleEdge {
        node_id: String,
        state: serde_json::Value,
    },

    /// The run exceeded its step budget without reaching a terminal node
    #[error("Step limit of {limit} exceeded at node '{node_id}'")]
    StepLimitExceeded { limit: u64, node_id: String },

    /// A node's own execution failed (after exhausting its retry policy)
    #[error("Node '{node_id}' failed: {message}")]
    Node { node_id: String, message: String },

    /// The run was cancelled via its cancellation token or deadline
    #[error("Run cancelled at node '{node_id}'")]
    Cancelled { node_id: String },

    /// Parallel branch join found conflicting writes under fail-on-conflict merge
    #[error("Merge conflict on key '{key}' joining parallel branches of node '{node_id}'")]
    MergeConflict { node_id: String, key: String },

    /// Checkpoint store failure (logged by the orchestrator, never fatal to a run)
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors (graph descriptors)
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a node execution error
    pub fn node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Node {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Create a mode mismatch error
    pub fn mode_mismatch(node_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ModeMismatch {
            node_id: node_id.into(),
            detail: detail.into(),
        }
    }

    /// True for the variants that terminate a run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Checkpoint(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = EngineError::UnknownType {
            kind: "node",
            name: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown node type 'missing'");

        let err = EngineError::DuplicateType {
            kind: "guard",
            name: "twice".to_string(),
        };
        assert_eq!(err.to_string(), "Duplicate guard type 'twice'");

        let err = EngineError::StepLimitExceeded {
            limit: 100,
            node_id: "loop".to_string(),
        };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("loop"));
    }

    #[test]
    fn test_checkpoint_errors_are_not_fatal() {
        assert!(!EngineError::Checkpoint("disk full".to_string()).is_fatal());
        assert!(EngineError::validation("bad graph").is_fatal());
        assert!(EngineError::mode_mismatch("n", "async-only").is_fatal());
    }
}

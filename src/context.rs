// SPDX-License-Identifier: MIT

//! Per-run execution context

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Read-only context created once per orchestrator run and handed to every
/// node execution and every hook.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Name of the workflow graph being executed
    pub workflow_id: String,
    /// Unique id for this run
    pub execution_id: String,
    /// Run-level configuration values
    pub config: Map<String, Value>,
    /// When the run started
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: Uuid::new_v4().to_string(),
            config: Map::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_ids_are_unique() {
        let a = ExecutionContext::new("wf");
        let b = ExecutionContext::new("wf");
        assert_ne!(a.execution_id, b.execution_id);
        assert_eq!(a.workflow_id, "wf");
    }
}

// SPDX-License-Identifier: MIT

//! Graph descriptor types
//!
//! The raw, serializable shape a config source supplies. How a descriptor
//! gets produced (YAML files, inline JSON, a builder API) is out of scope;
//! these types just have to deserialize from any of them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level description of a workflow graph
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GraphDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Node id execution starts at
    pub entry_point: String,
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
    #[serde(default)]
    pub edges: Vec<EdgeDescriptor>,
}

/// One node in the graph
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeDescriptor {
    /// Unique node identifier
    pub id: String,
    /// Registered implementation type name
    #[serde(rename = "type")]
    pub type_name: String,
    /// Arbitrary per-node configuration handed to the implementation
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Declared end of the workflow; routing stops here without error
    #[serde(default)]
    pub terminal: bool,
    /// Run multi-edge fan-out from this node as concurrent branches
    #[serde(default)]
    pub parallel: bool,
}

/// One transition between two nodes, optionally gated.
///
/// A guard is either an inline `when` expression or the name of a
/// registered predicate; declaring both on one edge is a validation error.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EdgeDescriptor {
    pub from: String,
    pub to: String,
    /// Inline guard expression, e.g. `count >= 3`
    pub when: Option<String>,
    /// Name of a registered guard predicate
    pub guard: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_yaml() {
        let yaml = r#"
            name: review
            entry_point: classify
            nodes:
              - id: classify
                type: classifier
              - id: triage
                type: triager
                terminal: true
                config:
                  depth: 3
            edges:
              - from: classify
                to: triage
                when: "intent == 'bug'"
        "#;
        let descriptor: GraphDescriptor = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(descriptor.name, "review");
        assert_eq!(descriptor.entry_point, "classify");
        assert_eq!(descriptor.nodes.len(), 2);
        assert_eq!(descriptor.nodes[0].type_name, "classifier");
        assert!(!descriptor.nodes[0].terminal);
        assert!(descriptor.nodes[1].terminal);
        assert_eq!(
            descriptor.nodes[1].config.get("depth"),
            Some(&serde_json::json!(3))
        );
        assert_eq!(descriptor.edges[0].when.as_deref(), Some("intent == 'bug'"));
        assert!(descriptor.edges[0].guard.is_none());
    }

    #[test]
    fn test_descriptor_defaults() {
        let yaml = r#"
            name: minimal
            entry_point: only
            nodes:
              - id: only
                type: noop
                terminal: true
        "#;
        let descriptor: GraphDescriptor = serde_yaml::from_str(yaml).unwrap();

        assert!(descriptor.edges.is_empty());
        assert!(descriptor.description.is_empty());
        assert!(!descriptor.nodes[0].parallel);
        assert!(descriptor.nodes[0].config.is_empty());
    }

    #[test]
    fn test_named_guard_edge() {
        let yaml = r#"
            from: a
            to: b
            guard: has_budget
        "#;
        let edge: EdgeDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(edge.guard.as_deref(), Some("has_budget"));
        assert!(edge.when.is_none());
    }
}

// SPDX-License-Identifier: MIT

//! Immutable graph model
//!
//! Built once from a [`GraphDescriptor`], validated, then shared read-only
//! across any number of runs. Cycles are allowed (iterative workflows); the
//! orchestrator's step budget guarantees termination.

use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};

use super::types::{EdgeDescriptor, GraphDescriptor, NodeDescriptor};
use crate::condition::{self, Expression};
use crate::error::EngineError;

/// A node as the engine sees it after build
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub type_name: String,
    pub config: Map<String, Value>,
    pub terminal: bool,
    pub parallel: bool,
}

impl Node {
    fn from_descriptor(descriptor: &NodeDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            type_name: descriptor.type_name.clone(),
            config: descriptor.config.clone(),
            terminal: descriptor.terminal,
            parallel: descriptor.parallel,
        }
    }
}

/// An edge guard: a pre-parsed inline expression or a reference to a
/// registered predicate (resolved when an orchestrator is constructed).
#[derive(Debug, Clone)]
pub enum GuardSpec {
    Expression(Expression),
    Named(String),
}

/// A possible transition between two nodes
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub guard: Option<GuardSpec>,
}

/// The validated, immutable graph
#[derive(Debug, Clone)]
pub struct GraphModel {
    pub name: String,
    pub description: String,
    nodes: HashMap<String, Node>,
    /// Declaration order matters: the router walks edges in this order
    edges: Vec<Edge>,
    entry_point: String,
}

impl GraphModel {
    /// Build and validate a graph. Unreachable nodes are logged as warnings.
    pub fn build(descriptor: &GraphDescriptor) -> Result<Self, EngineError> {
        Self::build_inner(descriptor, false)
    }

    /// Build with unreachable nodes treated as fatal
    pub fn build_strict(descriptor: &GraphDescriptor) -> Result<Self, EngineError> {
        Self::build_inner(descriptor, true)
    }

    fn build_inner(descriptor: &GraphDescriptor, strict: bool) -> Result<Self, EngineError> {
        let mut nodes: HashMap<String, Node> = HashMap::new();
        for node_def in &descriptor.nodes {
            if node_def.id.is_empty() {
                return Err(EngineError::validation("node with empty id"));
            }
            if nodes.contains_key(&node_def.id) {
                return Err(EngineError::validation(format!(
                    "duplicate node id '{}'",
                    node_def.id
                )));
            }
            nodes.insert(node_def.id.clone(), Node::from_descriptor(node_def));
        }

        if !nodes.contains_key(&descriptor.entry_point) {
            return Err(EngineError::validation(format!(
                "entry point '{}' is not a node",
                descriptor.entry_point
            )));
        }

        let mut edges = Vec::with_capacity(descriptor.edges.len());
        for edge_def in &descriptor.edges {
            edges.push(Self::build_edge(edge_def, &nodes)?);
        }

        let graph = Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            nodes,
            edges,
            entry_point: descriptor.entry_point.clone(),
        };

        let unreachable = graph.unreachable_nodes();
        if !unreachable.is_empty() {
            if strict {
                return Err(EngineError::validation(format!(
                    "unreachable nodes: {:?}",
                    unreachable
                )));
            }
            log::warn!(
                "Graph '{}' has unreachable nodes: {:?}",
                graph.name,
                unreachable
            );
        }

        Ok(graph)
    }

    fn build_edge(
        edge_def: &EdgeDescriptor,
        nodes: &HashMap<String, Node>,
    ) -> Result<Edge, EngineError> {
        if !nodes.contains_key(&edge_def.from) {
            return Err(EngineError::validation(format!(
                "edge references unknown 'from' node '{}'",
                edge_def.from
            )));
        }
        if !nodes.contains_key(&edge_def.to) {
            return Err(EngineError::validation(format!(
                "edge references unknown 'to' node '{}'",
                edge_def.to
            )));
        }

        let guard = match (&edge_def.when, &edge_def.guard) {
            (Some(_), Some(_)) => {
                return Err(EngineError::validation(format!(
                    "edge {} -> {} declares both 'when' and 'guard'",
                    edge_def.from, edge_def.to
                )));
            }
            (Some(expr), None) => Some(GuardSpec::Expression(condition::parse(expr)?)),
            (None, Some(name)) => Some(GuardSpec::Named(name.clone())),
            (None, None) => None,
        };

        Ok(Edge {
            from: edge_def.from.clone(),
            to: edge_def.to.clone(),
            guard,
        })
    }

    /// Node ids not reachable from the entry point by following edges
    fn unreachable_nodes(&self) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(self.entry_point.as_str());
        queue.push_back(self.entry_point.as_str());

        while let Some(current) = queue.pop_front() {
            for edge in self.edges.iter().filter(|e| e.from == current) {
                if seen.insert(edge.to.as_str()) {
                    queue.push_back(edge.to.as_str());
                }
            }
        }

        let mut missing: Vec<String> = self
            .nodes
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();
        missing.sort();
        missing
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes, in no particular order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Outgoing edges of a node, in declaration order
    pub fn edges_from<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Read-only projection of the graph structure for external rendering
    pub fn export_visualization(&self) -> Value {
        let mut node_list: Vec<Value> = self
            .nodes
            .values()
            .map(|n| {
                json!({
                    "id": n.id,
                    "type": n.type_name,
                    "terminal": n.terminal,
                    "parallel": n.parallel,
                    "entry": n.id == self.entry_point,
                })
            })
            .collect();
        node_list.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));

        let edge_list: Vec<Value> = self
            .edges
            .iter()
            .map(|e| {
                json!({
                    "from": e.from,
                    "to": e.to,
                    "conditional": e.guard.is_some(),
                })
            })
            .collect();

        json!({
            "name": self.name,
            "entry_point": self.entry_point,
            "nodes": node_list,
            "edges": edge_list,
        })
    }
}

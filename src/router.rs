// SPDX-License-Identifier: MIT

//! Edge routing
//!
//! Given the current node and state, the router walks that node's outgoing
//! edges in declaration order and returns every target whose guard passes.
//! A dead end on a node that is not declared terminal is a configuration
//! defect and fails loudly; silently stopping mid-graph is
//! indistinguishable from success.

use std::collections::HashMap;
use std::sync::Arc;

use crate::condition;
use crate::error::EngineError;
use crate::graph::{GraphModel, GuardSpec};
use crate::registry::Registry;
use crate::state::StateContainer;

/// Edge eligibility predicate. Must be pure: same state in, same answer out,
/// no side effects.
pub trait GuardPredicate: Send + Sync {
    fn evaluate(&self, state: &StateContainer) -> bool;
}

/// Resolves next node ids by evaluating edge guards.
pub struct Router {
    graph: Arc<GraphModel>,
    /// Named guards resolved once at construction; unknown names fail here,
    /// not mid-run.
    named: HashMap<String, Arc<dyn GuardPredicate>>,
}

impl Router {
    pub fn new(
        graph: Arc<GraphModel>,
        guards: &Registry<dyn GuardPredicate>,
    ) -> Result<Self, EngineError> {
        let mut named = HashMap::new();
        for edge in graph.edges() {
            if let Some(GuardSpec::Named(name)) = &edge.guard {
                if !named.contains_key(name) {
                    named.insert(name.clone(), guards.resolve(name)?);
                }
            }
        }
        Ok(Self { graph, named })
    }

    /// All eligible next node ids, in edge declaration order.
    pub fn resolve_next(
        &self,
        node_id: &str,
        state: &StateContainer,
    ) -> Result<Vec<String>, EngineError> {
        let mut next = Vec::new();
        for edge in self.graph.edges_from(node_id) {
            if self.guard_passes(edge.guard.as_ref(), state) {
                next.push(edge.to.clone());
            }
        }

        if next.is_empty() {
            let terminal = self.graph.node(node_id).map(|n| n.terminal).unwrap_or(false);
            if !terminal {
                return Err(EngineError::NoEligibleEdge {
                    node_id: node_id.to_string(),
                    state: state.to_json(),
                });
            }
        }

        Ok(next)
    }

    fn guard_passes(&self, guard: Option<&GuardSpec>, state: &StateContainer) -> bool {
        match guard {
            None => true,
            Some(GuardSpec::Expression(expr)) => condition::evaluate(expr, state),
            // Resolved eagerly in `new`; a miss here would be a bug, treat as
            // ineligible rather than panic
            Some(GuardSpec::Named(name)) => self
                .named
                .get(name)
                .map(|g| g.evaluate(state))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeDescriptor, GraphDescriptor, NodeDescriptor};
    use serde_json::{json, Map};

    fn build_graph(edges: Vec<(&str, &str, Option<&str>)>, terminal: &[&str]) -> Arc<GraphModel> {
        let mut ids: Vec<&str> = Vec::new();
        for (from, to, _) in &edges {
            for id in [from, to] {
                if !ids.contains(id) {
                    ids.push(id);
                }
            }
        }
        if ids.is_empty() {
            ids.push("a");
        }

        let descriptor = GraphDescriptor {
            name: "test".to_string(),
            description: String::new(),
            entry_point: ids[0].to_string(),
            nodes: ids
                .iter()
                .map(|id| NodeDescriptor {
                    id: id.to_string(),
                    type_name: "noop".to_string(),
                    config: Map::new(),
                    terminal: terminal.contains(id),
                    parallel: false,
                })
                .collect(),
            edges: edges
                .iter()
                .map(|(from, to, when)| EdgeDescriptor {
                    from: from.to_string(),
                    to: to.to_string(),
                    when: when.map(|s| s.to_string()),
                    guard: None,
                })
                .collect(),
        };
        Arc::new(GraphModel::build(&descriptor).unwrap())
    }

    fn state_with_count(count: i64) -> StateContainer {
        let mut state = StateContainer::empty();
        let mut delta = Map::new();
        delta.insert("count".to_string(), json!(count));
        state.apply(&delta);
        state
    }

    fn router(graph: Arc<GraphModel>) -> Router {
        Router::new(graph, &Registry::new("guard")).unwrap()
    }

    #[test]
    fn test_unconditional_edge() {
        let router = router(build_graph(vec![("a", "b", None)], &["b"]));
        let next = router.resolve_next("a", &StateContainer::empty()).unwrap();
        assert_eq!(next, vec!["b"]);
    }

    #[test]
    fn test_guarded_edges_in_declaration_order() {
        let router = router(build_graph(
            vec![
                ("b", "c", Some("count >= 3")),
                ("b", "b", Some("count < 3")),
            ],
            &[],
        ));

        assert_eq!(
            router.resolve_next("b", &state_with_count(1)).unwrap(),
            vec!["b"]
        );
        assert_eq!(
            router.resolve_next("b", &state_with_count(3)).unwrap(),
            vec!["c"]
        );
    }

    #[test]
    fn test_multi_target_fan_out_order() {
        let router = router(build_graph(
            vec![("a", "g", None), ("a", "h", None)],
            &["g", "h"],
        ));
        let next = router.resolve_next("a", &StateContainer::empty()).unwrap();
        assert_eq!(next, vec!["g", "h"]);
    }

    #[test]
    fn test_dead_end_on_non_terminal_node_fails() {
        let router = router(build_graph(
            vec![("a", "b", Some("count >= 99"))],
            &["b"],
        ));
        let err = router
            .resolve_next("a", &state_with_count(0))
            .unwrap_err();
        match err {
            EngineError::NoEligibleEdge { node_id, state } => {
                assert_eq!(node_id, "a");
                assert_eq!(state["count"], json!(0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_terminal_node_dead_end_is_completion() {
        let router = router(build_graph(vec![("a", "b", None)], &["b"]));
        let next = router.resolve_next("b", &StateContainer::empty()).unwrap();
        assert!(next.is_empty());
    }

    #[test]
    fn test_named_guard_resolution() {
        struct AlwaysTrue;
        impl GuardPredicate for AlwaysTrue {
            fn evaluate(&self, _state: &StateContainer) -> bool {
                true
            }
        }

        let descriptor = GraphDescriptor {
            name: "named".to_string(),
            description: String::new(),
            entry_point: "a".to_string(),
            nodes: vec![
                NodeDescriptor {
                    id: "a".to_string(),
                    type_name: "noop".to_string(),
                    config: Map::new(),
                    terminal: false,
                    parallel: false,
                },
                NodeDescriptor {
                    id: "b".to_string(),
                    type_name: "noop".to_string(),
                    config: Map::new(),
                    terminal: true,
                    parallel: false,
                },
            ],
            edges: vec![EdgeDescriptor {
                from: "a".to_string(),
                to: "b".to_string(),
                when: None,
                guard: Some("always".to_string()),
            }],
        };
        let graph = Arc::new(GraphModel::build(&descriptor).unwrap());

        // Unknown name fails at router construction
        let Err(err) = Router::new(graph.clone(), &Registry::new("guard")) else {
            panic!("router built despite the unregistered guard")
        };
        assert!(matches!(err, EngineError::UnknownType { .. }));

        let mut guards: Registry<dyn GuardPredicate> = Registry::new("guard");
        guards.register("always", Arc::new(AlwaysTrue)).unwrap();
        let router = Router::new(graph, &guards).unwrap();
        assert_eq!(
            router.resolve_next("a", &StateContainer::empty()).unwrap(),
            vec!["b"]
        );
    }

    #[test]
    fn test_determinism() {
        let router = router(build_graph(
            vec![("a", "g", Some("count > 0")), ("a", "h", None)],
            &["g", "h"],
        ));
        let state = state_with_count(5);
        let first = router.resolve_next("a", &state).unwrap();
        for _ in 0..10 {
            assert_eq!(router.resolve_next("a", &state).unwrap(), first);
        }
    }
}

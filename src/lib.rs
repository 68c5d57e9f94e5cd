// SPDX-License-Identifier: MIT

//! stepgraph-rs: a graph-based workflow execution engine.
//!
//! Workflows are directed graphs of typed nodes connected by guarded edges.
//! A shared state container flows through the graph; each node execution
//! merges a delta into it and the router picks the next node(s) by
//! evaluating edge guards against the result. Cycles are first-class and
//! bounded by a step budget.
//!
//! The engine is strict about execution modes: a run is driven either from
//! a blocking call site or from a suspending one, each node declares which
//! entry points it implements, and a mismatch fails immediately with
//! [`error::EngineError::ModeMismatch`]. No hidden event loop is ever
//! created to bridge the two worlds.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stepgraph_rs::graph::{GraphDescriptor, GraphModel};
//! use stepgraph_rs::mode::ExecutionMode;
//! use stepgraph_rs::orchestrator::Orchestrator;
//! use stepgraph_rs::registry::ComponentRegistry;
//!
//! # fn main() -> Result<(), stepgraph_rs::error::EngineError> {
//! let yaml = r#"
//! name: review
//! entry_point: classify
//! nodes:
//!   - id: classify
//!     type: classifier
//!   - id: done
//!     type: noop
//!     terminal: true
//! edges:
//!   - from: classify
//!     to: done
//! "#;
//! let descriptor: GraphDescriptor = serde_yaml::from_str(yaml)?;
//! let graph = Arc::new(GraphModel::build(&descriptor)?);
//!
//! let mut registry = ComponentRegistry::new();
//! // registry.nodes.register("classifier", Arc::new(Classifier))?;
//!
//! let orchestrator = Orchestrator::new(graph, &registry, ExecutionMode::Sync)?;
//! let mut session = orchestrator.session(serde_json::Map::new());
//! let status = orchestrator.run(&mut session)?;
//! println!("{:?}: {}", status, session.state().to_json());
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod mode;
pub mod node;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod state;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use context::ExecutionContext;
pub use error::EngineError;
pub use graph::{Edge, GraphDescriptor, GraphModel, Node};
pub use hooks::{HookSet, Plugin, Trigger};
pub use mode::ExecutionMode;
pub use node::{ExecutionCapability, NodeExecutionResult, NodeImplementation, RetryPolicy};
pub use orchestrator::{
    MergeStrategy, Orchestrator, RunConfig, RunSession, RunStatus, StepUpdate,
};
pub use registry::{ComponentRegistry, Registry};
pub use router::{GuardPredicate, Router};
pub use state::{History, HistoryEntry, HistoryKind, Snapshot, SnapshotStore, StateContainer};

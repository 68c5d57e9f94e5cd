// SPDX-License-Identifier: MIT

pub mod model;
pub mod types;

pub use model::{Edge, GraphModel, GuardSpec, Node};
pub use types::{EdgeDescriptor, GraphDescriptor, NodeDescriptor};

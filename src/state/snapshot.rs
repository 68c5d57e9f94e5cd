// SPDX-License-Identifier: MIT

//! Point-in-time state snapshots

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use super::StateContainer;

/// A named, restorable copy of state values
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    /// Revision of the container when the snapshot was taken
    pub revision: u64,
    pub values: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot store owned by a single run, addressable by id.
///
/// Restoring is performed by the run session, not here, so that the
/// synthetic history entry recording the rollback is appended in the same
/// place all other history bookkeeping happens.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    snapshots: HashMap<String, Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the container's current values under a fresh id
    pub fn take(&mut self, state: &StateContainer) -> String {
        let id = Uuid::new_v4().to_string();
        self.snapshots.insert(
            id.clone(),
            Snapshot {
                id: id.clone(),
                revision: state.revision(),
                values: state.values().clone(),
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn get(&self, id: &str) -> Option<&Snapshot> {
        self.snapshots.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.snapshots.keys()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

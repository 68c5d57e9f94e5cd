// SPDX-License-Identifier: MIT

//! Checkpoint persistence boundary
//!
//! The orchestrator calls [`CheckpointStore::save`] at configured step
//! intervals. Store failures are logged by the caller and never fail the
//! run. Real backends live outside the engine; the in-memory store here is
//! for tests and single-process use.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::EngineError;
use crate::state::{History, StateContainer};

/// Persistence interface for run state and history.
pub trait CheckpointStore: Send + Sync {
    fn save(
        &self,
        execution_id: &str,
        state: &StateContainer,
        history: &History,
    ) -> Result<(), EngineError>;

    fn load(&self, execution_id: &str) -> Result<Option<(StateContainer, History)>, EngineError>;
}

/// In-process checkpoint store backed by a mutexed map.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<String, (StateContainer, History)>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(
        &self,
        execution_id: &str,
        state: &StateContainer,
        history: &History,
    ) -> Result<(), EngineError> {
        self.entries
            .lock()
            .unwrap()
            .insert(execution_id.to_string(), (state.clone(), history.clone()));
        Ok(())
    }

    fn load(&self, execution_id: &str) -> Result<Option<(StateContainer, History)>, EngineError> {
        Ok(self.entries.lock().unwrap().get(execution_id).cloned())
    }
}

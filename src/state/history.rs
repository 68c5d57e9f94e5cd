// SPDX-License-Identifier: MIT

//! Append-only execution history
//!
//! One entry per node execution (plus synthetic entries for skips, snapshot
//! restores and hook amendments). Entries are never rewritten; the only
//! removal is FIFO trimming against the configured capacity.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// What produced a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    /// A node executed and its delta was merged
    Step,
    /// A trigger hook vetoed the node; no-op transition
    Skipped,
    /// State was replaced wholesale from a snapshot
    Restore,
    /// A hook-requested amendment, applied by the orchestrator
    Amendment,
}

/// One recorded state transition
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// State revision after this entry was applied
    pub revision: u64,
    /// The node (or synthetic source) that produced the entry
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: HistoryKind,
    /// The writes this entry merged; for `Restore`, the full replacement values
    pub delta: Map<String, Value>,
}

impl HistoryEntry {
    pub fn new(revision: u64, node_id: impl Into<String>, kind: HistoryKind, delta: Map<String, Value>) -> Self {
        Self {
            revision,
            node_id: node_id.into(),
            timestamp: Utc::now(),
            kind,
            delta,
        }
    }
}

/// Bounded ring buffer of history entries, oldest dropped first.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    max_len: usize,
}

pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

impl History {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len: max_len.max(1),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.max_len {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Reconstruct final values by replaying deltas in order from an initial
    /// value set. `Restore` entries replace the values wholesale; all other
    /// kinds merge their delta key by key.
    pub fn replay(&self, initial: &Map<String, Value>) -> Map<String, Value> {
        let mut values = initial.clone();
        for entry in &self.entries {
            match entry.kind {
                HistoryKind::Restore => {
                    values = entry.delta.clone();
                }
                _ => {
                    for (k, v) in &entry.delta {
                        values.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        values
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

// SPDX-License-Identifier: MIT

pub mod container;
pub mod history;
pub mod snapshot;

pub use container::StateContainer;
pub use history::{History, HistoryEntry, HistoryKind};
pub use snapshot::{Snapshot, SnapshotStore};

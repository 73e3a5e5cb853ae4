//! Snapshot persistence
//!
//! A snapshot is the confirmed part of one lineage graph plus its task history, saved
//! under a workspace name. `SqliteSnapshotStore` is the only backend.

mod snapshot;
mod sqlite;
mod traits;

pub use snapshot::{Snapshot, SnapshotInfo};
pub use sqlite::SqliteSnapshotStore;
pub use traits::{OpenStore, SnapshotStore, StorageError, StorageResult};

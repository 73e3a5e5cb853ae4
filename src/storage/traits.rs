//! Storage trait definitions

use super::snapshot::{Snapshot, SnapshotInfo};
use crate::graph::LineageError;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot does not restore: {0}")]
    Lineage(#[from] LineageError),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence of confirmed lineage graphs, one snapshot per workspace name
///
/// Implementations must be thread-safe (Send + Sync).
pub trait SnapshotStore: Send + Sync {
    /// Save a snapshot, replacing any earlier one under the same workspace
    fn save(&self, snapshot: &Snapshot) -> StorageResult<()>;

    /// Load the snapshot of a workspace
    fn load(&self, workspace: &str) -> StorageResult<Option<Snapshot>>;

    /// Delete a workspace and its elements
    fn delete(&self, workspace: &str) -> StorageResult<bool>;

    /// All saved workspaces, by name
    fn list(&self) -> StorageResult<Vec<SnapshotInfo>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: SnapshotStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}

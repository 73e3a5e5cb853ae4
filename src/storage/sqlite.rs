//! SQLite storage backend for lineage snapshots

use super::snapshot::{Snapshot, SnapshotInfo};
use super::traits::{OpenStore, SnapshotStore, StorageError, StorageResult};
use crate::graph::{Element, ElementId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed snapshot store
///
/// One row per workspace plus one row per element, each element stored as JSON.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workspaces (
                name TEXT PRIMARY KEY,
                saved_at TEXT NOT NULL,
                history_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS elements (
                workspace TEXT NOT NULL,
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                element_json TEXT NOT NULL,
                PRIMARY KEY (workspace, id),
                FOREIGN KEY (workspace) REFERENCES workspaces(name) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_elements_kind
                ON elements(workspace, kind);

            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn parse_time(raw: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(format!("{}: {}", raw, e)))
    }
}

impl OpenStore for SqliteSnapshotStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO workspaces (name, saved_at, history_json)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                saved_at = excluded.saved_at,
                history_json = excluded.history_json
            "#,
            params![
                snapshot.workspace,
                snapshot.saved_at.to_rfc3339(),
                serde_json::to_string(&snapshot.history)?
            ],
        )?;

        // Whole-graph replace: elements pruned since the last save must go
        tx.execute(
            "DELETE FROM elements WHERE workspace = ?1",
            params![snapshot.workspace],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO elements (workspace, id, kind, element_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for element in &snapshot.elements {
                stmt.execute(params![
                    snapshot.workspace,
                    element.id().as_str(),
                    element.kind().to_string(),
                    serde_json::to_string(element)?
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(
            workspace = %snapshot.workspace,
            elements = snapshot.elements.len(),
            history = snapshot.history.len(),
            "snapshot saved"
        );
        Ok(())
    }

    fn load(&self, workspace: &str) -> StorageResult<Option<Snapshot>> {
        let conn = self.conn()?;

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT saved_at, history_json FROM workspaces WHERE name = ?1",
                params![workspace],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((saved_at, history_json)) = row else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT element_json FROM elements WHERE workspace = ?1 ORDER BY id")?;
        let elements = stmt
            .query_map(params![workspace], |row| row.get::<_, String>(0))?
            .map(|json| -> StorageResult<Element> { Ok(serde_json::from_str(&json?)?) })
            .collect::<StorageResult<Vec<_>>>()?;
        let history: Vec<ElementId> = serde_json::from_str(&history_json)?;

        tracing::debug!(workspace, elements = elements.len(), "snapshot loaded");
        Ok(Some(Snapshot {
            workspace: workspace.to_string(),
            saved_at: Self::parse_time(&saved_at)?,
            elements,
            history,
        }))
    }

    fn delete(&self, workspace: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM workspaces WHERE name = ?1", params![workspace])?;
        Ok(rows > 0)
    }

    fn list(&self) -> StorageResult<Vec<SnapshotInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT w.name, w.saved_at, w.history_json,
                   (SELECT COUNT(*) FROM elements e WHERE e.workspace = w.name)
            FROM workspaces w
            ORDER BY w.name
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(workspace, saved_at, history_json, elements)| -> StorageResult<SnapshotInfo> {
                let history: Vec<ElementId> = serde_json::from_str(&history_json)?;
                Ok(SnapshotInfo {
                    workspace,
                    saved_at: Self::parse_time(&saved_at)?,
                    elements: elements as usize,
                    history: history.len(),
                })
            })
            .collect()
    }
}

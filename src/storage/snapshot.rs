//! Snapshot: the confirmed graph of one session

use crate::graph::{Element, ElementId, LineageError, LineageResult, LineageStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The confirmed elements of a lineage graph and the order their tasks were confirmed in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub workspace: String,
    pub saved_at: DateTime<Utc>,
    pub elements: Vec<Element>,
    pub history: Vec<ElementId>,
}

/// Listing entry for a saved workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub workspace: String,
    pub saved_at: DateTime<Utc>,
    pub elements: usize,
    pub history: usize,
}

impl Snapshot {
    /// Capture everything but the unconfirmed branch.
    ///
    /// Preview elements are left out and links to them are dropped, so the captured
    /// graph is a valid tree on its own.
    pub fn capture(
        workspace: impl Into<String>,
        store: &LineageStore,
        history: &[ElementId],
    ) -> Self {
        let preview: HashSet<&ElementId> = store
            .elements()
            .filter(|e| e.is_preview())
            .map(Element::id)
            .collect();

        let mut elements: Vec<Element> = store
            .elements()
            .filter(|e| !e.is_preview())
            .cloned()
            .map(|mut e| {
                e.children_mut().retain(|c| !preview.contains(c));
                e
            })
            .collect();
        elements.sort_by(|a, b| a.id().cmp(b.id()));

        let history = history
            .iter()
            .filter(|t| store.contains(t) && !preview.contains(t))
            .cloned()
            .collect();

        Self {
            workspace: workspace.into(),
            saved_at: Utc::now(),
            elements,
            history,
        }
    }

    /// Rebuild the lineage store, checking every tree rule and that the history only
    /// names tasks of the graph
    pub fn restore(&self) -> LineageResult<LineageStore> {
        let store = LineageStore::from_elements(self.elements.iter().cloned())?;
        for task in &self.history {
            store.task(task)?;
        }
        Ok(store)
    }

    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            workspace: self.workspace.clone(),
            saved_at: self.saved_at,
            elements: self.elements.len(),
            history: self.history.len(),
        }
    }

    /// Id of the root cohort, if the snapshot has one
    pub fn root(&self) -> Option<&ElementId> {
        self.elements.iter().find_map(|e| match e {
            Element::Cohort(c) if c.is_root => Some(&c.id),
            _ => None,
        })
    }
}

impl TryFrom<&Snapshot> for LineageStore {
    type Error = LineageError;

    fn try_from(snapshot: &Snapshot) -> Result<Self, Self::Error> {
        snapshot.restore()
    }
}

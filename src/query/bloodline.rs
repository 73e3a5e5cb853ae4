//! Bloodline: walk a cohort's parents up to the root

use super::types::{Bloodline, BloodlineEntry};
use crate::graph::{Element, ElementId, LineageError, LineageResult, LineageStore, Violation};

/// Query for the ancestry of one cohort
#[derive(Debug, Clone)]
pub struct BloodlineQuery {
    /// Cohort whose ancestry is wanted
    pub origin: ElementId,
}

impl BloodlineQuery {
    pub fn from(origin: ElementId) -> Self {
        Self { origin }
    }

    /// Walk the store. Recomputed on every call; nothing is cached.
    pub fn execute(&self, store: &LineageStore) -> LineageResult<Bloodline> {
        store.cohort(&self.origin)?;
        let mut entries = Vec::new();
        let mut current = Some(self.origin.clone());
        // the walk can't be longer than the store; a longer one means a cycle
        let limit = store.len();

        while let Some(id) = current {
            if entries.len() > limit {
                return Err(Violation::Cycle(id).into());
            }
            let element = store
                .get(&id)
                .ok_or_else(|| LineageError::ElementNotFound(id.clone()))?;
            let size = match element {
                Element::Cohort(c) => Some(c.cached_size().unwrap_or(0)),
                Element::Task(_) => None,
            };
            entries.push(BloodlineEntry {
                id: id.clone(),
                kind: element.kind(),
                label: element.label(),
                size,
            });
            current = element.parents().first().cloned();
        }
        Ok(Bloodline { entries })
    }
}

/// Ancestry of `id`, ordered from `id` to the root
pub fn bloodline(store: &LineageStore, id: &ElementId) -> LineageResult<Bloodline> {
    BloodlineQuery::from(id.clone()).execute(store)
}

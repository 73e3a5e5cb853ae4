//! Query result structures

use crate::graph::{ElementId, ElementKind};
use serde::Serialize;

/// One step of a bloodline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BloodlineEntry {
    pub id: ElementId,
    pub kind: ElementKind,
    pub label: String,
    /// Most recently fetched size for cohorts (0 if never fetched); `None` for tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Ancestry of a cohort, ordered from the queried cohort to the root
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Bloodline {
    pub entries: Vec<BloodlineEntry>,
}

impl Bloodline {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of derivation steps between the queried cohort and the root
    pub fn depth(&self) -> usize {
        self.entries.len() / 2
    }

    /// Labels from root to the queried cohort
    pub fn labels_from_root(&self) -> Vec<&str> {
        self.entries.iter().rev().map(|e| e.label.as_str()).collect()
    }

    pub fn cohorts(&self) -> impl Iterator<Item = &BloodlineEntry> {
        self.entries.iter().filter(|e| e.kind == ElementKind::Cohort)
    }
}

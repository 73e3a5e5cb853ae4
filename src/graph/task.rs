//! Task: the filter or split operation that produced a set of cohorts

use super::element::ElementId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Filter,
    Split,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filter => write!(f, "filter"),
            Self::Split => write!(f, "split"),
        }
    }
}

/// Operation node between an input cohort and its outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: ElementId,
    pub kind: TaskKind,
    pub label: String,
    /// Ids of the attributes the operation works over
    pub attributes: Vec<String>,
    #[serde(default)]
    pub parents: Vec<ElementId>,
    #[serde(default)]
    pub children: Vec<ElementId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub preview: bool,
}

impl Task {
    /// A new unlinked task on `input`. The id is `"<kind>-<input>-<suffix>"`.
    pub fn new(
        kind: TaskKind,
        input: &ElementId,
        label: impl Into<String>,
        attributes: Vec<String>,
    ) -> Self {
        Self {
            id: ElementId::unique(&format!("{}-{}", kind, input)),
            kind,
            label: label.into(),
            attributes,
            parents: Vec::new(),
            children: Vec::new(),
            created_at: Utc::now(),
            preview: false,
        }
    }

    /// The input cohort, once linked
    pub fn input(&self) -> Option<&ElementId> {
        self.parents.first()
    }
}

//! Element identity and the Cohort/Task sum type

use super::cohort::Cohort;
use super::task::Task;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an element in the lineage graph
///
/// Serializes as a plain string. Cohort ids are derived from the service handle,
/// task and clone ids carry a random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Create an ElementId from a string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id of a cohort materialized under the given handle
    pub fn for_handle(handle: CohortHandle) -> Self {
        Self(format!("cohort-{}", handle))
    }

    /// A fresh id with the given prefix (`"<prefix>-<8 hex chars>"`)
    pub fn unique(prefix: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", prefix, &suffix[..8]))
    }

    /// Id for a virtual clone of this element (`"<id>-clone#<8 hex chars>"`)
    pub fn clone_of(&self) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-clone#{}", self.0, &suffix[..8]))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ElementId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque identifier the remote service hands out for a materialized cohort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CohortHandle(u64);

impl CohortHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CohortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminates the two element variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Cohort,
    Task,
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cohort => write!(f, "cohort"),
            Self::Task => write!(f, "task"),
        }
    }
}

/// A node of the lineage graph: either a cohort or the task that produced cohorts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Cohort(Cohort),
    Task(Task),
}

impl Element {
    pub fn id(&self) -> &ElementId {
        match self {
            Self::Cohort(c) => &c.id,
            Self::Task(t) => &t.id,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Cohort(_) => ElementKind::Cohort,
            Self::Task(_) => ElementKind::Task,
        }
    }

    /// Display label (`"primary: secondary"` for cohorts)
    pub fn label(&self) -> String {
        match self {
            Self::Cohort(c) => c.label(),
            Self::Task(t) => t.label.clone(),
        }
    }

    pub fn parents(&self) -> &[ElementId] {
        match self {
            Self::Cohort(c) => &c.parents,
            Self::Task(t) => &t.parents,
        }
    }

    pub fn children(&self) -> &[ElementId] {
        match self {
            Self::Cohort(c) => &c.children,
            Self::Task(t) => &t.children,
        }
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<ElementId> {
        match self {
            Self::Cohort(c) => &mut c.children,
            Self::Task(t) => &mut t.children,
        }
    }

    /// True while the element belongs to an unconfirmed preview branch
    pub fn is_preview(&self) -> bool {
        match self {
            Self::Cohort(c) => c.preview,
            Self::Task(t) => t.preview,
        }
    }

    pub fn as_cohort(&self) -> Option<&Cohort> {
        match self {
            Self::Cohort(c) => Some(c),
            Self::Task(_) => None,
        }
    }

    pub fn as_cohort_mut(&mut self) -> Option<&mut Cohort> {
        match self {
            Self::Cohort(c) => Some(c),
            Self::Task(_) => None,
        }
    }

    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Self::Task(t) => Some(t),
            Self::Cohort(_) => None,
        }
    }

    pub fn as_task_mut(&mut self) -> Option<&mut Task> {
        match self {
            Self::Task(t) => Some(t),
            Self::Cohort(_) => None,
        }
    }
}

impl From<Cohort> for Element {
    fn from(c: Cohort) -> Self {
        Self::Cohort(c)
    }
}

impl From<Task> for Element {
    fn from(t: Task) -> Self {
        Self::Task(t)
    }
}

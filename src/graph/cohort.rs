//! Cohort: a materialized (or virtually narrowed) subset of the dataset

use super::accumulated::AccumulatedFilter;
use super::constraint::{CloneFilter, ConstraintValues};
use super::element::{CohortHandle, ElementId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One row of a cohort as returned by the cohort service
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Separator the cohort service uses between primary and secondary label
pub const SERVICE_LABEL_SEPARATOR: char = '\u{2E31}';

/// The name a cohort with these labels carries on the service side
pub fn service_name(primary: &str, secondary: &str) -> String {
    format!("{}{}{}", primary, SERVICE_LABEL_SEPARATOR, secondary)
}

/// Where a cohort's rows live
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub view: String,
}

impl DataSource {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
        view: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
            view: view.into(),
        }
    }
}

/// The constraint one attribute contributed to a cohort, kept for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedConstraint {
    /// Attribute id
    pub attribute: String,
    /// Attribute display label
    pub label: String,
    pub values: ConstraintValues,
}

/// A subset of the dataset, produced by a task (or the root of a dataset selection)
///
/// The source location and accumulated filter are private: every reassignment goes
/// through a setter that drops the cached size and rows and bumps `revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cohort {
    pub id: ElementId,
    /// Service handle; a virtual clone carries its parent's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<CohortHandle>,
    label_primary: String,
    label_secondary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_constraints: Vec<AppliedConstraint>,
    source: DataSource,
    /// `None` means the constraints so far contradict each other
    accumulated_filter: Option<AccumulatedFilter>,
    #[serde(default)]
    pub is_root: bool,
    /// Query-time narrowing for virtual clones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_clone: Option<CloneFilter>,
    /// Most recently fetched size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cached_size: Option<u64>,
    #[serde(skip)]
    cached_rows: Option<Arc<Vec<Row>>>,
    #[serde(skip)]
    revision: u64,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub preview: bool,
    #[serde(default)]
    pub parents: Vec<ElementId>,
    #[serde(default)]
    pub children: Vec<ElementId>,
}

impl Cohort {
    /// A cohort materialized under `handle`, with an empty accumulated filter
    pub fn new(
        handle: CohortHandle,
        label_primary: impl Into<String>,
        label_secondary: impl Into<String>,
        source: DataSource,
    ) -> Self {
        Self {
            id: ElementId::for_handle(handle),
            handle: Some(handle),
            label_primary: label_primary.into(),
            label_secondary: label_secondary.into(),
            applied_constraints: Vec::new(),
            source,
            accumulated_filter: Some(AccumulatedFilter::new()),
            is_root: false,
            virtual_clone: None,
            cached_size: None,
            cached_rows: None,
            revision: 0,
            selected: false,
            preview: false,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    /// The root cohort of a dataset selection
    pub fn root(
        handle: CohortHandle,
        label_primary: impl Into<String>,
        label_secondary: impl Into<String>,
        source: DataSource,
    ) -> Self {
        let mut c = Self::new(handle, label_primary, label_secondary, source);
        c.is_root = true;
        c
    }

    /// Set the id (builder-style)
    pub fn with_id(mut self, id: ElementId) -> Self {
        self.id = id;
        self
    }

    pub fn label_primary(&self) -> &str {
        &self.label_primary
    }

    pub fn label_secondary(&self) -> &str {
        &self.label_secondary
    }

    /// `"primary: secondary"`, or just the primary label when there is no secondary
    pub fn label(&self) -> String {
        if self.label_secondary.is_empty() {
            self.label_primary.clone()
        } else {
            format!("{}: {}", self.label_primary, self.label_secondary)
        }
    }

    /// The name stored with the cohort on the service side
    pub fn service_name(&self) -> String {
        service_name(&self.label_primary, &self.label_secondary)
    }

    pub fn set_labels(&mut self, primary: impl Into<String>, secondary: impl Into<String>) {
        self.label_primary = primary.into();
        self.label_secondary = secondary.into();
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    pub fn set_source(&mut self, source: DataSource) {
        self.source = source;
        self.invalidate();
    }

    pub fn set_database(&mut self, database: impl Into<String>) {
        self.source.database = database.into();
        self.invalidate();
    }

    pub fn set_schema(&mut self, schema: impl Into<String>) {
        self.source.schema = schema.into();
        self.invalidate();
    }

    pub fn set_table(&mut self, table: impl Into<String>) {
        self.source.table = table.into();
        self.invalidate();
    }

    pub fn set_view(&mut self, view: impl Into<String>) {
        self.source.view = view.into();
        self.invalidate();
    }

    pub fn accumulated_filter(&self) -> Option<&AccumulatedFilter> {
        self.accumulated_filter.as_ref()
    }

    pub fn set_accumulated_filter(&mut self, filter: Option<AccumulatedFilter>) {
        if filter.is_none() {
            tracing::warn!(cohort = %self.id, "accumulated filter is contradictory");
        }
        self.accumulated_filter = filter;
        self.invalidate();
    }

    /// True when the accumulated constraints can no longer be satisfied
    pub fn has_filter_conflict(&self) -> bool {
        self.accumulated_filter.is_none()
    }

    pub fn is_virtual_clone(&self) -> bool {
        self.virtual_clone.is_some()
    }

    pub fn cached_size(&self) -> Option<u64> {
        self.cached_size
    }

    pub fn cached_rows(&self) -> Option<Arc<Vec<Row>>> {
        self.cached_rows.clone()
    }

    /// Bumped on every source or filter reassignment
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Record a fetched size. Ignored when the cohort changed since `revision` was read.
    pub fn store_size(&mut self, revision: u64, size: u64) -> bool {
        if revision != self.revision {
            return false;
        }
        self.cached_size = Some(size);
        true
    }

    /// Record fetched rows. Ignored when the cohort changed since `revision` was read.
    pub fn store_rows(&mut self, revision: u64, rows: Arc<Vec<Row>>) -> bool {
        if revision != self.revision {
            return false;
        }
        self.cached_rows = Some(rows);
        true
    }

    /// Drop cached size and rows
    pub fn invalidate(&mut self) {
        self.cached_size = None;
        self.cached_rows = None;
        self.revision += 1;
    }
}

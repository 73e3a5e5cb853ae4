//! Cohortgraph: lineage graphs of dataset subsets
//!
//! A session starts from a root cohort (a whole dataset) and derives narrower cohorts
//! by applying attribute constraints through a remote cohort service. Derivations are
//! shown as an unconfirmed branch first and only become history once confirmed.
//!
//! # Core Concepts
//!
//! - **Cohorts**: subsets of a dataset, materialized under a service handle
//! - **Tasks**: the filter or split operation between an input cohort and its outputs
//! - **Accumulated filters**: every constraint on a cohort's ancestry, merged; `None`
//!   marks a contradiction
//! - **Sessions**: the preview-then-commit cycle, one live branch at a time
//!
//! # Example
//!
//! ```
//! use cohortgraph::{Cohort, CohortHandle, DataSource, LineageStore};
//!
//! let mut store = LineageStore::new();
//! let root = Cohort::root(CohortHandle::new(1), "All Patients", "", DataSource::default());
//! store.add_element(root).unwrap();
//! assert_eq!(store.len(), 1);
//! ```

pub mod fetch;
pub mod filter;
mod graph;
pub mod query;
pub mod service;
pub mod session;
pub mod storage;

pub use fetch::{AttributeCache, CacheKey, CohortFetcher, FetchError, FetchResult, Histogram};
pub use filter::{
    AttributeConstraint, AttributeRef, AttributeSource, MaterializationEngine, MaterializeError,
    MaterializeResult,
};
pub use graph::{
    merge_filters, service_name, AccumulatedFilter, AppliedConstraint, CloneFilter, Cohort,
    CohortHandle, Comparison, ConstraintDescriptor, ConstraintValues, DataSource, Element,
    ElementId, ElementKind, EqualsValue, LineageError, LineageResult, LineageStore, Limit,
    NumRange, Row, Scalar, ScoreRef, Task, TaskKind, Violation, SERVICE_LABEL_SEPARATOR,
};
pub use query::{bloodline, describe, Bloodline, BloodlineEntry, BloodlineQuery, LineageSummary};
pub use service::{
    BaseDescriptor, CohortQuery, CohortService, Dataset, InMemoryCohortService, ServiceError,
    ServiceResult,
};
pub use session::{
    ApplyRequest, ApplyStatus, ControllerConfig, EventSink, FilterBin, Intent, LineageEvent,
    PreviewController, SessionError, SessionResult,
};
pub use storage::{
    OpenStore, Snapshot, SnapshotInfo, SnapshotStore, SqliteSnapshotStore, StorageError,
    StorageResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Lineage graph: cohorts, tasks and the store that keeps them a forest

mod accumulated;
mod cohort;
mod constraint;
mod element;
mod store;
mod task;


pub use accumulated::{merge_filters, AccumulatedFilter, Comparison};
pub use cohort::{
    service_name, AppliedConstraint, Cohort, DataSource, Row, SERVICE_LABEL_SEPARATOR,
};
pub use constraint::{
    CloneFilter, ConstraintDescriptor, ConstraintValues, EqualsValue, Limit, NumRange, Scalar,
    ScoreRef,
};
pub use element::{CohortHandle, Element, ElementId, ElementKind};
pub use store::{LineageError, LineageResult, LineageStore, Violation};
pub use task::{Task, TaskKind};

pub(crate) use constraint::format_number;

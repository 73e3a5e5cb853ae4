//! Cohort service seam and its in-process implementation

mod memory;
mod traits;

pub use memory::{CallCounts, Dataset, InMemoryCohortService, ScoreTable};
pub use traits::{
    BaseDescriptor, CohortQuery, CohortService, ServiceError, ServiceResult,
};

pub(crate) use memory::canonical;

//! CohortService trait: the contract the remote data service fulfils
//!
//! The service owns the rows. It creates cohorts (a base cohort per dataset selection,
//! or a parent narrowed by one constraint), measures them and returns their rows.
//! Handles are opaque; the graph only stores them.

use crate::graph::{
    CloneFilter, Cohort, CohortHandle, ConstraintDescriptor, DataSource, Row,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a cohort service
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Unknown cohort handle: {0}")]
    UnknownHandle(CohortHandle),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Result type for cohort service calls
pub type ServiceResult<T> = Result<T, ServiceError>;

/// What the service needs to create the root cohort of a dataset selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseDescriptor {
    /// Service-side cohort name
    pub name: String,
    pub source: DataSource,
}

impl BaseDescriptor {
    pub fn new(name: impl Into<String>, source: DataSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// Which rows a size or rows request covers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum CohortQuery {
    /// Everything in the cohort
    Handle { handle: CohortHandle },
    /// The cohort narrowed at query time (virtual clones)
    Narrowed {
        handle: CohortHandle,
        constraint: ConstraintDescriptor,
    },
}

impl CohortQuery {
    /// The query that measures `cohort`, or `None` if it was never materialized
    pub fn for_cohort(cohort: &Cohort) -> Option<Self> {
        let handle = cohort.handle?;
        Some(match &cohort.virtual_clone {
            Some(CloneFilter::Constraint(constraint)) => Self::Narrowed {
                handle,
                constraint: constraint.clone(),
            },
            Some(CloneFilter::None) | None => Self::Handle { handle },
        })
    }

    pub fn handle(&self) -> CohortHandle {
        match self {
            Self::Handle { handle } | Self::Narrowed { handle, .. } => *handle,
        }
    }
}

/// The remote cohort service
#[async_trait]
pub trait CohortService: Send + Sync {
    /// Create the base cohort of a dataset selection
    async fn create_cohort(&self, base: &BaseDescriptor) -> ServiceResult<CohortHandle>;

    /// Create `parent ∩ constraint` as a new cohort named `name`
    async fn create_cohort_with_constraint(
        &self,
        parent: CohortHandle,
        name: &str,
        constraint: &ConstraintDescriptor,
    ) -> ServiceResult<CohortHandle>;

    /// Number of rows covered by `query`
    async fn size(&self, query: &CohortQuery) -> ServiceResult<u64>;

    /// Rows covered by `query`
    async fn rows(&self, query: &CohortQuery) -> ServiceResult<Vec<Row>>;

    /// Change the service-side name of a cohort
    async fn rename(&self, handle: CohortHandle, name: &str) -> ServiceResult<()>;
}

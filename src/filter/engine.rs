//! MaterializationEngine: turns constraints into new cohorts through the cohort service

use super::attribute::{AttributeConstraint, FilterUpdate};
use crate::graph::{
    merge_filters, service_name, AppliedConstraint, CloneFilter, Cohort, DataSource, ElementId,
};
use crate::service::{BaseDescriptor, CohortService, ServiceError};
use std::sync::Arc;
use thiserror::Error;

/// Errors that abort a materialization chain
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("No constraints to apply")]
    NoConstraints,

    #[error("Cohort {0} has no service handle")]
    NotMaterialized(ElementId),

    #[error("Unsupported constraint on {attribute}: {reason}")]
    Unsupported { attribute: String, reason: String },

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

/// Result type for materialization
pub type MaterializeResult<T> = Result<T, MaterializeError>;

/// Creates cohorts on the service and builds their graph counterparts
///
/// Holds no graph state: inputs are borrowed, outputs are returned unlinked.
#[derive(Clone)]
pub struct MaterializationEngine {
    service: Arc<dyn CohortService>,
}

impl std::fmt::Debug for MaterializationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializationEngine").finish_non_exhaustive()
    }
}

impl MaterializationEngine {
    pub fn new(service: Arc<dyn CohortService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<dyn CohortService> {
        &self.service
    }

    /// Create the root cohort of a dataset selection
    pub async fn create_root(
        &self,
        label_primary: &str,
        label_secondary: &str,
        source: DataSource,
    ) -> MaterializeResult<Cohort> {
        let name = service_name(label_primary, label_secondary);
        let handle = self
            .service
            .create_cohort(&BaseDescriptor::new(name, source.clone()))
            .await?;
        let root = Cohort::root(handle, label_primary, label_secondary, source);
        tracing::info!(root = %root.id, "root cohort created");
        Ok(root)
    }

    /// One round-trip: `input ∩ constraint` as a new cohort
    pub async fn step(
        &self,
        input: &Cohort,
        constraint: &AttributeConstraint,
    ) -> MaterializeResult<Cohort> {
        let parent = input
            .handle
            .ok_or_else(|| MaterializeError::NotMaterialized(input.id.clone()))?;
        let descriptor = constraint.descriptor()?;
        let primary = constraint.attribute.label.clone();
        let secondary = constraint.label();

        let name = service_name(&primary, &secondary);
        tracing::debug!(input = %input.id, route = descriptor.route(), name = %name, "materializing step");

        let handle = self
            .service
            .create_cohort_with_constraint(parent, &name, &descriptor)
            .await?;
        let mut cohort = Cohort::new(handle, primary, secondary, input.source().clone());
        cohort.applied_constraints = vec![AppliedConstraint {
            attribute: constraint.attribute.id.clone(),
            label: constraint.attribute.label.clone(),
            values: constraint.values.clone(),
        }];
        let filter = match constraint.filter_update() {
            FilterUpdate::Carry => input.accumulated_filter().cloned(),
            FilterUpdate::Merge(update) => merge_filters(input.accumulated_filter(), &update),
        };
        cohort.set_accumulated_filter(filter);
        Ok(cohort)
    }

    /// Apply `constraints` one after another starting from `input`.
    ///
    /// Each step narrows the previous step's cohort. With several constraints the result
    /// is relabelled with the comma-joined step labels and renamed on the service.
    /// Any failing step aborts the whole chain.
    pub async fn materialize(
        &self,
        input: &Cohort,
        constraints: &[AttributeConstraint],
    ) -> MaterializeResult<Cohort> {
        let (first, rest) = constraints
            .split_first()
            .ok_or(MaterializeError::NoConstraints)?;

        let mut current = self.step(input, first).await?;
        let mut primaries = vec![current.label_primary().to_string()];
        let mut secondaries = vec![current.label_secondary().to_string()];
        for constraint in rest {
            current = self.step(&current, constraint).await?;
            primaries.push(current.label_primary().to_string());
            secondaries.push(current.label_secondary().to_string());
        }

        if !rest.is_empty() {
            current.set_labels(primaries.join(", "), secondaries.join(", "));
            if let Some(handle) = current.handle {
                self.service.rename(handle, &current.service_name()).await?;
            }
        }
        current.applied_constraints = constraints
            .iter()
            .map(|c| AppliedConstraint {
                attribute: c.attribute.id.clone(),
                label: c.attribute.label.clone(),
                values: c.values.clone(),
            })
            .collect();
        Ok(current)
    }

    /// A clone of `input` sharing its handle, narrowed by `filter` at query time.
    /// No service call is made.
    pub fn virtual_clone(&self, input: &Cohort, filter: CloneFilter) -> Cohort {
        let mut clone = input.clone().with_id(input.id.clone_of());
        clone.is_root = false;
        clone.virtual_clone = Some(filter);
        clone.selected = false;
        clone.preview = false;
        clone.parents.clear();
        clone.children.clear();
        clone.invalidate();
        clone
    }
}

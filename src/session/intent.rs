//! Intents: the messages a session consumes

use crate::filter::AttributeConstraint;
use crate::graph::{ElementId, TaskKind};
use serde::{Deserialize, Serialize};

/// One requested output: the constraints that narrow `cohort` into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterBin {
    /// Input cohort this bin applies to
    pub cohort: ElementId,
    pub constraints: Vec<AttributeConstraint>,
}

/// Derive new cohorts from the target cohorts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub kind: TaskKind,
    /// Input cohorts, in display order
    pub targets: Vec<ElementId>,
    pub bins: Vec<FilterBin>,
}

impl ApplyRequest {
    /// Bins requested for one target, in request order
    pub fn bins_for<'a>(&'a self, target: &'a ElementId) -> impl Iterator<Item = &'a FilterBin> {
        self.bins.iter().filter(move |b| &b.cohort == target)
    }

    /// Distinct attribute labels across all bins, first occurrence first
    pub fn attribute_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for constraint in self.bins.iter().flat_map(|b| b.constraints.iter()) {
            if !labels.contains(&constraint.attribute.label) {
                labels.push(constraint.attribute.label.clone());
            }
        }
        labels
    }

    /// Distinct attribute ids across all bins
    pub fn attribute_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for constraint in self.bins.iter().flat_map(|b| b.constraints.iter()) {
            if !ids.contains(&constraint.attribute.id) {
                ids.push(constraint.attribute.id.clone());
            }
        }
        ids
    }

    /// Label of the tasks this request produces
    pub fn task_label(&self) -> String {
        self.attribute_labels().join(", ")
    }
}

/// Everything a session can be asked to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Apply(ApplyRequest),
    Confirm,
    DiscardPreview,
    RemoveLeafCohort {
        cohort: ElementId,
    },
    SelectCohort {
        cohort: ElementId,
        #[serde(default)]
        replace: bool,
    },
    DeselectAll,
}

//! Filter/materialization: attributes, constraints, labels and the engine that
//! turns them into cohorts

mod attribute;
mod engine;
mod labels;

pub use attribute::{AttributeConstraint, AttributeRef, AttributeSource, FilterUpdate};
pub use engine::{MaterializationEngine, MaterializeError, MaterializeResult};
pub use labels::{constraint_label, label_for_categories, nice_name, range_label};

//! Ancestry queries over the lineage store
//!
//! Provides the bloodline of a cohort (queried cohort back to the root) and
//! plain-text renderings of a lineage.

mod bloodline;
mod summary;
mod types;

pub use bloodline::{bloodline, BloodlineQuery};
pub use summary::{describe, LineageSummary};
pub use types::{Bloodline, BloodlineEntry};

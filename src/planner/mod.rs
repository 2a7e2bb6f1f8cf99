//! Planning and execution of resource changes.
//!
//! This module compares desired and observed state field by field, classifies
//! the result into a [`Plan`], and applies plans against a remote API.

mod diff;
mod executor;
mod plan;

pub use diff::{ChangeKind, Delta, DeltaEntry, DiffEngine, values_equal};
pub use executor::{ApplyExecutor, OperationRecord};
pub use plan::{ManifestPlan, Plan, PlanAction, ResourcePlan};

//! Planning module.
//!
//! Compares the manifest with tracked state, orders the resulting actions
//! and runs them through the reconcilers.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ActionOutcome, ActionResult, ExecutionResult, PlanExecutor};
pub use plan::{ActionType, ApplyPlan, PlannedAction};

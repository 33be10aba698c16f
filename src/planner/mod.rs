//! Planning module for reconciliation runs.
//!
//! This module compares the manifest with the refreshed state, turns the
//! differences into an ordered plan, and executes it against the host.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{ActionOutcome, ActionResult, ExecutionResult, PlanExecutor};
pub use plan::{ActionType, DeploymentPlan, PlannedAction};

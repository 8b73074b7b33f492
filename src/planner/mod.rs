//! Accumulator planner
//!
//! Turns correlated accumulators scattered across a rewritten tree into the
//! named outputs of one group stage per correlation scope.
//!
//! # Guarantees
//!
//! - Every correlated accumulator is bound to exactly one output
//! - Accumulators of different scopes never share a group stage
//! - Output naming is deterministic for the same tree

mod plan;
mod planner;

pub use plan::{GroupPlan, PlannedTree};
pub use planner::{AccumulatorPlanner, DEFAULT_GROUP_FIELD_PREFIX};

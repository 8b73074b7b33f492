//! Planner output

use crate::correlation::CorrelationId;
use crate::expr::{ExprRef, GroupOutput};

/// Accumulators merged into one group stage
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPlan {
    pub correlation: CorrelationId,
    /// Named outputs in order of first appearance
    pub outputs: Vec<GroupOutput>,
    /// Correlated accumulator nodes that now read these outputs
    pub occurrences: usize,
}

impl GroupPlan {
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.name.as_str())
    }

    /// One line per output, e.g. `__agg0 = sum($qty)`
    pub fn describe_outputs(&self) -> Vec<String> {
        self.outputs
            .iter()
            .map(|o| format!("{} = {}", o.name, o.accumulator))
            .collect()
    }
}

/// Tree with every correlated accumulator bound to a group output
#[derive(Debug, Clone)]
pub struct PlannedTree {
    pub root: ExprRef,
    /// One entry per group scope, in the order the groups were reached
    pub groups: Vec<GroupPlan>,
}

impl PlannedTree {
    pub fn group(&self, correlation: CorrelationId) -> Option<&GroupPlan> {
        self.groups.iter().find(|g| g.correlation == correlation)
    }
}

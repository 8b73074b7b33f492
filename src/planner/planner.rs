//! Accumulator planner
//!
//! Merges every accumulator of a correlation scope into the outputs of that
//! scope's single group stage, then replaces each correlated accumulator
//! with a field reference to its output.
//!
//! Rules:
//! - Structurally equal accumulators within one scope share one output
//! - Output names are `<prefix><n>`, numbered by first appearance
//! - An accumulator may only read a group that is upstream of it
//! - Every other node is rebuilt only if a child changed

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::plan::{GroupPlan, PlannedTree};
use crate::bson::Bson;
use crate::correlation::{CorrelationId, CorrelationMap};
use crate::expr::{
    accept, AccumulatorOp, BinaryOp, Expr, ExprKind, ExprRef, ExprVisitor, GroupOutput,
    SortKey, TranslateError, TranslateResult, UnaryOp,
};
use crate::observability::{log_event_with_fields, Event};

pub const DEFAULT_GROUP_FIELD_PREFIX: &str = "__agg";

#[derive(Debug, Clone)]
pub struct AccumulatorPlanner {
    prefix: String,
}

impl Default for AccumulatorPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_FIELD_PREFIX)
    }
}

impl AccumulatorPlanner {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn plan(&self, root: &ExprRef) -> TranslateResult<PlannedTree> {
        let map = CorrelationMap::collect(root)?;

        if let Some(correlation) = map.first_dangling() {
            return Err(TranslateError::DanglingCorrelation { correlation });
        }
        if let Some(id) = map.group_ids().find(|id| map.group_count(*id) > 1) {
            return Err(TranslateError::InvalidExpression(format!(
                "correlation {} is claimed by {} group stages",
                id,
                map.group_count(id)
            )));
        }

        let mut binder = Binder {
            planner: self,
            map: &map,
            bound: BTreeSet::new(),
            bindings: HashMap::new(),
            groups: Vec::new(),
        };
        let root = accept(root, &mut binder)?;

        for group in &binder.groups {
            let correlation = group.correlation.to_string();
            let outputs = group.outputs.len().to_string();
            let occurrences = group.occurrences.to_string();
            log_event_with_fields(
                Event::GroupStagePlanned,
                &[
                    ("correlation", &correlation),
                    ("outputs", &outputs),
                    ("occurrences", &occurrences),
                ],
            );
        }

        Ok(PlannedTree {
            root,
            groups: binder.groups,
        })
    }

    /// Assigns an output to every distinct accumulator of one scope and
    /// records, per live node, the name of the output it reads.
    ///
    /// Outputs already on the group node are kept first; new names skip any
    /// name already taken.
    fn plan_scope(
        &self,
        correlation: CorrelationId,
        existing: &[GroupOutput],
        live: &[ExprRef],
        bindings: &mut HashMap<*const Expr, String>,
    ) -> GroupPlan {
        let mut outputs: Vec<GroupOutput> = existing.to_vec();
        let mut next_index = 0usize;

        for node in live {
            let accumulator = match node.kind() {
                ExprKind::CorrelatedAccumulator { accumulator, .. } => accumulator,
                _ => continue,
            };
            let shared = outputs
                .iter()
                .find(|o| o.accumulator.same_structure(accumulator))
                .map(|o| o.name.clone());
            let name = match shared {
                Some(name) => name,
                None => {
                    let name = loop {
                        let candidate = format!("{}{}", self.prefix, next_index);
                        next_index += 1;
                        if !outputs.iter().any(|o| o.name == candidate) {
                            break candidate;
                        }
                    };
                    outputs.push(GroupOutput {
                        name: name.clone(),
                        accumulator: Arc::clone(accumulator),
                    });
                    name
                }
            };
            bindings.insert(Arc::as_ptr(node), name);
        }

        GroupPlan {
            correlation,
            outputs,
            occurrences: live.len(),
        }
    }
}

/// Rewrites correlated accumulators into output field references
struct Binder<'a> {
    planner: &'a AccumulatorPlanner,
    map: &'a CorrelationMap,
    /// Scopes whose group stage is upstream of the node being visited
    bound: BTreeSet<CorrelationId>,
    /// Output name read by each live correlated accumulator, by node identity
    bindings: HashMap<*const Expr, String>,
    groups: Vec<GroupPlan>,
}

impl Binder<'_> {
    fn rebuild(&mut self, node: &ExprRef) -> TranslateResult<ExprRef> {
        Expr::map_children(node, |child| accept(child, self))
    }
}

impl ExprVisitor for Binder<'_> {
    type Output = ExprRef;

    fn pass_name(&self) -> &'static str {
        "accumulator-planner"
    }

    fn visit_constant(&mut self, node: &ExprRef, _value: &Bson) -> TranslateResult<ExprRef> {
        Ok(Arc::clone(node))
    }

    fn visit_field(&mut self, node: &ExprRef, _path: &str) -> TranslateResult<ExprRef> {
        Ok(Arc::clone(node))
    }

    fn visit_binary(
        &mut self,
        node: &ExprRef,
        _op: BinaryOp,
        _left: &ExprRef,
        _right: &ExprRef,
    ) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }

    fn visit_unary(&mut self, node: &ExprRef, _op: UnaryOp, _operand: &ExprRef) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }

    fn visit_document(
        &mut self,
        node: &ExprRef,
        _fields: &[(String, ExprRef)],
    ) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }

    fn visit_accumulator(
        &mut self,
        node: &ExprRef,
        _op: AccumulatorOp,
        _operand: Option<&ExprRef>,
    ) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }

    fn visit_correlated_accumulator(
        &mut self,
        node: &ExprRef,
        correlation: CorrelationId,
        _accumulator: &ExprRef,
    ) -> TranslateResult<ExprRef> {
        if !self.bound.contains(&correlation) {
            return Err(TranslateError::DanglingCorrelation { correlation });
        }
        let name = self
            .bindings
            .get(&Arc::as_ptr(node))
            .ok_or(TranslateError::DanglingCorrelation { correlation })?;
        Expr::field(name.clone(), node.result_type().clone())
    }

    fn visit_source(&mut self, node: &ExprRef, _collection: &str) -> TranslateResult<ExprRef> {
        Ok(Arc::clone(node))
    }

    fn visit_match(
        &mut self,
        node: &ExprRef,
        _source: &ExprRef,
        _predicate: &ExprRef,
    ) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }

    fn visit_group(
        &mut self,
        node: &ExprRef,
        source: &ExprRef,
        key: &ExprRef,
        correlation: CorrelationId,
        outputs: &[GroupOutput],
    ) -> TranslateResult<ExprRef> {
        let new_source = accept(source, self)?;
        let new_key = accept(key, self)?;

        let plan = self.planner.plan_scope(
            correlation,
            outputs,
            self.map.accumulators(correlation),
            &mut self.bindings,
        );
        let unchanged = Arc::ptr_eq(&new_source, source)
            && Arc::ptr_eq(&new_key, key)
            && plan.outputs.len() == outputs.len();
        let rebuilt = if unchanged {
            Arc::clone(node)
        } else {
            Expr::group(new_source, new_key, correlation, plan.outputs.clone())?
        };

        self.groups.push(plan);
        self.bound.insert(correlation);
        Ok(rebuilt)
    }

    fn visit_project(
        &mut self,
        node: &ExprRef,
        _source: &ExprRef,
        _projection: &ExprRef,
    ) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }

    fn visit_sort(&mut self, node: &ExprRef, _source: &ExprRef, _keys: &[SortKey]) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }

    fn visit_skip(&mut self, node: &ExprRef, _source: &ExprRef, _count: u64) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }

    fn visit_limit(&mut self, node: &ExprRef, _source: &ExprRef, _count: u64) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }

    fn visit_extension(&mut self, node: &ExprRef, _name: &str, _args: &[ExprRef]) -> TranslateResult<ExprRef> {
        self.rebuild(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationResolver;
    use crate::expr::ResultType;

    fn field(path: &str) -> ExprRef {
        Expr::field(path, ResultType::Int32).unwrap()
    }

    fn acc(op: AccumulatorOp, path: &str) -> ExprRef {
        Expr::accumulator(op, Some(field(path))).unwrap()
    }

    fn group_on(source: ExprRef, scope: CorrelationId) -> ExprRef {
        Expr::group(source, field("region"), scope, vec![]).unwrap()
    }

    #[test]
    fn test_scope_accumulators_become_outputs() {
        let mut resolver = CorrelationResolver::new();
        let scope = resolver.new_scope();
        let group = group_on(Expr::source("orders").unwrap(), scope);
        let total = resolver.tag(acc(AccumulatorOp::Sum, "qty"), scope).unwrap();
        let top = resolver.tag(acc(AccumulatorOp::Max, "price"), scope).unwrap();
        let projection = Expr::document(vec![("total".into(), total), ("top".into(), top)]).unwrap();
        let root = Expr::project(group, projection).unwrap();

        let planned = AccumulatorPlanner::default().plan(&root).unwrap();
        let plan = planned.group(scope).unwrap();
        assert_eq!(plan.output_names().collect::<Vec<_>>(), vec!["__agg0", "__agg1"]);
        assert_eq!(plan.occurrences, 2);
        assert_eq!(
            planned.root.to_string(),
            "source(orders) | group[".to_string()
                + &scope.to_string()
                + "] by $region, __agg0 = sum($qty), __agg1 = max($price) | project {total: $__agg0, top: $__agg1}"
        );
    }

    #[test]
    fn test_equal_accumulators_share_output() {
        let mut resolver = CorrelationResolver::new();
        let scope = resolver.new_scope();
        let group = group_on(Expr::source("orders").unwrap(), scope);
        let first = resolver.tag(acc(AccumulatorOp::Sum, "qty"), scope).unwrap();
        let second = resolver.tag(acc(AccumulatorOp::Sum, "qty"), scope).unwrap();
        let having = Expr::binary(BinaryOp::Gt, first, Expr::constant(10)).unwrap();
        let filtered = Expr::match_(group, having).unwrap();
        let root = Expr::project(filtered, second).unwrap();

        let planned = AccumulatorPlanner::default().plan(&root).unwrap();
        let plan = planned.group(scope).unwrap();
        assert_eq!(plan.outputs.len(), 1);
        assert_eq!(plan.occurrences, 2);
    }

    #[test]
    fn test_nan_operand_binds_to_its_output() {
        let mut resolver = CorrelationResolver::new();
        let scope = resolver.new_scope();
        let group = group_on(Expr::source("orders").unwrap(), scope);
        let nan_sum = || {
            let operand =
                Expr::binary(BinaryOp::Add, field("qty"), Expr::constant(f64::NAN)).unwrap();
            Expr::accumulator(AccumulatorOp::Sum, Some(operand)).unwrap()
        };
        let first = resolver.tag(nan_sum(), scope).unwrap();
        let second = resolver.tag(nan_sum(), scope).unwrap();
        let projection =
            Expr::document(vec![("a".into(), first), ("b".into(), second)]).unwrap();
        let root = Expr::project(group, projection).unwrap();

        let planned = AccumulatorPlanner::default().plan(&root).unwrap();
        let plan = planned.group(scope).unwrap();
        assert_eq!(plan.output_names().collect::<Vec<_>>(), vec!["__agg0"]);
        assert_eq!(plan.occurrences, 2);
        assert!(planned
            .root
            .to_string()
            .ends_with("project {a: $__agg0, b: $__agg0}"));
    }

    #[test]
    fn test_dangling_scope_rejected() {
        let mut resolver = CorrelationResolver::new();
        let scope = resolver.new_scope();
        let tagged = resolver.tag(acc(AccumulatorOp::Sum, "qty"), scope).unwrap();
        let root = Expr::project(Expr::source("orders").unwrap(), tagged).unwrap();

        assert_eq!(
            AccumulatorPlanner::default().plan(&root).unwrap_err(),
            TranslateError::DanglingCorrelation { correlation: scope }
        );
    }

    #[test]
    fn test_accumulator_upstream_of_its_group_rejected() {
        let mut resolver = CorrelationResolver::new();
        let scope = resolver.new_scope();
        let tagged = resolver.tag(acc(AccumulatorOp::Sum, "qty"), scope).unwrap();
        let predicate = Expr::binary(BinaryOp::Gt, tagged, Expr::constant(1)).unwrap();
        let filtered = Expr::match_(Expr::source("orders").unwrap(), predicate).unwrap();
        let root = group_on(filtered, scope);

        assert_eq!(
            AccumulatorPlanner::default().plan(&root).unwrap_err(),
            TranslateError::DanglingCorrelation { correlation: scope }
        );
    }

    #[test]
    fn test_tree_without_accumulators_is_shared() {
        let source = Expr::source("orders").unwrap();
        let predicate = Expr::binary(BinaryOp::Gt, field("qty"), Expr::constant(1)).unwrap();
        let root = Expr::match_(source, predicate).unwrap();
        let planned = AccumulatorPlanner::default().plan(&root).unwrap();
        assert!(Arc::ptr_eq(&planned.root, &root));
        assert!(planned.groups.is_empty());
    }

    #[test]
    fn test_custom_prefix_and_taken_names() {
        let mut resolver = CorrelationResolver::new();
        let scope = resolver.new_scope();
        let preset = GroupOutput {
            name: "g0".into(),
            accumulator: Expr::accumulator(AccumulatorOp::Count, None).unwrap(),
        };
        let group = Expr::group(
            Expr::source("orders").unwrap(),
            field("region"),
            scope,
            vec![preset],
        )
        .unwrap();
        let tagged = resolver.tag(acc(AccumulatorOp::Avg, "qty"), scope).unwrap();
        let root = Expr::project(group, tagged).unwrap();

        let planned = AccumulatorPlanner::new("g").plan(&root).unwrap();
        let plan = planned.group(scope).unwrap();
        assert_eq!(plan.output_names().collect::<Vec<_>>(), vec!["g0", "g1"]);
    }
}

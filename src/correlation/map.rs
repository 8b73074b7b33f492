//! Live correlated accumulators, grouped by scope
//!
//! Built by one depth-first walk, children in order, so the accumulator
//! order inside a scope is the order of first appearance in the tree.

use std::collections::BTreeMap;

use super::id::CorrelationId;
use crate::bson::Bson;
use crate::expr::{
    accept, AccumulatorOp, BinaryOp, ExprRef, ExprVisitor, GroupOutput, SortKey,
    TranslateResult, UnaryOp,
};

#[derive(Debug, Default)]
pub struct CorrelationMap {
    /// Scopes in order of first accumulator appearance
    scopes: Vec<(CorrelationId, Vec<ExprRef>)>,
    /// Number of `Group` nodes carrying each id
    groups: BTreeMap<CorrelationId, usize>,
}

impl CorrelationMap {
    /// Walks `root` once and records every correlated accumulator and
    /// every group scope.
    pub fn collect(root: &ExprRef) -> TranslateResult<Self> {
        let mut collector = Collector {
            map: CorrelationMap::default(),
        };
        accept(root, &mut collector)?;
        Ok(collector.map)
    }

    /// Scope ids that have at least one live accumulator
    pub fn ids(&self) -> impl Iterator<Item = CorrelationId> + '_ {
        self.scopes.iter().map(|(id, _)| *id)
    }

    /// Live `CorrelatedAccumulator` nodes of one scope, in tree order
    pub fn accumulators(&self, id: CorrelationId) -> &[ExprRef] {
        self.scopes
            .iter()
            .find(|(scope, _)| *scope == id)
            .map(|(_, nodes)| nodes.as_slice())
            .unwrap_or(&[])
    }

    /// Number of group nodes carrying `id`
    pub fn group_count(&self, id: CorrelationId) -> usize {
        self.groups.get(&id).copied().unwrap_or(0)
    }

    /// All group scopes in the tree, ordered by id
    pub fn group_ids(&self) -> impl Iterator<Item = CorrelationId> + '_ {
        self.groups.keys().copied()
    }

    /// First scope with accumulators but no group defining it
    pub fn first_dangling(&self) -> Option<CorrelationId> {
        self.ids().find(|id| self.group_count(*id) == 0)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    fn record(&mut self, id: CorrelationId, node: &ExprRef) {
        match self.scopes.iter_mut().find(|(scope, _)| *scope == id) {
            Some((_, nodes)) => nodes.push(node.clone()),
            None => self.scopes.push((id, vec![node.clone()])),
        }
    }
}

struct Collector {
    map: CorrelationMap,
}

impl Collector {
    fn visit_all(&mut self, nodes: &[ExprRef]) -> TranslateResult<()> {
        nodes.iter().try_for_each(|node| accept(node, self))
    }
}

impl ExprVisitor for Collector {
    type Output = ();

    fn pass_name(&self) -> &'static str {
        "correlation-map"
    }

    fn visit_constant(&mut self, _node: &ExprRef, _value: &Bson) -> TranslateResult<()> {
        Ok(())
    }

    fn visit_field(&mut self, _node: &ExprRef, _path: &str) -> TranslateResult<()> {
        Ok(())
    }

    fn visit_binary(
        &mut self,
        _node: &ExprRef,
        _op: BinaryOp,
        left: &ExprRef,
        right: &ExprRef,
    ) -> TranslateResult<()> {
        accept(left, self)?;
        accept(right, self)
    }

    fn visit_unary(&mut self, _node: &ExprRef, _op: UnaryOp, operand: &ExprRef) -> TranslateResult<()> {
        accept(operand, self)
    }

    fn visit_document(
        &mut self,
        _node: &ExprRef,
        fields: &[(String, ExprRef)],
    ) -> TranslateResult<()> {
        fields.iter().try_for_each(|(_, value)| accept(value, self))
    }

    fn visit_accumulator(
        &mut self,
        _node: &ExprRef,
        _op: AccumulatorOp,
        operand: Option<&ExprRef>,
    ) -> TranslateResult<()> {
        match operand {
            Some(operand) => accept(operand, self),
            None => Ok(()),
        }
    }

    fn visit_correlated_accumulator(
        &mut self,
        node: &ExprRef,
        correlation: CorrelationId,
        _accumulator: &ExprRef,
    ) -> TranslateResult<()> {
        self.map.record(correlation, node);
        Ok(())
    }

    fn visit_source(&mut self, _node: &ExprRef, _collection: &str) -> TranslateResult<()> {
        Ok(())
    }

    fn visit_match(
        &mut self,
        _node: &ExprRef,
        source: &ExprRef,
        predicate: &ExprRef,
    ) -> TranslateResult<()> {
        accept(source, self)?;
        accept(predicate, self)
    }

    fn visit_group(
        &mut self,
        _node: &ExprRef,
        source: &ExprRef,
        key: &ExprRef,
        correlation: CorrelationId,
        outputs: &[GroupOutput],
    ) -> TranslateResult<()> {
        *self.map.groups.entry(correlation).or_insert(0) += 1;
        accept(source, self)?;
        accept(key, self)?;
        outputs
            .iter()
            .try_for_each(|output| accept(&output.accumulator, self))
    }

    fn visit_project(
        &mut self,
        _node: &ExprRef,
        source: &ExprRef,
        projection: &ExprRef,
    ) -> TranslateResult<()> {
        accept(source, self)?;
        accept(projection, self)
    }

    fn visit_sort(&mut self, _node: &ExprRef, source: &ExprRef, _keys: &[SortKey]) -> TranslateResult<()> {
        accept(source, self)
    }

    fn visit_skip(&mut self, _node: &ExprRef, source: &ExprRef, _count: u64) -> TranslateResult<()> {
        accept(source, self)
    }

    fn visit_limit(&mut self, _node: &ExprRef, source: &ExprRef, _count: u64) -> TranslateResult<()> {
        accept(source, self)
    }

    fn visit_extension(&mut self, _node: &ExprRef, _name: &str, args: &[ExprRef]) -> TranslateResult<()> {
        self.visit_all(args)
    }
}

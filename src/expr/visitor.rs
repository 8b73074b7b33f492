//! Visitor dispatch
//!
//! `accept` matches on the node kind exhaustively and calls the visitor
//! method for that kind. Every method defaults to failing with
//! `UnsupportedExpressionKind`, so a pass that forgets a kind fails loudly
//! instead of skipping it.

use super::errors::{TranslateError, TranslateResult};
use super::node::{
    AccumulatorOp, BinaryOp, ExprKind, ExprRef, GroupOutput, SortKey, UnaryOp,
};
use crate::bson::Bson;
use crate::correlation::CorrelationId;

pub trait ExprVisitor {
    type Output;

    /// Name of the pass, used in errors
    fn pass_name(&self) -> &'static str;

    fn unsupported(&self, node: &ExprRef) -> TranslateError {
        TranslateError::UnsupportedExpressionKind {
            kind: node.describe(),
            pass: self.pass_name(),
        }
    }

    fn visit_constant(&mut self, node: &ExprRef, _value: &Bson) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_field(&mut self, node: &ExprRef, _path: &str) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_binary(
        &mut self,
        node: &ExprRef,
        _op: BinaryOp,
        _left: &ExprRef,
        _right: &ExprRef,
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_unary(
        &mut self,
        node: &ExprRef,
        _op: UnaryOp,
        _operand: &ExprRef,
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_document(
        &mut self,
        node: &ExprRef,
        _fields: &[(String, ExprRef)],
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_accumulator(
        &mut self,
        node: &ExprRef,
        _op: AccumulatorOp,
        _operand: Option<&ExprRef>,
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_correlated_accumulator(
        &mut self,
        node: &ExprRef,
        _correlation: CorrelationId,
        _accumulator: &ExprRef,
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_source(&mut self, node: &ExprRef, _collection: &str) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_match(
        &mut self,
        node: &ExprRef,
        _source: &ExprRef,
        _predicate: &ExprRef,
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_group(
        &mut self,
        node: &ExprRef,
        _source: &ExprRef,
        _key: &ExprRef,
        _correlation: CorrelationId,
        _outputs: &[GroupOutput],
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_project(
        &mut self,
        node: &ExprRef,
        _source: &ExprRef,
        _projection: &ExprRef,
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_sort(
        &mut self,
        node: &ExprRef,
        _source: &ExprRef,
        _keys: &[SortKey],
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_skip(
        &mut self,
        node: &ExprRef,
        _source: &ExprRef,
        _count: u64,
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_limit(
        &mut self,
        node: &ExprRef,
        _source: &ExprRef,
        _count: u64,
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }

    fn visit_extension(
        &mut self,
        node: &ExprRef,
        _name: &str,
        _args: &[ExprRef],
    ) -> TranslateResult<Self::Output> {
        Err(self.unsupported(node))
    }
}

/// Dispatches `node` to the visitor method for its kind
pub fn accept<V>(node: &ExprRef, visitor: &mut V) -> TranslateResult<V::Output>
where
    V: ExprVisitor + ?Sized,
{
    match node.kind() {
        ExprKind::Constant(value) => visitor.visit_constant(node, value),
        ExprKind::Field { path } => visitor.visit_field(node, path),
        ExprKind::Binary { op, left, right } => visitor.visit_binary(node, *op, left, right),
        ExprKind::Unary { op, operand } => visitor.visit_unary(node, *op, operand),
        ExprKind::Document { fields } => visitor.visit_document(node, fields),
        ExprKind::Accumulator { op, operand } => {
            visitor.visit_accumulator(node, *op, operand.as_ref())
        }
        ExprKind::CorrelatedAccumulator {
            correlation,
            accumulator,
        } => visitor.visit_correlated_accumulator(node, *correlation, accumulator),
        ExprKind::Source { collection } => visitor.visit_source(node, collection),
        ExprKind::Match { source, predicate } => visitor.visit_match(node, source, predicate),
        ExprKind::Group {
            source,
            key,
            correlation,
            outputs,
        } => visitor.visit_group(node, source, key, *correlation, outputs),
        ExprKind::Project { source, projection } => {
            visitor.visit_project(node, source, projection)
        }
        ExprKind::Sort { source, keys } => visitor.visit_sort(node, source, keys),
        ExprKind::Skip { source, count } => visitor.visit_skip(node, source, *count),
        ExprKind::Limit { source, count } => visitor.visit_limit(node, source, *count),
        ExprKind::Extension { name, args } => visitor.visit_extension(node, name, args),
    }
}

//! Pipeline stage emitter
//!
//! Lowers a planned tree into stage documents, source first. Two visitors
//! do the work: one walks the pipeline spine and collects stages, the other
//! lowers scalar expressions into aggregation expression syntax.
//!
//! Any node without a lowering in its position fails the whole emission.

use std::sync::Arc;

use super::operators::{self, accumulator_operator, binary_operator};
use super::stage::{Pipeline, StageDocument, StageKind};
use crate::bson::{Bson, Document};
use crate::correlation::CorrelationId;
use crate::expr::{
    accept, AccumulatorOp, BinaryOp, ExprKind, ExprRef, ExprVisitor, GroupOutput, SortDirection,
    SortKey, TranslateError, TranslateResult, UnaryOp,
};
use crate::observability::{log_event_with_fields, Event};

/// Output field used when a projection is a single scalar
pub const SCALAR_PROJECTION_FIELD: &str = "__value";

/// Pipeline plus what redundant-stage elimination removed
#[derive(Debug, Clone)]
pub struct Emission {
    pub pipeline: Pipeline,
    /// Stages dropped or merged away, as `<operator>: <reason>`
    pub eliminated: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Emitter {
    eliminate_redundant: bool,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Emitter {
    pub fn new(eliminate_redundant: bool) -> Self {
        Self {
            eliminate_redundant,
        }
    }

    pub fn emit(&self, root: &ExprRef) -> TranslateResult<Pipeline> {
        self.lower(root).map(|emission| emission.pipeline)
    }

    pub fn lower(&self, root: &ExprRef) -> TranslateResult<Emission> {
        let mut collector = StageCollector {
            collection: None,
            stages: Vec::new(),
        };
        accept(root, &mut collector)?;

        let collection = collector.collection.ok_or_else(|| {
            TranslateError::InvalidExpression("pipeline has no source collection".into())
        })?;

        let (pending, eliminated) = if self.eliminate_redundant {
            eliminate_redundant(collector.stages)
        } else {
            (collector.stages, Vec::new())
        };

        Ok(Emission {
            pipeline: Pipeline {
                collection,
                stages: pending.into_iter().map(PendingStage::into_stage).collect(),
            },
            eliminated,
        })
    }
}

/// A lowered stage before redundant-stage elimination
#[derive(Debug, Clone, PartialEq)]
enum PendingStage {
    Match(Document),
    /// Match on constant true
    MatchAll,
    Group(Document),
    Project(Document),
    Sort(Document),
    Skip(u64),
    Limit(u64),
}

impl PendingStage {
    fn into_stage(self) -> StageDocument {
        match self {
            PendingStage::Match(query) => StageDocument::new(StageKind::Match, query),
            PendingStage::MatchAll => StageDocument::new(StageKind::Match, Document::new()),
            PendingStage::Group(spec) => StageDocument::new(StageKind::Group, spec),
            PendingStage::Project(spec) => StageDocument::new(StageKind::Project, spec),
            PendingStage::Sort(spec) => StageDocument::new(StageKind::Sort, spec),
            PendingStage::Skip(n) => StageDocument::new(StageKind::Skip, count_value(n)),
            PendingStage::Limit(n) => StageDocument::new(StageKind::Limit, count_value(n)),
        }
    }
}

fn count_value(n: u64) -> Bson {
    Bson::Int64(i64::try_from(n).unwrap_or(i64::MAX))
}

/// Drops stages that cannot change the result and merges adjacent
/// skips and limits.
fn eliminate_redundant(stages: Vec<PendingStage>) -> (Vec<PendingStage>, Vec<String>) {
    let mut out: Vec<PendingStage> = Vec::with_capacity(stages.len());
    let mut eliminated = Vec::new();

    for stage in stages {
        let reason = match (&stage, out.last_mut()) {
            (PendingStage::MatchAll, _) => Some(("$match", "predicate is constant true")),
            (PendingStage::Skip(0), _) => Some(("$skip", "skips nothing")),
            (PendingStage::Limit(n), Some(PendingStage::Limit(prev))) => {
                *prev = (*prev).min(*n);
                Some(("$limit", "merged into preceding limit"))
            }
            (PendingStage::Skip(n), Some(PendingStage::Skip(prev))) => {
                *prev = prev.saturating_add(*n);
                Some(("$skip", "merged into preceding skip"))
            }
            _ => None,
        };

        match reason {
            Some((operator, why)) => {
                log_event_with_fields(
                    Event::StageEliminated,
                    &[("stage", operator), ("reason", why)],
                );
                eliminated.push(format!("{}: {}", operator, why));
            }
            None => out.push(stage),
        }
    }

    (out, eliminated)
}

// ==================
// Pipeline spine
// ==================

struct StageCollector {
    collection: Option<String>,
    stages: Vec<PendingStage>,
}

impl ExprVisitor for StageCollector {
    type Output = ();

    fn pass_name(&self) -> &'static str {
        "stage-emitter"
    }

    /// Scalars have no lowering at pipeline position
    fn unsupported(&self, node: &ExprRef) -> TranslateError {
        unlowered(self.pass_name(), node)
    }

    fn visit_source(&mut self, _node: &ExprRef, collection: &str) -> TranslateResult<()> {
        self.collection = Some(collection.to_string());
        Ok(())
    }

    fn visit_match(
        &mut self,
        _node: &ExprRef,
        source: &ExprRef,
        predicate: &ExprRef,
    ) -> TranslateResult<()> {
        accept(source, self)?;
        let stage = match predicate.kind() {
            ExprKind::Constant(Bson::Boolean(true)) => PendingStage::MatchAll,
            _ => PendingStage::Match(lower_match(predicate)?),
        };
        self.stages.push(stage);
        Ok(())
    }

    fn visit_group(
        &mut self,
        _node: &ExprRef,
        source: &ExprRef,
        key: &ExprRef,
        _correlation: CorrelationId,
        outputs: &[GroupOutput],
    ) -> TranslateResult<()> {
        accept(source, self)?;
        let mut spec = Document::new();
        spec.insert("_id", lower_scalar(key)?);
        for output in outputs {
            spec.insert(output.name.clone(), lower_accumulator(&output.accumulator)?);
        }
        self.stages.push(PendingStage::Group(spec));
        Ok(())
    }

    fn visit_project(
        &mut self,
        _node: &ExprRef,
        source: &ExprRef,
        projection: &ExprRef,
    ) -> TranslateResult<()> {
        accept(source, self)?;
        let mut spec = Document::new();
        match projection.kind() {
            ExprKind::Document { fields } => {
                if !fields.iter().any(|(name, _)| name == "_id") {
                    spec.insert("_id", Bson::Int32(0));
                }
                for (name, value) in fields {
                    spec.insert(name.clone(), lower_projected(value)?);
                }
            }
            _ => {
                spec.insert("_id", Bson::Int32(0));
                spec.insert(SCALAR_PROJECTION_FIELD, lower_projected(projection)?);
            }
        }
        self.stages.push(PendingStage::Project(spec));
        Ok(())
    }

    fn visit_sort(&mut self, _node: &ExprRef, source: &ExprRef, keys: &[SortKey]) -> TranslateResult<()> {
        accept(source, self)?;
        let mut spec = Document::new();
        for key in keys {
            let direction = match key.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            spec.insert(key.path.clone(), Bson::Int32(direction));
        }
        self.stages.push(PendingStage::Sort(spec));
        Ok(())
    }

    fn visit_skip(&mut self, _node: &ExprRef, source: &ExprRef, count: u64) -> TranslateResult<()> {
        accept(source, self)?;
        self.stages.push(PendingStage::Skip(count));
        Ok(())
    }

    fn visit_limit(&mut self, _node: &ExprRef, source: &ExprRef, count: u64) -> TranslateResult<()> {
        accept(source, self)?;
        self.stages.push(PendingStage::Limit(count));
        Ok(())
    }
}

// ==================
// Scalars
// ==================

fn lower_scalar(node: &ExprRef) -> TranslateResult<Bson> {
    accept(node, &mut ScalarLowering)
}

/// Lowers a projected value; bare constants are wrapped so they are not
/// read as inclusion flags.
fn lower_projected(node: &ExprRef) -> TranslateResult<Bson> {
    match node.kind() {
        ExprKind::Constant(value) => Ok(literal(value.clone())),
        ExprKind::Document { fields } => {
            let mut document = Document::new();
            for (name, value) in fields {
                document.insert(name.clone(), lower_projected(value)?);
            }
            Ok(Bson::Document(document))
        }
        _ => lower_scalar(node),
    }
}

fn lower_accumulator(node: &ExprRef) -> TranslateResult<Bson> {
    match node.kind() {
        ExprKind::Accumulator { op, operand } => {
            let argument = match (op, operand) {
                (AccumulatorOp::Count, _) => Bson::Int32(1),
                (_, Some(operand)) => lower_scalar(operand)?,
                (_, None) => {
                    return Err(TranslateError::InvalidExpression(format!(
                        "{} has no operand",
                        op.name()
                    )))
                }
            };
            let mut document = Document::new();
            document.insert(accumulator_operator(*op), argument);
            Ok(Bson::Document(document))
        }
        _ => Err(TranslateError::UnloweredExpression {
            kind: node.kind_name(),
        }),
    }
}

fn literal(value: Bson) -> Bson {
    let mut document = Document::new();
    document.insert(operators::LITERAL, value);
    Bson::Document(document)
}

/// Whether a constant would be misread as an expression
fn needs_literal(value: &Bson) -> bool {
    match value {
        Bson::String(s) => s.starts_with('$'),
        Bson::Document(_) => true,
        Bson::Array(items) => items.iter().any(needs_literal),
        _ => false,
    }
}

fn operator_document(operator: &str, args: Vec<Bson>) -> Bson {
    let mut document = Document::new();
    document.insert(operator, Bson::Array(args));
    Bson::Document(document)
}

/// `UnloweredExpression` for every kind except `Extension`, which stays
/// unsupported
fn unlowered(pass: &'static str, node: &ExprRef) -> TranslateError {
    match node.kind() {
        ExprKind::Extension { .. } => TranslateError::UnsupportedExpressionKind {
            kind: node.describe(),
            pass,
        },
        _ => TranslateError::UnloweredExpression {
            kind: node.kind_name(),
        },
    }
}

struct ScalarLowering;

impl ExprVisitor for ScalarLowering {
    type Output = Bson;

    fn pass_name(&self) -> &'static str {
        "expression-emitter"
    }

    /// Accumulators and pipeline nodes have no lowering at scalar position
    fn unsupported(&self, node: &ExprRef) -> TranslateError {
        unlowered(self.pass_name(), node)
    }

    fn visit_constant(&mut self, _node: &ExprRef, value: &Bson) -> TranslateResult<Bson> {
        if needs_literal(value) {
            Ok(literal(value.clone()))
        } else {
            Ok(value.clone())
        }
    }

    fn visit_field(&mut self, _node: &ExprRef, path: &str) -> TranslateResult<Bson> {
        Ok(Bson::String(format!("${}", path)))
    }

    fn visit_binary(
        &mut self,
        _node: &ExprRef,
        op: BinaryOp,
        left: &ExprRef,
        right: &ExprRef,
    ) -> TranslateResult<Bson> {
        let args = vec![accept(left, self)?, accept(right, self)?];
        Ok(operator_document(binary_operator(op), args))
    }

    fn visit_unary(&mut self, _node: &ExprRef, op: UnaryOp, operand: &ExprRef) -> TranslateResult<Bson> {
        let value = accept(operand, self)?;
        Ok(match op {
            UnaryOp::Not => operator_document(operators::NOT, vec![value]),
            UnaryOp::Negate => {
                operator_document(binary_operator(BinaryOp::Subtract), vec![Bson::Int32(0), value])
            }
        })
    }

    fn visit_document(&mut self, _node: &ExprRef, fields: &[(String, ExprRef)]) -> TranslateResult<Bson> {
        let mut document = Document::new();
        for (name, value) in fields {
            document.insert(name.clone(), accept(value, self)?);
        }
        Ok(Bson::Document(document))
    }
}

// ==================
// Match predicates
// ==================

fn lower_match(predicate: &ExprRef) -> TranslateResult<Document> {
    if let Some(query) = query_form(predicate) {
        return Ok(query);
    }
    let mut document = Document::new();
    document.insert(operators::EXPR, lower_scalar(predicate)?);
    Ok(document)
}

/// Query-language form of a predicate built only from field-vs-constant
/// comparisons and logical connectives. `None` if any part falls outside.
fn query_form(predicate: &ExprRef) -> Option<Document> {
    match predicate.kind() {
        ExprKind::Binary { op, left, right } if op.is_comparison() => {
            match (left.kind(), right.kind()) {
                (ExprKind::Field { path }, ExprKind::Constant(value)) => {
                    Some(comparison(path, *op, value))
                }
                (ExprKind::Constant(value), ExprKind::Field { path }) => {
                    Some(comparison(path, op.mirrored(), value))
                }
                _ => None,
            }
        }
        ExprKind::Binary {
            op: op @ (BinaryOp::And | BinaryOp::Or),
            ..
        } => {
            let mut terms = Vec::new();
            flatten(predicate, *op, &mut terms);
            let clauses = terms
                .iter()
                .map(|term| query_form(term).map(Bson::Document))
                .collect::<Option<Vec<_>>>()?;
            let mut document = Document::new();
            document.insert(binary_operator(*op), Bson::Array(clauses));
            Some(document)
        }
        ExprKind::Unary {
            op: UnaryOp::Not,
            operand,
        } => {
            let inner = query_form(operand)?;
            let mut document = Document::new();
            document.insert(operators::NOR, Bson::Array(vec![Bson::Document(inner)]));
            Some(document)
        }
        _ => None,
    }
}

/// Collects the operands of a chain of the same connective
fn flatten(node: &ExprRef, connective: BinaryOp, out: &mut Vec<ExprRef>) {
    match node.kind() {
        ExprKind::Binary { op, left, right } if *op == connective => {
            flatten(left, connective, out);
            flatten(right, connective, out);
        }
        _ => out.push(Arc::clone(node)),
    }
}

fn comparison(path: &str, op: BinaryOp, value: &Bson) -> Document {
    let mut document = Document::new();
    let plain_equality = op == BinaryOp::Eq
        && !matches!(value, Bson::Document(_) | Bson::RegularExpression(_));
    if plain_equality {
        document.insert(path, value.clone());
    } else {
        let mut condition = Document::new();
        condition.insert(binary_operator(op), value.clone());
        document.insert(path, condition);
    }
    document
}

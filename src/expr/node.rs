//! Expression nodes
//!
//! Nodes are immutable and shared through `ExprRef`. Constructors check the
//! typing rules, so a node that exists is well-typed. A rewrite never edits
//! a node in place: `Expr::update` returns the same `Arc` when no child
//! changed and a freshly built node otherwise.

use std::fmt;
use std::sync::Arc;

use super::errors::{TranslateError, TranslateResult};
use super::types::ResultType;
use crate::bson::Bson;
use crate::correlation::CorrelationId;

/// Shared handle to an immutable node
pub type ExprRef = Arc<Expr>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Concat,
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Gt => "gt",
            BinaryOp::Gte => "gte",
            BinaryOp::Lt => "lt",
            BinaryOp::Lte => "lte",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
            BinaryOp::Mod => "mod",
            BinaryOp::Concat => "concat",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "eq" => BinaryOp::Eq,
            "ne" => BinaryOp::Ne,
            "gt" => BinaryOp::Gt,
            "gte" => BinaryOp::Gte,
            "lt" => BinaryOp::Lt,
            "lte" => BinaryOp::Lte,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            "add" => BinaryOp::Add,
            "subtract" => BinaryOp::Subtract,
            "multiply" => BinaryOp::Multiply,
            "divide" => BinaryOp::Divide,
            "mod" => BinaryOp::Mod,
            "concat" => BinaryOp::Concat,
            _ => return None,
        };
        Some(op)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Lt | BinaryOp::Lte
        )
    }

    /// The comparison that holds with the operands swapped
    pub fn mirrored(&self) -> BinaryOp {
        match self {
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Gte => BinaryOp::Lte,
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Lte => BinaryOp::Gte,
            other => *other,
        }
    }

    fn result_type(&self, left: &ResultType, right: &ResultType) -> TranslateResult<ResultType> {
        match self {
            BinaryOp::Eq | BinaryOp::Ne => Ok(ResultType::Bool),
            BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Lt | BinaryOp::Lte => {
                if left.is_comparable_with(right) {
                    Ok(ResultType::Bool)
                } else {
                    Err(self.incompatible("mutually comparable", right))
                }
            }
            BinaryOp::And | BinaryOp::Or => {
                for ty in [left, right] {
                    if !ty.is_boolean() {
                        return Err(self.incompatible("boolean", ty));
                    }
                }
                Ok(ResultType::Bool)
            }
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Mod => {
                for ty in [left, right] {
                    if !ty.is_numeric() {
                        return Err(self.incompatible("numeric", ty));
                    }
                }
                Ok(left.promote(right))
            }
            BinaryOp::Divide => {
                for ty in [left, right] {
                    if !ty.is_numeric() {
                        return Err(self.incompatible("numeric", ty));
                    }
                }
                if *left == ResultType::Any || *right == ResultType::Any {
                    Ok(ResultType::Any)
                } else {
                    Ok(ResultType::Double)
                }
            }
            BinaryOp::Concat => {
                for ty in [left, right] {
                    if !ty.is_string() {
                        return Err(self.incompatible("string", ty));
                    }
                }
                Ok(ResultType::String)
            }
        }
    }

    fn incompatible(&self, expected: &'static str, actual: &ResultType) -> TranslateError {
        TranslateError::IncompatibleOperand {
            operator: self.name(),
            expected,
            actual: actual.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Negate => "negate",
        }
    }
}

/// Aggregation operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccumulatorOp {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
}

impl AccumulatorOp {
    pub fn name(&self) -> &'static str {
        match self {
            AccumulatorOp::Sum => "sum",
            AccumulatorOp::Count => "count",
            AccumulatorOp::Avg => "avg",
            AccumulatorOp::Min => "min",
            AccumulatorOp::Max => "max",
            AccumulatorOp::First => "first",
            AccumulatorOp::Last => "last",
            AccumulatorOp::Push => "push",
            AccumulatorOp::AddToSet => "addToSet",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "sum" => AccumulatorOp::Sum,
            "count" => AccumulatorOp::Count,
            "avg" => AccumulatorOp::Avg,
            "min" => AccumulatorOp::Min,
            "max" => AccumulatorOp::Max,
            "first" => AccumulatorOp::First,
            "last" => AccumulatorOp::Last,
            "push" => AccumulatorOp::Push,
            "addToSet" => AccumulatorOp::AddToSet,
            _ => return None,
        };
        Some(op)
    }

    /// Result type over an operand, or an error if the operand is outside
    /// the operator's domain
    fn result_type(&self, operand: Option<&ResultType>) -> TranslateResult<ResultType> {
        let operand = match (self, operand) {
            (AccumulatorOp::Count, None) => return Ok(ResultType::Int64),
            (AccumulatorOp::Count, Some(_)) => {
                return Err(TranslateError::InvalidExpression(
                    "count takes no operand".into(),
                ))
            }
            (op, None) => {
                return Err(TranslateError::InvalidExpression(format!(
                    "{} requires an operand",
                    op.name()
                )))
            }
            (_, Some(ty)) => ty,
        };

        match self {
            AccumulatorOp::Sum | AccumulatorOp::Avg if !operand.is_numeric() => {
                Err(TranslateError::IncompatibleOperand {
                    operator: self.name(),
                    expected: "numeric",
                    actual: operand.clone(),
                })
            }
            AccumulatorOp::Sum => Ok(match operand {
                ResultType::Any => ResultType::Any,
                ResultType::Double => ResultType::Double,
                _ => ResultType::Int64,
            }),
            AccumulatorOp::Avg => Ok(ResultType::Double),
            AccumulatorOp::Min
            | AccumulatorOp::Max
            | AccumulatorOp::First
            | AccumulatorOp::Last => Ok(operand.clone()),
            AccumulatorOp::Push | AccumulatorOp::AddToSet => {
                Ok(ResultType::array_of(operand.clone()))
            }
            AccumulatorOp::Count => Ok(ResultType::Int64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

/// One named output of a group stage
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOutput {
    pub name: String,
    /// Always an `Accumulator` node
    pub accumulator: ExprRef,
}

/// The closed set of node kinds
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(Bson),
    /// Dotted field path into the current document
    Field { path: String },
    Binary {
        op: BinaryOp,
        left: ExprRef,
        right: ExprRef,
    },
    Unary {
        op: UnaryOp,
        operand: ExprRef,
    },
    /// Computed document of named sub-expressions
    Document { fields: Vec<(String, ExprRef)> },
    /// `operand` is `None` only for count
    Accumulator {
        op: AccumulatorOp,
        operand: Option<ExprRef>,
    },
    CorrelatedAccumulator {
        correlation: CorrelationId,
        accumulator: ExprRef,
    },
    Source { collection: String },
    Match { source: ExprRef, predicate: ExprRef },
    Group {
        source: ExprRef,
        key: ExprRef,
        correlation: CorrelationId,
        outputs: Vec<GroupOutput>,
    },
    Project { source: ExprRef, projection: ExprRef },
    Sort { source: ExprRef, keys: Vec<SortKey> },
    Skip { source: ExprRef, count: u64 },
    Limit { source: ExprRef, count: u64 },
    /// Host-specific node with no mapping; carried only to be rejected
    Extension { name: String, args: Vec<ExprRef> },
}

/// An expression node with its declared result type
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    kind: ExprKind,
    result_type: ResultType,
}

impl Expr {
    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn result_type(&self) -> &ResultType {
        &self.result_type
    }

    /// Kind name used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Constant(_) => "Constant",
            ExprKind::Field { .. } => "Field",
            ExprKind::Binary { .. } => "Binary",
            ExprKind::Unary { .. } => "Unary",
            ExprKind::Document { .. } => "Document",
            ExprKind::Accumulator { .. } => "Accumulator",
            ExprKind::CorrelatedAccumulator { .. } => "CorrelatedAccumulator",
            ExprKind::Source { .. } => "Source",
            ExprKind::Match { .. } => "Match",
            ExprKind::Group { .. } => "Group",
            ExprKind::Project { .. } => "Project",
            ExprKind::Sort { .. } => "Sort",
            ExprKind::Skip { .. } => "Skip",
            ExprKind::Limit { .. } => "Limit",
            ExprKind::Extension { .. } => "Extension",
        }
    }

    /// Kind name with the extension name appended for `Extension` nodes
    pub fn describe(&self) -> String {
        match &self.kind {
            ExprKind::Extension { name, .. } => format!("Extension({})", name),
            _ => self.kind_name().to_string(),
        }
    }

    /// Structural equality in which constants compare with
    /// [`Bson::same_value`], so a NaN constant matches itself
    pub fn same_structure(&self, other: &Expr) -> bool {
        if self.result_type != other.result_type || !self.same_payload(other) {
            return false;
        }
        let (ours, theirs) = (self.children(), other.children());
        ours.len() == theirs.len()
            && ours
                .iter()
                .zip(&theirs)
                .all(|(a, b)| Arc::ptr_eq(a, b) || a.same_structure(b))
    }

    /// Compares everything but the children
    fn same_payload(&self, other: &Expr) -> bool {
        match (&self.kind, &other.kind) {
            (ExprKind::Constant(a), ExprKind::Constant(b)) => a.same_value(b),
            (ExprKind::Field { path: a }, ExprKind::Field { path: b }) => a == b,
            (ExprKind::Binary { op: a, .. }, ExprKind::Binary { op: b, .. }) => a == b,
            (ExprKind::Unary { op: a, .. }, ExprKind::Unary { op: b, .. }) => a == b,
            (ExprKind::Document { fields: a }, ExprKind::Document { fields: b }) => {
                a.len() == b.len() && a.iter().zip(b).all(|((x, _), (y, _))| x == y)
            }
            (ExprKind::Accumulator { op: a, .. }, ExprKind::Accumulator { op: b, .. }) => a == b,
            (
                ExprKind::CorrelatedAccumulator { correlation: a, .. },
                ExprKind::CorrelatedAccumulator { correlation: b, .. },
            ) => a == b,
            (ExprKind::Source { collection: a }, ExprKind::Source { collection: b }) => a == b,
            (ExprKind::Match { .. }, ExprKind::Match { .. })
            | (ExprKind::Project { .. }, ExprKind::Project { .. }) => true,
            (
                ExprKind::Group {
                    correlation: a,
                    outputs: x,
                    ..
                },
                ExprKind::Group {
                    correlation: b,
                    outputs: y,
                    ..
                },
            ) => a == b && x.len() == y.len() && x.iter().zip(y).all(|(p, q)| p.name == q.name),
            (ExprKind::Sort { keys: a, .. }, ExprKind::Sort { keys: b, .. }) => a == b,
            (ExprKind::Skip { count: a, .. }, ExprKind::Skip { count: b, .. })
            | (ExprKind::Limit { count: a, .. }, ExprKind::Limit { count: b, .. }) => a == b,
            (ExprKind::Extension { name: a, .. }, ExprKind::Extension { name: b, .. }) => a == b,
            _ => false,
        }
    }

    /// Whether the node produces a document stream
    pub fn is_pipeline(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Source { .. }
                | ExprKind::Match { .. }
                | ExprKind::Group { .. }
                | ExprKind::Project { .. }
                | ExprKind::Sort { .. }
                | ExprKind::Skip { .. }
                | ExprKind::Limit { .. }
        )
    }

    /// Whether an accumulator appears anywhere in this subtree
    pub fn contains_accumulator(&self) -> bool {
        match &self.kind {
            ExprKind::Accumulator { .. } | ExprKind::CorrelatedAccumulator { .. } => true,
            _ => self.children().iter().any(|c| c.contains_accumulator()),
        }
    }

    /// Children in traversal order
    pub fn children(&self) -> Vec<ExprRef> {
        match &self.kind {
            ExprKind::Constant(_) | ExprKind::Field { .. } | ExprKind::Source { .. } => Vec::new(),
            ExprKind::Binary { left, right, .. } => vec![left.clone(), right.clone()],
            ExprKind::Unary { operand, .. } => vec![operand.clone()],
            ExprKind::Document { fields } => fields.iter().map(|(_, e)| e.clone()).collect(),
            ExprKind::Accumulator { operand, .. } => operand.iter().cloned().collect(),
            ExprKind::CorrelatedAccumulator { accumulator, .. } => vec![accumulator.clone()],
            ExprKind::Match { source, predicate } => vec![source.clone(), predicate.clone()],
            ExprKind::Group {
                source,
                key,
                outputs,
                ..
            } => {
                let mut children = vec![source.clone(), key.clone()];
                children.extend(outputs.iter().map(|o| o.accumulator.clone()));
                children
            }
            ExprKind::Project { source, projection } => vec![source.clone(), projection.clone()],
            ExprKind::Sort { source, .. }
            | ExprKind::Skip { source, .. }
            | ExprKind::Limit { source, .. } => vec![source.clone()],
            ExprKind::Extension { args, .. } => args.clone(),
        }
    }

    // ==================
    // Constructors
    // ==================

    fn build(kind: ExprKind, result_type: ResultType) -> ExprRef {
        Arc::new(Expr { kind, result_type })
    }

    pub fn constant(value: impl Into<Bson>) -> ExprRef {
        let value = value.into();
        let ty = ResultType::of_value(&value);
        Self::build(ExprKind::Constant(value), ty)
    }

    pub fn field(path: impl Into<String>, ty: ResultType) -> TranslateResult<ExprRef> {
        let path = path.into();
        if path.is_empty() || path.starts_with('$') || path.split('.').any(str::is_empty) {
            return Err(TranslateError::InvalidExpression(format!(
                "'{}' is not a valid field path",
                path
            )));
        }
        Ok(Self::build(ExprKind::Field { path }, ty))
    }

    pub fn binary(op: BinaryOp, left: ExprRef, right: ExprRef) -> TranslateResult<ExprRef> {
        Self::require_scalar(&left)?;
        Self::require_scalar(&right)?;
        let ty = op.result_type(left.result_type(), right.result_type())?;
        Ok(Self::build(ExprKind::Binary { op, left, right }, ty))
    }

    pub fn unary(op: UnaryOp, operand: ExprRef) -> TranslateResult<ExprRef> {
        Self::require_scalar(&operand)?;
        let operand_ty = operand.result_type();
        let ty = match op {
            UnaryOp::Not if operand_ty.is_boolean() => ResultType::Bool,
            UnaryOp::Negate if operand_ty.is_numeric() => operand_ty.clone(),
            UnaryOp::Not => {
                return Err(TranslateError::IncompatibleOperand {
                    operator: op.name(),
                    expected: "boolean",
                    actual: operand_ty.clone(),
                })
            }
            UnaryOp::Negate => {
                return Err(TranslateError::IncompatibleOperand {
                    operator: op.name(),
                    expected: "numeric",
                    actual: operand_ty.clone(),
                })
            }
        };
        Ok(Self::build(ExprKind::Unary { op, operand }, ty))
    }

    pub fn document(fields: Vec<(String, ExprRef)>) -> TranslateResult<ExprRef> {
        for (i, (name, value)) in fields.iter().enumerate() {
            Self::require_output_name(name)?;
            if fields[..i].iter().any(|(other, _)| other == name) {
                return Err(TranslateError::InvalidExpression(format!(
                    "duplicate field '{}' in document expression",
                    name
                )));
            }
            Self::require_scalar(value)?;
        }
        Ok(Self::build(ExprKind::Document { fields }, ResultType::Document))
    }

    pub fn accumulator(op: AccumulatorOp, operand: Option<ExprRef>) -> TranslateResult<ExprRef> {
        if let Some(operand) = &operand {
            Self::require_scalar(operand)?;
            if operand.contains_accumulator() {
                return Err(TranslateError::InvalidExpression(format!(
                    "{} operand may not contain another accumulator",
                    op.name()
                )));
            }
        }
        let ty = op.result_type(operand.as_ref().map(|o| o.result_type()))?;
        Ok(Self::build(ExprKind::Accumulator { op, operand }, ty))
    }

    /// Wraps an `Accumulator` node with its scope. Use
    /// `CorrelationResolver::tag` rather than calling this directly.
    pub(crate) fn correlated(
        correlation: CorrelationId,
        accumulator: ExprRef,
    ) -> TranslateResult<ExprRef> {
        if !matches!(accumulator.kind, ExprKind::Accumulator { .. }) {
            return Err(TranslateError::InvalidExpression(format!(
                "only accumulators can be correlated, got {}",
                accumulator.kind_name()
            )));
        }
        let ty = accumulator.result_type.clone();
        Ok(Self::build(
            ExprKind::CorrelatedAccumulator {
                correlation,
                accumulator,
            },
            ty,
        ))
    }

    pub fn source(collection: impl Into<String>) -> TranslateResult<ExprRef> {
        let collection = collection.into();
        if collection.is_empty() || collection.contains('\0') || collection.starts_with('$') {
            return Err(TranslateError::InvalidExpression(format!(
                "'{}' is not a valid collection name",
                collection
            )));
        }
        Ok(Self::build(
            ExprKind::Source { collection },
            ResultType::documents(),
        ))
    }

    pub fn match_(source: ExprRef, predicate: ExprRef) -> TranslateResult<ExprRef> {
        Self::require_pipeline(&source)?;
        Self::require_scalar(&predicate)?;
        if !predicate.result_type().is_boolean() {
            return Err(TranslateError::IncompatibleOperand {
                operator: "match",
                expected: "boolean",
                actual: predicate.result_type().clone(),
            });
        }
        Ok(Self::build(
            ExprKind::Match { source, predicate },
            ResultType::documents(),
        ))
    }

    pub fn group(
        source: ExprRef,
        key: ExprRef,
        correlation: CorrelationId,
        outputs: Vec<GroupOutput>,
    ) -> TranslateResult<ExprRef> {
        Self::require_pipeline(&source)?;
        Self::require_scalar(&key)?;
        if key.contains_accumulator() {
            return Err(TranslateError::InvalidExpression(
                "group key may not contain an accumulator".into(),
            ));
        }
        for (i, output) in outputs.iter().enumerate() {
            Self::require_output_name(&output.name)?;
            if output.name == "_id" || outputs[..i].iter().any(|o| o.name == output.name) {
                return Err(TranslateError::InvalidExpression(format!(
                    "group output name '{}' is reserved or duplicated",
                    output.name
                )));
            }
            if !matches!(output.accumulator.kind, ExprKind::Accumulator { .. }) {
                return Err(TranslateError::InvalidExpression(format!(
                    "group output '{}' must be an accumulator, got {}",
                    output.name,
                    output.accumulator.kind_name()
                )));
            }
        }
        Ok(Self::build(
            ExprKind::Group {
                source,
                key,
                correlation,
                outputs,
            },
            ResultType::documents(),
        ))
    }

    pub fn project(source: ExprRef, projection: ExprRef) -> TranslateResult<ExprRef> {
        Self::require_pipeline(&source)?;
        Self::require_scalar(&projection)?;
        Ok(Self::build(
            ExprKind::Project { source, projection },
            ResultType::documents(),
        ))
    }

    pub fn sort(source: ExprRef, keys: Vec<SortKey>) -> TranslateResult<ExprRef> {
        Self::require_pipeline(&source)?;
        if keys.is_empty() {
            return Err(TranslateError::InvalidExpression(
                "sort needs at least one key".into(),
            ));
        }
        for key in &keys {
            Self::require_output_path(&key.path)?;
        }
        Ok(Self::build(
            ExprKind::Sort { source, keys },
            ResultType::documents(),
        ))
    }

    pub fn skip(source: ExprRef, count: u64) -> TranslateResult<ExprRef> {
        Self::require_pipeline(&source)?;
        Self::require_count(count)?;
        Ok(Self::build(
            ExprKind::Skip { source, count },
            ResultType::documents(),
        ))
    }

    pub fn limit(source: ExprRef, count: u64) -> TranslateResult<ExprRef> {
        Self::require_pipeline(&source)?;
        Self::require_count(count)?;
        if count == 0 {
            return Err(TranslateError::InvalidExpression(
                "limit must be positive".into(),
            ));
        }
        Ok(Self::build(
            ExprKind::Limit { source, count },
            ResultType::documents(),
        ))
    }

    pub fn extension(name: impl Into<String>, args: Vec<ExprRef>) -> ExprRef {
        Self::build(
            ExprKind::Extension {
                name: name.into(),
                args,
            },
            ResultType::Any,
        )
    }

    fn require_scalar(node: &ExprRef) -> TranslateResult<()> {
        if node.is_pipeline() {
            return Err(TranslateError::InvalidExpression(format!(
                "{} cannot be used as a value",
                node.kind_name()
            )));
        }
        Ok(())
    }

    fn require_pipeline(node: &ExprRef) -> TranslateResult<()> {
        if !node.is_pipeline() {
            return Err(TranslateError::InvalidExpression(format!(
                "{} is not a pipeline stage",
                node.describe()
            )));
        }
        Ok(())
    }

    fn require_output_name(name: &str) -> TranslateResult<()> {
        if name.is_empty() || name.starts_with('$') || name.contains('.') || name.contains('\0') {
            return Err(TranslateError::InvalidExpression(format!(
                "'{}' is not a valid output field name",
                name
            )));
        }
        Ok(())
    }

    fn require_output_path(path: &str) -> TranslateResult<()> {
        if path.is_empty() || path.starts_with('$') || path.split('.').any(str::is_empty) {
            return Err(TranslateError::InvalidExpression(format!(
                "'{}' is not a valid field path",
                path
            )));
        }
        Ok(())
    }

    fn require_count(count: u64) -> TranslateResult<()> {
        if count > i64::MAX as u64 {
            return Err(TranslateError::InvalidExpression(format!(
                "count {} does not fit a 64-bit signed integer",
                count
            )));
        }
        Ok(())
    }

    // ==================
    // Rewriting
    // ==================

    /// Rebuilds `node` with new children.
    ///
    /// Returns `node` itself when every child is pointer-identical to the
    /// current one. The rebuilt node must keep the declared result type.
    pub fn update(node: &ExprRef, children: Vec<ExprRef>) -> TranslateResult<ExprRef> {
        let current = node.children();
        if current.len() != children.len() {
            return Err(TranslateError::ChildCountMismatch {
                kind: node.kind_name(),
                expected: current.len(),
                actual: children.len(),
            });
        }
        if current
            .iter()
            .zip(children.iter())
            .all(|(old, new)| Arc::ptr_eq(old, new))
        {
            return Ok(Arc::clone(node));
        }

        let mut children = children.into_iter();
        let mut next = || children.next().ok_or(TranslateError::ChildCountMismatch {
            kind: node.kind_name(),
            expected: current.len(),
            actual: 0,
        });

        let rebuilt = match &node.kind {
            ExprKind::Constant(_) | ExprKind::Field { .. } | ExprKind::Source { .. } => {
                Arc::clone(node)
            }
            ExprKind::Binary { op, .. } => {
                let left = next()?;
                let right = next()?;
                Expr::binary(*op, left, right)?
            }
            ExprKind::Unary { op, .. } => Expr::unary(*op, next()?)?,
            ExprKind::Document { fields } => {
                let mut rebuilt = Vec::with_capacity(fields.len());
                for (name, _) in fields {
                    rebuilt.push((name.clone(), next()?));
                }
                Expr::document(rebuilt)?
            }
            ExprKind::Accumulator { op, operand } => {
                let operand = match operand {
                    Some(_) => Some(next()?),
                    None => None,
                };
                Expr::accumulator(*op, operand)?
            }
            ExprKind::CorrelatedAccumulator { correlation, .. } => {
                Expr::correlated(*correlation, next()?)?
            }
            ExprKind::Match { .. } => {
                let source = next()?;
                let predicate = next()?;
                Expr::match_(source, predicate)?
            }
            ExprKind::Group {
                correlation,
                outputs,
                ..
            } => {
                let source = next()?;
                let key = next()?;
                let mut rebuilt = Vec::with_capacity(outputs.len());
                for output in outputs {
                    rebuilt.push(GroupOutput {
                        name: output.name.clone(),
                        accumulator: next()?,
                    });
                }
                Expr::group(source, key, *correlation, rebuilt)?
            }
            ExprKind::Project { .. } => {
                let source = next()?;
                let projection = next()?;
                Expr::project(source, projection)?
            }
            ExprKind::Sort { keys, .. } => Expr::sort(next()?, keys.clone())?,
            ExprKind::Skip { count, .. } => Expr::skip(next()?, *count)?,
            ExprKind::Limit { count, .. } => Expr::limit(next()?, *count)?,
            ExprKind::Extension { name, .. } => {
                let args = std::iter::from_fn(|| next().ok()).collect();
                Expr::extension(name.clone(), args)
            }
        };

        if rebuilt.result_type != node.result_type {
            return Err(TranslateError::TypeInvariantViolation {
                kind: node.kind_name(),
                expected: node.result_type.clone(),
                actual: rebuilt.result_type.clone(),
            });
        }
        Ok(rebuilt)
    }

    /// Applies `f` to every child and rebuilds only if something changed
    pub fn map_children<F>(node: &ExprRef, mut f: F) -> TranslateResult<ExprRef>
    where
        F: FnMut(&ExprRef) -> TranslateResult<ExprRef>,
    {
        let children = node
            .children()
            .iter()
            .map(&mut f)
            .collect::<TranslateResult<Vec<_>>>()?;
        Expr::update(node, children)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Constant(value) => write!(f, "{:?}", value),
            ExprKind::Field { path } => write!(f, "${}", path),
            ExprKind::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.name(), right)
            }
            ExprKind::Unary { op, operand } => write!(f, "{}({})", op.name(), operand),
            ExprKind::Document { fields } => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                write!(f, "}}")
            }
            ExprKind::Accumulator { op, operand } => match operand {
                Some(operand) => write!(f, "{}({})", op.name(), operand),
                None => write!(f, "{}()", op.name()),
            },
            ExprKind::CorrelatedAccumulator {
                correlation,
                accumulator,
            } => write!(f, "{}@{}", accumulator, correlation),
            ExprKind::Source { collection } => write!(f, "source({})", collection),
            ExprKind::Match { source, predicate } => {
                write!(f, "{} | match {}", source, predicate)
            }
            ExprKind::Group {
                source,
                key,
                correlation,
                outputs,
            } => {
                write!(f, "{} | group[{}] by {}", source, correlation, key)?;
                for output in outputs {
                    write!(f, ", {} = {}", output.name, output.accumulator)?;
                }
                Ok(())
            }
            ExprKind::Project { source, projection } => {
                write!(f, "{} | project {}", source, projection)
            }
            ExprKind::Sort { source, keys } => {
                write!(f, "{} | sort", source)?;
                for key in keys {
                    write!(f, " {} {}", key.path, key.direction.as_str())?;
                }
                Ok(())
            }
            ExprKind::Skip { source, count } => write!(f, "{} | skip {}", source, count),
            ExprKind::Limit { source, count } => write!(f, "{} | limit {}", source, count),
            ExprKind::Extension { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationResolver;

    fn int_field(path: &str) -> ExprRef {
        Expr::field(path, ResultType::Int32).unwrap()
    }

    #[test]
    fn test_update_with_same_children_returns_same_node() {
        let node = Expr::binary(BinaryOp::Add, int_field("a"), Expr::constant(1)).unwrap();
        let again = Expr::update(&node, node.children()).unwrap();
        assert!(Arc::ptr_eq(&node, &again));
    }

    #[test]
    fn test_update_with_changed_child_builds_new_node() {
        let node = Expr::binary(BinaryOp::Add, int_field("a"), Expr::constant(1)).unwrap();
        let children = vec![int_field("b"), node.children()[1].clone()];
        let updated = Expr::update(&node, children).unwrap();
        assert!(!Arc::ptr_eq(&node, &updated));
        assert_eq!(updated.to_string(), "($b add Int32(1))");
        // Unchanged child is shared, not copied
        assert!(Arc::ptr_eq(&updated.children()[1], &node.children()[1]));
    }

    #[test]
    fn test_update_rejects_type_change() {
        let node = Expr::binary(BinaryOp::Add, int_field("a"), Expr::constant(1)).unwrap();
        let widened = Expr::field("a", ResultType::Int64).unwrap();
        let err = Expr::update(&node, vec![widened, Expr::constant(1)]).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::TypeInvariantViolation {
                kind: "Binary",
                expected: ResultType::Int32,
                actual: ResultType::Int64,
            }
        ));
    }

    #[test]
    fn test_update_rejects_wrong_child_count() {
        let node = Expr::unary(UnaryOp::Not, Expr::constant(true)).unwrap();
        let err = Expr::update(&node, vec![]).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::ChildCountMismatch {
                expected: 1,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_accumulator_domain_checked() {
        let name = Expr::field("name", ResultType::String).unwrap();
        assert!(matches!(
            Expr::accumulator(AccumulatorOp::Sum, Some(name.clone())),
            Err(TranslateError::IncompatibleOperand { operator: "sum", .. })
        ));
        let first = Expr::accumulator(AccumulatorOp::First, Some(name)).unwrap();
        assert_eq!(first.result_type(), &ResultType::String);
        let count = Expr::accumulator(AccumulatorOp::Count, None).unwrap();
        assert_eq!(count.result_type(), &ResultType::Int64);
    }

    #[test]
    fn test_correlated_keeps_accumulator_type() {
        let mut resolver = CorrelationResolver::new();
        let scope = resolver.new_scope();
        let avg = Expr::accumulator(AccumulatorOp::Avg, Some(int_field("qty"))).unwrap();
        let tagged = resolver.tag(avg.clone(), scope).unwrap();
        assert_eq!(tagged.result_type(), avg.result_type());
        assert!(matches!(
            Expr::correlated(scope, int_field("qty")),
            Err(TranslateError::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_pipeline_and_scalar_positions() {
        let source = Expr::source("orders").unwrap();
        assert!(Expr::match_(int_field("a"), Expr::constant(true)).is_err());
        assert!(Expr::binary(BinaryOp::Eq, source.clone(), Expr::constant(1)).is_err());
        assert!(matches!(
            Expr::match_(source, int_field("a")),
            Err(TranslateError::IncompatibleOperand { operator: "match", .. })
        ));
    }

    #[test]
    fn test_invalid_paths_rejected() {
        assert!(Expr::field("", ResultType::Any).is_err());
        assert!(Expr::field("a..b", ResultType::Any).is_err());
        assert!(Expr::field("$a", ResultType::Any).is_err());
        assert!(Expr::field("a.b", ResultType::Any).is_ok());
    }

    #[test]
    fn test_map_children_identity_is_shared() {
        let source = Expr::source("orders").unwrap();
        let limited = Expr::limit(source, 5).unwrap();
        let mapped = Expr::map_children(&limited, |c| Ok(c.clone())).unwrap();
        assert!(Arc::ptr_eq(&limited, &mapped));
    }

    #[test]
    fn test_limit_must_be_positive() {
        let source = Expr::source("orders").unwrap();
        assert!(Expr::limit(source.clone(), 0).is_err());
        assert!(Expr::skip(source, 0).is_ok());
    }

    #[test]
    fn test_same_structure_matches_nan_constants() {
        let build = || {
            let sum = Expr::binary(BinaryOp::Add, int_field("qty"), Expr::constant(f64::NAN)).unwrap();
            Expr::accumulator(AccumulatorOp::Sum, Some(sum)).unwrap()
        };
        let (a, b) = (build(), build());
        assert_ne!(a, b);
        assert!(a.same_structure(&b));

        let other = Expr::accumulator(AccumulatorOp::Sum, Some(int_field("qty"))).unwrap();
        assert!(!a.same_structure(&other));
        let typed = Expr::field("qty", ResultType::Int64).unwrap();
        assert!(!int_field("qty").same_structure(&typed));
    }
}

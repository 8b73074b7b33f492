//! Expression IR
//!
//! Immutable, structurally shared expression trees covering scalar
//! expressions, accumulators and pipeline stage wrappers, plus the visitor
//! framework rewrite passes are written against.

mod errors;
mod node;
mod types;
mod visitor;

pub use errors::{TranslateError, TranslateResult};
pub use node::{
    AccumulatorOp, BinaryOp, Expr, ExprKind, ExprRef, GroupOutput, SortDirection, SortKey,
    UnaryOp,
};
pub use types::ResultType;
pub use visitor::{accept, ExprVisitor};

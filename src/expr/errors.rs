//! Translation error types
//!
//! Error codes:
//! - DOCPIPE_UNSUPPORTED_EXPRESSION (REJECT)
//! - DOCPIPE_INCOMPATIBLE_OPERAND (REJECT)
//! - DOCPIPE_INVALID_EXPRESSION (REJECT)
//! - DOCPIPE_INVALID_QUERY (REJECT)
//! - DOCPIPE_INVALID_CONFIG (REJECT)
//! - DOCPIPE_TYPE_INVARIANT_VIOLATION (FATAL)
//! - DOCPIPE_CHILD_COUNT_MISMATCH (FATAL)
//! - DOCPIPE_DANGLING_CORRELATION (FATAL)
//! - DOCPIPE_FOREIGN_CORRELATION (FATAL)
//! - DOCPIPE_UNLOWERED_EXPRESSION (FATAL)
//!
//! FATAL errors signal a bug in a rewrite pass rather than bad input. Every
//! error aborts the translation; no partial stage list is ever returned.

use thiserror::Error;

use super::types::ResultType;
use crate::correlation::CorrelationId;

/// Result type for translation operations
pub type TranslateResult<T> = Result<T, TranslateError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    /// A pass met a node kind it has no handling for
    #[error("{pass} does not support expression kind {kind}")]
    UnsupportedExpressionKind {
        kind: String,
        pass: &'static str,
    },

    /// A rewrite would change a node's declared result type
    #[error("Rewrite of {kind} changes its result type from {expected} to {actual}")]
    TypeInvariantViolation {
        kind: &'static str,
        expected: ResultType,
        actual: ResultType,
    },

    /// `update` was given the wrong number of children
    #[error("{kind} has {expected} children but update received {actual}")]
    ChildCountMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Operand type outside an operator's domain
    #[error("Operator {operator} requires {expected} operands, got {actual}")]
    IncompatibleOperand {
        operator: &'static str,
        expected: &'static str,
        actual: ResultType,
    },

    /// Structurally invalid node
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// Correlated accumulator whose scope has no reachable group
    #[error("Correlation {correlation} is referenced by an accumulator but no group stage defines it")]
    DanglingCorrelation { correlation: CorrelationId },

    /// Correlation id minted by a different resolver
    #[error("Correlation {correlation} was not minted by this resolver")]
    ForeignCorrelation { correlation: CorrelationId },

    /// Node kind reached the emitter without a lowering
    #[error("Expression kind {kind} has no lowering in this position")]
    UnloweredExpression { kind: &'static str },

    /// Malformed query description
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid translator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TranslateError {
    /// Stable error code string
    pub fn code(&self) -> &'static str {
        match self {
            TranslateError::UnsupportedExpressionKind { .. } => "DOCPIPE_UNSUPPORTED_EXPRESSION",
            TranslateError::TypeInvariantViolation { .. } => "DOCPIPE_TYPE_INVARIANT_VIOLATION",
            TranslateError::ChildCountMismatch { .. } => "DOCPIPE_CHILD_COUNT_MISMATCH",
            TranslateError::IncompatibleOperand { .. } => "DOCPIPE_INCOMPATIBLE_OPERAND",
            TranslateError::InvalidExpression(_) => "DOCPIPE_INVALID_EXPRESSION",
            TranslateError::DanglingCorrelation { .. } => "DOCPIPE_DANGLING_CORRELATION",
            TranslateError::ForeignCorrelation { .. } => "DOCPIPE_FOREIGN_CORRELATION",
            TranslateError::UnloweredExpression { .. } => "DOCPIPE_UNLOWERED_EXPRESSION",
            TranslateError::InvalidQuery(_) => "DOCPIPE_INVALID_QUERY",
            TranslateError::InvalidConfig(_) => "DOCPIPE_INVALID_CONFIG",
        }
    }

    /// Returns true when the error points at a bug in a rewrite pass
    /// rather than at the input
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TranslateError::TypeInvariantViolation { .. }
                | TranslateError::ChildCountMismatch { .. }
                | TranslateError::DanglingCorrelation { .. }
                | TranslateError::ForeignCorrelation { .. }
                | TranslateError::UnloweredExpression { .. }
        )
    }

    /// REJECT or FATAL
    pub fn severity(&self) -> &'static str {
        if self.is_fatal() {
            "FATAL"
        } else {
            "REJECT"
        }
    }
}

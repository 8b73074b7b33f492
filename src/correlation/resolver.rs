//! Correlation id minting and tagging
//!
//! One resolver serves one translation. Ids come from a process-wide
//! counter, so two resolvers never hand out the same id, but a resolver
//! only accepts ids it minted itself.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use super::id::CorrelationId;
use crate::expr::{Expr, ExprRef, TranslateError, TranslateResult};

static NEXT_CORRELATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
pub struct CorrelationResolver {
    minted: BTreeSet<CorrelationId>,
}

impl CorrelationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh id for a new group scope
    pub fn new_scope(&mut self) -> CorrelationId {
        let id = CorrelationId::new(NEXT_CORRELATION.fetch_add(1, Ordering::Relaxed));
        self.minted.insert(id);
        id
    }

    /// Whether `id` was minted by this resolver
    pub fn owns(&self, id: CorrelationId) -> bool {
        self.minted.contains(&id)
    }

    /// Ids minted so far, in minting order
    pub fn scopes(&self) -> impl Iterator<Item = CorrelationId> + '_ {
        self.minted.iter().copied()
    }

    /// Wraps an accumulator node with `scope`
    pub fn tag(&self, accumulator: ExprRef, scope: CorrelationId) -> TranslateResult<ExprRef> {
        if !self.owns(scope) {
            return Err(TranslateError::ForeignCorrelation { correlation: scope });
        }
        Expr::correlated(scope, accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AccumulatorOp, ExprKind};

    #[test]
    fn test_scopes_are_distinct() {
        let mut resolver = CorrelationResolver::new();
        let a = resolver.new_scope();
        let b = resolver.new_scope();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(resolver.scopes().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_resolvers_never_share_ids() {
        let mut first = CorrelationResolver::new();
        let mut second = CorrelationResolver::new();
        let a = first.new_scope();
        let b = second.new_scope();
        assert_ne!(a, b);
        assert!(!first.owns(b));
    }

    #[test]
    fn test_tag_wraps_accumulator() {
        let mut resolver = CorrelationResolver::new();
        let scope = resolver.new_scope();
        let count = Expr::accumulator(AccumulatorOp::Count, None).unwrap();
        let tagged = resolver.tag(count, scope).unwrap();
        match tagged.kind() {
            ExprKind::CorrelatedAccumulator { correlation, .. } => assert_eq!(*correlation, scope),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_tag_with_foreign_id_rejected() {
        let mut other = CorrelationResolver::new();
        let foreign = other.new_scope();
        let resolver = CorrelationResolver::new();
        let count = Expr::accumulator(AccumulatorOp::Count, None).unwrap();
        assert!(matches!(
            resolver.tag(count, foreign),
            Err(TranslateError::ForeignCorrelation { correlation }) if correlation == foreign
        ));
    }
}

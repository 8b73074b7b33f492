//! Translation driver
//!
//! Runs the passes in order: capability check, accumulator planning,
//! emission. Each run either yields a complete pipeline or an error; a
//! partial stage list is never returned.

use uuid::Uuid;

use super::config::TranslatorConfig;
use crate::bson::Bson;
use crate::correlation::CorrelationId;
use crate::emitter::{Emitter, Pipeline};
use crate::expr::{
    accept, AccumulatorOp, BinaryOp, ExprRef, ExprVisitor, GroupOutput, SortKey, TranslateError,
    TranslateResult, UnaryOp,
};
use crate::observability::{log_event_with_fields, Event};
use crate::planner::{AccumulatorPlanner, GroupPlan};

/// Result of one successful translation
#[derive(Debug, Clone)]
pub struct Translation {
    pub id: Uuid,
    pub pipeline: Pipeline,
    /// Group scopes in the order they were planned
    pub groups: Vec<GroupPlan>,
    /// Stages removed by redundant-stage elimination
    pub eliminated: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Translator {
    planner: AccumulatorPlanner,
    emitter: Emitter,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(&TranslatorConfig::default())
    }
}

impl Translator {
    pub fn new(config: &TranslatorConfig) -> Self {
        Self {
            planner: AccumulatorPlanner::new(config.group_field_prefix.clone()),
            emitter: Emitter::new(config.eliminate_redundant_stages),
        }
    }

    /// Translates a tree into its stage list
    pub fn translate(&self, root: &ExprRef) -> TranslateResult<Pipeline> {
        self.run(root).map(|translation| translation.pipeline)
    }

    /// Translates a tree, keeping the planning detail for explain output
    pub fn run(&self, root: &ExprRef) -> TranslateResult<Translation> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        log_event_with_fields(
            Event::TranslationStart,
            &[("translation_id", &id_str), ("root", root.kind_name())],
        );

        match self.passes(root) {
            Ok((pipeline, groups, eliminated)) => {
                let stages = pipeline.stages.len().to_string();
                let group_count = groups.len().to_string();
                log_event_with_fields(
                    Event::TranslationComplete,
                    &[
                        ("translation_id", &id_str),
                        ("collection", &pipeline.collection),
                        ("stages", &stages),
                        ("groups", &group_count),
                    ],
                );
                Ok(Translation {
                    id,
                    pipeline,
                    groups,
                    eliminated,
                })
            }
            Err(err) => {
                let message = err.to_string();
                log_event_with_fields(
                    Event::TranslationRejected,
                    &rejection_fields(&id_str, &err, &message),
                );
                Err(err)
            }
        }
    }

    fn passes(
        &self,
        root: &ExprRef,
    ) -> TranslateResult<(Pipeline, Vec<GroupPlan>, Vec<String>)> {
        check_capabilities(root)?;
        let planned = self.planner.plan(root)?;
        let emission = self.emitter.lower(&planned.root)?;
        Ok((emission.pipeline, planned.groups, emission.eliminated))
    }
}

/// Fields of a `TranslationRejected` line. The logger owns `severity`, so
/// the error's own severity goes under `error_severity`.
fn rejection_fields<'a>(
    id: &'a str,
    err: &'a TranslateError,
    message: &'a str,
) -> [(&'static str, &'a str); 4] {
    [
        ("translation_id", id),
        ("code", err.code()),
        ("error_severity", err.severity()),
        ("error", message),
    ]
}

/// Walks the whole tree and fails on the first node kind no pass can
/// lower. `Extension` keeps the default rejection.
struct CapabilityCheck;

impl CapabilityCheck {
    fn descend(&mut self, node: &ExprRef) -> TranslateResult<()> {
        for child in node.children() {
            accept(&child, self)?;
        }
        Ok(())
    }
}

impl ExprVisitor for CapabilityCheck {
    type Output = ();

    fn pass_name(&self) -> &'static str {
        "capability-check"
    }

    fn visit_constant(&mut self, _node: &ExprRef, _value: &Bson) -> TranslateResult<()> {
        Ok(())
    }

    fn visit_field(&mut self, _node: &ExprRef, _path: &str) -> TranslateResult<()> {
        Ok(())
    }

    fn visit_binary(
        &mut self,
        node: &ExprRef,
        _op: BinaryOp,
        _left: &ExprRef,
        _right: &ExprRef,
    ) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_unary(&mut self, node: &ExprRef, _op: UnaryOp, _operand: &ExprRef) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_document(&mut self, node: &ExprRef, _fields: &[(String, ExprRef)]) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_accumulator(
        &mut self,
        node: &ExprRef,
        _op: AccumulatorOp,
        _operand: Option<&ExprRef>,
    ) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_correlated_accumulator(
        &mut self,
        node: &ExprRef,
        _correlation: CorrelationId,
        _accumulator: &ExprRef,
    ) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_source(&mut self, _node: &ExprRef, _collection: &str) -> TranslateResult<()> {
        Ok(())
    }

    fn visit_match(&mut self, node: &ExprRef, _source: &ExprRef, _predicate: &ExprRef) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_group(
        &mut self,
        node: &ExprRef,
        _source: &ExprRef,
        _key: &ExprRef,
        _correlation: CorrelationId,
        _outputs: &[GroupOutput],
    ) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_project(&mut self, node: &ExprRef, _source: &ExprRef, _projection: &ExprRef) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_sort(&mut self, node: &ExprRef, _source: &ExprRef, _keys: &[SortKey]) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_skip(&mut self, node: &ExprRef, _source: &ExprRef, _count: u64) -> TranslateResult<()> {
        self.descend(node)
    }

    fn visit_limit(&mut self, node: &ExprRef, _source: &ExprRef, _count: u64) -> TranslateResult<()> {
        self.descend(node)
    }
}

/// Fails with `UnsupportedExpressionKind` if the tree holds any node kind
/// without a lowering
pub fn check_capabilities(root: &ExprRef) -> TranslateResult<()> {
    accept(root, &mut CapabilityCheck)
}

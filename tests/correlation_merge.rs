//! Correlation merge tests
//!
//! - Accumulators of two different scopes land in two group stages
//! - Accumulators sharing one scope land in one merged group stage
//! - Structurally equal accumulators of one scope share one output

use docpipe::bson::{Bson, Document};
use docpipe::correlation::{CorrelationMap, CorrelationResolver};
use docpipe::doc;
use docpipe::expr::{AccumulatorOp, BinaryOp, Expr, ExprKind, ExprRef, ResultType, TranslateError};
use docpipe::frontend::QuerySpec;
use docpipe::planner::AccumulatorPlanner;
use docpipe::translator::Translator;

// =============================================================================
// Test Utilities
// =============================================================================

fn field(path: &str, ty: ResultType) -> ExprRef {
    Expr::field(path, ty).unwrap()
}

fn sum_of(path: &str) -> ExprRef {
    Expr::accumulator(AccumulatorOp::Sum, Some(field(path, ResultType::Int32))).unwrap()
}

fn group_documents(stages: &[Document]) -> Vec<&Document> {
    stages
        .iter()
        .filter_map(|stage| stage.get_document("$group"))
        .collect()
}

// =============================================================================
// Two scopes, two group stages
// =============================================================================

#[test]
fn test_two_scopes_emit_two_group_stages() {
    let mut resolver = CorrelationResolver::new();
    let per_region = resolver.new_scope();
    let overall = resolver.new_scope();

    let source = Expr::source("orders").unwrap();
    let grouped = Expr::group(source, field("region", ResultType::String), per_region, Vec::new()).unwrap();
    let total = resolver.tag(sum_of("qty"), per_region).unwrap();
    let projected = Expr::project(
        grouped,
        Expr::document(vec![("total".into(), total)]).unwrap(),
    )
    .unwrap();

    let regrouped = Expr::group(projected, Expr::constant(Bson::Null), overall, Vec::new()).unwrap();
    let best = Expr::accumulator(AccumulatorOp::Max, Some(field("total", ResultType::Int64))).unwrap();
    let best = resolver.tag(best, overall).unwrap();
    let root = Expr::project(
        regrouped,
        Expr::document(vec![("best".into(), best)]).unwrap(),
    )
    .unwrap();

    let map = CorrelationMap::collect(&root).unwrap();
    assert_eq!(map.ids().count(), 2);

    let translation = Translator::default().run(&root).unwrap();
    assert_eq!(translation.groups.len(), 2);

    let stages = translation.pipeline.to_documents();
    assert_eq!(
        translation.pipeline.operators(),
        vec!["$group", "$project", "$group", "$project"]
    );
    let groups = group_documents(&stages);
    assert_eq!(
        groups[0],
        &doc! { "_id" => "$region", "__agg0" => doc! { "$sum" => "$qty" } }
    );
    assert_eq!(
        groups[1],
        &doc! { "_id" => Bson::Null, "__agg0" => doc! { "$max" => "$total" } }
    );
}

// =============================================================================
// Shared scope, one merged group stage
// =============================================================================

#[test]
fn test_shared_scope_merges_into_one_group_stage() {
    let mut resolver = CorrelationResolver::new();
    let scope = resolver.new_scope();

    let source = Expr::source("orders").unwrap();
    let grouped = Expr::group(source, field("region", ResultType::String), scope, Vec::new()).unwrap();

    // having count > 1, select total = sum(qty), again = sum(qty), n = count
    let count = Expr::accumulator(AccumulatorOp::Count, None).unwrap();
    let having = Expr::binary(
        BinaryOp::Gt,
        resolver.tag(count.clone(), scope).unwrap(),
        Expr::constant(1),
    )
    .unwrap();
    let filtered = Expr::match_(grouped, having).unwrap();

    let projection = Expr::document(vec![
        ("total".into(), resolver.tag(sum_of("qty"), scope).unwrap()),
        ("again".into(), resolver.tag(sum_of("qty"), scope).unwrap()),
        ("n".into(), resolver.tag(count, scope).unwrap()),
    ])
    .unwrap();
    let root = Expr::project(filtered, projection).unwrap();

    let translation = Translator::default().run(&root).unwrap();
    assert_eq!(translation.groups.len(), 1);
    assert_eq!(translation.groups[0].occurrences, 4);

    let stages = translation.pipeline.to_documents();
    assert_eq!(
        stages,
        vec![
            doc! { "$group" => doc! {
                "_id" => "$region",
                "__agg0" => doc! { "$sum" => 1 },
                "__agg1" => doc! { "$sum" => "$qty" },
            } },
            doc! { "$match" => doc! { "__agg0" => doc! { "$gt" => 1 } } },
            doc! { "$project" => doc! {
                "_id" => 0,
                "total" => "$__agg1",
                "again" => "$__agg1",
                "n" => "$__agg0",
            } },
        ]
    );
}

// =============================================================================
// Invariant violations
// =============================================================================

#[test]
fn test_accumulator_without_group_is_dangling() {
    let mut resolver = CorrelationResolver::new();
    let scope = resolver.new_scope();
    let tagged = resolver.tag(sum_of("qty"), scope).unwrap();
    let root = Expr::project(Expr::source("orders").unwrap(), tagged).unwrap();

    let err = AccumulatorPlanner::default().plan(&root).unwrap_err();
    assert_eq!(err, TranslateError::DanglingCorrelation { correlation: scope });
    assert!(err.is_fatal());
    assert!(Translator::default().translate(&root).is_err());
}

#[test]
fn test_foreign_scope_rejected_at_tagging() {
    let mut first = CorrelationResolver::new();
    let second = CorrelationResolver::new();
    let scope = first.new_scope();
    assert!(matches!(
        second.tag(sum_of("qty"), scope),
        Err(TranslateError::ForeignCorrelation { .. })
    ));
}

#[test]
fn test_planned_tree_has_no_correlated_nodes() {
    let mut resolver = CorrelationResolver::new();
    let scope = resolver.new_scope();
    let source = Expr::source("orders").unwrap();
    let grouped = Expr::group(source, field("region", ResultType::String), scope, Vec::new()).unwrap();
    let root = Expr::project(grouped, resolver.tag(sum_of("qty"), scope).unwrap()).unwrap();

    let planned = AccumulatorPlanner::default().plan(&root).unwrap();
    assert!(CorrelationMap::collect(&planned.root).unwrap().is_empty());

    let ExprKind::Project { projection, .. } = planned.root.kind() else {
        panic!("expected project at root");
    };
    assert_eq!(projection.to_string(), "$__agg0");
}

// =============================================================================
// NaN constants inside an accumulator operand
// =============================================================================

#[test]
fn test_nan_operand_translates_through_frontend() {
    let query = QuerySpec::from_json_str(
        r#"{"collection": "orders", "pipeline": [
            {"group": {
                "key": {"field": "region", "type": "string"},
                "select": {
                    "a": {"sum": {"add": [{"field": "qty", "type": "double"},
                                          {"literal": {"$numberDouble": "NaN"}}]}},
                    "b": {"sum": {"add": [{"field": "qty", "type": "double"},
                                          {"literal": {"$numberDouble": "NaN"}}]}}
                }
            }}
        ]}"#,
    )
    .unwrap();
    let root = query.build().unwrap();

    let translation = Translator::default().run(&root).unwrap();
    assert_eq!(translation.pipeline.operators(), vec!["$group", "$project"]);
    assert_eq!(
        translation.groups[0].output_names().collect::<Vec<_>>(),
        vec!["__agg0"]
    );

    let stages = translation.pipeline.to_documents();
    let group = stages[0].get_document("$group").unwrap();
    let add = group
        .get_document("__agg0")
        .and_then(|acc| acc.get_document("$sum"))
        .and_then(|sum| sum.get("$add"))
        .and_then(Bson::as_array)
        .unwrap();
    assert!(matches!(add[1], Bson::Double(v) if v.is_nan()));
    assert_eq!(
        stages[1],
        doc! { "$project" => doc! { "_id" => 0, "a" => "$__agg0", "b" => "$__agg0" } }
    );
}

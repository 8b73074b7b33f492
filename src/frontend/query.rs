//! Query description
//!
//! A query names one collection and an ordered list of steps:
//!
//! ```json
//! {
//!   "collection": "orders",
//!   "pipeline": [
//!     {"filter": {"gt": [{"field": "qty", "type": "int32"}, 5]}},
//!     {"group": {"key": {"field": "region"},
//!                "having": {"gt": [{"count": {}}, 1]},
//!                "select": {"region": {"key": {}}, "total": {"sum": {"field": "qty", "type": "int32"}}}}},
//!     {"sort": [{"field": "total", "direction": "desc"}]},
//!     {"limit": 10}
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::builder::ExprBuilder;
use crate::correlation::CorrelationResolver;
use crate::expr::{Expr, ExprRef, SortDirection, SortKey, TranslateError, TranslateResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub collection: String,
    #[serde(default)]
    pub pipeline: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Filter(Value),
    Group(GroupStep),
    /// Output field name to expression
    Project(Map<String, Value>),
    Sort(Vec<SortStep>),
    Skip(u64),
    Limit(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStep {
    pub key: Value,
    /// Predicate over the grouped rows; may use accumulators
    #[serde(default)]
    pub having: Option<Value>,
    /// Output field name to expression; may use accumulators and `{"key": {}}`
    pub select: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortStep {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl From<Direction> for SortDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Asc => SortDirection::Asc,
            Direction::Desc => SortDirection::Desc,
        }
    }
}

impl QuerySpec {
    pub fn from_json_str(content: &str) -> TranslateResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| TranslateError::InvalidQuery(format!("Invalid query JSON: {}", e)))
    }

    pub fn load(path: &Path) -> TranslateResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| TranslateError::InvalidQuery(format!("Failed to read query: {}", e)))?;
        Self::from_json_str(&content)
    }

    /// Builds the expression tree. Each group step gets its own
    /// correlation scope.
    pub fn build(&self) -> TranslateResult<ExprRef> {
        let mut resolver = CorrelationResolver::new();
        let mut root = Expr::source(self.collection.as_str())?;

        for step in &self.pipeline {
            root = match step {
                Step::Filter(predicate) => {
                    let predicate = ExprBuilder::unscoped(&resolver).build(predicate)?;
                    Expr::match_(root, predicate)?
                }
                Step::Group(group) => build_group(&mut resolver, root, group)?,
                Step::Project(fields) => {
                    let projection = ExprBuilder::unscoped(&resolver).build_document(fields)?;
                    Expr::project(root, projection)?
                }
                Step::Sort(keys) => {
                    let keys = keys
                        .iter()
                        .map(|k| SortKey {
                            path: k.field.clone(),
                            direction: k.direction.into(),
                        })
                        .collect();
                    Expr::sort(root, keys)?
                }
                Step::Skip(count) => Expr::skip(root, *count)?,
                Step::Limit(count) => Expr::limit(root, *count)?,
            };
        }

        Ok(root)
    }
}

/// `Group -> [Match] -> Project`, all sharing one new scope
fn build_group(
    resolver: &mut CorrelationResolver,
    source: ExprRef,
    group: &GroupStep,
) -> TranslateResult<ExprRef> {
    if group.select.is_empty() {
        return Err(TranslateError::InvalidQuery(
            "group select must name at least one output".into(),
        ));
    }

    let scope = resolver.new_scope();
    let key = ExprBuilder::unscoped(resolver).build(&group.key)?;
    let key_type = key.result_type().clone();
    let mut root = Expr::group(source, key, scope, Vec::new())?;

    let builder = ExprBuilder::scoped(resolver, scope, key_type);
    if let Some(having) = &group.having {
        root = Expr::match_(root, builder.build(having)?)?;
    }
    let projection = builder.build_document(&group.select)?;
    Expr::project(root, projection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprKind;

    #[test]
    fn test_parse_steps() {
        let spec = QuerySpec::from_json_str(
            r#"{"collection": "orders", "pipeline": [
                {"filter": true},
                {"sort": [{"field": "a"}, {"field": "b", "direction": "desc"}]},
                {"skip": 2},
                {"limit": 3}
            ]}"#,
        )
        .unwrap();
        assert_eq!(spec.pipeline.len(), 4);
        assert_eq!(
            spec.pipeline[1],
            Step::Sort(vec![
                SortStep {
                    field: "a".into(),
                    direction: Direction::Asc
                },
                SortStep {
                    field: "b".into(),
                    direction: Direction::Desc
                },
            ])
        );

        let root = spec.build().unwrap();
        assert!(matches!(root.kind(), ExprKind::Limit { count: 3, .. }));
    }

    #[test]
    fn test_group_builds_group_match_project() {
        let spec = QuerySpec::from_json_str(
            r#"{"collection": "orders", "pipeline": [
                {"group": {
                    "key": {"field": "region", "type": "string"},
                    "having": {"gt": [{"count": {}}, 1]},
                    "select": {"region": {"key": {}}, "n": {"count": {}}}
                }}
            ]}"#,
        )
        .unwrap();
        let root = spec.build().unwrap();

        let ExprKind::Project { source, .. } = root.kind() else {
            panic!("expected project, got {}", root.kind_name());
        };
        let ExprKind::Match { source, .. } = source.kind() else {
            panic!("expected match");
        };
        assert!(matches!(source.kind(), ExprKind::Group { .. }));
    }

    #[test]
    fn test_empty_select_rejected() {
        let spec = QuerySpec::from_json_str(
            r#"{"collection": "orders", "pipeline": [
                {"group": {"key": null, "select": {}}}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(spec.build(), Err(TranslateError::InvalidQuery(_))));
    }

    #[test]
    fn test_bad_json_and_unknown_step() {
        assert!(matches!(
            QuerySpec::from_json_str("{"),
            Err(TranslateError::InvalidQuery(_))
        ));
        assert!(QuerySpec::from_json_str(
            r#"{"collection": "c", "pipeline": [{"unwind": "$a"}]}"#
        )
        .is_err());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let spec =
            QuerySpec::from_json_str(r#"{"collection": "c", "pipeline": [{"limit": 0}]}"#).unwrap();
        assert!(matches!(
            spec.build(),
            Err(TranslateError::InvalidExpression(_))
        ));
    }
}

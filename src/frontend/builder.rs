//! JSON expression forms
//!
//! | Form                                   | Node                        |
//! |----------------------------------------|-----------------------------|
//! | `null`, `true`, `5`, `"x"`, `[..]`     | constant                    |
//! | `{"literal": <extended json>}`         | constant                    |
//! | `{"field": "a.b", "type": "int32"}`    | field (type defaults `any`) |
//! | `{"key": {}}`                          | group key (`_id`)           |
//! | `{"gt": [l, r]}`, `{"and": [a, b, c]}` | binary, connectives n-ary   |
//! | `{"not": x}`, `{"negate": x}`          | unary                       |
//! | `{"sum": x}`, `{"count": {}}`          | accumulator (group only)    |
//! | `{"document": {"name": x}}`            | computed document           |
//!
//! Any other single-key object becomes an extension node.

use serde_json::{Map, Value};

use crate::bson::from_json;
use crate::correlation::{CorrelationId, CorrelationResolver};
use crate::expr::{
    AccumulatorOp, BinaryOp, Expr, ExprRef, ResultType, TranslateError, TranslateResult, UnaryOp,
};

pub(crate) struct ExprBuilder<'a> {
    resolver: &'a CorrelationResolver,
    /// Scope and key type of the enclosing group step
    group: Option<(CorrelationId, ResultType)>,
}

impl<'a> ExprBuilder<'a> {
    pub(crate) fn unscoped(resolver: &'a CorrelationResolver) -> Self {
        Self {
            resolver,
            group: None,
        }
    }

    pub(crate) fn scoped(
        resolver: &'a CorrelationResolver,
        scope: CorrelationId,
        key_type: ResultType,
    ) -> Self {
        Self {
            resolver,
            group: Some((scope, key_type)),
        }
    }

    pub(crate) fn build(&self, value: &Value) -> TranslateResult<ExprRef> {
        match value {
            Value::Object(map) => self.build_object(map),
            _ => literal(value),
        }
    }

    pub(crate) fn build_document(&self, fields: &Map<String, Value>) -> TranslateResult<ExprRef> {
        let fields = fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.build(value)?)))
            .collect::<TranslateResult<Vec<_>>>()?;
        Expr::document(fields)
    }

    fn build_object(&self, map: &Map<String, Value>) -> TranslateResult<ExprRef> {
        if let Some(path) = map.get("field") {
            return field(path, map.get("type"));
        }

        let mut entries = map.iter();
        let (name, arg) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(TranslateError::InvalidQuery(format!(
                    "expression object must have exactly one operator, got {} keys",
                    map.len()
                )))
            }
        };

        match name.as_str() {
            "literal" => literal(arg),
            "key" => self.group_key(),
            "document" => match arg {
                Value::Object(fields) => self.build_document(fields),
                _ => Err(TranslateError::InvalidQuery(
                    "document takes an object of named expressions".into(),
                )),
            },
            "not" => Expr::unary(UnaryOp::Not, self.build(single(arg))?),
            "negate" => Expr::unary(UnaryOp::Negate, self.build(single(arg))?),
            _ => {
                if let Some(op) = BinaryOp::from_name(name) {
                    self.binary(op, arg)
                } else if let Some(op) = AccumulatorOp::from_name(name) {
                    self.accumulator(op, arg)
                } else {
                    let args = operands(arg)
                        .iter()
                        .map(|a| self.build(a))
                        .collect::<TranslateResult<Vec<_>>>()?;
                    Ok(Expr::extension(name.as_str(), args))
                }
            }
        }
    }

    fn binary(&self, op: BinaryOp, arg: &Value) -> TranslateResult<ExprRef> {
        let args = operands(arg)
            .iter()
            .map(|a| self.build(a))
            .collect::<TranslateResult<Vec<_>>>()?;

        let connective = matches!(op, BinaryOp::And | BinaryOp::Or);
        if args.len() < 2 || (!connective && args.len() != 2) {
            return Err(TranslateError::InvalidQuery(format!(
                "{} takes {} operands, got {}",
                op.name(),
                if connective { "at least 2" } else { "2" },
                args.len()
            )));
        }

        let mut args = args.into_iter();
        let first = args
            .next()
            .ok_or_else(|| TranslateError::InvalidQuery(format!("{} has no operands", op.name())))?;
        args.try_fold(first, |acc, next| Expr::binary(op, acc, next))
    }

    fn accumulator(&self, op: AccumulatorOp, arg: &Value) -> TranslateResult<ExprRef> {
        let Some((scope, _)) = &self.group else {
            return Err(TranslateError::InvalidQuery(format!(
                "{} is only allowed in a group step",
                op.name()
            )));
        };

        let operand = match (op, arg) {
            (AccumulatorOp::Count, _) => None,
            (_, value) => Some(self.build(value)?),
        };
        let accumulator = Expr::accumulator(op, operand)?;
        self.resolver.tag(accumulator, *scope)
    }

    fn group_key(&self) -> TranslateResult<ExprRef> {
        match &self.group {
            Some((_, key_type)) => Expr::field("_id", key_type.clone()),
            None => Err(TranslateError::InvalidQuery(
                "key is only allowed in a group step".into(),
            )),
        }
    }
}

fn literal(value: &Value) -> TranslateResult<ExprRef> {
    from_json(value)
        .map(Expr::constant)
        .map_err(|e| TranslateError::InvalidQuery(e.to_string()))
}

fn field(path: &Value, ty: Option<&Value>) -> TranslateResult<ExprRef> {
    let path = path
        .as_str()
        .ok_or_else(|| TranslateError::InvalidQuery("field path must be a string".into()))?;
    let ty = match ty {
        None => ResultType::Any,
        Some(Value::String(name)) => ResultType::from_name(name).ok_or_else(|| {
            TranslateError::InvalidQuery(format!("unknown result type '{}'", name))
        })?,
        Some(_) => {
            return Err(TranslateError::InvalidQuery(
                "field type must be a string".into(),
            ))
        }
    };
    Expr::field(path, ty)
}

/// Operator arguments: an array is the operand list, anything else is a
/// single operand.
fn operands(arg: &Value) -> Vec<Value> {
    match arg {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Unwraps a one-element operand list
fn single(arg: &Value) -> &Value {
    match arg {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::Bson;
    use crate::expr::ExprKind;
    use serde_json::json;

    fn unscoped(value: Value) -> TranslateResult<ExprRef> {
        let resolver = CorrelationResolver::new();
        let result = ExprBuilder::unscoped(&resolver).build(&value);
        result
    }

    #[test]
    fn test_scalars_and_literals() {
        let five = unscoped(json!(5)).unwrap();
        assert_eq!(five.kind(), &ExprKind::Constant(Bson::Int32(5)));

        let dollar = unscoped(json!({"literal": "$notAField"})).unwrap();
        assert_eq!(dollar.kind(), &ExprKind::Constant(Bson::from("$notAField")));

        let date = unscoped(json!({"literal": {"$date": {"$numberLong": "0"}}})).unwrap();
        assert_eq!(date.kind(), &ExprKind::Constant(Bson::DateTime(0)));
    }

    #[test]
    fn test_field_with_type() {
        let qty = unscoped(json!({"field": "qty", "type": "int64"})).unwrap();
        assert_eq!(qty.result_type(), &ResultType::Int64);
        assert_eq!(qty.to_string(), "$qty");

        assert!(matches!(
            unscoped(json!({"field": "qty", "type": "quaternion"})),
            Err(TranslateError::InvalidQuery(_))
        ));
        assert!(unscoped(json!({"field": "$qty"})).is_err());
    }

    #[test]
    fn test_connectives_fold_left() {
        let expr = unscoped(json!({"and": [true, {"field": "a", "type": "bool"}, false]})).unwrap();
        assert_eq!(
            expr.to_string(),
            "((Boolean(true) and $a) and Boolean(false))"
        );
        assert!(unscoped(json!({"gt": [1, 2, 3]})).is_err());
        assert!(unscoped(json!({"and": [true]})).is_err());
    }

    #[test]
    fn test_unary_forms() {
        let not = unscoped(json!({"not": [{"field": "ok", "type": "bool"}]})).unwrap();
        assert!(matches!(not.kind(), ExprKind::Unary { op: UnaryOp::Not, .. }));
        assert!(matches!(
            unscoped(json!({"negate": "x"})),
            Err(TranslateError::IncompatibleOperand { .. })
        ));
    }

    #[test]
    fn test_accumulator_needs_group() {
        assert!(matches!(
            unscoped(json!({"sum": {"field": "qty"}})),
            Err(TranslateError::InvalidQuery(_))
        ));
        assert!(unscoped(json!({"key": {}})).is_err());

        let mut resolver = CorrelationResolver::new();
        let scope = resolver.new_scope();
        let builder = ExprBuilder::scoped(&resolver, scope, ResultType::String);
        let count = builder.build(&json!({"count": {}})).unwrap();
        assert!(matches!(
            count.kind(),
            ExprKind::CorrelatedAccumulator { correlation, .. } if *correlation == scope
        ));
        let key = builder.build(&json!({"key": {}})).unwrap();
        assert_eq!(key.result_type(), &ResultType::String);
    }

    #[test]
    fn test_unknown_operator_becomes_extension() {
        let ext = unscoped(json!({"regexMatch": [{"field": "name"}, "^a"]})).unwrap();
        assert_eq!(ext.describe(), "Extension(regexMatch)");
        assert_eq!(ext.children().len(), 2);
    }

    #[test]
    fn test_multi_key_object_rejected() {
        assert!(matches!(
            unscoped(json!({"gt": [1, 2], "lt": [1, 2]})),
            Err(TranslateError::InvalidQuery(_))
        ));
    }
}

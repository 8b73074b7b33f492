//! Static result types of expression nodes

use std::fmt;

use crate::bson::Bson;

/// Declared result type of an expression node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultType {
    /// Unknown until runtime; compatible with everything
    Any,
    Null,
    Bool,
    Int32,
    Int64,
    Double,
    String,
    Binary,
    Document,
    Array(Box<ResultType>),
}

impl ResultType {
    /// Result type of every pipeline node: a stream of documents
    pub fn documents() -> Self {
        ResultType::Array(Box::new(ResultType::Document))
    }

    pub fn array_of(element: ResultType) -> Self {
        ResultType::Array(Box::new(element))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ResultType::Any | ResultType::Int32 | ResultType::Int64 | ResultType::Double
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, ResultType::Any | ResultType::Bool)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ResultType::Any | ResultType::String)
    }

    /// Whether values of the two types can be ordered against each other
    pub fn is_comparable_with(&self, other: &ResultType) -> bool {
        match (self, other) {
            (ResultType::Any, _) | (_, ResultType::Any) => true,
            (ResultType::Null, _) | (_, ResultType::Null) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (ResultType::Array(a), ResultType::Array(b)) => a.is_comparable_with(b),
            (a, b) => a == b,
        }
    }

    /// Result type of arithmetic over two numeric operands
    pub fn promote(&self, other: &ResultType) -> ResultType {
        match (self, other) {
            (ResultType::Any, _) | (_, ResultType::Any) => ResultType::Any,
            (ResultType::Double, _) | (_, ResultType::Double) => ResultType::Double,
            (ResultType::Int64, _) | (_, ResultType::Int64) => ResultType::Int64,
            _ => ResultType::Int32,
        }
    }

    /// Type of a literal value
    pub fn of_value(value: &Bson) -> ResultType {
        match value {
            Bson::Null | Bson::Undefined => ResultType::Null,
            Bson::Boolean(_) => ResultType::Bool,
            Bson::Int32(_) => ResultType::Int32,
            Bson::Int64(_) => ResultType::Int64,
            Bson::Double(_) => ResultType::Double,
            Bson::String(_) | Bson::Symbol(_) => ResultType::String,
            Bson::Binary(_) => ResultType::Binary,
            Bson::Document(_) => ResultType::Document,
            Bson::Array(items) => {
                let mut element: Option<ResultType> = None;
                for item in items {
                    let ty = ResultType::of_value(item);
                    element = match element {
                        None => Some(ty),
                        Some(prev) if prev == ty => Some(prev),
                        Some(_) => Some(ResultType::Any),
                    };
                }
                ResultType::array_of(element.unwrap_or(ResultType::Any))
            }
            _ => ResultType::Any,
        }
    }

    /// Parses the lowercase names used by the JSON front-end
    pub fn from_name(name: &str) -> Option<ResultType> {
        let ty = match name {
            "any" => ResultType::Any,
            "null" => ResultType::Null,
            "bool" => ResultType::Bool,
            "int32" | "int" => ResultType::Int32,
            "int64" | "long" => ResultType::Int64,
            "double" => ResultType::Double,
            "string" => ResultType::String,
            "binary" => ResultType::Binary,
            "document" => ResultType::Document,
            _ => {
                let inner = name.strip_prefix("array<")?.strip_suffix('>')?;
                return ResultType::from_name(inner).map(ResultType::array_of);
            }
        };
        Some(ty)
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultType::Any => write!(f, "any"),
            ResultType::Null => write!(f, "null"),
            ResultType::Bool => write!(f, "bool"),
            ResultType::Int32 => write!(f, "int32"),
            ResultType::Int64 => write!(f, "int64"),
            ResultType::Double => write!(f, "double"),
            ResultType::String => write!(f, "string"),
            ResultType::Binary => write!(f, "binary"),
            ResultType::Document => write!(f, "document"),
            ResultType::Array(element) => write!(f, "array<{}>", element),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_promotion() {
        assert_eq!(ResultType::Int32.promote(&ResultType::Int32), ResultType::Int32);
        assert_eq!(ResultType::Int32.promote(&ResultType::Int64), ResultType::Int64);
        assert_eq!(ResultType::Int64.promote(&ResultType::Double), ResultType::Double);
        assert_eq!(ResultType::Any.promote(&ResultType::Double), ResultType::Any);
    }

    #[test]
    fn test_comparability() {
        assert!(ResultType::Int32.is_comparable_with(&ResultType::Double));
        assert!(ResultType::String.is_comparable_with(&ResultType::Any));
        assert!(!ResultType::String.is_comparable_with(&ResultType::Int32));
    }

    #[test]
    fn test_type_of_mixed_array() {
        let value = Bson::Array(vec![Bson::Int32(1), Bson::String("x".into())]);
        assert_eq!(
            ResultType::of_value(&value),
            ResultType::array_of(ResultType::Any)
        );
    }

    #[test]
    fn test_name_round_trip() {
        for ty in [
            ResultType::Int64,
            ResultType::array_of(ResultType::String),
            ResultType::documents(),
        ] {
            assert_eq!(ResultType::from_name(&ty.to_string()), Some(ty));
        }
        assert_eq!(ResultType::from_name("decimal"), None);
    }
}

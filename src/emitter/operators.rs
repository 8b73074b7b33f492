//! Operator name table, wire mapping version 1
//!
//! The mapping is fixed per version. Changing any name below is a new
//! version.

use crate::expr::{AccumulatorOp, BinaryOp};

pub const WIRE_MAPPING_VERSION: u32 = 1;

/// Expression operator for a binary node
pub fn binary_operator(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "$eq",
        BinaryOp::Ne => "$ne",
        BinaryOp::Gt => "$gt",
        BinaryOp::Gte => "$gte",
        BinaryOp::Lt => "$lt",
        BinaryOp::Lte => "$lte",
        BinaryOp::And => "$and",
        BinaryOp::Or => "$or",
        BinaryOp::Add => "$add",
        BinaryOp::Subtract => "$subtract",
        BinaryOp::Multiply => "$multiply",
        BinaryOp::Divide => "$divide",
        BinaryOp::Mod => "$mod",
        BinaryOp::Concat => "$concat",
    }
}

/// Group accumulator operator. Count lowers to `$sum` of 1.
pub fn accumulator_operator(op: AccumulatorOp) -> &'static str {
    match op {
        AccumulatorOp::Sum | AccumulatorOp::Count => "$sum",
        AccumulatorOp::Avg => "$avg",
        AccumulatorOp::Min => "$min",
        AccumulatorOp::Max => "$max",
        AccumulatorOp::First => "$first",
        AccumulatorOp::Last => "$last",
        AccumulatorOp::Push => "$push",
        AccumulatorOp::AddToSet => "$addToSet",
    }
}

pub const NOT: &str = "$not";
pub const NOR: &str = "$nor";
pub const EXPR: &str = "$expr";
pub const LITERAL: &str = "$literal";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_lowers_to_sum() {
        assert_eq!(accumulator_operator(AccumulatorOp::Count), "$sum");
    }

    #[test]
    fn test_all_operators_are_dollar_prefixed() {
        for op in [
            BinaryOp::Eq,
            BinaryOp::Lte,
            BinaryOp::And,
            BinaryOp::Mod,
            BinaryOp::Concat,
        ] {
            assert!(binary_operator(op).starts_with('$'));
        }
        assert_eq!(binary_operator(BinaryOp::Gte), "$gte");
        assert_eq!(accumulator_operator(AccumulatorOp::AddToSet), "$addToSet");
    }
}

//! JSON query front-end
//!
//! Deserialises a query description and builds the expression tree the
//! translator consumes. Accumulators are only accepted inside group steps,
//! where they are tagged with that step's correlation scope.

mod builder;
mod query;

pub use query::{Direction, GroupStep, QuerySpec, SortStep, Step};

//! Pipeline stage emitter
//!
//! Turns a planned expression tree into an ordered list of stage
//! documents for one collection, using a fixed operator table.

mod emitter;
mod operators;
mod stage;

pub use emitter::{Emission, Emitter, SCALAR_PROJECTION_FIELD};
pub use operators::{accumulator_operator, binary_operator, WIRE_MAPPING_VERSION};
pub use stage::{Pipeline, StageDocument, StageKind};

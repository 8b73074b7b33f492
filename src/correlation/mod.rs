//! Correlation resolver
//!
//! Every accumulator that belongs to a group-by scope is tagged with that
//! scope's `CorrelationId` when the tree is built. Later passes use the id,
//! not tree position, to find which accumulators must share one group stage.

mod id;
mod map;
mod resolver;

pub use id::CorrelationId;
pub use map::CorrelationMap;
pub use resolver::CorrelationResolver;

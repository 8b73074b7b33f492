//! docpipe - query translation core for a document-database client
//!
//! Translates expression trees into aggregation pipeline stage documents
//! and reads and writes the binary document format those stages travel in.

pub mod bson;
pub mod cli;
pub mod correlation;
pub mod emitter;
pub mod expr;
pub mod frontend;
pub mod observability;
pub mod planner;
pub mod translator;

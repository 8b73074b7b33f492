//! Binary document codec
//!
//! Streaming reader and writer for the length-prefixed binary document
//! format, plus the in-memory `Document` model and relaxed extended JSON.
//!
//! Guarantees:
//! - Reads never seek the transport; bookmarks replay buffered bytes
//! - Stream offsets are 64-bit
//! - Unknown element tags fail the document with the full dotted path of
//!   the offending element
//! - Reader and writer release their transport exactly once

mod codec;
mod errors;
mod json;
mod reader;
mod replay;
mod settings;
mod types;
mod value;
mod writer;

pub use codec::{
    decode_stream, encode_stream, from_slice, read_document, read_value, to_vec, write_document,
    write_value, DocumentIterator,
};
pub use errors::{CodecError, CodecResult};
pub use json::{decimal128_to_string, document_from_json, document_to_json, from_json, to_relaxed_json};
pub use reader::{Bookmark, BsonReader, ReaderState};
pub use settings::{CodecSettings, DEFAULT_MAX_DOCUMENT_SIZE, DEFAULT_MAX_NESTING_DEPTH};
pub use types::{binary_subtype, BsonType};
pub use value::{
    Binary, Bson, DbPointer, Decimal128, Document, JavaScriptWithScope, ObjectId, Regex, Timestamp,
};
pub use writer::{BsonWriter, WriterState};

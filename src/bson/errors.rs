//! Codec error types
//!
//! Error codes:
//! - DOCPIPE_BSON_UNKNOWN_TYPE (FATAL to document)
//! - DOCPIPE_BSON_FIELD_NAME_MISMATCH (FATAL to document)
//! - DOCPIPE_BSON_LENGTH_MISMATCH (FATAL to document)
//! - DOCPIPE_BSON_PREMATURE_END (FATAL to document)
//! - DOCPIPE_BSON_INVALID_STATE (usage error)
//!
//! Structural errors are never recovered by skipping bytes. The reader does
//! not try to resynchronise after any of them.

use std::io;

use thiserror::Error;

use super::types::BsonType;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while reading or writing the binary document format
#[derive(Debug, Error)]
pub enum CodecError {
    // ==================
    // Protocol errors
    // ==================
    /// Element tag outside the recognised set
    #[error("Detected unknown BSON type \"\\x{tag:02x}\" for fieldname \"{path}\". Are you using the latest driver version?")]
    UnknownBsonType { tag: u8, path: String },

    /// Wire name differs from the name the caller required
    #[error("Expected element name '{expected}' but found '{actual}' at '{path}'")]
    FieldNameMismatch {
        expected: String,
        actual: String,
        path: String,
    },

    /// Bytes consumed by a container differ from its length prefix
    #[error("Container '{path}' declared {declared} bytes but {consumed} were consumed")]
    LengthMismatch {
        path: String,
        declared: i32,
        consumed: u64,
    },

    /// End of a container requested before (or after) its terminator
    #[error("{operation} is not legal here: {reason}")]
    PrematureEnd {
        operation: &'static str,
        reason: String,
    },

    /// Negative or otherwise impossible length prefix
    #[error("Invalid length {length} at byte offset {offset}")]
    InvalidLength { length: i32, offset: u64 },

    /// Document larger than the configured maximum
    #[error("Document size {size} exceeds maximum {max}")]
    DocumentTooLarge { size: i64, max: i32 },

    /// Container nesting deeper than the configured maximum
    #[error("Nesting depth {depth} exceeds maximum {max}")]
    NestingTooDeep { depth: usize, max: usize },

    /// Transport ended in the middle of a value
    #[error("Unexpected end of stream at byte offset {offset}")]
    UnexpectedEof { offset: u64 },

    /// Payload bytes that do not form a valid value
    #[error("Malformed value at byte offset {offset}: {reason}")]
    MalformedValue { offset: u64, reason: String },

    // ==================
    // Usage errors
    // ==================
    /// Operation called in a state that does not allow it
    #[error("{operation} cannot be called when state is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Value accessor does not match the current element type
    #[error("{operation} cannot be called when current type is {actual}")]
    UnexpectedType {
        operation: &'static str,
        actual: BsonType,
    },

    /// JSON text that does not describe a value
    #[error("Invalid extended JSON: {0}")]
    InvalidExtendedJson(String),

    /// Element names may not contain NUL bytes
    #[error("Invalid element name '{0}'")]
    InvalidName(String),

    /// Bookmark no longer addressable by this reader
    #[error("Bookmark at byte offset {position} is not valid for this reader: {reason}")]
    StaleBookmark { position: u64, reason: &'static str },

    /// Reader or writer already released its transport
    #[error("Stream is closed")]
    Closed,

    /// Transport failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Stable error code string
    pub fn code(&self) -> &'static str {
        match self {
            CodecError::UnknownBsonType { .. } => "DOCPIPE_BSON_UNKNOWN_TYPE",
            CodecError::FieldNameMismatch { .. } => "DOCPIPE_BSON_FIELD_NAME_MISMATCH",
            CodecError::LengthMismatch { .. } => "DOCPIPE_BSON_LENGTH_MISMATCH",
            CodecError::PrematureEnd { .. } => "DOCPIPE_BSON_PREMATURE_END",
            CodecError::InvalidLength { .. } => "DOCPIPE_BSON_INVALID_LENGTH",
            CodecError::DocumentTooLarge { .. } => "DOCPIPE_BSON_DOCUMENT_TOO_LARGE",
            CodecError::NestingTooDeep { .. } => "DOCPIPE_BSON_NESTING_TOO_DEEP",
            CodecError::UnexpectedEof { .. } => "DOCPIPE_BSON_UNEXPECTED_EOF",
            CodecError::MalformedValue { .. } => "DOCPIPE_BSON_MALFORMED_VALUE",
            CodecError::InvalidState { .. } => "DOCPIPE_BSON_INVALID_STATE",
            CodecError::UnexpectedType { .. } => "DOCPIPE_BSON_UNEXPECTED_TYPE",
            CodecError::InvalidExtendedJson(_) => "DOCPIPE_BSON_INVALID_JSON",
            CodecError::InvalidName(_) => "DOCPIPE_BSON_INVALID_NAME",
            CodecError::StaleBookmark { .. } => "DOCPIPE_BSON_STALE_BOOKMARK",
            CodecError::Closed => "DOCPIPE_BSON_CLOSED",
            CodecError::Io(_) => "DOCPIPE_BSON_IO",
        }
    }

    /// Returns whether the error is fatal to the document being processed.
    ///
    /// Usage errors leave the stream where it was; everything else means the
    /// current document cannot be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CodecError::InvalidState { .. }
                | CodecError::UnexpectedType { .. }
                | CodecError::InvalidName(_)
                | CodecError::StaleBookmark { .. }
                | CodecError::Closed
        )
    }
}

//! Forward-only binary document reader with bookmarks
//!
//! Reading rules:
//! - Every container remembers its start offset and declared length; the
//!   length is checked when the container is closed, never earlier
//! - An unknown element tag aborts the document; nothing is skipped
//! - Bookmarks replay buffered bytes, the transport is never seeked
//! - Offsets are tracked as `u64` so a stream may exceed 4 GiB in total
//!
//! A reader owns exactly one cursor. It is not meant to be shared between
//! call sites; callers serialise access themselves.

use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::errors::{CodecError, CodecResult};
use super::replay::ReplayBuffer;
use super::settings::CodecSettings;
use super::types::{binary_subtype, BsonType};
use super::value::{Binary, DbPointer, Decimal128, ObjectId, Regex, Timestamp};
use crate::observability::{log_event_with_fields, Event};

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(1);

/// Reader state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Nothing read yet
    Initial,
    /// Next read is an element tag
    Type,
    /// Next read is an element name
    Name,
    /// Next read is an element value
    Value,
    /// Next read is the scope document of a code-with-scope value
    ScopeDocument,
    /// Terminator of a document was read
    EndOfDocument,
    /// Terminator of an array was read
    EndOfArray,
    /// A top-level document was completed
    Done,
    /// Transport released
    Closed,
}

impl ReaderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReaderState::Initial => "Initial",
            ReaderState::Type => "Type",
            ReaderState::Name => "Name",
            ReaderState::Value => "Value",
            ReaderState::ScopeDocument => "ScopeDocument",
            ReaderState::EndOfDocument => "EndOfDocument",
            ReaderState::EndOfArray => "EndOfArray",
            ReaderState::Done => "Done",
            ReaderState::Closed => "Closed",
        }
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Document,
    Array,
    ScopeDocument,
    JavaScriptWithScope,
}

/// One open container
#[derive(Debug, Clone)]
struct Container {
    kind: ContainerKind,
    /// Offset of the container's length prefix
    start: u64,
    /// Declared length, prefix and terminator included
    size: i32,
    /// Path segment for diagnostics; `None` for the top-level document
    name: Option<String>,
    /// Index of the current array element, -1 before the first
    index: i64,
}

/// Replayable snapshot of a reader's position.
///
/// Holding a bookmark keeps the bytes after it buffered; drop it when it is
/// no longer needed.
#[derive(Debug, Clone)]
pub struct Bookmark {
    reader_id: u64,
    position: u64,
    state: ReaderState,
    current_type: Option<BsonType>,
    current_name: Option<String>,
    stack: Vec<Container>,
    _pin: Arc<()>,
}

impl Bookmark {
    /// Absolute stream offset captured by the bookmark
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reader state captured by the bookmark
    pub fn state(&self) -> ReaderState {
        self.state
    }
}

/// Reader over any sequential transport
pub struct BsonReader<R> {
    id: u64,
    input: ReplayBuffer<R>,
    settings: CodecSettings,
    state: ReaderState,
    current_type: Option<BsonType>,
    current_name: Option<String>,
    stack: Vec<Container>,
}

impl<R> BsonReader<R> {
    /// Releases the transport. Safe to call any number of times, from
    /// success and failure paths alike; the transport is dropped once.
    pub fn close(&mut self) {
        let position = self.input.position().to_string();
        if self.input.release().is_some() {
            log_event_with_fields(
                Event::TransportReleased,
                &[("side", "reader"), ("position", &position)],
            );
        }
        self.state = ReaderState::Closed;
        self.stack.clear();
    }

    /// Consumes the reader and hands back the transport, if still held
    pub fn into_inner(mut self) -> Option<R> {
        self.state = ReaderState::Closed;
        self.input.release()
    }
}

impl<R> Drop for BsonReader<R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<R: Read> BsonReader<R> {
    pub fn new(transport: R) -> Self {
        Self::with_settings(transport, CodecSettings::default())
    }

    pub fn with_settings(transport: R, settings: CodecSettings) -> Self {
        Self {
            id: NEXT_READER_ID.fetch_add(1, Ordering::Relaxed),
            input: ReplayBuffer::new(transport),
            settings,
            state: ReaderState::Initial,
            current_type: None,
            current_name: None,
            stack: Vec::new(),
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Absolute offset of the next unread byte
    pub fn position(&self) -> u64 {
        self.input.position()
    }

    /// Type of the element currently positioned on
    pub fn current_bson_type(&self) -> Option<BsonType> {
        self.current_type
    }

    /// Name of the element currently positioned on, once read
    pub fn current_name(&self) -> Option<&str> {
        self.current_name.as_deref()
    }

    /// Returns true when no further top-level document can be started.
    ///
    /// Peeks the transport without consuming anything. Inside a document the
    /// answer is always false.
    pub fn is_at_end_of_file(&mut self) -> CodecResult<bool> {
        self.ensure_open()?;
        match self.state {
            ReaderState::Initial | ReaderState::Done => Ok(!self.input.has_remaining()?),
            _ => Ok(false),
        }
    }

    // ==================
    // Structure
    // ==================

    /// Reads the next element tag.
    ///
    /// At the top level no byte is consumed and `Document` is returned.
    /// Inside a container the terminator yields `EndOfDocument`.
    pub fn read_bson_type(&mut self) -> CodecResult<BsonType> {
        const OP: &str = "read_bson_type";
        self.ensure_open()?;

        match self.state {
            ReaderState::Initial | ReaderState::Done => {
                self.current_type = Some(BsonType::Document);
                self.current_name = None;
                self.state = ReaderState::Value;
                return Ok(BsonType::Document);
            }
            ReaderState::Type => {}
            _ => return Err(self.invalid_state(OP)),
        }

        let tag = self.input.read_u8()?;
        let kind = match self.stack.last_mut() {
            Some(container) => {
                if tag != 0 && container.kind == ContainerKind::Array {
                    container.index += 1;
                }
                container.kind
            }
            None => return Err(self.invalid_state(OP)),
        };

        if tag == 0 {
            self.current_type = Some(BsonType::EndOfDocument);
            self.current_name = None;
            self.state = if kind == ContainerKind::Array {
                ReaderState::EndOfArray
            } else {
                ReaderState::EndOfDocument
            };
            return Ok(BsonType::EndOfDocument);
        }

        match BsonType::from_u8(tag) {
            Some(ty) => {
                self.current_type = Some(ty);
                self.current_name = None;
                self.state = ReaderState::Name;
                Ok(ty)
            }
            None => {
                let leaf = self.offending_element_name();
                let path = self.dotted_path(&leaf);
                let tag_hex = format!("{:02x}", tag);
                log_event_with_fields(
                    Event::CodecUnknownType,
                    &[("path", &path), ("tag", &tag_hex)],
                );
                Err(CodecError::UnknownBsonType { tag, path })
            }
        }
    }

    /// Reads the current element's name
    pub fn read_name(&mut self) -> CodecResult<String> {
        self.ensure_open()?;
        if self.state != ReaderState::Name {
            return Err(self.invalid_state("read_name"));
        }
        let offset = self.input.position();
        let bytes = self.input.read_cstring()?;
        let name = String::from_utf8(bytes).map_err(|_| CodecError::MalformedValue {
            offset,
            reason: "element name is not valid UTF-8".into(),
        })?;
        self.current_name = Some(name.clone());
        self.state = ReaderState::Value;
        Ok(name)
    }

    /// Reads the current element's name and requires it to be `expected`
    pub fn read_name_expected(&mut self, expected: &str) -> CodecResult<()> {
        let actual = self.read_name()?;
        if actual != expected {
            return Err(CodecError::FieldNameMismatch {
                expected: expected.to_string(),
                path: self.dotted_path(&actual),
                actual,
            });
        }
        Ok(())
    }

    pub fn skip_name(&mut self) -> CodecResult<()> {
        self.ensure_open()?;
        if self.state != ReaderState::Name {
            return Err(self.invalid_state("skip_name"));
        }
        self.input.read_cstring()?;
        self.current_name = None;
        self.state = ReaderState::Value;
        Ok(())
    }

    pub fn read_start_document(&mut self) -> CodecResult<()> {
        const OP: &str = "read_start_document";
        self.ensure_open()?;
        let kind = match self.state {
            ReaderState::Initial | ReaderState::Done => ContainerKind::Document,
            ReaderState::ScopeDocument => ContainerKind::ScopeDocument,
            ReaderState::Value => {
                self.expect_type(OP, BsonType::Document)?;
                ContainerKind::Document
            }
            _ => return Err(self.invalid_state(OP)),
        };
        self.open_container(kind)?;
        self.state = ReaderState::Type;
        Ok(())
    }

    pub fn read_end_document(&mut self) -> CodecResult<()> {
        const OP: &str = "read_end_document";
        self.ensure_open()?;
        match self.stack.last().map(|c| c.kind) {
            Some(ContainerKind::Document) | Some(ContainerKind::ScopeDocument) => {}
            Some(_) => {
                return Err(CodecError::PrematureEnd {
                    operation: OP,
                    reason: "the innermost open container is not a document".into(),
                })
            }
            None => {
                return Err(CodecError::PrematureEnd {
                    operation: OP,
                    reason: "no document is open".into(),
                })
            }
        }
        if self.state != ReaderState::EndOfDocument {
            return Err(CodecError::PrematureEnd {
                operation: OP,
                reason: format!("terminator has not been read (state is {})", self.state),
            });
        }

        let closed = self.pop_container()?;
        if closed.kind == ContainerKind::ScopeDocument
            && matches!(
                self.stack.last().map(|c| c.kind),
                Some(ContainerKind::JavaScriptWithScope)
            )
        {
            self.pop_container()?;
        }
        self.finish_container();
        Ok(())
    }

    pub fn read_start_array(&mut self) -> CodecResult<()> {
        const OP: &str = "read_start_array";
        self.begin_value(OP, BsonType::Array)?;
        self.open_container(ContainerKind::Array)?;
        self.state = ReaderState::Type;
        Ok(())
    }

    pub fn read_end_array(&mut self) -> CodecResult<()> {
        const OP: &str = "read_end_array";
        self.ensure_open()?;
        if self.stack.last().map(|c| c.kind) != Some(ContainerKind::Array) {
            return Err(CodecError::PrematureEnd {
                operation: OP,
                reason: "the innermost open container is not an array".into(),
            });
        }
        if self.state != ReaderState::EndOfArray {
            return Err(CodecError::PrematureEnd {
                operation: OP,
                reason: format!("terminator has not been read (state is {})", self.state),
            });
        }
        self.pop_container()?;
        self.finish_container();
        Ok(())
    }

    /// Skips the current element's value without decoding it
    pub fn skip_value(&mut self) -> CodecResult<()> {
        const OP: &str = "skip_value";
        self.ensure_open()?;
        if self.state != ReaderState::Value {
            return Err(self.invalid_state(OP));
        }
        let ty = self.current_type.ok_or_else(|| self.invalid_state(OP))?;

        let len = match ty {
            BsonType::Double | BsonType::DateTime | BsonType::Int64 | BsonType::Timestamp => 8,
            BsonType::Int32 => 4,
            BsonType::Boolean => 1,
            BsonType::Null | BsonType::Undefined | BsonType::MinKey | BsonType::MaxKey => 0,
            BsonType::ObjectId => 12,
            BsonType::Decimal128 => 16,
            BsonType::String | BsonType::JavaScript | BsonType::Symbol => {
                self.read_length_at_least(1)? as usize
            }
            BsonType::DbPointer => self.read_length_at_least(1)? as usize + 12,
            BsonType::Document | BsonType::Array | BsonType::JavaScriptWithScope => {
                self.read_length_at_least(5)? as usize - 4
            }
            BsonType::Binary => self.read_length_at_least(0)? as usize + 1,
            BsonType::RegularExpression => {
                self.input.read_cstring()?;
                self.input.read_cstring()?;
                0
            }
            BsonType::EndOfDocument => return Err(self.invalid_state(OP)),
        };
        self.input.skip(len)?;
        self.end_value();
        Ok(())
    }

    // ==================
    // Values
    // ==================

    pub fn read_double(&mut self) -> CodecResult<f64> {
        self.begin_value("read_double", BsonType::Double)?;
        let value = self.input.read_f64()?;
        self.end_value();
        Ok(value)
    }

    pub fn read_string(&mut self) -> CodecResult<String> {
        self.begin_value("read_string", BsonType::String)?;
        let value = self.read_string_payload()?;
        self.end_value();
        Ok(value)
    }

    pub fn read_binary(&mut self) -> CodecResult<Binary> {
        self.begin_value("read_binary", BsonType::Binary)?;
        let offset = self.input.position();
        let len = self.read_length_at_least(0)?;
        let subtype = self.input.read_u8()?;
        let bytes = if subtype == binary_subtype::BINARY_OLD {
            let inner = self.input.read_i32()?;
            if inner < 0 || inner != len - 4 {
                return Err(CodecError::MalformedValue {
                    offset,
                    reason: format!(
                        "legacy binary inner length {} does not match outer length {}",
                        inner, len
                    ),
                });
            }
            self.input.read_bytes(inner as usize)?
        } else {
            self.input.read_bytes(len as usize)?
        };
        self.end_value();
        Ok(Binary::new(subtype, bytes))
    }

    pub fn read_undefined(&mut self) -> CodecResult<()> {
        self.begin_value("read_undefined", BsonType::Undefined)?;
        self.end_value();
        Ok(())
    }

    pub fn read_object_id(&mut self) -> CodecResult<ObjectId> {
        self.begin_value("read_object_id", BsonType::ObjectId)?;
        let id = self.read_object_id_payload()?;
        self.end_value();
        Ok(id)
    }

    pub fn read_boolean(&mut self) -> CodecResult<bool> {
        self.begin_value("read_boolean", BsonType::Boolean)?;
        let offset = self.input.position();
        let value = match self.input.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(CodecError::MalformedValue {
                    offset,
                    reason: format!("invalid boolean byte {:#04x}", other),
                })
            }
        };
        self.end_value();
        Ok(value)
    }

    /// Milliseconds since the Unix epoch
    pub fn read_date_time(&mut self) -> CodecResult<i64> {
        self.begin_value("read_date_time", BsonType::DateTime)?;
        let value = self.input.read_i64()?;
        self.end_value();
        Ok(value)
    }

    pub fn read_null(&mut self) -> CodecResult<()> {
        self.begin_value("read_null", BsonType::Null)?;
        self.end_value();
        Ok(())
    }

    pub fn read_regular_expression(&mut self) -> CodecResult<Regex> {
        self.begin_value("read_regular_expression", BsonType::RegularExpression)?;
        let pattern = self.read_cstring_utf8()?;
        let options = self.read_cstring_utf8()?;
        self.end_value();
        Ok(Regex { pattern, options })
    }

    pub fn read_db_pointer(&mut self) -> CodecResult<DbPointer> {
        self.begin_value("read_db_pointer", BsonType::DbPointer)?;
        let namespace = self.read_string_payload()?;
        let id = self.read_object_id_payload()?;
        self.end_value();
        Ok(DbPointer { namespace, id })
    }

    pub fn read_javascript(&mut self) -> CodecResult<String> {
        self.begin_value("read_javascript", BsonType::JavaScript)?;
        let code = self.read_string_payload()?;
        self.end_value();
        Ok(code)
    }

    pub fn read_symbol(&mut self) -> CodecResult<String> {
        self.begin_value("read_symbol", BsonType::Symbol)?;
        let symbol = self.read_string_payload()?;
        self.end_value();
        Ok(symbol)
    }

    /// Reads the code of a code-with-scope value. The scope document must be
    /// read next with `read_start_document`.
    pub fn read_javascript_with_scope(&mut self) -> CodecResult<String> {
        self.begin_value("read_javascript_with_scope", BsonType::JavaScriptWithScope)?;
        self.open_container(ContainerKind::JavaScriptWithScope)?;
        let code = self.read_string_payload()?;
        self.state = ReaderState::ScopeDocument;
        Ok(code)
    }

    pub fn read_int32(&mut self) -> CodecResult<i32> {
        self.begin_value("read_int32", BsonType::Int32)?;
        let value = self.input.read_i32()?;
        self.end_value();
        Ok(value)
    }

    pub fn read_timestamp(&mut self) -> CodecResult<Timestamp> {
        self.begin_value("read_timestamp", BsonType::Timestamp)?;
        let value = Timestamp::from_u64(self.input.read_u64()?);
        self.end_value();
        Ok(value)
    }

    pub fn read_int64(&mut self) -> CodecResult<i64> {
        self.begin_value("read_int64", BsonType::Int64)?;
        let value = self.input.read_i64()?;
        self.end_value();
        Ok(value)
    }

    pub fn read_decimal128(&mut self) -> CodecResult<Decimal128> {
        self.begin_value("read_decimal128", BsonType::Decimal128)?;
        let mut bytes = [0u8; 16];
        self.input.read_exact(&mut bytes)?;
        self.end_value();
        Ok(Decimal128(bytes))
    }

    pub fn read_min_key(&mut self) -> CodecResult<()> {
        self.begin_value("read_min_key", BsonType::MinKey)?;
        self.end_value();
        Ok(())
    }

    pub fn read_max_key(&mut self) -> CodecResult<()> {
        self.begin_value("read_max_key", BsonType::MaxKey)?;
        self.end_value();
        Ok(())
    }

    // ==================
    // Bookmarks
    // ==================

    /// Captures the current position. Reads are unaffected.
    pub fn get_bookmark(&mut self) -> CodecResult<Bookmark> {
        self.ensure_open()?;
        Ok(Bookmark {
            reader_id: self.id,
            position: self.input.position(),
            state: self.state,
            current_type: self.current_type,
            current_name: self.current_name.clone(),
            stack: self.stack.clone(),
            _pin: self.input.pin(),
        })
    }

    /// Restores a position captured by `get_bookmark` on this reader.
    ///
    /// The next read reproduces exactly what followed the bookmark.
    pub fn return_to_bookmark(&mut self, bookmark: &Bookmark) -> CodecResult<()> {
        self.ensure_open()?;
        let reason = if bookmark.reader_id != self.id {
            Some("bookmark was taken on a different reader")
        } else if !self.input.rewind_to(bookmark.position) {
            Some("position is no longer buffered")
        } else {
            None
        };
        if let Some(reason) = reason {
            let position = bookmark.position.to_string();
            log_event_with_fields(
                Event::CodecStaleBookmark,
                &[("position", &position), ("reason", reason)],
            );
            return Err(CodecError::StaleBookmark {
                position: bookmark.position,
                reason,
            });
        }

        self.state = bookmark.state;
        self.current_type = bookmark.current_type;
        self.current_name = bookmark.current_name.clone();
        self.stack = bookmark.stack.clone();
        Ok(())
    }

    // ==================
    // Internals
    // ==================

    fn ensure_open(&self) -> CodecResult<()> {
        if self.state == ReaderState::Closed || self.input.is_released() {
            return Err(CodecError::Closed);
        }
        Ok(())
    }

    fn invalid_state(&self, operation: &'static str) -> CodecError {
        CodecError::InvalidState {
            operation,
            state: self.state.as_str(),
        }
    }

    fn expect_type(&self, operation: &'static str, expected: BsonType) -> CodecResult<()> {
        match self.current_type {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(CodecError::UnexpectedType { operation, actual }),
            None => Err(self.invalid_state(operation)),
        }
    }

    fn begin_value(&self, operation: &'static str, expected: BsonType) -> CodecResult<()> {
        self.ensure_open()?;
        if self.state != ReaderState::Value {
            return Err(self.invalid_state(operation));
        }
        self.expect_type(operation, expected)
    }

    fn end_value(&mut self) {
        self.state = if self.stack.is_empty() {
            ReaderState::Done
        } else {
            ReaderState::Type
        };
    }

    /// Reads a length prefix, rejecting negative and oversized values
    fn read_length_at_least(&mut self, minimum: i32) -> CodecResult<i32> {
        let offset = self.input.position();
        let length = self.input.read_i32()?;
        if length < minimum {
            return Err(CodecError::InvalidLength { length, offset });
        }
        if length > self.settings.max_document_size {
            return Err(CodecError::DocumentTooLarge {
                size: i64::from(length),
                max: self.settings.max_document_size,
            });
        }
        Ok(length)
    }

    fn open_container(&mut self, kind: ContainerKind) -> CodecResult<()> {
        let depth = self.stack.len() + 1;
        if depth > self.settings.max_nesting_depth {
            return Err(CodecError::NestingTooDeep {
                depth,
                max: self.settings.max_nesting_depth,
            });
        }

        let name = match self.stack.last() {
            None => None,
            Some(parent) if parent.kind == ContainerKind::Array => Some(parent.index.to_string()),
            Some(parent) if parent.kind == ContainerKind::JavaScriptWithScope => None,
            Some(_) => Some(
                self.current_name
                    .clone()
                    .unwrap_or_else(|| "?".to_string()),
            ),
        };

        let start = self.input.position();
        // Lengths are only checked against consumption when the container
        // closes; a zero prefix is accepted here.
        let size = self.read_length_at_least(0)?;
        self.stack.push(Container {
            kind,
            start,
            size,
            name,
            index: -1,
        });
        Ok(())
    }

    fn pop_container(&mut self) -> CodecResult<Container> {
        let path = self.container_path();
        let container = match self.stack.pop() {
            Some(container) => container,
            None => return Err(self.invalid_state("pop_container")),
        };
        let consumed = self.input.position() - container.start;
        if consumed != container.size as u64 {
            return Err(CodecError::LengthMismatch {
                path,
                declared: container.size,
                consumed,
            });
        }
        Ok(container)
    }

    fn finish_container(&mut self) {
        self.current_type = None;
        self.current_name = None;
        self.end_value();
        if self.stack.is_empty() {
            self.input.compact();
        }
    }

    /// Name of the element whose tag could not be recognised
    fn offending_element_name(&mut self) -> String {
        match self.stack.last().map(|c| (c.kind, c.index)) {
            Some((ContainerKind::Array, index)) => index.to_string(),
            Some((ContainerKind::Document, _)) | Some((ContainerKind::ScopeDocument, _)) => self
                .input
                .read_cstring()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_else(|_| "?".to_string()),
            _ => "?".to_string(),
        }
    }

    fn container_path(&self) -> String {
        let segments: Vec<&str> = self
            .stack
            .iter()
            .filter_map(|c| c.name.as_deref())
            .collect();
        if segments.is_empty() {
            "<root>".to_string()
        } else {
            segments.join(".")
        }
    }

    /// Full path from the document root to `leaf`, joined with `.`
    fn dotted_path(&self, leaf: &str) -> String {
        let mut segments: Vec<&str> = self
            .stack
            .iter()
            .filter_map(|c| c.name.as_deref())
            .collect();
        segments.push(leaf);
        segments.join(".")
    }

    fn read_string_payload(&mut self) -> CodecResult<String> {
        let offset = self.input.position();
        let len = self.read_length_at_least(1)? as usize;
        let mut bytes = self.input.read_bytes(len)?;
        if bytes.pop() != Some(0) {
            return Err(CodecError::MalformedValue {
                offset,
                reason: "string is not NUL-terminated".into(),
            });
        }
        String::from_utf8(bytes).map_err(|_| CodecError::MalformedValue {
            offset,
            reason: "string is not valid UTF-8".into(),
        })
    }

    fn read_cstring_utf8(&mut self) -> CodecResult<String> {
        let offset = self.input.position();
        let bytes = self.input.read_cstring()?;
        String::from_utf8(bytes).map_err(|_| CodecError::MalformedValue {
            offset,
            reason: "cstring is not valid UTF-8".into(),
        })
    }

    fn read_object_id_payload(&mut self) -> CodecResult<ObjectId> {
        let mut bytes = [0u8; 12];
        self.input.read_exact(&mut bytes)?;
        Ok(ObjectId(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> BsonReader<&[u8]> {
        BsonReader::new(bytes)
    }

    #[test]
    fn test_reads_simple_document() {
        // {"a": 1, "b": "x"}
        let bytes = [
            21u8, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0, 0, 0x02, b'b', 0, 2, 0, 0, 0, b'x', 0, 0,
        ];
        let mut r = reader(&bytes);
        assert_eq!(r.read_bson_type().unwrap(), BsonType::Document);
        r.read_start_document().unwrap();
        assert_eq!(r.read_bson_type().unwrap(), BsonType::Int32);
        assert_eq!(r.read_name().unwrap(), "a");
        assert_eq!(r.read_int32().unwrap(), 1);
        assert_eq!(r.read_bson_type().unwrap(), BsonType::String);
        assert_eq!(r.read_name().unwrap(), "b");
        assert_eq!(r.read_string().unwrap(), "x");
        assert_eq!(r.read_bson_type().unwrap(), BsonType::EndOfDocument);
        r.read_end_document().unwrap();
        assert_eq!(r.state(), ReaderState::Done);
        assert_eq!(r.position(), 21);
    }

    #[test]
    fn test_unknown_type_at_top_level_field() {
        let bytes = [0u8, 0, 0, 0, 0xf0, 0x61, 0x00];
        let mut r = reader(&bytes);
        r.read_start_document().unwrap();
        let err = r.read_bson_type().unwrap_err();
        match err {
            CodecError::UnknownBsonType { tag, ref path } => {
                assert_eq!(tag, 0xf0);
                assert_eq!(path, "a");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("for fieldname \"a\""));
    }

    #[test]
    fn test_unknown_type_in_array_uses_index() {
        let bytes = [
            0u8, 0, 0, 0, 0x04, 0x61, 0x00, 0, 0, 0, 0, 0x08, 0x30, 0x00, 0x00, 0xf0,
        ];
        let mut r = reader(&bytes);
        r.read_start_document().unwrap();
        assert_eq!(r.read_bson_type().unwrap(), BsonType::Array);
        assert_eq!(r.read_name().unwrap(), "a");
        r.read_start_array().unwrap();
        assert_eq!(r.read_bson_type().unwrap(), BsonType::Boolean);
        r.read_name_expected("0").unwrap();
        assert!(!r.read_boolean().unwrap());
        match r.read_bson_type() {
            Err(CodecError::UnknownBsonType { tag, path }) => {
                assert_eq!(tag, 0xf0);
                assert_eq!(path, "a.1");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_read_name_expected_mismatch() {
        let bytes = [12u8, 0, 0, 0, 0x08, b'x', 0, 1, 0, 0, 0, 0];
        let mut r = reader(&bytes);
        r.read_start_document().unwrap();
        r.read_bson_type().unwrap();
        match r.read_name_expected("y") {
            Err(CodecError::FieldNameMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, "y");
                assert_eq!(actual, "x");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_end_document_before_terminator_is_premature() {
        // {"t": true}
        let bytes = [9u8, 0, 0, 0, 0x08, b't', 0, 1, 0];
        let mut r = reader(&bytes);
        r.read_start_document().unwrap();
        assert!(matches!(
            r.read_end_document(),
            Err(CodecError::PrematureEnd { .. })
        ));
    }

    #[test]
    fn test_end_array_inside_document_is_premature() {
        let bytes = [5u8, 0, 0, 0, 0];
        let mut r = reader(&bytes);
        r.read_start_document().unwrap();
        assert_eq!(r.read_bson_type().unwrap(), BsonType::EndOfDocument);
        assert!(matches!(
            r.read_end_array(),
            Err(CodecError::PrematureEnd { .. })
        ));
        r.read_end_document().unwrap();
        assert_eq!(r.state(), ReaderState::Done);
    }

    #[test]
    fn test_declared_length_mismatch() {
        // Declares 6 bytes but the body is 5
        let bytes = [6u8, 0, 0, 0, 0, 0];
        let mut r = reader(&bytes);
        r.read_start_document().unwrap();
        r.read_bson_type().unwrap();
        match r.read_end_document() {
            Err(CodecError::LengthMismatch {
                declared, consumed, ..
            }) => {
                assert_eq!(declared, 6);
                assert_eq!(consumed, 5);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_negative_length_rejected() {
        let bytes = [0xffu8, 0xff, 0xff, 0xff, 0];
        let mut r = reader(&bytes);
        assert!(matches!(
            r.read_start_document(),
            Err(CodecError::InvalidLength { length: -1, .. })
        ));
    }

    #[test]
    fn test_oversized_document_rejected() {
        let settings = CodecSettings {
            max_document_size: 16,
            ..CodecSettings::default()
        };
        let bytes = [64u8, 0, 0, 0, 0];
        let mut r = BsonReader::with_settings(&bytes[..], settings);
        assert!(matches!(
            r.read_start_document(),
            Err(CodecError::DocumentTooLarge { size: 64, max: 16 })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let settings = CodecSettings {
            max_nesting_depth: 1,
            ..CodecSettings::default()
        };
        // {"d": {}}
        let bytes = [13u8, 0, 0, 0, 0x03, b'd', 0, 5, 0, 0, 0, 0, 0];
        let mut r = BsonReader::with_settings(&bytes[..], settings);
        r.read_start_document().unwrap();
        r.read_bson_type().unwrap();
        r.read_name().unwrap();
        assert!(matches!(
            r.read_start_document(),
            Err(CodecError::NestingTooDeep { depth: 2, max: 1 })
        ));
    }

    #[test]
    fn test_value_accessor_checks_type() {
        let bytes = [12u8, 0, 0, 0, 0x10, b'n', 0, 1, 0, 0, 0, 0];
        let mut r = reader(&bytes);
        r.read_start_document().unwrap();
        r.read_bson_type().unwrap();
        r.read_name().unwrap();
        assert!(matches!(
            r.read_string(),
            Err(CodecError::UnexpectedType {
                actual: BsonType::Int32,
                ..
            })
        ));
        assert_eq!(r.read_int32().unwrap(), 1);
    }

    #[test]
    fn test_skip_value_then_continue() {
        // {"s": "abc", "n": 2}
        let bytes = [
            23u8, 0, 0, 0, 0x02, b's', 0, 4, 0, 0, 0, b'a', b'b', b'c', 0, 0x10, b'n', 0, 2, 0,
            0, 0, 0,
        ];
        let mut r = reader(&bytes);
        r.read_start_document().unwrap();
        r.read_bson_type().unwrap();
        r.skip_name().unwrap();
        r.skip_value().unwrap();
        assert_eq!(r.read_bson_type().unwrap(), BsonType::Int32);
        r.read_name_expected("n").unwrap();
        assert_eq!(r.read_int32().unwrap(), 2);
        assert_eq!(r.read_bson_type().unwrap(), BsonType::EndOfDocument);
        r.read_end_document().unwrap();
        assert!(r.is_at_end_of_file().unwrap());
    }

    #[test]
    fn test_bookmark_replays_field() {
        let bytes = [
            23u8, 0, 0, 0, 0x02, b's', 0, 4, 0, 0, 0, b'a', b'b', b'c', 0, 0x10, b'n', 0, 2, 0,
            0, 0, 0,
        ];
        let mut r = reader(&bytes);
        r.read_start_document().unwrap();
        r.read_bson_type().unwrap();
        let bookmark = r.get_bookmark().unwrap();
        assert_eq!(r.read_name().unwrap(), "s");
        assert_eq!(r.read_string().unwrap(), "abc");
        assert_eq!(r.read_bson_type().unwrap(), BsonType::Int32);

        r.return_to_bookmark(&bookmark).unwrap();
        assert_eq!(r.state(), ReaderState::Name);
        assert_eq!(r.position(), bookmark.position());
        assert_eq!(r.read_name().unwrap(), "s");
        assert_eq!(r.read_string().unwrap(), "abc");
    }

    #[test]
    fn test_bookmark_from_other_reader_rejected() {
        let bytes = [5u8, 0, 0, 0, 0];
        let mut first = reader(&bytes);
        let mut second = reader(&bytes);
        let bookmark = first.get_bookmark().unwrap();
        assert!(matches!(
            second.return_to_bookmark(&bookmark),
            Err(CodecError::StaleBookmark { .. })
        ));
    }

    #[test]
    fn test_closed_reader_rejects_reads() {
        let bytes = [5u8, 0, 0, 0, 0];
        let mut r = reader(&bytes);
        r.close();
        r.close();
        assert_eq!(r.state(), ReaderState::Closed);
        assert!(matches!(r.read_start_document(), Err(CodecError::Closed)));
        assert!(matches!(r.is_at_end_of_file(), Err(CodecError::Closed)));
    }

    #[test]
    fn test_is_at_end_of_file_does_not_consume() {
        let bytes = [5u8, 0, 0, 0, 0];
        let mut r = reader(&bytes);
        assert!(!r.is_at_end_of_file().unwrap());
        assert!(!r.is_at_end_of_file().unwrap());
        assert_eq!(r.position(), 0);
        r.read_start_document().unwrap();
        assert!(!r.is_at_end_of_file().unwrap());
        r.read_bson_type().unwrap();
        r.read_end_document().unwrap();
        assert!(r.is_at_end_of_file().unwrap());
    }
}

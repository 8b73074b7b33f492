//! Forward-only binary document writer
//!
//! Each top-level document is assembled in memory, its container lengths
//! back-patched as the containers close, and then written to the transport
//! in one piece. A document that is never finished never reaches the
//! transport.

use std::io::Write;

use super::errors::{CodecError, CodecResult};
use super::settings::CodecSettings;
use super::types::{binary_subtype, BsonType};
use super::value::{Binary, DbPointer, Decimal128, ObjectId, Regex, Timestamp};
use crate::observability::{log_event_with_fields, Event};

/// Writer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Nothing written yet
    Initial,
    /// Next write is an element name
    Name,
    /// Next write is an element value
    Value,
    /// Next write is the scope document of a code-with-scope value
    ScopeDocument,
    /// A top-level document was completed and flushed
    Done,
    /// Transport released
    Closed,
}

impl WriterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriterState::Initial => "Initial",
            WriterState::Name => "Name",
            WriterState::Value => "Value",
            WriterState::ScopeDocument => "ScopeDocument",
            WriterState::Done => "Done",
            WriterState::Closed => "Closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Document,
    Array,
    ScopeDocument,
    JavaScriptWithScope,
}

#[derive(Debug)]
struct Container {
    kind: ContainerKind,
    /// Index of the length placeholder within the pending buffer
    start: usize,
    /// Next array index
    index: usize,
}

pub struct BsonWriter<W> {
    transport: Option<W>,
    settings: CodecSettings,
    state: WriterState,
    /// Bytes of the top-level document being assembled
    pending: Vec<u8>,
    /// Bytes already handed to the transport
    flushed: u64,
    pending_name: Option<String>,
    stack: Vec<Container>,
}

impl<W> BsonWriter<W> {
    /// Releases the transport. A partially written document is discarded.
    /// Safe to call any number of times; the transport is dropped once.
    pub fn close(&mut self) {
        self.pending.clear();
        self.stack.clear();
        self.pending_name = None;
        self.state = WriterState::Closed;
        if self.transport.take().is_some() {
            let position = self.flushed.to_string();
            log_event_with_fields(
                Event::TransportReleased,
                &[("side", "writer"), ("position", &position)],
            );
        }
    }

    /// Consumes the writer and hands back the transport, if still held
    pub fn into_inner(mut self) -> Option<W> {
        self.state = WriterState::Closed;
        self.pending.clear();
        self.transport.take()
    }
}

impl<W> Drop for BsonWriter<W> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<W: Write> BsonWriter<W> {
    pub fn new(transport: W) -> Self {
        Self::with_settings(transport, CodecSettings::default())
    }

    pub fn with_settings(transport: W, settings: CodecSettings) -> Self {
        Self {
            transport: Some(transport),
            settings,
            state: WriterState::Initial,
            pending: Vec::new(),
            flushed: 0,
            pending_name: None,
            stack: Vec::new(),
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Absolute stream offset of the next byte to be written
    pub fn position(&self) -> u64 {
        self.flushed + self.pending.len() as u64
    }

    // ==================
    // Structure
    // ==================

    pub fn write_name(&mut self, name: &str) -> CodecResult<()> {
        self.ensure_open()?;
        if self.state != WriterState::Name {
            return Err(self.invalid_state("write_name"));
        }
        if name.as_bytes().contains(&0) {
            return Err(CodecError::InvalidName(name.replace('\0', "\\0")));
        }
        self.pending_name = Some(name.to_string());
        self.state = WriterState::Value;
        Ok(())
    }

    pub fn write_start_document(&mut self) -> CodecResult<()> {
        const OP: &str = "write_start_document";
        self.ensure_open()?;
        let kind = match self.state {
            WriterState::Initial | WriterState::Done => ContainerKind::Document,
            WriterState::ScopeDocument => ContainerKind::ScopeDocument,
            WriterState::Value => {
                self.begin_value(OP, BsonType::Document)?;
                ContainerKind::Document
            }
            _ => return Err(self.invalid_state(OP)),
        };
        self.open_container(kind)?;
        self.state = WriterState::Name;
        Ok(())
    }

    pub fn write_end_document(&mut self) -> CodecResult<()> {
        const OP: &str = "write_end_document";
        self.ensure_open()?;
        match self.stack.last().map(|c| c.kind) {
            Some(ContainerKind::Document) | Some(ContainerKind::ScopeDocument) => {}
            _ => {
                return Err(CodecError::PrematureEnd {
                    operation: OP,
                    reason: "the innermost open container is not a document".into(),
                })
            }
        }
        if self.state != WriterState::Name {
            return Err(CodecError::PrematureEnd {
                operation: OP,
                reason: "an element name was written without a value".into(),
            });
        }

        self.pending.push(0);
        let closed = self.close_container()?;
        if closed == ContainerKind::ScopeDocument {
            self.close_container()?;
        }
        self.end_value()
    }

    pub fn write_start_array(&mut self) -> CodecResult<()> {
        self.begin_value("write_start_array", BsonType::Array)?;
        self.open_container(ContainerKind::Array)?;
        self.state = WriterState::Value;
        Ok(())
    }

    pub fn write_end_array(&mut self) -> CodecResult<()> {
        const OP: &str = "write_end_array";
        self.ensure_open()?;
        if self.stack.last().map(|c| c.kind) != Some(ContainerKind::Array) {
            return Err(CodecError::PrematureEnd {
                operation: OP,
                reason: "the innermost open container is not an array".into(),
            });
        }
        self.pending.push(0);
        self.close_container()?;
        self.end_value()
    }

    // ==================
    // Values
    // ==================

    pub fn write_double(&mut self, value: f64) -> CodecResult<()> {
        self.begin_value("write_double", BsonType::Double)?;
        self.pending.extend_from_slice(&value.to_le_bytes());
        self.end_value()
    }

    pub fn write_string(&mut self, value: &str) -> CodecResult<()> {
        self.begin_value("write_string", BsonType::String)?;
        self.put_string(value);
        self.end_value()
    }

    pub fn write_binary(&mut self, value: &Binary) -> CodecResult<()> {
        self.begin_value("write_binary", BsonType::Binary)?;
        let len = value.bytes.len() as i32;
        if value.subtype == binary_subtype::BINARY_OLD {
            self.pending.extend_from_slice(&(len + 4).to_le_bytes());
            self.pending.push(value.subtype);
            self.pending.extend_from_slice(&len.to_le_bytes());
        } else {
            self.pending.extend_from_slice(&len.to_le_bytes());
            self.pending.push(value.subtype);
        }
        self.pending.extend_from_slice(&value.bytes);
        self.end_value()
    }

    pub fn write_undefined(&mut self) -> CodecResult<()> {
        self.begin_value("write_undefined", BsonType::Undefined)?;
        self.end_value()
    }

    pub fn write_object_id(&mut self, value: &ObjectId) -> CodecResult<()> {
        self.begin_value("write_object_id", BsonType::ObjectId)?;
        self.pending.extend_from_slice(&value.0);
        self.end_value()
    }

    pub fn write_boolean(&mut self, value: bool) -> CodecResult<()> {
        self.begin_value("write_boolean", BsonType::Boolean)?;
        self.pending.push(u8::from(value));
        self.end_value()
    }

    /// Milliseconds since the Unix epoch
    pub fn write_date_time(&mut self, millis: i64) -> CodecResult<()> {
        self.begin_value("write_date_time", BsonType::DateTime)?;
        self.pending.extend_from_slice(&millis.to_le_bytes());
        self.end_value()
    }

    pub fn write_null(&mut self) -> CodecResult<()> {
        self.begin_value("write_null", BsonType::Null)?;
        self.end_value()
    }

    pub fn write_regular_expression(&mut self, value: &Regex) -> CodecResult<()> {
        self.begin_value("write_regular_expression", BsonType::RegularExpression)?;
        self.put_cstring(&value.pattern)?;
        self.put_cstring(&value.options)?;
        self.end_value()
    }

    pub fn write_db_pointer(&mut self, value: &DbPointer) -> CodecResult<()> {
        self.begin_value("write_db_pointer", BsonType::DbPointer)?;
        self.put_string(&value.namespace);
        self.pending.extend_from_slice(&value.id.0);
        self.end_value()
    }

    pub fn write_javascript(&mut self, code: &str) -> CodecResult<()> {
        self.begin_value("write_javascript", BsonType::JavaScript)?;
        self.put_string(code);
        self.end_value()
    }

    pub fn write_symbol(&mut self, symbol: &str) -> CodecResult<()> {
        self.begin_value("write_symbol", BsonType::Symbol)?;
        self.put_string(symbol);
        self.end_value()
    }

    /// Writes the code of a code-with-scope value. The scope document must
    /// follow with `write_start_document`.
    pub fn write_javascript_with_scope(&mut self, code: &str) -> CodecResult<()> {
        self.begin_value("write_javascript_with_scope", BsonType::JavaScriptWithScope)?;
        self.open_container(ContainerKind::JavaScriptWithScope)?;
        self.put_string(code);
        self.state = WriterState::ScopeDocument;
        Ok(())
    }

    pub fn write_int32(&mut self, value: i32) -> CodecResult<()> {
        self.begin_value("write_int32", BsonType::Int32)?;
        self.pending.extend_from_slice(&value.to_le_bytes());
        self.end_value()
    }

    pub fn write_timestamp(&mut self, value: Timestamp) -> CodecResult<()> {
        self.begin_value("write_timestamp", BsonType::Timestamp)?;
        self.pending.extend_from_slice(&value.to_u64().to_le_bytes());
        self.end_value()
    }

    pub fn write_int64(&mut self, value: i64) -> CodecResult<()> {
        self.begin_value("write_int64", BsonType::Int64)?;
        self.pending.extend_from_slice(&value.to_le_bytes());
        self.end_value()
    }

    pub fn write_decimal128(&mut self, value: &Decimal128) -> CodecResult<()> {
        self.begin_value("write_decimal128", BsonType::Decimal128)?;
        self.pending.extend_from_slice(&value.0);
        self.end_value()
    }

    pub fn write_min_key(&mut self) -> CodecResult<()> {
        self.begin_value("write_min_key", BsonType::MinKey)?;
        self.end_value()
    }

    pub fn write_max_key(&mut self) -> CodecResult<()> {
        self.begin_value("write_max_key", BsonType::MaxKey)?;
        self.end_value()
    }

    // ==================
    // Internals
    // ==================

    fn ensure_open(&self) -> CodecResult<()> {
        if self.state == WriterState::Closed || self.transport.is_none() {
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

    /// Writes the element tag and name for a value inside a container
    fn begin_value(&mut self, operation: &'static str, ty: BsonType) -> CodecResult<()> {
        self.ensure_open()?;
        if self.state != WriterState::Value {
            return Err(self.invalid_state(operation));
        }
        let name = match self.stack.last_mut() {
            Some(container) if container.kind == ContainerKind::Array => {
                let name = container.index.to_string();
                container.index += 1;
                name
            }
            Some(_) => match self.pending_name.take() {
                Some(name) => name,
                None => return Err(self.invalid_state(operation)),
            },
            None => return Err(self.invalid_state(operation)),
        };
        self.pending.push(ty.as_u8());
        self.put_cstring(&name)
    }

    fn end_value(&mut self) -> CodecResult<()> {
        self.state = match self.stack.last().map(|c| c.kind) {
            Some(ContainerKind::Array) => WriterState::Value,
            Some(_) => WriterState::Name,
            None => {
                self.flush_document()?;
                WriterState::Done
            }
        };
        Ok(())
    }

    fn open_container(&mut self, kind: ContainerKind) -> CodecResult<()> {
        let depth = self.stack.len() + 1;
        if depth > self.settings.max_nesting_depth {
            return Err(CodecError::NestingTooDeep {
                depth,
                max: self.settings.max_nesting_depth,
            });
        }
        let start = self.pending.len();
        self.pending.extend_from_slice(&[0u8; 4]);
        self.stack.push(Container {
            kind,
            start,
            index: 0,
        });
        Ok(())
    }

    /// Pops the innermost container and back-patches its length prefix
    fn close_container(&mut self) -> CodecResult<ContainerKind> {
        let container = match self.stack.pop() {
            Some(container) => container,
            None => return Err(self.invalid_state("close_container")),
        };
        let size = self.pending.len() - container.start;
        if size > self.settings.max_document_size as usize {
            return Err(CodecError::DocumentTooLarge {
                size: size as i64,
                max: self.settings.max_document_size,
            });
        }
        self.pending[container.start..container.start + 4]
            .copy_from_slice(&(size as i32).to_le_bytes());
        Ok(container.kind)
    }

    fn flush_document(&mut self) -> CodecResult<()> {
        let transport = self.transport.as_mut().ok_or(CodecError::Closed)?;
        transport.write_all(&self.pending)?;
        transport.flush()?;
        self.flushed += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    fn put_string(&mut self, value: &str) {
        let len = value.len() as i32 + 1;
        self.pending.extend_from_slice(&len.to_le_bytes());
        self.pending.extend_from_slice(value.as_bytes());
        self.pending.push(0);
    }

    fn put_cstring(&mut self, value: &str) -> CodecResult<()> {
        if value.as_bytes().contains(&0) {
            return Err(CodecError::InvalidName(value.replace('\0', "\\0")));
        }
        self.pending.extend_from_slice(value.as_bytes());
        self.pending.push(0);
        Ok(())
    }
}

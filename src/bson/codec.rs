//! Whole-document encode and decode on top of the streaming reader/writer

use std::io::{Read, Write};

use super::errors::{CodecError, CodecResult};
use super::reader::BsonReader;
use super::settings::CodecSettings;
use super::types::BsonType;
use super::value::{Bson, Document, JavaScriptWithScope};
use super::writer::BsonWriter;

/// Writes one complete document at the writer's current position.
///
/// At the top level this flushes the document to the transport.
pub fn write_document<W: Write>(writer: &mut BsonWriter<W>, document: &Document) -> CodecResult<()> {
    writer.write_start_document()?;
    for (name, value) in document.iter() {
        writer.write_name(name)?;
        write_value(writer, value)?;
    }
    writer.write_end_document()
}

/// Writes one value whose name (if any) has already been written
pub fn write_value<W: Write>(writer: &mut BsonWriter<W>, value: &Bson) -> CodecResult<()> {
    match value {
        Bson::Double(v) => writer.write_double(*v),
        Bson::String(v) => writer.write_string(v),
        Bson::Document(v) => write_document(writer, v),
        Bson::Array(items) => {
            writer.write_start_array()?;
            for item in items {
                write_value(writer, item)?;
            }
            writer.write_end_array()
        }
        Bson::Binary(v) => writer.write_binary(v),
        Bson::Undefined => writer.write_undefined(),
        Bson::ObjectId(v) => writer.write_object_id(v),
        Bson::Boolean(v) => writer.write_boolean(*v),
        Bson::DateTime(v) => writer.write_date_time(*v),
        Bson::Null => writer.write_null(),
        Bson::RegularExpression(v) => writer.write_regular_expression(v),
        Bson::DbPointer(v) => writer.write_db_pointer(v),
        Bson::JavaScript(v) => writer.write_javascript(v),
        Bson::Symbol(v) => writer.write_symbol(v),
        Bson::JavaScriptWithScope(v) => {
            writer.write_javascript_with_scope(&v.code)?;
            write_document(writer, &v.scope)
        }
        Bson::Int32(v) => writer.write_int32(*v),
        Bson::Timestamp(v) => writer.write_timestamp(*v),
        Bson::Int64(v) => writer.write_int64(*v),
        Bson::Decimal128(v) => writer.write_decimal128(v),
        Bson::MinKey => writer.write_min_key(),
        Bson::MaxKey => writer.write_max_key(),
    }
}

/// Reads one complete document starting at the reader's current position.
///
/// A field name that repeats within one document is `MalformedValue`.
pub fn read_document<R: Read>(reader: &mut BsonReader<R>) -> CodecResult<Document> {
    reader.read_start_document()?;
    let mut document = Document::new();
    loop {
        let offset = reader.position();
        let ty = reader.read_bson_type()?;
        if ty == BsonType::EndOfDocument {
            break;
        }
        let name = reader.read_name()?;
        if document.contains_key(&name) {
            return Err(CodecError::MalformedValue {
                offset,
                reason: format!("duplicate field name \"{}\"", name),
            });
        }
        let value = read_value(reader, ty)?;
        document.insert(name, value);
    }
    reader.read_end_document()?;
    Ok(document)
}

fn read_array<R: Read>(reader: &mut BsonReader<R>) -> CodecResult<Vec<Bson>> {
    reader.read_start_array()?;
    let mut items = Vec::new();
    loop {
        let ty = reader.read_bson_type()?;
        if ty == BsonType::EndOfDocument {
            break;
        }
        reader.skip_name()?;
        items.push(read_value(reader, ty)?);
    }
    reader.read_end_array()?;
    Ok(items)
}

/// Reads the value of the element positioned on, whose type is `ty`
pub fn read_value<R: Read>(reader: &mut BsonReader<R>, ty: BsonType) -> CodecResult<Bson> {
    let value = match ty {
        BsonType::Double => Bson::Double(reader.read_double()?),
        BsonType::String => Bson::String(reader.read_string()?),
        BsonType::Document => Bson::Document(read_document(reader)?),
        BsonType::Array => Bson::Array(read_array(reader)?),
        BsonType::Binary => Bson::Binary(reader.read_binary()?),
        BsonType::Undefined => {
            reader.read_undefined()?;
            Bson::Undefined
        }
        BsonType::ObjectId => Bson::ObjectId(reader.read_object_id()?),
        BsonType::Boolean => Bson::Boolean(reader.read_boolean()?),
        BsonType::DateTime => Bson::DateTime(reader.read_date_time()?),
        BsonType::Null => {
            reader.read_null()?;
            Bson::Null
        }
        BsonType::RegularExpression => Bson::RegularExpression(reader.read_regular_expression()?),
        BsonType::DbPointer => Bson::DbPointer(reader.read_db_pointer()?),
        BsonType::JavaScript => Bson::JavaScript(reader.read_javascript()?),
        BsonType::Symbol => Bson::Symbol(reader.read_symbol()?),
        BsonType::JavaScriptWithScope => {
            let code = reader.read_javascript_with_scope()?;
            let scope = read_document(reader)?;
            Bson::JavaScriptWithScope(JavaScriptWithScope { code, scope })
        }
        BsonType::Int32 => Bson::Int32(reader.read_int32()?),
        BsonType::Timestamp => Bson::Timestamp(reader.read_timestamp()?),
        BsonType::Int64 => Bson::Int64(reader.read_int64()?),
        BsonType::Decimal128 => Bson::Decimal128(reader.read_decimal128()?),
        BsonType::MinKey => {
            reader.read_min_key()?;
            Bson::MinKey
        }
        BsonType::MaxKey => {
            reader.read_max_key()?;
            Bson::MaxKey
        }
        BsonType::EndOfDocument => {
            return Err(CodecError::InvalidState {
                operation: "read_value",
                state: "EndOfDocument",
            })
        }
    };
    Ok(value)
}

/// Encodes a single document to bytes
pub fn to_vec(document: &Document) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut writer = BsonWriter::new(&mut out);
    write_document(&mut writer, document)?;
    writer.close();
    drop(writer);
    Ok(out)
}

/// Decodes exactly one document; trailing bytes are an error
pub fn from_slice(bytes: &[u8]) -> CodecResult<Document> {
    let mut reader = BsonReader::new(bytes);
    let document = read_document(&mut reader)?;
    let end = reader.position();
    if !reader.is_at_end_of_file()? {
        reader.close();
        return Err(CodecError::MalformedValue {
            offset: end,
            reason: "trailing bytes after document".into(),
        });
    }
    reader.close();
    Ok(document)
}

/// Writes documents back to back and releases the transport
pub fn encode_stream<'a, W, I>(transport: W, documents: I, settings: CodecSettings) -> CodecResult<u64>
where
    W: Write,
    I: IntoIterator<Item = &'a Document>,
{
    let mut writer = BsonWriter::with_settings(transport, settings);
    let result = documents
        .into_iter()
        .try_for_each(|document| write_document(&mut writer, document));
    let written = writer.position();
    writer.close();
    result.map(|_| written)
}

/// Reads documents until the transport is exhausted, then releases it.
/// The first error aborts the stream.
pub fn decode_stream<R: Read>(transport: R, settings: CodecSettings) -> CodecResult<Vec<Document>> {
    let mut documents = DocumentIterator::new(BsonReader::with_settings(transport, settings));
    let collected: Vec<Document> = documents.by_ref().collect();
    match documents.take_error() {
        Some(err) => Err(err),
        None => Ok(collected),
    }
}

/// Iterator over consecutive top-level documents.
///
/// Stops at end of stream or at the first error; the error is kept and can
/// be taken afterwards. The transport is released as soon as iteration
/// stops.
pub struct DocumentIterator<R> {
    reader: BsonReader<R>,
    error: Option<CodecError>,
    finished: bool,
}

impl<R: Read> DocumentIterator<R> {
    pub fn new(reader: BsonReader<R>) -> Self {
        Self {
            reader,
            error: None,
            finished: false,
        }
    }

    /// Error that stopped iteration, if any
    pub fn error(&self) -> Option<&CodecError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<CodecError> {
        self.error.take()
    }

    fn finish(&mut self) {
        self.finished = true;
        self.reader.close();
    }
}

impl<R: Read> Iterator for DocumentIterator<R> {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.reader.is_at_end_of_file() {
            Ok(true) => {
                self.finish();
                return None;
            }
            Ok(false) => {}
            Err(err) => {
                self.error = Some(err);
                self.finish();
                return None;
            }
        }
        match read_document(&mut self.reader) {
            Ok(document) => Some(document),
            Err(err) => {
                self.error = Some(err);
                self.finish();
                None
            }
        }
    }
}

impl<R: Read> IntoIterator for BsonReader<R> {
    type Item = Document;
    type IntoIter = DocumentIterator<R>;

    fn into_iter(self) -> Self::IntoIter {
        DocumentIterator::new(self)
    }
}

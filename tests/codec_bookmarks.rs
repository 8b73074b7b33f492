//! Reader position and lifecycle tests
//!
//! - Returning to a bookmark replays exactly the same sequence of reads
//! - End of stream is reported after the last of 0..=3 documents
//! - An unknown element tag names the full dotted path and yields no
//!   partial document
//! - The transport is released exactly once
//! - Offsets, bookmarks and end of stream hold past 4 GiB

use docpipe::bson::{
    encode_stream, read_document, to_vec, Binary, Bson, BsonReader, BsonType, BsonWriter,
    CodecError, CodecSettings, Document, ReaderState,
};
use docpipe::doc;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// =============================================================================
// Test Utilities
// =============================================================================

/// Transport that counts how many times it is dropped
struct CountingTransport<T> {
    inner: T,
    drops: Arc<AtomicUsize>,
}

impl<T> Drop for CountingTransport<T> {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl<T: Read> Read for CountingTransport<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<T: Write> Write for CountingTransport<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Every read the caller can observe, in order
#[derive(Debug, PartialEq)]
enum Step {
    Type(BsonType),
    Name(String),
    Value(Bson),
}

/// Reads the remaining elements of the current document, descending into
/// nested containers
fn trace_rest(reader: &mut BsonReader<&[u8]>, steps: &mut Vec<Step>) {
    loop {
        let ty = reader.read_bson_type().unwrap();
        steps.push(Step::Type(ty));
        match ty {
            BsonType::EndOfDocument => {
                if reader.state() == ReaderState::EndOfArray {
                    reader.read_end_array().unwrap();
                } else {
                    reader.read_end_document().unwrap();
                }
                return;
            }
            BsonType::Document => {
                steps.push(Step::Name(reader.read_name().unwrap()));
                reader.read_start_document().unwrap();
                trace_rest(reader, steps);
            }
            BsonType::Array => {
                steps.push(Step::Name(reader.read_name().unwrap()));
                reader.read_start_array().unwrap();
                trace_rest(reader, steps);
            }
            BsonType::Int32 => {
                steps.push(Step::Name(reader.read_name().unwrap()));
                steps.push(Step::Value(Bson::Int32(reader.read_int32().unwrap())));
            }
            BsonType::String => {
                steps.push(Step::Name(reader.read_name().unwrap()));
                steps.push(Step::Value(Bson::String(reader.read_string().unwrap())));
            }
            other => panic!("unexpected type {:?}", other),
        }
    }
}

fn sample() -> Document {
    doc! {
        "a" => 1,
        "b" => vec![Bson::Int32(2), Bson::Document(doc! { "c" => "three" })],
        "d" => doc! { "e" => 4 },
    }
}

// =============================================================================
// Bookmark determinism
// =============================================================================

#[test]
fn test_bookmark_replays_identical_reads() {
    let bytes = to_vec(&sample()).unwrap();

    // Bookmark at every element boundary of the top-level document
    for skip in 0..3 {
        let mut reader = BsonReader::new(&bytes[..]);
        reader.read_start_document().unwrap();
        for _ in 0..skip {
            reader.read_bson_type().unwrap();
            reader.skip_name().unwrap();
            reader.skip_value().unwrap();
        }

        let bookmark = reader.get_bookmark().unwrap();
        let mut first = Vec::new();
        trace_rest(&mut reader, &mut first);
        let end = reader.position();

        reader.return_to_bookmark(&bookmark).unwrap();
        assert_eq!(reader.position(), bookmark.position());
        let mut second = Vec::new();
        trace_rest(&mut reader, &mut second);

        assert_eq!(first, second, "replay after skipping {} elements", skip);
        assert_eq!(reader.position(), end);
    }
}

#[test]
fn test_bookmark_taken_inside_nested_array() {
    let bytes = to_vec(&sample()).unwrap();
    let mut reader = BsonReader::new(&bytes[..]);
    reader.read_start_document().unwrap();
    reader.read_bson_type().unwrap();
    reader.skip_name().unwrap();
    reader.skip_value().unwrap();
    assert_eq!(reader.read_bson_type().unwrap(), BsonType::Array);
    reader.read_name_expected("b").unwrap();
    reader.read_start_array().unwrap();

    let bookmark = reader.get_bookmark().unwrap();
    let document = read_document(&mut reader);
    assert!(document.is_err(), "array elements are not a document start");

    reader.return_to_bookmark(&bookmark).unwrap();
    assert_eq!(reader.read_bson_type().unwrap(), BsonType::Int32);
    reader.read_name_expected("0").unwrap();
    assert_eq!(reader.read_int32().unwrap(), 2);
}

// =============================================================================
// End of stream
// =============================================================================

#[test]
fn test_end_of_stream_after_each_count() {
    for count in 0..=3 {
        let documents: Vec<Document> = (0..count).map(|i| doc! { "i" => i }).collect();
        let mut buffer = Vec::new();
        encode_stream(&mut buffer, &documents, CodecSettings::default()).unwrap();

        let mut reader = BsonReader::new(&buffer[..]);
        for expected in &documents {
            assert!(!reader.is_at_end_of_file().unwrap());
            assert_eq!(&read_document(&mut reader).unwrap(), expected);
        }
        assert!(reader.is_at_end_of_file().unwrap(), "{} documents", count);
        assert_eq!(reader.position(), buffer.len() as u64);
    }
}

// =============================================================================
// Unknown element tags
// =============================================================================

#[test]
fn test_unknown_tag_reports_dotted_path() {
    let original = doc! {
        "a" => vec![Bson::Int32(1), Bson::Document(doc! { "c" => 1 })],
    };
    let mut bytes = to_vec(&original).unwrap();
    let at = bytes
        .windows(3)
        .position(|w| w == [0x10, b'c', 0x00])
        .expect("int32 element named c");
    bytes[at] = 0xF0;

    let mut reader = BsonReader::new(&bytes[..]);
    match read_document(&mut reader) {
        Err(CodecError::UnknownBsonType { tag, path }) => {
            assert_eq!(tag, 0xF0);
            assert_eq!(path, "a.1.c");
        }
        other => panic!("expected unknown type error, got {:?}", other),
    }
}

#[test]
fn test_unknown_tag_error_message_names_field() {
    let bytes = [0u8, 0, 0, 0, 0xF0, b'a', 0x00];
    let mut reader = BsonReader::new(&bytes[..]);
    reader.read_start_document().unwrap();
    let err = reader.read_bson_type().unwrap_err();
    assert!(err.to_string().contains("\"a\""));
    assert_eq!(err.code(), "DOCPIPE_BSON_UNKNOWN_TYPE");
}

// =============================================================================
// Transport release
// =============================================================================

#[test]
fn test_reader_releases_transport_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let bytes = to_vec(&sample()).unwrap();
    let transport = CountingTransport {
        inner: &bytes[..],
        drops: Arc::clone(&drops),
    };

    let mut reader = BsonReader::new(transport);
    read_document(&mut reader).unwrap();
    reader.close();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    reader.close();
    drop(reader);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reader_releases_transport_on_error_path() {
    let drops = Arc::new(AtomicUsize::new(0));
    let truncated = [0x20u8, 0, 0, 0, 0x10, b'x'];
    {
        let transport = CountingTransport {
            inner: &truncated[..],
            drops: Arc::clone(&drops),
        };
        let mut reader = BsonReader::new(transport);
        assert!(read_document(&mut reader).is_err());
    }
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_writer_releases_transport_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let transport = CountingTransport {
        inner: Vec::new(),
        drops: Arc::clone(&drops),
    };

    let mut writer = BsonWriter::new(transport);
    writer.write_start_document().unwrap();
    writer.write_name("half").unwrap();
    writer.close();
    writer.close();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(writer.write_int32(1).is_err());
    drop(writer);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Streams past 4 GiB
// =============================================================================

/// Generates `count` copies of one encoded document, patching each copy's
/// leading int32 field `n` with the copy's index
struct RepeatedDocuments {
    template: Vec<u8>,
    count: u64,
    offset: u64,
}

/// Offset of the value of `n`: length prefix, tag, "n\0"
const N_VALUE_AT: usize = 4 + 1 + 2;

impl RepeatedDocuments {
    fn new(template: Vec<u8>, count: u64) -> Self {
        Self {
            template,
            count,
            offset: 0,
        }
    }

    fn total_len(&self) -> u64 {
        self.template.len() as u64 * self.count
    }
}

impl Read for RepeatedDocuments {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.total_len() {
            return Ok(0);
        }
        let doc_len = self.template.len() as u64;
        let index = self.offset / doc_len;
        let within = (self.offset % doc_len) as usize;
        let n = buf.len().min(self.template.len() - within);
        buf[..n].copy_from_slice(&self.template[within..within + n]);

        let index_bytes = (index as i32).to_le_bytes();
        for (i, byte) in index_bytes.iter().enumerate() {
            let at = N_VALUE_AT + i;
            if at >= within && at < within + n {
                buf[at - within] = *byte;
            }
        }

        self.offset += n as u64;
        Ok(n)
    }
}

#[test]
fn test_offsets_past_four_gib() {
    const BLOB_LEN: usize = 8 * 1024 * 1024;
    let template = to_vec(&doc! {
        "n" => 0,
        "blob" => Binary::new(0, vec![0xab; BLOB_LEN]),
    })
    .unwrap();
    let doc_len = template.len() as u64;
    let count = u64::from(u32::MAX) / doc_len + 2;
    let source = RepeatedDocuments::new(template, count);
    let total = source.total_len();
    assert!(total > u64::from(u32::MAX));

    let mut reader = BsonReader::new(source);
    let mut replayed_past_boundary = false;
    for index in 0..count {
        reader.read_start_document().unwrap();
        assert_eq!(reader.read_bson_type().unwrap(), BsonType::Int32);
        assert_eq!(reader.read_name().unwrap(), "n");
        assert_eq!(reader.read_int32().unwrap(), index as i32);

        if !replayed_past_boundary && reader.position() > u64::from(u32::MAX) {
            let bookmark = reader.get_bookmark().unwrap();
            assert!(bookmark.position() > u64::from(u32::MAX));
            assert_eq!(reader.read_bson_type().unwrap(), BsonType::Binary);
            assert_eq!(reader.read_name().unwrap(), "blob");

            reader.return_to_bookmark(&bookmark).unwrap();
            assert_eq!(reader.position(), bookmark.position());
            replayed_past_boundary = true;
        }

        assert_eq!(reader.read_bson_type().unwrap(), BsonType::Binary);
        assert_eq!(reader.read_name().unwrap(), "blob");
        reader.skip_value().unwrap();
        assert_eq!(reader.read_bson_type().unwrap(), BsonType::EndOfDocument);
        reader.read_end_document().unwrap();
        assert_eq!(reader.position(), (index + 1) * doc_len);
    }

    assert!(replayed_past_boundary);
    assert_eq!(reader.position(), total);
    assert!(reader.is_at_end_of_file().unwrap());
}

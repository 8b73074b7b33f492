//! Document and value model
//!
//! `Document` keeps insertion order; two documents are equal only if they
//! hold the same keys, in the same order, with equal values.

use std::fmt;

use indexmap::IndexMap;

use super::types::BsonType;

/// A single value of the binary document format
#[derive(Debug, Clone, PartialEq)]
pub enum Bson {
    Double(f64),
    String(String),
    Document(Document),
    Array(Vec<Bson>),
    Binary(Binary),
    Undefined,
    ObjectId(ObjectId),
    Boolean(bool),
    /// Milliseconds since the Unix epoch
    DateTime(i64),
    Null,
    RegularExpression(Regex),
    DbPointer(DbPointer),
    JavaScript(String),
    Symbol(String),
    JavaScriptWithScope(JavaScriptWithScope),
    Int32(i32),
    Timestamp(Timestamp),
    Int64(i64),
    Decimal128(Decimal128),
    MinKey,
    MaxKey,
}

impl Bson {
    /// Returns the wire type tag for this value
    pub fn element_type(&self) -> BsonType {
        match self {
            Bson::Double(_) => BsonType::Double,
            Bson::String(_) => BsonType::String,
            Bson::Document(_) => BsonType::Document,
            Bson::Array(_) => BsonType::Array,
            Bson::Binary(_) => BsonType::Binary,
            Bson::Undefined => BsonType::Undefined,
            Bson::ObjectId(_) => BsonType::ObjectId,
            Bson::Boolean(_) => BsonType::Boolean,
            Bson::DateTime(_) => BsonType::DateTime,
            Bson::Null => BsonType::Null,
            Bson::RegularExpression(_) => BsonType::RegularExpression,
            Bson::DbPointer(_) => BsonType::DbPointer,
            Bson::JavaScript(_) => BsonType::JavaScript,
            Bson::Symbol(_) => BsonType::Symbol,
            Bson::JavaScriptWithScope(_) => BsonType::JavaScriptWithScope,
            Bson::Int32(_) => BsonType::Int32,
            Bson::Timestamp(_) => BsonType::Timestamp,
            Bson::Int64(_) => BsonType::Int64,
            Bson::Decimal128(_) => BsonType::Decimal128,
            Bson::MinKey => BsonType::MinKey,
            Bson::MaxKey => BsonType::MaxKey,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Bson]> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int32(v) => Some(i64::from(*v)),
            Bson::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Equality that compares doubles bit for bit, so a NaN equals itself
    /// and `0.0` differs from `-0.0`
    pub fn same_value(&self, other: &Bson) -> bool {
        match (self, other) {
            (Bson::Double(a), Bson::Double(b)) => a.to_bits() == b.to_bits(),
            (Bson::Document(a), Bson::Document(b)) => a.same_entries(b),
            (Bson::Array(a), Bson::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_value(y))
            }
            (Bson::JavaScriptWithScope(a), Bson::JavaScriptWithScope(b)) => {
                a.code == b.code && a.scope.same_entries(&b.scope)
            }
            _ => self == other,
        }
    }
}

macro_rules! impl_from_for_bson {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Bson {
                fn from(value: $source) -> Self {
                    Bson::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_for_bson! {
    f64 => Double,
    String => String,
    &str => String,
    Document => Document,
    Vec<Bson> => Array,
    Binary => Binary,
    ObjectId => ObjectId,
    bool => Boolean,
    Regex => RegularExpression,
    i32 => Int32,
    Timestamp => Timestamp,
    i64 => Int64,
    Decimal128 => Decimal128,
}

/// Ordered key/value document
#[derive(Debug, Clone, Default)]
pub struct Document {
    entries: IndexMap<String, Bson>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value. An existing key keeps its position and the previous
    /// value is returned.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.entries.get(key)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Bson::as_document)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes a key; the remaining keys keep their order
    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        self.entries.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Order-sensitive comparison using [`Bson::same_value`]
    pub fn same_entries(&self, other: &Document) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.same_value(vb))
    }
}

/// Same keys in the same order with equal values
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len() && self.entries.iter().eq(other.entries.iter())
    }
}

impl<K: Into<String>, V: Into<Bson>> FromIterator<(K, V)> for Document {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = indexmap::map::IntoIter<String, Bson>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Builds a [`Document`] from `key => value` pairs.
#[macro_export]
macro_rules! doc {
    () => { $crate::bson::Document::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut document = $crate::bson::Document::new();
        $( document.insert($key, $value); )+
        document
    }};
}

/// Binary payload with its subtype
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub subtype: u8,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(subtype: u8, bytes: Vec<u8>) -> Self {
        Self { subtype, bytes }
    }
}

/// 12-byte object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub [u8; 12]);

impl ObjectId {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Replication timestamp: seconds plus an ordinal within the second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

impl Timestamp {
    /// Wire form: increment in the low word, time in the high word
    pub fn to_u64(self) -> u64 {
        (u64::from(self.time) << 32) | u64::from(self.increment)
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            time: (value >> 32) as u32,
            increment: value as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regex {
    pub pattern: String,
    pub options: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbPointer {
    pub namespace: String,
    pub id: ObjectId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JavaScriptWithScope {
    pub code: String,
    pub scope: Document,
}

/// IEEE 754-2008 decimal, kept as its raw little-endian bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal128(pub [u8; 16]);

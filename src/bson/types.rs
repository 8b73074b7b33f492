//! Element type tags of the binary document format

use std::fmt;

/// One-byte element type tag.
///
/// `EndOfDocument` is the container terminator, not a value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BsonType {
    EndOfDocument = 0x00,
    Double = 0x01,
    String = 0x02,
    Document = 0x03,
    Array = 0x04,
    Binary = 0x05,
    Undefined = 0x06,
    ObjectId = 0x07,
    Boolean = 0x08,
    DateTime = 0x09,
    Null = 0x0A,
    RegularExpression = 0x0B,
    DbPointer = 0x0C,
    JavaScript = 0x0D,
    Symbol = 0x0E,
    JavaScriptWithScope = 0x0F,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
    Decimal128 = 0x13,
    MaxKey = 0x7F,
    MinKey = 0xFF,
}

impl BsonType {
    /// Convert from the wire tag, returns None for unrecognised tags
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(BsonType::EndOfDocument),
            0x01 => Some(BsonType::Double),
            0x02 => Some(BsonType::String),
            0x03 => Some(BsonType::Document),
            0x04 => Some(BsonType::Array),
            0x05 => Some(BsonType::Binary),
            0x06 => Some(BsonType::Undefined),
            0x07 => Some(BsonType::ObjectId),
            0x08 => Some(BsonType::Boolean),
            0x09 => Some(BsonType::DateTime),
            0x0A => Some(BsonType::Null),
            0x0B => Some(BsonType::RegularExpression),
            0x0C => Some(BsonType::DbPointer),
            0x0D => Some(BsonType::JavaScript),
            0x0E => Some(BsonType::Symbol),
            0x0F => Some(BsonType::JavaScriptWithScope),
            0x10 => Some(BsonType::Int32),
            0x11 => Some(BsonType::Timestamp),
            0x12 => Some(BsonType::Int64),
            0x13 => Some(BsonType::Decimal128),
            0x7F => Some(BsonType::MaxKey),
            0xFF => Some(BsonType::MinKey),
            _ => None,
        }
    }

    /// Convert to the wire tag
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BsonType::EndOfDocument => "EndOfDocument",
            BsonType::Double => "Double",
            BsonType::String => "String",
            BsonType::Document => "Document",
            BsonType::Array => "Array",
            BsonType::Binary => "Binary",
            BsonType::Undefined => "Undefined",
            BsonType::ObjectId => "ObjectId",
            BsonType::Boolean => "Boolean",
            BsonType::DateTime => "DateTime",
            BsonType::Null => "Null",
            BsonType::RegularExpression => "RegularExpression",
            BsonType::DbPointer => "DbPointer",
            BsonType::JavaScript => "JavaScript",
            BsonType::Symbol => "Symbol",
            BsonType::JavaScriptWithScope => "JavaScriptWithScope",
            BsonType::Int32 => "Int32",
            BsonType::Timestamp => "Timestamp",
            BsonType::Int64 => "Int64",
            BsonType::Decimal128 => "Decimal128",
            BsonType::MaxKey => "MaxKey",
            BsonType::MinKey => "MinKey",
        }
    }
}

impl fmt::Display for BsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binary subtypes the codec treats specially
pub mod binary_subtype {
    /// Generic binary
    pub const GENERIC: u8 = 0x00;
    /// Legacy binary; payload carries a second, inner length prefix
    pub const BINARY_OLD: u8 = 0x02;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip_for_every_type() {
        for tag in 0u8..=0xFF {
            if let Some(ty) = BsonType::from_u8(tag) {
                assert_eq!(ty.as_u8(), tag);
            }
        }
    }

    #[test]
    fn test_reserved_tags_are_unknown() {
        assert_eq!(BsonType::from_u8(0x14), None);
        assert_eq!(BsonType::from_u8(0xf0), None);
        assert_eq!(BsonType::from_u8(0x80), None);
    }
}

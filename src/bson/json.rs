//! Relaxed extended JSON
//!
//! Numbers that JSON can carry losslessly are emitted as plain numbers;
//! everything else uses the `$`-prefixed wrapper forms. Dates are always
//! written as `{"$date": {"$numberLong": ...}}`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Number, Value};

use super::errors::{CodecError, CodecResult};
use super::value::{
    Binary, Bson, DbPointer, Decimal128, Document, JavaScriptWithScope, ObjectId, Regex, Timestamp,
};

/// Converts a document to relaxed extended JSON
pub fn document_to_json(document: &Document) -> Value {
    let map: Map<String, Value> = document
        .iter()
        .map(|(key, value)| (key.to_string(), to_relaxed_json(value)))
        .collect();
    Value::Object(map)
}

/// Converts a single value to relaxed extended JSON
pub fn to_relaxed_json(value: &Bson) -> Value {
    match value {
        Bson::Double(v) => double_to_json(*v),
        Bson::String(v) => Value::String(v.clone()),
        Bson::Document(v) => document_to_json(v),
        Bson::Array(items) => Value::Array(items.iter().map(to_relaxed_json).collect()),
        Bson::Binary(v) => json!({
            "$binary": {
                "base64": STANDARD.encode(&v.bytes),
                "subType": format!("{:02x}", v.subtype),
            }
        }),
        Bson::Undefined => json!({ "$undefined": true }),
        Bson::ObjectId(v) => json!({ "$oid": v.to_hex() }),
        Bson::Boolean(v) => Value::Bool(*v),
        Bson::DateTime(v) => json!({ "$date": { "$numberLong": v.to_string() } }),
        Bson::Null => Value::Null,
        Bson::RegularExpression(v) => json!({
            "$regularExpression": { "pattern": v.pattern, "options": v.options }
        }),
        Bson::DbPointer(v) => json!({
            "$dbPointer": { "$ref": v.namespace, "$id": { "$oid": v.id.to_hex() } }
        }),
        Bson::JavaScript(v) => json!({ "$code": v }),
        Bson::Symbol(v) => json!({ "$symbol": v }),
        Bson::JavaScriptWithScope(v) => json!({
            "$code": v.code,
            "$scope": document_to_json(&v.scope),
        }),
        Bson::Int32(v) => Value::from(*v),
        Bson::Timestamp(v) => json!({ "$timestamp": { "t": v.time, "i": v.increment } }),
        Bson::Int64(v) => Value::from(*v),
        Bson::Decimal128(v) => json!({ "$numberDecimal": decimal128_to_string(v) }),
        Bson::MinKey => json!({ "$minKey": 1 }),
        Bson::MaxKey => json!({ "$maxKey": 1 }),
    }
}

fn double_to_json(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None if v.is_nan() => json!({ "$numberDouble": "NaN" }),
        None if v > 0.0 => json!({ "$numberDouble": "Infinity" }),
        None => json!({ "$numberDouble": "-Infinity" }),
    }
}

/// Renders a decimal128 in the canonical string form
pub fn decimal128_to_string(value: &Decimal128) -> String {
    const EXPONENT_BIAS: i32 = 6176;
    let bits = u128::from_le_bytes(value.0);
    let negative = bits >> 127 == 1;
    let sign = if negative { "-" } else { "" };

    let combination = (bits >> 122) & 0x1f;
    if combination == 0x1f {
        return "NaN".to_string();
    }
    if combination == 0x1e {
        return format!("{}Infinity", sign);
    }

    let (biased_exponent, coefficient) = if (bits >> 125) & 0x3 == 0x3 {
        // Coefficients in this form exceed 34 digits and are treated as zero
        (((bits >> 111) & 0x3fff) as i32, 0u128)
    } else {
        (
            ((bits >> 113) & 0x3fff) as i32,
            bits & ((1u128 << 113) - 1),
        )
    };
    let exponent = biased_exponent - EXPONENT_BIAS;
    let digits = coefficient.to_string();
    let adjusted = exponent + digits.len() as i32 - 1;

    if exponent > 0 || adjusted < -6 {
        let mut out = String::from(sign);
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('E');
        if adjusted >= 0 {
            out.push('+');
        }
        out.push_str(&adjusted.to_string());
        return out;
    }

    if exponent == 0 {
        return format!("{}{}", sign, digits);
    }

    let scale = (-exponent) as usize;
    if digits.len() > scale {
        let split = digits.len() - scale;
        format!("{}{}.{}", sign, &digits[..split], &digits[split..])
    } else {
        format!("{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
    }
}

/// Parses relaxed or canonical extended JSON into a value.
///
/// Plain integers become `Int32` when they fit, otherwise `Int64`; other
/// numbers become `Double`.
pub fn from_json(value: &Value) -> CodecResult<Bson> {
    match value {
        Value::Null => Ok(Bson::Null),
        Value::Bool(v) => Ok(Bson::Boolean(*v)),
        Value::Number(n) => Ok(number_to_bson(n)),
        Value::String(s) => Ok(Bson::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(from_json)
            .collect::<CodecResult<Vec<_>>>()
            .map(Bson::Array),
        Value::Object(map) => match wrapper_to_bson(map)? {
            Some(value) => Ok(value),
            None => object_to_document(map).map(Bson::Document),
        },
    }
}

/// Parses a JSON object into a document
pub fn document_from_json(value: &Value) -> CodecResult<Document> {
    match value {
        Value::Object(map) => object_to_document(map),
        other => Err(invalid(format!("expected an object, found {}", other))),
    }
}

fn object_to_document(map: &Map<String, Value>) -> CodecResult<Document> {
    let mut document = Document::new();
    for (key, value) in map {
        document.insert(key.clone(), from_json(value)?);
    }
    Ok(document)
}

fn number_to_bson(n: &Number) -> Bson {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        }
    } else {
        Bson::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn invalid(reason: impl Into<String>) -> CodecError {
    CodecError::InvalidExtendedJson(reason.into())
}

fn expect_str<'a>(value: &'a Value, what: &str) -> CodecResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| invalid(format!("{} must be a string", what)))
}

fn parse_object_id(hex: &str) -> CodecResult<ObjectId> {
    if hex.len() != 24 || !hex.is_ascii() {
        return Err(invalid(format!("'{}' is not a 24-digit hex object id", hex)));
    }
    let mut bytes = [0u8; 12];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| invalid(format!("'{}' is not a 24-digit hex object id", hex)))?;
    }
    Ok(ObjectId(bytes))
}

/// Recognises single-purpose `$` wrappers. Returns `None` for an ordinary
/// object.
fn wrapper_to_bson(map: &Map<String, Value>) -> CodecResult<Option<Bson>> {
    let first = match map.keys().next() {
        Some(key) if key.starts_with('$') => key.as_str(),
        _ => return Ok(None),
    };

    let value = match (first, map.len()) {
        ("$oid", 1) => Bson::ObjectId(parse_object_id(expect_str(&map["$oid"], "$oid")?)?),
        ("$numberInt", 1) => {
            let text = expect_str(&map["$numberInt"], "$numberInt")?;
            Bson::Int32(text.parse().map_err(|_| invalid(format!("bad $numberInt '{}'", text)))?)
        }
        ("$numberLong", 1) => {
            let text = expect_str(&map["$numberLong"], "$numberLong")?;
            Bson::Int64(text.parse().map_err(|_| invalid(format!("bad $numberLong '{}'", text)))?)
        }
        ("$numberDouble", 1) => {
            let text = expect_str(&map["$numberDouble"], "$numberDouble")?;
            let v = match text {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other
                    .parse()
                    .map_err(|_| invalid(format!("bad $numberDouble '{}'", other)))?,
            };
            Bson::Double(v)
        }
        ("$binary", 1) => {
            let inner = &map["$binary"];
            let encoded = expect_str(&inner["base64"], "$binary.base64")?;
            let subtype = expect_str(&inner["subType"], "$binary.subType")?;
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| invalid(format!("bad base64 in $binary: {}", e)))?;
            let subtype = u8::from_str_radix(subtype, 16)
                .map_err(|_| invalid(format!("bad $binary subType '{}'", subtype)))?;
            Bson::Binary(Binary::new(subtype, bytes))
        }
        ("$date", 1) => match &map["$date"] {
            Value::Number(n) => match n.as_i64() {
                Some(millis) => Bson::DateTime(millis),
                None => return Err(invalid("$date must be an integer")),
            },
            Value::Object(inner) => match inner.get("$numberLong").and_then(Value::as_str) {
                Some(text) => Bson::DateTime(
                    text.parse()
                        .map_err(|_| invalid(format!("bad $date '{}'", text)))?,
                ),
                None => return Err(invalid("$date object must hold $numberLong")),
            },
            _ => return Err(invalid("unsupported $date form")),
        },
        ("$timestamp", 1) => {
            let inner = &map["$timestamp"];
            let t = inner["t"].as_u64().and_then(|t| u32::try_from(t).ok());
            let i = inner["i"].as_u64().and_then(|i| u32::try_from(i).ok());
            match (t, i) {
                (Some(time), Some(increment)) => Bson::Timestamp(Timestamp { time, increment }),
                _ => return Err(invalid("$timestamp needs unsigned 32-bit t and i")),
            }
        }
        ("$regularExpression", 1) => {
            let inner = &map["$regularExpression"];
            Bson::RegularExpression(Regex {
                pattern: expect_str(&inner["pattern"], "pattern")?.to_string(),
                options: expect_str(&inner["options"], "options")?.to_string(),
            })
        }
        ("$dbPointer", 1) => {
            let inner = &map["$dbPointer"];
            let namespace = expect_str(&inner["$ref"], "$ref")?.to_string();
            let id = parse_object_id(expect_str(&inner["$id"]["$oid"], "$id")?)?;
            Bson::DbPointer(DbPointer { namespace, id })
        }
        ("$code", 1) => Bson::JavaScript(expect_str(&map["$code"], "$code")?.to_string()),
        ("$code", 2) if map.contains_key("$scope") => {
            Bson::JavaScriptWithScope(JavaScriptWithScope {
                code: expect_str(&map["$code"], "$code")?.to_string(),
                scope: document_from_json(&map["$scope"])?,
            })
        }
        ("$symbol", 1) => Bson::Symbol(expect_str(&map["$symbol"], "$symbol")?.to_string()),
        ("$undefined", 1) => Bson::Undefined,
        ("$minKey", 1) => Bson::MinKey,
        ("$maxKey", 1) => Bson::MaxKey,
        _ => return Ok(None),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_relaxed_numbers_are_plain() {
        let document = doc! { "i" => 1, "l" => 1i64 << 40, "d" => 1.5 };
        assert_eq!(
            document_to_json(&document),
            json!({ "i": 1, "l": 1i64 << 40, "d": 1.5 })
        );
    }

    #[test]
    fn test_binary_uses_base64() {
        let value = Bson::Binary(Binary::new(0, b"hi".to_vec()));
        assert_eq!(
            to_relaxed_json(&value),
            json!({ "$binary": { "base64": "aGk=", "subType": "00" } })
        );
        assert_eq!(from_json(&to_relaxed_json(&value)).unwrap(), value);
    }

    #[test]
    fn test_key_order_preserved() {
        let document = doc! { "z" => 1, "a" => 2 };
        let text = serde_json::to_string(&document_to_json(&document)).unwrap();
        assert_eq!(text, r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn test_integer_width_selection() {
        assert_eq!(from_json(&json!(7)).unwrap(), Bson::Int32(7));
        assert_eq!(
            from_json(&json!(5_000_000_000i64)).unwrap(),
            Bson::Int64(5_000_000_000)
        );
        assert_eq!(from_json(&json!(0.25)).unwrap(), Bson::Double(0.25));
    }

    #[test]
    fn test_wrappers_parse() {
        assert_eq!(
            from_json(&json!({ "$oid": "0102030405060708090a0b0c" })).unwrap(),
            Bson::ObjectId(ObjectId([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]))
        );
        assert_eq!(
            from_json(&json!({ "$date": { "$numberLong": "86400000" } })).unwrap(),
            Bson::DateTime(86_400_000)
        );
        assert_eq!(
            from_json(&json!({ "$numberLong": "3" })).unwrap(),
            Bson::Int64(3)
        );
        assert!(matches!(
            from_json(&json!({ "$oid": "xyz" })),
            Err(CodecError::InvalidExtendedJson(_))
        ));
    }

    #[test]
    fn test_non_wrapper_dollar_object_is_document() {
        let parsed = from_json(&json!({ "$gt": 1 })).unwrap();
        assert_eq!(parsed, Bson::Document(doc! { "$gt" => 1 }));
    }

    #[test]
    fn test_decimal128_strings() {
        // 1 with exponent 0
        let mut bits: u128 = 6176u128 << 113;
        bits |= 1;
        assert_eq!(decimal128_to_string(&Decimal128(bits.to_le_bytes())), "1");

        // 125 with exponent -2
        let bits: u128 = (6174u128 << 113) | 125;
        assert_eq!(decimal128_to_string(&Decimal128(bits.to_le_bytes())), "1.25");

        // -5 with exponent -3
        let bits: u128 = (1u128 << 127) | (6173u128 << 113) | 5;
        assert_eq!(decimal128_to_string(&Decimal128(bits.to_le_bytes())), "-0.005");

        let nan: u128 = 0x1f << 122;
        assert_eq!(decimal128_to_string(&Decimal128(nan.to_le_bytes())), "NaN");
    }
}

//! Typed SQLite scalar value codec.
//!
//! One byte of type tag, then a type-specific payload. Tags `0..=19` are
//! reserved for small non-negative integers encoded inline as the tag byte
//! itself — this is the common case for row ids and small counters, and
//! saves a byte over the general `NonNegativeInt` case.

use crate::buffer::{ReadCursor, WriteBuffer};
use crate::codec::bytes::{decode_bytes_owned, decode_fixed, encode_bytes, encode_fixed};
use crate::codec::number::{decode_json, decode_number, encode_json, encode_number};
use crate::codec::varint::{decode_varuint, encode_varuint};
use crate::error::DecodeError;
use rmpv::Value as JsonValue;

const SMALL_INT_MAX: u8 = 19;
const TAG_STRING: u8 = 20;
const TAG_NUMBER: u8 = 21;
const TAG_NULL: u8 = 22;
const TAG_BYTES: u8 = 23;
const TAG_NON_NEGATIVE_INT: u8 = 24;
const TAG_ID: u8 = 25;
const TAG_BASE64_URL: u8 = 26;
const TAG_JSON: u8 = 27;
const TAG_EMPTY_STRING: u8 = 28;
const TAG_DATE_ISO_NON_NEGATIVE: u8 = 29;
const TAG_DATE_ISO_NEGATIVE: u8 = 30;

const MAX_STRING_LEN: usize = 655_360;
const MAX_BYTES_LEN: usize = 655_360;
const ID_LEN: usize = 16;

/// A typed SQLite column value, as stored (and as it travels the wire
/// embedded inside an `EncryptedDbChange` plaintext).
#[derive(Debug, Clone, PartialEq)]
pub enum SqliteValue {
    SmallInt(u8),
    String(String),
    Number(f64),
    Null,
    Bytes(Vec<u8>),
    NonNegativeInt(u64),
    Id([u8; ID_LEN]),
    Base64Url(String),
    Json(JsonValue),
    EmptyString,
    DateIsoWithNonNegativeTime(u64),
    DateIsoWithNegativeTime(f64),
}

pub fn encode_value(buf: &mut WriteBuffer, value: &SqliteValue) {
    match value {
        SqliteValue::SmallInt(n) => {
            debug_assert!(*n <= SMALL_INT_MAX);
            buf.push_byte(*n);
        }
        SqliteValue::String(s) => {
            buf.push_byte(TAG_STRING);
            encode_bytes(buf, s.as_bytes());
        }
        SqliteValue::Number(n) => {
            buf.push_byte(TAG_NUMBER);
            encode_number(buf, *n);
        }
        SqliteValue::Null => buf.push_byte(TAG_NULL),
        SqliteValue::Bytes(b) => {
            buf.push_byte(TAG_BYTES);
            encode_bytes(buf, b);
        }
        SqliteValue::NonNegativeInt(n) => {
            buf.push_byte(TAG_NON_NEGATIVE_INT);
            encode_varuint(buf, *n);
        }
        SqliteValue::Id(id) => {
            buf.push_byte(TAG_ID);
            encode_fixed(buf, id);
        }
        SqliteValue::Base64Url(s) => {
            buf.push_byte(TAG_BASE64_URL);
            encode_bytes(buf, s.as_bytes());
        }
        SqliteValue::Json(v) => {
            buf.push_byte(TAG_JSON);
            encode_json(buf, v);
        }
        SqliteValue::EmptyString => buf.push_byte(TAG_EMPTY_STRING),
        SqliteValue::DateIsoWithNonNegativeTime(ms) => {
            buf.push_byte(TAG_DATE_ISO_NON_NEGATIVE);
            encode_varuint(buf, *ms);
        }
        SqliteValue::DateIsoWithNegativeTime(ms) => {
            buf.push_byte(TAG_DATE_ISO_NEGATIVE);
            encode_number(buf, *ms);
        }
    }
}

pub fn decode_value(cur: &mut ReadCursor) -> Result<SqliteValue, DecodeError> {
    let tag = cur.read_byte().ok_or(DecodeError::UnexpectedEof {
        needed: 1,
        available: 0,
    })?;

    if tag <= SMALL_INT_MAX {
        return Ok(SqliteValue::SmallInt(tag));
    }

    match tag {
        TAG_STRING => {
            let bytes = decode_bytes_owned(cur, MAX_STRING_LEN)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| DecodeError::MessagePack(format!("invalid utf-8: {e}")))?;
            Ok(SqliteValue::String(s))
        }
        TAG_NUMBER => Ok(SqliteValue::Number(decode_number(cur)?)),
        TAG_NULL => Ok(SqliteValue::Null),
        TAG_BYTES => Ok(SqliteValue::Bytes(decode_bytes_owned(cur, MAX_BYTES_LEN)?)),
        TAG_NON_NEGATIVE_INT => Ok(SqliteValue::NonNegativeInt(decode_varuint(cur)?)),
        TAG_ID => {
            let slice = decode_fixed(cur, ID_LEN)?;
            let mut id = [0u8; ID_LEN];
            id.copy_from_slice(slice);
            Ok(SqliteValue::Id(id))
        }
        TAG_BASE64_URL => {
            let bytes = decode_bytes_owned(cur, MAX_STRING_LEN)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| DecodeError::MessagePack(format!("invalid utf-8: {e}")))?;
            Ok(SqliteValue::Base64Url(s))
        }
        TAG_JSON => {
            let value = decode_json(cur)?;
            // Guard against numeric-literal drift (e.g. "-0E0" normalizing
            // to "0"): a Json value must survive one more encode/decode
            // round trip unchanged, or we reject it rather than silently
            // accept a value a peer could not reproduce.
            let mut probe = WriteBuffer::new();
            encode_json(&mut probe, &value);
            let mut probe_cur = ReadCursor::new(probe.as_slice());
            let roundtripped = decode_json(&mut probe_cur)?;
            if roundtripped != value {
                return Err(DecodeError::JsonRoundTrip);
            }
            Ok(SqliteValue::Json(value))
        }
        TAG_EMPTY_STRING => Ok(SqliteValue::EmptyString),
        TAG_DATE_ISO_NON_NEGATIVE => Ok(SqliteValue::DateIsoWithNonNegativeTime(decode_varuint(
            cur,
        )?)),
        TAG_DATE_ISO_NEGATIVE => Ok(SqliteValue::DateIsoWithNegativeTime(decode_number(cur)?)),
        other => Err(DecodeError::UnknownValueType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: SqliteValue) {
        let mut buf = WriteBuffer::new();
        encode_value(&mut buf, &value);
        let mut cur = ReadCursor::new(buf.as_slice());
        assert_eq!(decode_value(&mut cur).unwrap(), value);
        assert!(cur.is_empty());
    }

    #[test]
    fn roundtrips_every_variant() {
        roundtrip(SqliteValue::SmallInt(5));
        roundtrip(SqliteValue::SmallInt(0));
        roundtrip(SqliteValue::SmallInt(19));
        roundtrip(SqliteValue::String("hello".into()));
        roundtrip(SqliteValue::Number(-3.5));
        roundtrip(SqliteValue::Null);
        roundtrip(SqliteValue::Bytes(vec![1, 2, 3]));
        roundtrip(SqliteValue::NonNegativeInt(123_456));
        roundtrip(SqliteValue::Id([7u8; 16]));
        roundtrip(SqliteValue::Base64Url("abc-_123".into()));
        roundtrip(SqliteValue::EmptyString);
        roundtrip(SqliteValue::DateIsoWithNonNegativeTime(1_700_000_000_000));
        roundtrip(SqliteValue::DateIsoWithNegativeTime(-86_400_000.0));
    }

    #[test]
    fn small_int_byte_is_tag_itself() {
        let mut buf = WriteBuffer::new();
        encode_value(&mut buf, &SqliteValue::SmallInt(7));
        assert_eq!(buf.as_slice(), &[7]);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut cur = ReadCursor::new(&[200]);
        assert_eq!(decode_value(&mut cur), Err(DecodeError::UnknownValueType(200)));
    }

    #[test]
    fn json_survives_round_trip_check() {
        let value = JsonValue::Map(vec![(JsonValue::from("x"), JsonValue::from(1))]);
        roundtrip(SqliteValue::Json(value));
    }
}

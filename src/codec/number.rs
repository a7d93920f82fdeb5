//! General `Number` and `Json` wire primitives, delegated to MessagePack so
//! this crate never reimplements float/negative-integer encoding itself.
//!
//! `rmpv::Value` gives us a self-describing single value plus a way to know
//! exactly how many bytes it consumed, which is what a length-implicit wire
//! primitive embedded in a larger framed message needs.

use crate::buffer::{ReadCursor, WriteBuffer};
use crate::error::DecodeError;
use rmpv::Value;

pub fn encode_number(buf: &mut WriteBuffer, value: f64) {
    let v = if value.fract() == 0.0 && value.abs() < (1u64 << 53) as f64 {
        if value >= 0.0 {
            Value::from(value as u64)
        } else {
            Value::from(value as i64)
        }
    } else {
        Value::from(value)
    };
    let mut out = Vec::new();
    // `rmpv::encode::write_value` only fails on an underlying io::Write
    // error; a `Vec<u8>` never fails to write.
    rmpv::encode::write_value(&mut out, &v).expect("encoding into a Vec cannot fail");
    buf.push_bytes(&out);
}

/// Decodes one MessagePack value as an f64 and returns how many bytes of
/// `cur` it consumed, advancing the cursor by that amount.
pub fn decode_number(cur: &mut ReadCursor) -> Result<f64, DecodeError> {
    let rest = cur.rest();
    let mut slice = rest;
    let value = rmpv::decode::read_value(&mut slice)
        .map_err(|e| DecodeError::MessagePack(e.to_string()))?;
    let consumed = rest.len() - slice.len();
    cur.advance(consumed);
    value_to_f64(&value)
}

fn value_to_f64(value: &Value) -> Result<f64, DecodeError> {
    match value {
        Value::Integer(i) => i
            .as_f64()
            .ok_or_else(|| DecodeError::MessagePack("integer out of f64 range".into())),
        Value::F32(f) => Ok(*f as f64),
        Value::F64(f) => Ok(*f),
        other => Err(DecodeError::MessagePack(format!(
            "expected a number, got {other:?}"
        ))),
    }
}

/// Encodes a JSON-like value (already parsed into an `rmpv::Value`) as
/// MessagePack.
pub fn encode_json(buf: &mut WriteBuffer, value: &Value) {
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, value).expect("encoding into a Vec cannot fail");
    buf.push_bytes(&out);
}

pub fn decode_json(cur: &mut ReadCursor) -> Result<Value, DecodeError> {
    let rest = cur.rest();
    let mut slice = rest;
    let value = rmpv::decode::read_value(&mut slice)
        .map_err(|e| DecodeError::MessagePack(e.to_string()))?;
    let consumed = rest.len() - slice.len();
    cur.advance(consumed);
    Ok(value)
}

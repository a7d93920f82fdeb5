//! Length-prefixed byte strings and the fixed-width `NodeId`.

use crate::buffer::{ReadCursor, WriteBuffer};
use crate::codec::varint::{decode_varuint, encode_varuint, varuint_encoded_len};
use crate::config::NODE_ID_LENGTH;
use crate::error::DecodeError;

pub fn encode_bytes(buf: &mut WriteBuffer, data: &[u8]) {
    encode_varuint(buf, data.len() as u64);
    buf.push_bytes(data);
}

pub fn bytes_encoded_len(data: &[u8]) -> usize {
    varuint_encoded_len(data.len() as u64) + data.len()
}

/// Decodes a length-prefixed byte string, rejecting a claimed length beyond
/// `max_len` without attempting to read that many bytes first — this is the
/// same decode-with-constraint shape as a bounded-collection deserializer.
pub fn decode_bytes<'a>(cur: &mut ReadCursor<'a>, max_len: usize) -> Result<&'a [u8], DecodeError> {
    let len = decode_varuint(cur)? as usize;
    if len > max_len {
        return Err(DecodeError::LengthExceeded {
            max: max_len,
            actual: len,
        });
    }
    cur.read_n(len).ok_or(DecodeError::UnexpectedEof {
        needed: len,
        available: cur.remaining(),
    })
}

pub fn decode_bytes_owned(cur: &mut ReadCursor, max_len: usize) -> Result<Vec<u8>, DecodeError> {
    decode_bytes(cur, max_len).map(|s| s.to_vec())
}

pub type NodeId = [u8; NODE_ID_LENGTH];

pub fn encode_node_id(buf: &mut WriteBuffer, id: &NodeId) {
    buf.push_bytes(id);
}

pub fn decode_node_id(cur: &mut ReadCursor) -> Result<NodeId, DecodeError> {
    let slice = cur.read_n(NODE_ID_LENGTH).ok_or(DecodeError::UnexpectedEof {
        needed: NODE_ID_LENGTH,
        available: cur.remaining(),
    })?;
    let mut id = [0u8; NODE_ID_LENGTH];
    id.copy_from_slice(slice);
    Ok(id)
}

pub fn encode_fixed(buf: &mut WriteBuffer, data: &[u8]) {
    buf.push_bytes(data);
}

pub fn decode_fixed<'a>(cur: &mut ReadCursor<'a>, len: usize) -> Result<&'a [u8], DecodeError> {
    cur.read_n(len).ok_or(DecodeError::UnexpectedEof {
        needed: len,
        available: cur.remaining(),
    })
}

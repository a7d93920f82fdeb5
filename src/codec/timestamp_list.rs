//! Delta + run-length-encoded timestamp list.
//!
//! Layout: `count` (VarUInt) ∥ delta-encoded millis (VarUInt deltas from the
//! previous millis, starting at 0) ∥ RLE pairs of `(counter, run_length)`
//! covering `count` items ∥ RLE pairs of `(node_id, run_length)` covering
//! `count` items.
//!
//! This layering — delta-encode the field that drifts upward in small steps,
//! run-length-encode the two fields that usually repeat in long runs (one
//! writer produces many timestamps in the same millisecond, and one node
//! produces long runs of writes) — mirrors how a columnar change-log encodes
//! per-field deltas and repeats separately rather than serializing each
//! timestamp as an independent tuple.

use crate::buffer::{ReadCursor, WriteBuffer};
use crate::codec::bytes::{decode_node_id, encode_node_id, NodeId};
use crate::codec::varint::{decode_varuint, encode_varuint};
use crate::error::DecodeError;
use crate::timestamp::Timestamp;

pub fn encode_timestamp_list(buf: &mut WriteBuffer, timestamps: &[Timestamp]) {
    encode_varuint(buf, timestamps.len() as u64);
    if timestamps.is_empty() {
        return;
    }

    // Delta-encoded millis.
    let mut prev_millis: u64 = 0;
    for ts in timestamps {
        let delta = ts.millis - prev_millis;
        encode_varuint(buf, delta);
        prev_millis = ts.millis;
    }

    // RLE counters.
    encode_rle(buf, timestamps.len(), |i| timestamps[i].counter as u64, |buf, v| {
        encode_varuint(buf, v)
    });

    // RLE node ids.
    encode_rle_node_ids(buf, timestamps);
}

fn encode_rle<F, W>(buf: &mut WriteBuffer, count: usize, value_at: F, write_value: W)
where
    F: Fn(usize) -> u64,
    W: Fn(&mut WriteBuffer, u64),
{
    let mut i = 0;
    while i < count {
        let v = value_at(i);
        let mut run = 1u64;
        while i + (run as usize) < count && value_at(i + run as usize) == v {
            run += 1;
        }
        write_value(buf, v);
        encode_varuint(buf, run);
        i += run as usize;
    }
}

fn encode_rle_node_ids(buf: &mut WriteBuffer, timestamps: &[Timestamp]) {
    let mut i = 0;
    while i < timestamps.len() {
        let v = timestamps[i].node_id;
        let mut run = 1usize;
        while i + run < timestamps.len() && timestamps[i + run].node_id == v {
            run += 1;
        }
        encode_node_id(buf, &v);
        encode_varuint(buf, run as u64);
        i += run;
    }
}

pub fn decode_timestamp_list(cur: &mut ReadCursor) -> Result<Vec<Timestamp>, DecodeError> {
    let count = decode_varuint(cur)? as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut millis = Vec::with_capacity(count);
    let mut prev = 0u64;
    for _ in 0..count {
        let delta = decode_varuint(cur)?;
        prev += delta;
        millis.push(prev);
    }

    let counters = decode_rle_u64(cur, count)?;
    let node_ids = decode_rle_node_ids(cur, count)?;

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        out.push(Timestamp {
            millis: millis[i],
            counter: counters[i] as u32,
            node_id: node_ids[i],
        });
    }
    Ok(out)
}

fn decode_rle_u64(cur: &mut ReadCursor, count: usize) -> Result<Vec<u64>, DecodeError> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let value = decode_varuint(cur)?;
        let run = decode_varuint(cur)? as usize;
        if run == 0 || out.len() + run > count {
            return Err(DecodeError::LengthExceeded {
                max: count,
                actual: out.len() + run,
            });
        }
        out.extend(std::iter::repeat(value).take(run));
    }
    Ok(out)
}

fn decode_rle_node_ids(cur: &mut ReadCursor, count: usize) -> Result<Vec<NodeId>, DecodeError> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let node_id = decode_node_id(cur)?;
        let run = decode_varuint(cur)? as usize;
        if run == 0 || out.len() + run > count {
            return Err(DecodeError::LengthExceeded {
                max: count,
                actual: out.len() + run,
            });
        }
        out.extend(std::iter::repeat(node_id).take(run));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: u64, counter: u32, node: u8) -> Timestamp {
        Timestamp {
            millis,
            counter,
            node_id: [node; 8],
        }
    }

    #[test]
    fn roundtrips_empty_list() {
        let mut buf = WriteBuffer::new();
        encode_timestamp_list(&mut buf, &[]);
        let mut cur = ReadCursor::new(buf.as_slice());
        assert_eq!(decode_timestamp_list(&mut cur).unwrap(), vec![]);
    }

    #[test]
    fn roundtrips_single_timestamp() {
        let list = vec![ts(1000, 0, 1)];
        let mut buf = WriteBuffer::new();
        encode_timestamp_list(&mut buf, &list);
        let mut cur = ReadCursor::new(buf.as_slice());
        assert_eq!(decode_timestamp_list(&mut cur).unwrap(), list);
    }

    #[test]
    fn roundtrips_bursty_same_millis_same_node() {
        let list = vec![
            ts(1000, 0, 1),
            ts(1000, 1, 1),
            ts(1000, 2, 1),
            ts(1005, 0, 1),
        ];
        let mut buf = WriteBuffer::new();
        encode_timestamp_list(&mut buf, &list);
        let mut cur = ReadCursor::new(buf.as_slice());
        assert_eq!(decode_timestamp_list(&mut cur).unwrap(), list);
    }

    #[test]
    fn roundtrips_mixed_nodes() {
        let list = vec![
            ts(1000, 0, 1),
            ts(1000, 1, 2),
            ts(1001, 0, 2),
            ts(1002, 0, 3),
        ];
        let mut buf = WriteBuffer::new();
        encode_timestamp_list(&mut buf, &list);
        let mut cur = ReadCursor::new(buf.as_slice());
        assert_eq!(decode_timestamp_list(&mut cur).unwrap(), list);
    }

    #[test]
    fn rejects_rle_run_overflowing_count() {
        let mut buf = WriteBuffer::new();
        encode_varuint(&mut buf, 2);
        encode_varuint(&mut buf, 0);
        encode_varuint(&mut buf, 0);
        encode_varuint(&mut buf, 5);
        encode_varuint(&mut buf, 10);
        let mut cur = ReadCursor::new(buf.as_slice());
        assert!(decode_timestamp_list(&mut cur).is_err());
    }
}

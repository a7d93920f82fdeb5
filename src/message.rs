//! Wire-level `ProtocolMessage`: header framing plus the messages and
//! ranges blocks. This module only knows about bytes — no storage, no
//! sync logic.

use crate::buffer::{ReadCursor, WriteBuffer};
use crate::codec::{
    decode_bytes_owned, decode_timestamp_list, decode_varuint, encode_bytes, encode_timestamp_list,
    encode_varuint,
};
use crate::config::{MAX_PROTOCOL_MESSAGE_SIZE, OWNER_ID_LENGTH, WRITE_KEY_LENGTH};
use crate::error::{DecodeError, ErrorCode};
use crate::range::{validate_ranges_shape, Range, RangePayload, RangeUpperBound};
use crate::timestamp::{Fingerprint, Timestamp};

pub type OwnerId = [u8; OWNER_ID_LENGTH];
pub type WriteKey = [u8; WRITE_KEY_LENGTH];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Broadcast,
}

impl MessageType {
    fn to_wire(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
            MessageType::Broadcast => 2,
        }
    }

    fn from_wire(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::Broadcast),
            other => Err(DecodeError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFlag {
    None,
    Subscribe,
    Unsubscribe,
}

impl SubscriptionFlag {
    fn to_wire(self) -> u8 {
        match self {
            SubscriptionFlag::None => 0,
            SubscriptionFlag::Subscribe => 1,
            SubscriptionFlag::Unsubscribe => 2,
        }
    }

    fn from_wire(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(SubscriptionFlag::None),
            1 => Ok(SubscriptionFlag::Subscribe),
            2 => Ok(SubscriptionFlag::Unsubscribe),
            other => Err(DecodeError::UnknownValueType(other)),
        }
    }
}

/// Request-only header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub write_key: Option<WriteKey>,
    pub subscription: SubscriptionFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderKind {
    Request(RequestHeader),
    Response(ResponseHeader),
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u64,
    pub owner_id: OwnerId,
    pub kind: HeaderKind,
}

impl Header {
    pub fn message_type(&self) -> MessageType {
        match self.kind {
            HeaderKind::Request(_) => MessageType::Request,
            HeaderKind::Response(_) => MessageType::Response,
            HeaderKind::Broadcast => MessageType::Broadcast,
        }
    }
}

/// One entry of the messages block: a timestamp and its opaque encrypted
/// change payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WireChange {
    pub timestamp: Timestamp,
    pub change: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    pub header: Header,
    pub messages: Vec<WireChange>,
    pub ranges: Vec<Range>,
}

pub fn encode_header(buf: &mut WriteBuffer, header: &Header) {
    encode_varuint(buf, header.version);
    buf.push_bytes(&header.owner_id);
    buf.push_byte(header.message_type().to_wire());
    match &header.kind {
        HeaderKind::Request(req) => {
            buf.push_byte(if req.write_key.is_some() { 1 } else { 0 });
            if let Some(key) = &req.write_key {
                buf.push_bytes(key);
            }
            buf.push_byte(req.subscription.to_wire());
        }
        HeaderKind::Response(resp) => {
            buf.push_byte(resp.error_code.to_wire());
        }
        HeaderKind::Broadcast => {}
    }
}

pub fn decode_header(cur: &mut ReadCursor) -> Result<Header, DecodeError> {
    let version = decode_varuint(cur)?;
    let owner_slice = cur.read_n(OWNER_ID_LENGTH).ok_or(DecodeError::UnexpectedEof {
        needed: OWNER_ID_LENGTH,
        available: cur.remaining(),
    })?;
    let mut owner_id = [0u8; OWNER_ID_LENGTH];
    owner_id.copy_from_slice(owner_slice);

    let message_type_tag = cur.read_byte().ok_or(DecodeError::UnexpectedEof {
        needed: 1,
        available: cur.remaining(),
    })?;
    let message_type = MessageType::from_wire(message_type_tag)?;

    let kind = match message_type {
        MessageType::Request => {
            let has_write_key = cur.read_byte().ok_or(DecodeError::UnexpectedEof {
                needed: 1,
                available: cur.remaining(),
            })?;
            let write_key = if has_write_key != 0 {
                let slice = cur.read_n(WRITE_KEY_LENGTH).ok_or(DecodeError::UnexpectedEof {
                    needed: WRITE_KEY_LENGTH,
                    available: cur.remaining(),
                })?;
                let mut key = [0u8; WRITE_KEY_LENGTH];
                key.copy_from_slice(slice);
                Some(key)
            } else {
                None
            };
            let subscription_tag = cur.read_byte().ok_or(DecodeError::UnexpectedEof {
                needed: 1,
                available: cur.remaining(),
            })?;
            HeaderKind::Request(RequestHeader {
                write_key,
                subscription: SubscriptionFlag::from_wire(subscription_tag)?,
            })
        }
        MessageType::Response => {
            let code_tag = cur.read_byte().ok_or(DecodeError::UnexpectedEof {
                needed: 1,
                available: cur.remaining(),
            })?;
            HeaderKind::Response(ResponseHeader {
                error_code: ErrorCode::from_wire(code_tag)?,
            })
        }
        MessageType::Broadcast => HeaderKind::Broadcast,
    };

    Ok(Header {
        version,
        owner_id,
        kind,
    })
}

fn encode_messages_block(buf: &mut WriteBuffer, messages: &[WireChange]) {
    let timestamps: Vec<Timestamp> = messages.iter().map(|m| m.timestamp).collect();
    encode_timestamp_list(buf, &timestamps);
    for m in messages {
        encode_bytes(buf, &m.change);
    }
}

fn decode_messages_block(cur: &mut ReadCursor) -> Result<Vec<WireChange>, DecodeError> {
    let timestamps = decode_timestamp_list(cur)?;
    let mut out = Vec::with_capacity(timestamps.len());
    for timestamp in timestamps {
        let change = decode_bytes_owned(cur, MAX_PROTOCOL_MESSAGE_SIZE)?;
        out.push(WireChange { timestamp, change });
    }
    Ok(out)
}

const RANGE_TYPE_SKIP: u64 = 0;
const RANGE_TYPE_FINGERPRINT: u64 = 1;
const RANGE_TYPE_TIMESTAMPS: u64 = 2;

fn encode_ranges_block(buf: &mut WriteBuffer, ranges: &[Range]) {
    encode_varuint(buf, ranges.len() as u64);
    if ranges.is_empty() {
        return;
    }

    let finite_bounds: Vec<Timestamp> = ranges[..ranges.len() - 1]
        .iter()
        .map(|r| match r.upper_bound {
            RangeUpperBound::Finite(ts) => ts,
            RangeUpperBound::Infinite => {
                unreachable!("only the last range may have an infinite upper bound")
            }
        })
        .collect();
    encode_timestamp_list(buf, &finite_bounds);

    for r in ranges {
        let tag = match r.payload {
            RangePayload::Skip => RANGE_TYPE_SKIP,
            RangePayload::Fingerprint(_) => RANGE_TYPE_FINGERPRINT,
            RangePayload::Timestamps(_) => RANGE_TYPE_TIMESTAMPS,
        };
        encode_varuint(buf, tag);
    }

    for r in ranges {
        match &r.payload {
            RangePayload::Skip => {}
            RangePayload::Fingerprint(fp) => buf.push_bytes(fp.as_bytes()),
            RangePayload::Timestamps(timestamps) => encode_timestamp_list(buf, timestamps),
        }
    }
}

fn decode_ranges_block(cur: &mut ReadCursor) -> Result<Vec<Range>, DecodeError> {
    let count = decode_varuint(cur)? as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    let finite_bounds = decode_timestamp_list(cur)?;
    if finite_bounds.len() != count - 1 {
        return Err(DecodeError::RangesNotIncreasing);
    }

    let mut tags = Vec::with_capacity(count);
    for _ in 0..count {
        tags.push(decode_varuint(cur)?);
    }

    let mut ranges = Vec::with_capacity(count);
    for (i, tag) in tags.into_iter().enumerate() {
        let upper_bound = if i == count - 1 {
            RangeUpperBound::Infinite
        } else {
            RangeUpperBound::Finite(finite_bounds[i])
        };
        let payload = match tag {
            RANGE_TYPE_SKIP => RangePayload::Skip,
            RANGE_TYPE_FINGERPRINT => {
                let slice = cur.read_n(crate::config::FINGERPRINT_SIZE).ok_or(
                    DecodeError::UnexpectedEof {
                        needed: crate::config::FINGERPRINT_SIZE,
                        available: cur.remaining(),
                    },
                )?;
                let mut bytes = [0u8; crate::config::FINGERPRINT_SIZE];
                bytes.copy_from_slice(slice);
                RangePayload::Fingerprint(Fingerprint(bytes))
            }
            RANGE_TYPE_TIMESTAMPS => RangePayload::Timestamps(decode_timestamp_list(cur)?),
            other => return Err(DecodeError::UnknownRangeType(other as u8)),
        };
        ranges.push(Range {
            upper_bound,
            payload,
        });
    }

    validate_ranges_shape(&ranges)?;
    Ok(ranges)
}

pub fn encode_message(message: &ProtocolMessage) -> Vec<u8> {
    let mut buf = WriteBuffer::new();
    encode_header(&mut buf, &message.header);
    encode_messages_block(&mut buf, &message.messages);
    encode_ranges_block(&mut buf, &message.ranges);
    buf.into_vec()
}

pub fn decode_message(bytes: &[u8]) -> Result<ProtocolMessage, DecodeError> {
    let mut cur = ReadCursor::new(bytes);
    let header = decode_header(&mut cur)?;
    let messages = decode_messages_block(&mut cur)?;
    let ranges = decode_ranges_block(&mut cur)?;
    Ok(ProtocolMessage {
        header,
        messages,
        ranges,
    })
}

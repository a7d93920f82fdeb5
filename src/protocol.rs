//! Protocol envelope: version negotiation, write-key enforcement, and the
//! applyAsClient / applyAsRelay entry points that drive one round each.

use crate::config::PROTOCOL_VERSION;
use crate::error::{ErrorCode, SyncCoreError};
use crate::message::{
    decode_message, encode_message, Header, HeaderKind, MessageType, OwnerId, ProtocolMessage,
    RequestHeader, ResponseHeader, SubscriptionFlag, WireChange,
};
use crate::message_buffer::MessageBuffer;
use crate::range::Range;
use crate::storage::Storage;
use crate::sync::run_round;
use tracing::{debug, trace, warn};

/// What a relay should do about a subscriber's broadcast fan-out after
/// successfully applying a request — the host wires these up; the envelope
/// only calls through them.
pub trait BroadcastSink {
    fn broadcast(&self, owner: &OwnerId, messages: &[WireChange]);
}

/// A relay's outcome for one applied request: either a response to send
/// back (possibly empty, signaling "synced"), or a terminal error response.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutcome {
    pub response_bytes: Vec<u8>,
}

/// A client's outcome for one applied response or broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOutcome {
    /// Send this request for another round.
    NextRequest(Vec<u8>),
    /// Nothing more to send; this owner is caught up.
    NoResponse,
    /// A server-pushed broadcast was applied; no response is ever sent.
    Broadcast,
}

/// Decodes the inbound bytes far enough to compare protocol versions
/// without committing to either role, per §4.6's negotiation rule: the
/// first two header fields never change shape across versions.
pub fn peek_version(bytes: &[u8]) -> Result<u64, SyncCoreError> {
    let header = decode_message_header_only(bytes)?;
    Ok(header.version)
}

fn decode_message_header_only(bytes: &[u8]) -> Result<crate::message::Header, SyncCoreError> {
    let mut cur = crate::buffer::ReadCursor::new(bytes);
    crate::message::decode_header(&mut cur).map_err(SyncCoreError::InvalidData)
}

/// Applies an inbound request on a relay: validates the write key if
/// writes are present, commits them, optionally broadcasts verbatim to
/// subscribers, then always runs a reconciliation round and returns a
/// response (possibly empty — that signals "fully synced" to the client).
pub fn apply_as_relay<S: Storage, B: BroadcastSink>(
    storage: &S,
    sink: &B,
    bytes: &[u8],
) -> Result<RelayOutcome, SyncCoreError> {
    let incoming = decode_message(bytes).map_err(SyncCoreError::InvalidData)?;

    if incoming.header.version != PROTOCOL_VERSION {
        return Ok(RelayOutcome {
            response_bytes: encode_version_mismatch(incoming.header.owner_id),
        });
    }

    let owner = incoming.header.owner_id;

    let HeaderKind::Request(request_header) = &incoming.header.kind else {
        warn!(?owner, "relay received a non-Request message, dropping");
        return Err(SyncCoreError::InvalidData(
            crate::error::DecodeError::UnknownMessageType(1),
        ));
    };

    if !incoming.messages.is_empty() {
        let key = match &request_header.write_key {
            Some(key) => key,
            None => {
                debug!(?owner, "write-bearing request missing write key");
                return Ok(RelayOutcome {
                    response_bytes: encode_error_response(owner, ErrorCode::WriteKeyError),
                });
            }
        };

        let valid = storage.validate_write_key(&owner, key)?;
        if !valid {
            warn!(?owner, "write key rejected");
            return Ok(RelayOutcome {
                response_bytes: encode_error_response(owner, ErrorCode::WriteKeyError),
            });
        }

        let rows: Vec<(crate::timestamp::Timestamp, Vec<u8>)> = incoming
            .messages
            .iter()
            .map(|m| (m.timestamp, m.change.clone()))
            .collect();

        let ok = storage.write_messages(&owner, &rows)?;
        if !ok {
            return Ok(RelayOutcome {
                response_bytes: encode_error_response(owner, ErrorCode::WriteError),
            });
        }

        trace!(?owner, count = incoming.messages.len(), "committed inbound messages");
        sink.broadcast(&owner, &incoming.messages);
    }

    if request_header.subscription == SubscriptionFlag::Subscribe
        || request_header.subscription == SubscriptionFlag::Unsubscribe
    {
        trace!(?owner, flag = ?request_header.subscription, "subscription flag observed");
    }

    let response_header = Header {
        version: PROTOCOL_VERSION,
        owner_id: owner,
        kind: HeaderKind::Response(ResponseHeader {
            error_code: ErrorCode::NoError,
        }),
    };
    let mut output = MessageBuffer::new(response_header);
    run_round(storage, &owner, &incoming.ranges, &mut output)?;
    Ok(RelayOutcome {
        response_bytes: output.unwrap(),
    })
}

/// Applies an inbound response or broadcast on a client: commits any
/// messages, and — only if a write key is available locally — runs another
/// reconciliation round against the received ranges to decide whether to
/// keep syncing.
pub fn apply_as_client<S: Storage>(
    storage: &S,
    bytes: &[u8],
    write_key: Option<&[u8; crate::config::WRITE_KEY_LENGTH]>,
) -> Result<ClientOutcome, SyncCoreError> {
    let incoming = decode_message(bytes).map_err(SyncCoreError::InvalidData)?;
    let owner = incoming.header.owner_id;

    if incoming.header.version != PROTOCOL_VERSION {
        warn!(?owner, version = incoming.header.version, "relay replied with an unsupported version");
        return Err(SyncCoreError::UnsupportedVersion {
            unsupported_version: incoming.header.version,
            is_initiator: true,
        });
    }

    match &incoming.header.kind {
        HeaderKind::Response(resp) => {
            if resp.error_code != ErrorCode::NoError {
                return Err(response_error_to_sync_core_error(owner, resp.error_code));
            }
        }
        HeaderKind::Broadcast => {}
        HeaderKind::Request(_) => {
            return Err(SyncCoreError::InvalidData(
                crate::error::DecodeError::UnknownMessageType(0),
            ));
        }
    }

    if !incoming.messages.is_empty() {
        let rows: Vec<(crate::timestamp::Timestamp, Vec<u8>)> = incoming
            .messages
            .iter()
            .map(|m| (m.timestamp, m.change.clone()))
            .collect();
        storage.write_messages(&owner, &rows)?;
    }

    if matches!(incoming.header.kind, HeaderKind::Broadcast) {
        return Ok(ClientOutcome::Broadcast);
    }

    let Some(key) = write_key else {
        return Ok(ClientOutcome::NoResponse);
    };

    if incoming.ranges.is_empty() {
        return Ok(ClientOutcome::NoResponse);
    }

    let request_header = Header {
        version: PROTOCOL_VERSION,
        owner_id: owner,
        kind: HeaderKind::Request(RequestHeader {
            write_key: Some(*key),
            subscription: SubscriptionFlag::None,
        }),
    };
    let mut output = MessageBuffer::new(request_header);
    let has_changes = run_round(storage, &owner, &incoming.ranges, &mut output)?;

    if has_changes {
        Ok(ClientOutcome::NextRequest(output.unwrap()))
    } else {
        Ok(ClientOutcome::NoResponse)
    }
}

/// Rebuilds a fresh message from scratch for relay broadcast, rather than
/// patching the inbound bytes' message-type byte in place — safer, since it
/// never relies on wire offsets staying valid across a format revision
/// (DESIGN.md open question 3).
pub fn build_broadcast(owner: OwnerId, messages: &[WireChange]) -> Vec<u8> {
    let message = ProtocolMessage {
        header: Header {
            version: PROTOCOL_VERSION,
            owner_id: owner,
            kind: HeaderKind::Broadcast,
        },
        messages: messages.to_vec(),
        ranges: Vec::<Range>::new(),
    };
    encode_message(&message)
}

fn encode_version_mismatch(owner: OwnerId) -> Vec<u8> {
    let message = ProtocolMessage {
        header: Header {
            version: PROTOCOL_VERSION,
            owner_id: owner,
            kind: HeaderKind::Response(ResponseHeader {
                error_code: ErrorCode::NoError,
            }),
        },
        messages: Vec::new(),
        ranges: Vec::new(),
    };
    encode_message(&message)
}

fn encode_error_response(owner: OwnerId, code: ErrorCode) -> Vec<u8> {
    let message = ProtocolMessage {
        header: Header {
            version: PROTOCOL_VERSION,
            owner_id: owner,
            kind: HeaderKind::Response(ResponseHeader { error_code: code }),
        },
        messages: Vec::new(),
        ranges: Vec::new(),
    };
    encode_message(&message)
}

fn response_error_to_sync_core_error(owner: OwnerId, code: ErrorCode) -> SyncCoreError {
    match code {
        ErrorCode::NoError => unreachable!("caller already filtered NoError"),
        ErrorCode::WriteKeyError => SyncCoreError::WriteKeyError { owner },
        ErrorCode::WriteError => SyncCoreError::WriteError {
            owner,
            reason: "relay rejected write".into(),
        },
        ErrorCode::SyncError => SyncCoreError::SyncError { owner },
    }
}

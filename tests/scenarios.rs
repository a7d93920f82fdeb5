//! End-to-end scenarios exercising `apply_as_client`/`apply_as_relay`
//! together against the reference SQLite storage — the concrete scenarios
//! a protocol implementation's test suite should be seeded with.

use evolu_sync_core::message::{
    decode_message, encode_message, Header, HeaderKind, RequestHeader, ResponseHeader,
    SubscriptionFlag,
};
use evolu_sync_core::storage::Storage;
use evolu_sync_core::{
    apply_as_client, apply_as_relay, build_broadcast, initial_ranges, peek_version,
    BroadcastSink, ClientOutcome, EncryptedDbChange, ErrorCode, MessageBuffer, OwnerId,
    ProtocolMessage, Range, RangeUpperBound, SqliteStorage, Timestamp, WireChange, WriteKey,
    XChaCha20Poly1305Aead,
};

struct RecordingSink {
    broadcasts: std::cell::RefCell<Vec<(OwnerId, usize)>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            broadcasts: std::cell::RefCell::new(Vec::new()),
        }
    }
}

impl BroadcastSink for RecordingSink {
    fn broadcast(&self, owner: &OwnerId, messages: &[WireChange]) {
        self.broadcasts.borrow_mut().push((*owner, messages.len()));
    }
}

fn owner(byte: u8) -> OwnerId {
    [byte; 16]
}

fn write_key(byte: u8) -> WriteKey {
    [byte; 32]
}

fn ts(millis: u64, node: u8) -> Timestamp {
    Timestamp {
        millis,
        counter: 0,
        node_id: [node; 8],
    }
}

/// Shared test key standing in for an owner's real, externally-derived AEAD
/// key — these scenarios encrypt for realism, but the relay side never sees
/// or needs this key; it only ever stores and forwards the resulting bytes.
fn test_key() -> [u8; 32] {
    [3u8; 32]
}

fn change(timestamp: Timestamp, table: &str) -> Vec<u8> {
    let aead = XChaCha20Poly1305Aead::new(&test_key());
    EncryptedDbChange {
        timestamp,
        table: table.into(),
        row_id: [0; 16],
        columns: vec![],
    }
    .encrypt(&aead)
}

fn client_request(owner: OwnerId, key: Option<WriteKey>, messages: Vec<WireChange>, ranges: Vec<Range>) -> Vec<u8> {
    let header = Header {
        version: 0,
        owner_id: owner,
        kind: HeaderKind::Request(RequestHeader {
            write_key: key,
            subscription: SubscriptionFlag::None,
        }),
    };
    encode_message(&ProtocolMessage {
        header,
        messages,
        ranges,
    })
}

/// Scenario S1 — empty vs. one: client has a single timestamped change, the
/// relay starts empty. The client's initial fingerprint round trips the
/// change to the relay; the relay has nothing further to offer back.
#[test]
fn scenario_s1_empty_vs_one() {
    let client_storage = SqliteStorage::open_in_memory().unwrap();
    let relay_storage = SqliteStorage::open_in_memory().unwrap();
    let sink = RecordingSink::new();
    let owner = owner(1);
    let key = write_key(9);

    let t = ts(100, 1);
    client_storage
        .write_messages(&owner, &[(t, change(t, "todos"))])
        .unwrap();

    let ranges = initial_ranges(&client_storage, &owner).unwrap();
    let request = client_request(
        owner,
        Some(key),
        vec![WireChange {
            timestamp: t,
            change: change(t, "todos"),
        }],
        ranges,
    );

    let relay_outcome = apply_as_relay(&relay_storage, &sink, &request).unwrap();
    assert_eq!(relay_storage.size(&owner).unwrap(), Some(1));
    assert_eq!(sink.broadcasts.borrow().len(), 1);

    let decoded_response = decode_message(&relay_outcome.response_bytes).unwrap();
    assert!(matches!(
        decoded_response.header.kind,
        HeaderKind::Response(ResponseHeader {
            error_code: ErrorCode::NoError
        })
    ));

    let outcome = apply_as_client(&client_storage, &relay_outcome.response_bytes, Some(&key)).unwrap();
    match outcome {
        ClientOutcome::NoResponse => {}
        ClientOutcome::NextRequest(_) => {
            // Acceptable too: the relay's zero-fingerprint range differs from
            // the client's, and the client has nothing further to send, so a
            // next round with no new content is also a valid terminal state.
        }
        ClientOutcome::Broadcast => panic!("a Response must not be treated as a Broadcast"),
    }
}

/// Scenario S2 — identical sets: both sides already hold the same three
/// timestamps. The relay's matching fingerprint collapses to a Skip/empty
/// ranges block and no messages cross the wire.
#[test]
fn scenario_s2_identical_sets_produce_no_traffic() {
    let client_storage = SqliteStorage::open_in_memory().unwrap();
    let relay_storage = SqliteStorage::open_in_memory().unwrap();
    let sink = RecordingSink::new();
    let owner = owner(2);

    let shared = [ts(10, 1), ts(20, 1), ts(30, 1)];
    for storage in [&client_storage, &relay_storage] {
        let rows: Vec<_> = shared.iter().map(|&t| (t, change(t, "todos"))).collect();
        storage.write_messages(&owner, &rows).unwrap();
    }

    let ranges = initial_ranges(&client_storage, &owner).unwrap();
    let request = client_request(owner, None, vec![], ranges);

    let relay_outcome = apply_as_relay(&relay_storage, &sink, &request).unwrap();
    assert!(sink.broadcasts.borrow().is_empty());

    let decoded = decode_message(&relay_outcome.response_bytes).unwrap();
    assert!(decoded.messages.is_empty());
    assert!(
        decoded.ranges.is_empty()
            || decoded
                .ranges
                .iter()
                .all(|r| matches!(r.payload, evolu_sync_core::RangePayload::Skip))
    );
}

/// Scenario S3 — version mismatch: the relay does not implement the
/// client's declared version and replies with just its own version and the
/// owner id, which `peek_version` can read back without decoding the rest.
#[test]
fn scenario_s3_version_mismatch_short_circuits() {
    let relay_storage = SqliteStorage::open_in_memory().unwrap();
    let sink = RecordingSink::new();
    let owner = owner(3);

    let header = Header {
        version: 999,
        owner_id: owner,
        kind: HeaderKind::Request(RequestHeader {
            write_key: None,
            subscription: SubscriptionFlag::None,
        }),
    };
    let request = encode_message(&ProtocolMessage {
        header,
        messages: vec![],
        ranges: vec![],
    });

    let outcome = apply_as_relay(&relay_storage, &sink, &request).unwrap();
    let version = peek_version(&outcome.response_bytes).unwrap();
    assert_eq!(version, 0);
    assert_eq!(relay_storage.size(&owner).unwrap(), Some(0));
}

/// Scenario S5 — write-key rejection: the relay already trusts a key for
/// this owner; a request bearing a different key must be rejected with
/// `WriteKeyError` and must not commit any rows.
#[test]
fn scenario_s5_write_key_rejection_does_not_commit() {
    let relay_storage = SqliteStorage::open_in_memory().unwrap();
    let sink = RecordingSink::new();
    let owner = owner(5);
    let key_a = write_key(0xAA);
    let key_b = write_key(0xBB);

    assert!(relay_storage.validate_write_key(&owner, &key_a).unwrap());

    let t = ts(1, 1);
    let request = client_request(
        owner,
        Some(key_b),
        vec![WireChange {
            timestamp: t,
            change: change(t, "todos"),
        }],
        vec![],
    );

    let outcome = apply_as_relay(&relay_storage, &sink, &request).unwrap();
    let decoded = decode_message(&outcome.response_bytes).unwrap();
    assert!(matches!(
        decoded.header.kind,
        HeaderKind::Response(ResponseHeader {
            error_code: ErrorCode::WriteKeyError
        })
    ));
    assert_eq!(relay_storage.size(&owner).unwrap(), Some(0));
    assert!(sink.broadcasts.borrow().is_empty());
}

/// Scenario S6 (drill-down) — storages differing in a handful of timestamps
/// out of a much larger shared set converge within a small, bounded number
/// of rounds, and the exact missing timestamps end up on both sides.
#[test]
fn scenario_s6_rbsr_drills_down_to_exact_differences() {
    let client_storage = SqliteStorage::open_in_memory().unwrap();
    let relay_storage = SqliteStorage::open_in_memory().unwrap();
    let sink = RecordingSink::new();
    let owner = owner(6);

    let mut shared_rows = Vec::new();
    for i in 0..1000u64 {
        let t = ts(i, 1);
        shared_rows.push((t, change(t, "todos")));
    }
    client_storage.write_messages(&owner, &shared_rows).unwrap();
    relay_storage.write_messages(&owner, &shared_rows).unwrap();

    // Three extra timestamps only the client has.
    let extra = [ts(10_000, 1), ts(10_001, 1), ts(10_002, 1)];
    let extra_rows: Vec<_> = extra.iter().map(|&t| (t, change(t, "todos"))).collect();
    client_storage.write_messages(&owner, &extra_rows).unwrap();

    let key = write_key(1);
    relay_storage.validate_write_key(&owner, &key).unwrap();

    let mut next_request = client_request(
        owner,
        Some(key),
        vec![],
        initial_ranges(&client_storage, &owner).unwrap(),
    );
    let mut converged = false;
    for _round in 0..20 {
        let relay_outcome = apply_as_relay(&relay_storage, &sink, &next_request).unwrap();

        match apply_as_client(&client_storage, &relay_outcome.response_bytes, Some(&key)).unwrap() {
            ClientOutcome::NextRequest(bytes) => {
                next_request = bytes;
            }
            ClientOutcome::NoResponse => {
                converged = true;
                break;
            }
            ClientOutcome::Broadcast => unreachable!("a relay Response is never a Broadcast"),
        }
    }

    assert!(converged, "RBSR did not converge within 20 rounds");
    assert_eq!(relay_storage.size(&owner).unwrap(), Some(1003));
    for &t in &extra {
        assert!(relay_storage.read_change(&owner, t).unwrap().is_some());
    }
}

/// A relay rebuilds broadcasts from scratch (DESIGN.md open question 3)
/// rather than patching the inbound message-type byte in place; the rebuilt
/// bytes must still decode as a well-formed `Broadcast` carrying the same
/// messages.
#[test]
fn broadcast_rebuild_carries_the_same_messages() {
    let owner = owner(7);
    let t = ts(1, 1);
    let messages = vec![WireChange {
        timestamp: t,
        change: change(t, "todos"),
    }];
    let bytes = build_broadcast(owner, &messages);
    let decoded = decode_message(&bytes).unwrap();
    assert!(matches!(decoded.header.kind, HeaderKind::Broadcast));
    assert_eq!(decoded.messages, messages);
}

/// Boundary behavior: an empty storage responds to any sync request with a
/// single `Fingerprint(+∞, zero)` range.
#[test]
fn empty_storage_responds_with_zero_fingerprint() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let owner = owner(8);
    let ranges = initial_ranges(&storage, &owner).unwrap();
    assert_eq!(ranges.len(), 1);
    match &ranges[0] {
        Range {
            upper_bound: RangeUpperBound::Infinite,
            payload: evolu_sync_core::RangePayload::Fingerprint(fp),
        } => assert_eq!(*fp, evolu_sync_core::Fingerprint::ZERO),
        other => panic!("expected a single infinite zero-fingerprint range, got {other:?}"),
    }
}

/// Boundary behavior: `add_range` after an infinite-upper-bound range has
/// already been added is a caller bug and must assertion-fail.
#[test]
#[should_panic]
fn add_range_after_infinite_upper_bound_panics() {
    let header = Header {
        version: 0,
        owner_id: owner(9),
        kind: HeaderKind::Request(RequestHeader {
            write_key: None,
            subscription: SubscriptionFlag::None,
        }),
    };
    let mut buf = MessageBuffer::new(header);
    buf.add_range(Range {
        upper_bound: RangeUpperBound::Infinite,
        payload: evolu_sync_core::RangePayload::Skip,
    });
    buf.add_range(Range {
        upper_bound: RangeUpperBound::Finite(ts(1, 1)),
        payload: evolu_sync_core::RangePayload::Skip,
    });
}

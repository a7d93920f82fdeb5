//! Range-based set reconciliation engine.
//!
//! Given the ranges a peer sent us and our own storage, walks them in order
//! and appends whatever the peer needs — a drill-down into sub-buckets, the
//! timestamps and messages they're missing, or nothing at all — into an
//! output `MessageBuffer`, honoring both its size budgets.

use crate::config::{BALANCED_BUCKET_COUNT, FINGERPRINT_SIZE};
use crate::error::{StorageError, SyncCoreError};
use crate::message::{OwnerId, WireChange};
use crate::message_buffer::MessageBuffer;
use crate::range::{Range, RangePayload, RangeUpperBound};
use crate::storage::Storage;
use crate::timestamp::{Fingerprint, Timestamp};
use rand::RngCore;
use std::collections::HashSet;

/// Computes the single bootstrap range an initiator sends when it has no
/// prior ranges from the peer: one `Fingerprint` covering its entire
/// timestamp universe (spec §8 scenario S1's opening move).
pub fn initial_ranges<S: Storage>(storage: &S, owner: &OwnerId) -> Result<Vec<Range>, SyncCoreError> {
    let size = storage
        .size(owner)?
        .ok_or(SyncCoreError::SyncError { owner: *owner })?;
    let fp = storage
        .fingerprint(owner, 0, size)?
        .ok_or(SyncCoreError::SyncError { owner: *owner })?;
    Ok(vec![Range::fingerprint(RangeUpperBound::Infinite, fp)])
}

/// Runs one reconciliation round: walks `received_ranges` against `storage`
/// and appends the response into `output`. Returns whether the response
/// carries anything worth sending (messages, or ranges beyond a trivial
/// all-skip acknowledgement).
pub fn run_round<S: Storage>(
    storage: &S,
    owner: &OwnerId,
    received_ranges: &[Range],
    output: &mut MessageBuffer,
) -> Result<bool, SyncCoreError> {
    let size = storage
        .size(owner)?
        .ok_or(SyncCoreError::SyncError { owner: *owner })?;

    let mut prev_index = 0usize;
    let mut pending_skip = false;
    let mut pending_skip_bound = RangeUpperBound::Infinite;
    let mut terminated_early = false;

    for range in received_ranges {
        let upper = storage
            .find_lower_bound(owner, prev_index, size, range.upper_bound)?
            .ok_or(SyncCoreError::SyncError { owner: *owner })?;

        match &range.payload {
            RangePayload::Skip => {
                pending_skip = true;
                pending_skip_bound = range.upper_bound;
            }
            RangePayload::Fingerprint(peer_fp) => {
                let our_fp = storage
                    .fingerprint(owner, prev_index, upper)?
                    .ok_or(SyncCoreError::SyncError { owner: *owner })?;
                if our_fp == *peer_fp {
                    pending_skip = true;
                    pending_skip_bound = range.upper_bound;
                } else if output.can_split_range() {
                    flush_pending_skip(output, &mut pending_skip, pending_skip_bound);
                    split_range(storage, owner, prev_index, upper, range.upper_bound, output)?;
                } else {
                    flush_pending_skip(output, &mut pending_skip, pending_skip_bound);
                    let remaining_fp = storage
                        .fingerprint(owner, upper, size)?
                        .ok_or(SyncCoreError::SyncError { owner: *owner })?;
                    output.add_range(Range::fingerprint(RangeUpperBound::Infinite, remaining_fp));
                    terminated_early = true;
                    break;
                }
            }
            RangePayload::Timestamps(peer_timestamps) => {
                let mut peer_set: HashSet<Timestamp> = peer_timestamps.iter().copied().collect();
                let mut our_timestamps = Vec::new();
                let mut exceeded = false;
                let mut end_bound = None;
                let mut stop_index = upper;

                {
                    let mut visit_err: Option<StorageError> = None;
                    storage.iterate(owner, prev_index, upper, &mut |index, ts| {
                        let peer_has_it = peer_set.contains(&ts);

                        let mut pending_message = None;
                        if !peer_has_it {
                            match storage.read_change(owner, ts) {
                                Ok(Some(blob)) => pending_message = Some(blob),
                                Ok(None) => {}
                                Err(e) => {
                                    visit_err = Some(e);
                                    return false;
                                }
                            }
                        }

                        // The real candidate message length (once known) is the
                        // only input to the budget check; it is the sole gate
                        // that may halt iteration, so nothing is pushed or
                        // queued until it has passed.
                        let change_len_hint = pending_message.as_ref().map(Vec::len);
                        if !output.can_add_timestamps_range_and_message(
                            our_timestamps.len() + 1,
                            change_len_hint,
                        ) {
                            exceeded = true;
                            end_bound = Some(ts);
                            stop_index = index;
                            return false;
                        }

                        peer_set.remove(&ts);
                        our_timestamps.push(ts);

                        if let Some(blob) = pending_message {
                            output.add_message(WireChange {
                                timestamp: ts,
                                change: blob,
                            });
                        }
                        true
                    })?;
                    if let Some(e) = visit_err {
                        return Err(SyncCoreError::Storage(e));
                    }
                }

                if exceeded {
                    let bound = end_bound
                        .map(RangeUpperBound::Finite)
                        .unwrap_or(range.upper_bound);
                    output.add_range(Range::timestamps(bound, our_timestamps));
                    let probe = random_continuation_fingerprint();
                    output.add_range(Range::fingerprint(RangeUpperBound::Infinite, probe));
                    terminated_early = true;
                    prev_index = stop_index;
                    break;
                } else if !peer_set.is_empty() {
                    flush_pending_skip(output, &mut pending_skip, pending_skip_bound);
                    output.add_range(Range::timestamps(range.upper_bound, our_timestamps));
                } else {
                    pending_skip = true;
                    pending_skip_bound = range.upper_bound;
                }
            }
        }

        prev_index = upper;
    }

    if !terminated_early && pending_skip {
        output.add_range(Range::skip(pending_skip_bound));
    }

    let has_changes = output.message_count() > 0 || output.has_non_skip_range();
    Ok(has_changes)
}

fn flush_pending_skip(output: &mut MessageBuffer, pending_skip: &mut bool, bound: RangeUpperBound) {
    if *pending_skip {
        output.add_range(Range::skip(bound));
        *pending_skip = false;
    }
}

fn split_range<S: Storage>(
    storage: &S,
    owner: &OwnerId,
    lo: usize,
    hi: usize,
    outer_bound: RangeUpperBound,
    output: &mut MessageBuffer,
) -> Result<(), SyncCoreError> {
    let buckets = storage
        .fingerprint_ranges(owner, lo, hi, BALANCED_BUCKET_COUNT)?
        .ok_or(SyncCoreError::SyncError { owner: *owner })?;

    let mut cursor = lo;
    for bucket in buckets {
        let bound = if bucket.upper_index == hi {
            outer_bound
        } else {
            let ts = timestamp_at_index(storage, owner, bucket.upper_index - 1)?;
            RangeUpperBound::Finite(ts)
        };

        if bucket.upper_index - cursor < crate::config::MIN_ITEMS_TO_SPLIT {
            let mut items = Vec::new();
            storage.iterate(owner, cursor, bucket.upper_index, &mut |_, ts| {
                items.push(ts);
                true
            })?;
            output.add_range(Range::timestamps(bound, items));
        } else {
            output.add_range(Range::fingerprint(bound, bucket.fingerprint));
        }
        cursor = bucket.upper_index;
    }
    Ok(())
}

fn timestamp_at_index<S: Storage>(storage: &S, owner: &OwnerId, index: usize) -> Result<Timestamp, SyncCoreError> {
    let mut found = None;
    storage.iterate(owner, index, index + 1, &mut |_, ts| {
        found = Some(ts);
        false
    })?;
    found.ok_or(SyncCoreError::SyncError { owner: *owner })
}

fn random_continuation_fingerprint() -> Fingerprint {
    let mut bytes = [0u8; FINGERPRINT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    Fingerprint(bytes)
}

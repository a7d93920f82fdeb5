//! The `Storage` trait: the contract the RBSR sync engine consumes.
//!
//! Every method here returns `Result<Option<T>, StorageError>` rather than
//! plain `Option<T>` with an internal error sink — unlike the distilled
//! spec's "callback on error" shape, a Rust trait can propagate `Result`
//! through `?` without needing an injected error handler, so that pattern
//! is translated directly into the return type instead of a side channel.
//!
//! `read_change`/`write_messages` traffic in the raw `nonce ∥ len ∥
//! ciphertext` blob bytes (§3's `EncryptedDbChange` wire representation),
//! never the decoded `change::EncryptedDbChange` struct: storage (and,
//! above it, the sync engine and relay) never holds the AEAD key needed to
//! open one, so it can only ever move these bytes around opaquely.

pub mod sqlite;

use crate::error::StorageError;
use crate::message::OwnerId;
use crate::timestamp::{Fingerprint, Timestamp};

pub use sqlite::SqliteStorage;

/// One fingerprint over a bucket boundary, as returned by
/// `fingerprint_ranges` — a bucket's upper bound plus the XOR-aggregate
/// fingerprint of everything in `(previous_bucket_upper_bound, upper_bound]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintRange {
    pub upper_index: usize,
    pub fingerprint: Fingerprint,
}

pub trait Storage {
    /// Count of stored timestamps for `owner`, or `None` if the owner is
    /// unknown to this storage.
    fn size(&self, owner: &OwnerId) -> Result<Option<usize>, StorageError>;

    /// XOR-aggregate fingerprint of the timestamps in index range `[lo, hi)`.
    fn fingerprint(&self, owner: &OwnerId, lo: usize, hi: usize) -> Result<Option<Fingerprint>, StorageError>;

    /// Fingerprints for each of `bucket_count` (approximately) balanced
    /// sub-ranges of `[lo, hi)`, in one pass over storage.
    fn fingerprint_ranges(
        &self,
        owner: &OwnerId,
        lo: usize,
        hi: usize,
        bucket_count: usize,
    ) -> Result<Option<Vec<FingerprintRange>>, StorageError>;

    /// First index in `[lo, hi)` whose stored timestamp is strictly greater
    /// than `upper_bound`; `hi` if no such index exists.
    fn find_lower_bound(
        &self,
        owner: &OwnerId,
        lo: usize,
        hi: usize,
        upper_bound: crate::range::RangeUpperBound,
    ) -> Result<Option<usize>, StorageError>;

    /// Visits stored timestamps for `owner` in `[lo, hi)` in ascending
    /// order, calling `visit` with each index and timestamp. Stops early
    /// if `visit` returns `false`.
    fn iterate(
        &self,
        owner: &OwnerId,
        lo: usize,
        hi: usize,
        visit: &mut dyn FnMut(usize, Timestamp) -> bool,
    ) -> Result<(), StorageError>;

    /// Trust-on-first-use write key check: records the first presented key
    /// for an owner with none on file and accepts it; compares
    /// constant-time against the stored key otherwise.
    fn validate_write_key(&self, owner: &OwnerId, key: &[u8; crate::config::WRITE_KEY_LENGTH]) -> Result<bool, StorageError>;

    /// Idempotent, transactional batch insert of `(timestamp, opaque
    /// encrypted-change blob)` pairs.
    fn write_messages(&self, owner: &OwnerId, messages: &[(Timestamp, Vec<u8>)]) -> Result<bool, StorageError>;

    /// Retrieves one change's opaque encrypted blob bytes, verbatim.
    fn read_change(&self, owner: &OwnerId, ts: Timestamp) -> Result<Option<Vec<u8>>, StorageError>;

    fn delete_owner(&self, owner: &OwnerId) -> Result<bool, StorageError>;
}

/// Splits `[lo, hi)` into up to `bucket_count` roughly equal-sized buckets,
/// returning their ascending upper indices. Below `MIN_ITEMS_TO_SPLIT`
/// items, returns a single bucket covering the whole range, signaling the
/// caller to fall back to an explicit `TimestampsRange` instead.
pub fn balanced_bucket_bounds(lo: usize, hi: usize, bucket_count: usize) -> Vec<usize> {
    let len = hi - lo;
    if len == 0 {
        return vec![];
    }
    if len <= crate::config::MIN_ITEMS_TO_SPLIT || bucket_count == 0 {
        return vec![hi];
    }
    let buckets = bucket_count.min(len);
    let base = len / buckets;
    let remainder = len % buckets;
    let mut bounds = Vec::with_capacity(buckets);
    let mut cursor = lo;
    for i in 0..buckets {
        let extra = if i < remainder { 1 } else { 0 };
        cursor += base + extra;
        bounds.push(cursor);
    }
    if let Some(last) = bounds.last_mut() {
        *last = hi;
    }
    bounds
}

//! Hybrid logical clock timestamp and its fingerprint.

use crate::codec::bytes::NodeId;
use crate::config::{FINGERPRINT_SIZE, MAX_CLOCK_DRIFT_MS, MAX_COUNTER, TIMESTAMP_BYTES_LENGTH};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A 12-byte XOR-aggregate digest. XOR-associative: the fingerprint of a
/// set is the XOR of its members' fingerprints, independent of order, and
/// `fingerprint(∅) = Fingerprint::ZERO` is the identity of that operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fingerprint(pub [u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    pub const ZERO: Fingerprint = Fingerprint([0u8; FINGERPRINT_SIZE]);

    pub fn xor(self, other: Fingerprint) -> Fingerprint {
        let mut out = [0u8; FINGERPRINT_SIZE];
        for i in 0..FINGERPRINT_SIZE {
            out[i] = self.0[i] ^ other.0[i];
        }
        Fingerprint(out)
    }

    pub fn xor_all<I: IntoIterator<Item = Fingerprint>>(items: I) -> Fingerprint {
        items.into_iter().fold(Fingerprint::ZERO, Fingerprint::xor)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }
}

/// Hybrid logical clock triple `(millis, counter, node_id)`. Total order is
/// lexicographic on the triple, matching the lexicographic order of the
/// canonical big-endian binary form — so storage can index on the binary
/// form directly and get timestamp order for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub millis: u64,
    pub counter: u32,
    pub node_id: NodeId,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ClockError {
    #[error("local clock drifted {drift_ms}ms ahead of the last timestamp, exceeding the {max_drift_ms}ms bound")]
    ClockDrift { drift_ms: u64, max_drift_ms: u64 },
    #[error("counter overflowed within one millisecond (max {max})")]
    CounterOverflow { max: u32 },
}

impl Timestamp {
    pub const BYTES_LENGTH: usize = TIMESTAMP_BYTES_LENGTH;

    pub fn to_canonical_bytes(&self) -> [u8; TIMESTAMP_BYTES_LENGTH] {
        let mut out = [0u8; TIMESTAMP_BYTES_LENGTH];
        out[0..6].copy_from_slice(&self.millis.to_be_bytes()[2..8]);
        out[6..8].copy_from_slice(&(self.counter as u16).to_be_bytes());
        out[8..14].copy_from_slice(&self.node_id[0..6]);
        out
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.to_canonical_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; FINGERPRINT_SIZE];
        out.copy_from_slice(&digest[0..FINGERPRINT_SIZE]);
        Fingerprint(out)
    }

    /// Advances the hybrid logical clock given the previous local timestamp
    /// and the current wall-clock reading, both in milliseconds.
    pub fn advance(prev: &Timestamp, now_millis: u64, node_id: NodeId) -> Result<Timestamp, ClockError> {
        let millis = prev.millis.max(now_millis);
        if millis > now_millis && millis - now_millis > MAX_CLOCK_DRIFT_MS {
            return Err(ClockError::ClockDrift {
                drift_ms: millis - now_millis,
                max_drift_ms: MAX_CLOCK_DRIFT_MS,
            });
        }
        let counter = if millis == prev.millis {
            prev.counter + 1
        } else {
            0
        };
        if counter > MAX_COUNTER {
            return Err(ClockError::CounterOverflow { max: MAX_COUNTER });
        }
        Ok(Timestamp {
            millis,
            counter,
            node_id,
        })
    }
}

pub fn fingerprint_of_set<'a, I: IntoIterator<Item = &'a Timestamp>>(timestamps: I) -> Fingerprint {
    Fingerprint::xor_all(timestamps.into_iter().map(Timestamp::fingerprint))
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
    fn total_order_is_lexicographic() {
        assert!(ts(1, 5, 9) < ts(2, 0, 0));
        assert!(ts(5, 0, 0) < ts(5, 1, 0));
        assert!(ts(5, 1, 0) < ts(5, 1, 1));
    }

    #[test]
    fn fingerprint_empty_set_is_zero() {
        let empty: Vec<Timestamp> = vec![];
        assert_eq!(fingerprint_of_set(&empty), Fingerprint::ZERO);
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = ts(1, 0, 1);
        let b = ts(2, 0, 2);
        let c = ts(3, 0, 3);
        let fp1 = fingerprint_of_set(&[a, b, c]);
        let fp2 = fingerprint_of_set(&[c, a, b]);
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn fingerprint_is_xor_additive_over_disjoint_union() {
        let a = ts(1, 0, 1);
        let b = ts(2, 0, 2);
        let c = ts(3, 0, 3);
        let whole = fingerprint_of_set(&[a, b, c]);
        let part1 = fingerprint_of_set(&[a, b]);
        let part2 = fingerprint_of_set(&[c]);
        assert_eq!(whole, part1.xor(part2));
    }

    #[test]
    fn advance_increments_counter_within_same_millisecond() {
        let prev = ts(1000, 0, 1);
        let next = Timestamp::advance(&prev, 1000, [1; 8]).unwrap();
        assert_eq!(next, ts(1000, 1, 1));
    }

    #[test]
    fn advance_resets_counter_on_new_millisecond() {
        let prev = ts(1000, 5, 1);
        let next = Timestamp::advance(&prev, 1001, [1; 8]).unwrap();
        assert_eq!(next, ts(1001, 0, 1));
    }

    #[test]
    fn advance_rejects_excessive_clock_drift() {
        let prev = ts(10_000_000, 0, 1);
        let err = Timestamp::advance(&prev, 0, [1; 8]).unwrap_err();
        assert!(matches!(err, ClockError::ClockDrift { .. }));
    }

    #[test]
    fn advance_rejects_counter_overflow() {
        let prev = ts(1000, MAX_COUNTER, 1);
        let err = Timestamp::advance(&prev, 1000, [1; 8]).unwrap_err();
        assert_eq!(err, ClockError::CounterOverflow { max: MAX_COUNTER });
    }

    #[test]
    fn canonical_bytes_roundtrip_order() {
        let a = ts(100, 2, 5);
        let b = ts(100, 3, 5);
        assert!(a.to_canonical_bytes() < b.to_canonical_bytes());
    }
}

//! Range descriptors: the unit the RBSR engine and wire format both speak.

use crate::timestamp::{Fingerprint, Timestamp};

/// A range's upper bound: either a concrete timestamp or the universe's
/// open end. Modeled as a tagged union rather than a sentinel timestamp
/// value, so "is this the last range" can never be confused with "this
/// range happens to end at some enormous timestamp".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeUpperBound {
    Finite(Timestamp),
    Infinite,
}

impl RangeUpperBound {
    pub fn is_infinite(&self) -> bool {
        matches!(self, RangeUpperBound::Infinite)
    }
}

/// One entry of a ranges block: what a peer is telling us about a
/// contiguous interval of the owner's timestamp universe.
#[derive(Debug, Clone, PartialEq)]
pub enum RangePayload {
    /// Nothing to say about this interval — we believe it already matches.
    Skip,
    /// The XOR-aggregate fingerprint of every timestamp in this interval.
    Fingerprint(Fingerprint),
    /// The explicit list of timestamps in this interval.
    Timestamps(Vec<Timestamp>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub upper_bound: RangeUpperBound,
    pub payload: RangePayload,
}

impl Range {
    pub fn skip(upper_bound: RangeUpperBound) -> Range {
        Range {
            upper_bound,
            payload: RangePayload::Skip,
        }
    }

    pub fn fingerprint(upper_bound: RangeUpperBound, fp: Fingerprint) -> Range {
        Range {
            upper_bound,
            payload: RangePayload::Fingerprint(fp),
        }
    }

    pub fn timestamps(upper_bound: RangeUpperBound, timestamps: Vec<Timestamp>) -> Range {
        Range {
            upper_bound,
            payload: RangePayload::Timestamps(timestamps),
        }
    }
}

/// Validates the structural invariants a full ranges block must satisfy
/// (spec data-model invariants 4 and 5): bounds strictly increasing, and
/// exactly one infinite upper bound, which must be last.
pub fn validate_ranges_shape(ranges: &[Range]) -> Result<(), crate::error::DecodeError> {
    use crate::error::DecodeError;

    if ranges.is_empty() {
        return Ok(());
    }

    let mut seen_infinite = false;
    let mut prev_finite: Option<Timestamp> = None;

    for (i, r) in ranges.iter().enumerate() {
        match r.upper_bound {
            RangeUpperBound::Infinite => {
                if seen_infinite {
                    return Err(DecodeError::DuplicateInfiniteUpperBound);
                }
                if i != ranges.len() - 1 {
                    return Err(DecodeError::MissingInfiniteUpperBound);
                }
                seen_infinite = true;
            }
            RangeUpperBound::Finite(ts) => {
                if let Some(prev) = prev_finite {
                    if ts <= prev {
                        return Err(DecodeError::RangesNotIncreasing);
                    }
                }
                prev_finite = Some(ts);
            }
        }
    }

    if !seen_infinite {
        return Err(DecodeError::MissingInfiniteUpperBound);
    }

    Ok(())
}

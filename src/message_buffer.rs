//! Size-bounded `ProtocolMessage` builder.
//!
//! RLE and delta-encoding make it expensive to compute an encoded message's
//! exact byte length before every single append, so this builder instead
//! keeps a running total built from conservative per-item margins (see
//! `config`) and checks that running total against the hard budget. A
//! `can_add_*`/`add_*` pair lets a caller decide what to do when a budget
//! would be exceeded, rather than forcing a rollback through a `Result`.
//!
//! If a margin ever turns out not to be conservative enough, the assertion
//! in `unwrap()` (which re-checks the real encoded size) will catch it —
//! that would mean a bug in the margin constants, not a caller error, so it
//! is a hard `panic!` rather than a recoverable `Result`.

use crate::config::{
    CHANGE_LENGTH_VARINT_SAFE_MARGIN, FINGERPRINT_SIZE, MAX_PROTOCOL_MESSAGE_RANGES_SIZE,
    MAX_PROTOCOL_MESSAGE_SIZE, REMAINING_RANGE_SAFE_MARGIN, SPLIT_RANGE_SAFE_MARGIN,
    TIMESTAMPS_RANGE_SAFE_MARGIN, TIMESTAMP_SAFE_MARGIN,
};
use crate::message::{encode_message, Header, ProtocolMessage, WireChange};
use crate::range::{Range, RangePayload};

pub struct MessageBuffer {
    header: Header,
    messages: Vec<WireChange>,
    ranges: Vec<Range>,
    total_max_size: usize,
    ranges_max_size: usize,
    /// Exact encoded length of the header, computed once at construction
    /// (the header's shape is fixed per message, so this is cheap and
    /// exact rather than a margin).
    base_size: usize,
    /// Running conservative estimate of the messages block's encoded size.
    messages_size_estimate: usize,
    /// Running conservative estimate of the ranges block's encoded size.
    ranges_size_estimate: usize,
    has_infinite_range: bool,
}

impl MessageBuffer {
    pub fn new(header: Header) -> Self {
        Self::with_limits(header, MAX_PROTOCOL_MESSAGE_SIZE, MAX_PROTOCOL_MESSAGE_RANGES_SIZE)
    }

    pub fn with_limits(header: Header, total_max_size: usize, ranges_max_size: usize) -> Self {
        let mut probe = crate::buffer::WriteBuffer::new();
        crate::message::encode_header(&mut probe, &header);
        let base_size = probe.len();
        Self {
            header,
            messages: Vec::new(),
            ranges: Vec::new(),
            total_max_size,
            ranges_max_size,
            base_size,
            messages_size_estimate: 0,
            ranges_size_estimate: 0,
            has_infinite_range: false,
        }
    }

    fn current_total_size(&self) -> usize {
        self.base_size + self.messages_size_estimate + self.ranges_size_estimate
    }

    pub fn can_add_message(&self, change_len: usize) -> bool {
        self.current_total_size() + TIMESTAMP_SAFE_MARGIN + CHANGE_LENGTH_VARINT_SAFE_MARGIN + change_len
            <= self.total_max_size
    }

    pub fn add_message(&mut self, message: WireChange) {
        let increment = TIMESTAMP_SAFE_MARGIN + CHANGE_LENGTH_VARINT_SAFE_MARGIN + message.change.len();
        self.messages.push(message);
        self.messages_size_estimate += increment;
        assert!(
            self.current_total_size() <= self.total_max_size,
            "message buffer exceeded totalMaxSize after add_message: {} > {}",
            self.current_total_size(),
            self.total_max_size
        );
    }

    pub fn can_split_range(&self) -> bool {
        self.ranges_size_estimate + SPLIT_RANGE_SAFE_MARGIN <= self.ranges_max_size
    }

    /// Checks both budgets for appending a `TimestampsRange` of `timestamps`
    /// plus, optionally, one more message alongside it.
    pub fn can_add_timestamps_range_and_message(
        &self,
        timestamps_count: usize,
        optional_change_len: Option<usize>,
    ) -> bool {
        let range_increment =
            TIMESTAMPS_RANGE_SAFE_MARGIN + timestamps_count * TIMESTAMP_SAFE_MARGIN;
        let message_increment = match optional_change_len {
            Some(len) => TIMESTAMP_SAFE_MARGIN + CHANGE_LENGTH_VARINT_SAFE_MARGIN + len,
            None => 0,
        };
        self.ranges_size_estimate + range_increment <= self.ranges_max_size
            && self.current_total_size() + range_increment + message_increment <= self.total_max_size
    }

    fn range_size_increment(range: &Range) -> usize {
        match &range.payload {
            RangePayload::Skip => REMAINING_RANGE_SAFE_MARGIN,
            RangePayload::Fingerprint(_) => FINGERPRINT_SIZE + TIMESTAMP_SAFE_MARGIN,
            RangePayload::Timestamps(timestamps) => {
                TIMESTAMPS_RANGE_SAFE_MARGIN + timestamps.len() * TIMESTAMP_SAFE_MARGIN
            }
        }
    }

    /// Appends a range. Panics if an infinite-upper-bound range has already
    /// been added (a message may contain at most one, per the data-model
    /// invariant) or if doing so would exceed either budget — both are
    /// caller bugs the `can_*` predicates exist to prevent.
    pub fn add_range(&mut self, range: Range) {
        assert!(
            !self.has_infinite_range,
            "attempted to add_range after an infinite-upper-bound range was already added"
        );
        if range.upper_bound.is_infinite() {
            self.has_infinite_range = true;
        }
        let increment = Self::range_size_increment(&range);
        self.ranges.push(range);
        self.ranges_size_estimate += increment;
        assert!(
            self.ranges_size_estimate <= self.ranges_max_size,
            "message buffer exceeded rangesMaxSize after add_range: {} > {}",
            self.ranges_size_estimate,
            self.ranges_max_size
        );
        assert!(
            self.current_total_size() <= self.total_max_size,
            "message buffer exceeded totalMaxSize after add_range: {} > {}",
            self.current_total_size(),
            self.total_max_size
        );
    }

    pub fn has_infinite_range(&self) -> bool {
        self.has_infinite_range
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn has_non_skip_range(&self) -> bool {
        self.ranges
            .iter()
            .any(|r| !matches!(r.payload, RangePayload::Skip))
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Finalizes the buffer into wire bytes. Re-validates the true encoded
    /// size against both budgets — the margins above are conservative, so
    /// this should never trip in a correct build.
    pub fn unwrap(self) -> Vec<u8> {
        let message = ProtocolMessage {
            header: self.header,
            messages: self.messages,
            ranges: self.ranges,
        };
        let bytes = encode_message(&message);
        assert!(
            bytes.len() <= self.total_max_size,
            "finalized message exceeded totalMaxSize: {} > {}",
            bytes.len(),
            self.total_max_size
        );
        bytes
    }
}

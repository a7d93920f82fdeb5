//! Append-only byte buffer: the sole low-level I/O surface the codec uses.

/// A growable output buffer with truncate/reset primitives.
///
/// This is intentionally thin — a `Vec<u8>` with a couple of named
/// operations — so every encoder in `codec` shares one mutation surface
/// instead of each hand-rolling `Vec::push`/`extend_from_slice` calls.
#[derive(Debug, Default, Clone)]
pub struct WriteBuffer {
    bytes: Vec<u8>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(cap),
        }
    }

    pub fn push_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn push_bytes(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drops the buffer back to `len` bytes. Used to roll back a tentative
    /// append that a `can_add_*` check approved but a subsequent assertion
    /// found violated a budget (should never happen; see `message_buffer`).
    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

/// A read cursor over a borrowed byte slice, tracking position so decoders
/// can be written as a sequence of small `read_*` calls that advance the
/// cursor and report how many bytes they consumed.
#[derive(Debug, Clone, Copy)]
pub struct ReadCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        let b = self.bytes.get(self.pos).copied()?;
        self.pos += 1;
        Some(b)
    }

    /// Reads exactly `n` bytes, or returns `None` without advancing if fewer
    /// than `n` remain.
    pub fn read_n(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    /// Remaining unread bytes, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.bytes.len());
    }
}

//! Error taxonomy for the sync core.

use thiserror::Error;

/// An opaque owner identity, copied into error variants for logging.
pub type OwnerIdBytes = [u8; crate::config::OWNER_ID_LENGTH];

/// Errors surfaced while decoding wire primitives.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    #[error("varint exceeds {0} bytes")]
    VarIntTooLong(usize),
    #[error("unexpected end of buffer, needed {needed} more bytes, had {available}")]
    UnexpectedEof { needed: usize, available: usize },
    #[error("length-prefixed value exceeds maximum of {max} bytes: {actual}")]
    LengthExceeded { max: usize, actual: usize },
    #[error("unknown range type tag: {0}")]
    UnknownRangeType(u8),
    #[error("unknown value type tag: {0}")]
    UnknownValueType(u8),
    #[error("unknown message type tag: {0}")]
    UnknownMessageType(u8),
    #[error("unknown error code tag: {0}")]
    UnknownErrorCode(u8),
    #[error("malformed MessagePack payload: {0}")]
    MessagePack(String),
    #[error("json value did not round-trip through canonical encoding")]
    JsonRoundTrip,
    #[error("ranges block: expected last range's upper bound to be infinite")]
    MissingInfiniteUpperBound,
    #[error("ranges block: more than one infinite-upper-bound range present")]
    DuplicateInfiniteUpperBound,
    #[error("ranges block upper bounds are not strictly increasing")]
    RangesNotIncreasing,
    #[error("embedded timestamp in change plaintext did not match the outer wire timestamp")]
    EmbeddedTimestampMismatch,
}

/// Errors surfaced by the AEAD reference implementation.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DecryptError {
    #[error("authentication tag mismatch")]
    TagMismatch,
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
}

/// Top-level error taxonomy (spec §7).
#[derive(Debug, Error)]
pub enum SyncCoreError {
    #[error("unsupported protocol version {unsupported_version} (initiator: {is_initiator})")]
    UnsupportedVersion {
        unsupported_version: u64,
        is_initiator: bool,
    },

    #[error("invalid data: {0}")]
    InvalidData(#[from] DecodeError),

    #[error("write key rejected for owner {owner:?}")]
    WriteKeyError { owner: OwnerIdBytes },

    #[error("storage refused write for owner {owner:?}: {reason}")]
    WriteError { owner: OwnerIdBytes, reason: String },

    #[error("sync aborted for owner {owner:?}: storage read returned nothing")]
    SyncError { owner: OwnerIdBytes },

    /// Not raised by the relay/client envelope functions in this crate —
    /// they never hold an AEAD key and so never decrypt (see DESIGN.md,
    /// "Relays never decrypt."). A host that calls
    /// `EncryptedDbChange::decrypt_and_decode` itself after a sync round and
    /// gets back `DecodeError::EmbeddedTimestampMismatch` can lift it into
    /// this owner-scoped variant to keep its own error handling aligned with
    /// this taxonomy.
    #[error("timestamp mismatch for owner {owner:?}: embedded timestamp did not match outer timestamp")]
    TimestampMismatch { owner: OwnerIdBytes },

    #[error("storage backend error: {0}")]
    Storage(#[from] StorageError),

    #[error("decrypt failed: {0}")]
    Decrypt(#[from] DecryptError),
}

/// Maps a [`SyncCoreError`] onto the wire-level response error code (§7),
/// where one exists. Variants with no wire representation (decode failures,
/// version mismatches) are handled earlier in the envelope and never reach
/// the point where a response error code is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError = 0,
    WriteKeyError = 1,
    WriteError = 2,
    SyncError = 3,
}

impl ErrorCode {
    pub fn from_wire(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(ErrorCode::NoError),
            1 => Ok(ErrorCode::WriteKeyError),
            2 => Ok(ErrorCode::WriteError),
            3 => Ok(ErrorCode::SyncError),
            other => Err(DecodeError::UnknownErrorCode(other)),
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Errors from the reference storage backend. Kept distinct from
/// [`SyncCoreError`] so a `Storage` implementation can be written against a
/// narrow error type without depending on the whole crate's error enum.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

//! Wire-format and size constants.
//!
//! Every tunable the codec and sync engine rely on lives here as a single
//! named constant rather than scattered through the modules that use it. A
//! host embedding this crate can read these values but changing them without
//! also changing the peers it talks to breaks wire compatibility — they are
//! not meant to be runtime-configurable.

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u64 = 0;

/// Hard cap on a single `ProtocolMessage`, in bytes.
pub const MAX_PROTOCOL_MESSAGE_SIZE: usize = 1_000_000;

/// Hard cap on the ranges portion of a single `ProtocolMessage`, in bytes.
pub const MAX_PROTOCOL_MESSAGE_RANGES_SIZE: usize = 30_000;

/// Hard cap on one plaintext mutation before AEAD encryption and padding.
pub const MAX_MUTATION_SIZE: usize = 655_360;

/// Byte length of a fingerprint (truncated SHA-256 digest).
pub const FINGERPRINT_SIZE: usize = 12;

/// Byte length of an owner id.
pub const OWNER_ID_LENGTH: usize = 16;

/// Byte length of a write key.
pub const WRITE_KEY_LENGTH: usize = 32;

/// Byte length of a node id component of a timestamp.
pub const NODE_ID_LENGTH: usize = 8;

/// Byte length of a canonical timestamp (millis + counter + node id).
pub const TIMESTAMP_BYTES_LENGTH: usize = 14;

/// Maximum bytes a VarUInt may occupy on the wire.
pub const MAX_VARINT_BYTES: usize = 8;

/// Maximum local clock drift tolerated when minting a new timestamp.
pub const MAX_CLOCK_DRIFT_MS: u64 = 5 * 60 * 1000;

/// Maximum logical counter value within one millisecond.
pub const MAX_COUNTER: u32 = 0xFFFF;

/// Conservative reserved bytes for one more range of arbitrary shape
/// (fingerprint range's worst-case header plus payload).
pub const REMAINING_RANGE_SAFE_MARGIN: usize = FINGERPRINT_SIZE + 10;

/// Conservative reserved bytes for one more encoded timestamp.
pub const TIMESTAMP_SAFE_MARGIN: usize = 30;

/// Conservative reserved bytes for one change's length prefix.
pub const CHANGE_LENGTH_VARINT_SAFE_MARGIN: usize = 8;

/// Conservative reserved bytes for one more timestamps-range payload.
pub const TIMESTAMPS_RANGE_SAFE_MARGIN: usize = 50;

/// Conservative reserved bytes for the worst-case burst produced by
/// splitting one range into balanced buckets.
pub const SPLIT_RANGE_SAFE_MARGIN: usize = 800;

/// Minimum item count below which a range is emitted as explicit timestamps
/// rather than split into fingerprint buckets.
pub const MIN_ITEMS_TO_SPLIT: usize = 32;

/// Target bucket count when splitting a range for drill-down.
pub const BALANCED_BUCKET_COUNT: usize = 16;

/// Nonce length for the reference AEAD (XChaCha20-Poly1305).
pub const AEAD_NONCE_LENGTH: usize = 24;

/// PADMÉ padding bucket exponent: length is hidden to within one part in
/// `2^PADME_S` of its true value.
pub const PADME_S: u32 = 4;

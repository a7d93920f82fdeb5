//! Binary synchronization protocol core for a local-first data platform:
//! wire codec, hybrid-logical-clock timestamps and fingerprints, a
//! range-based set reconciliation engine, a size-bounded message builder,
//! the storage contract the engine runs against, and the request/response
//! envelope that wires all of it together.

pub mod buffer;
pub mod change;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod message;
pub mod message_buffer;
pub mod protocol;
pub mod range;
pub mod storage;
pub mod sync;
pub mod timestamp;

pub use change::EncryptedDbChange;
pub use crypto::{Aead, XChaCha20Poly1305Aead};
pub use error::{DecodeError, DecryptError, ErrorCode, StorageError, SyncCoreError};
pub use message::{Header, HeaderKind, MessageType, OwnerId, ProtocolMessage, WireChange, WriteKey};
pub use message_buffer::MessageBuffer;
pub use protocol::{apply_as_client, apply_as_relay, build_broadcast, peek_version, BroadcastSink, ClientOutcome, RelayOutcome};
pub use range::{Range, RangePayload, RangeUpperBound};
pub use storage::{SqliteStorage, Storage};
pub use sync::{initial_ranges, run_round};
pub use timestamp::{Fingerprint, Timestamp};

//! `EncryptedDbChange`: the plaintext a change decrypts to, and the PADMÉ
//! length-hiding padding applied before encryption.

use crate::buffer::{ReadCursor, WriteBuffer};
use crate::codec::value::{decode_value, encode_value, SqliteValue};
use crate::codec::{decode_bytes_owned, decode_varuint, encode_bytes, encode_varuint};
use crate::config::PADME_S;
use crate::crypto::{frame_encrypted_blob, unframe_encrypted_blob, Aead};
use crate::error::{DecodeError, DecryptError};
use crate::timestamp::Timestamp;

const PLAINTEXT_VERSION: u8 = 0;
const MAX_TABLE_NAME_LEN: usize = 256;
const MAX_COLUMN_NAME_LEN: usize = 256;
const ROW_ID_LEN: usize = 16;
const MAX_COLUMNS: u64 = 4096;

/// A row-id is a 16-byte opaque identifier, matching the `Id` typed-value
/// tag's width.
pub type RowId = [u8; ROW_ID_LEN];

/// The plaintext that travels inside a change's AEAD ciphertext: the
/// timestamp this change is filed under (checked against the outer wire
/// timestamp on decrypt — see spec data-model invariant 7), the target
/// table and row, and a column-name to typed-value map.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedDbChange {
    pub timestamp: Timestamp,
    pub table: String,
    pub row_id: RowId,
    pub columns: Vec<(String, SqliteValue)>,
}

impl EncryptedDbChange {
    /// Encodes the plaintext and pads it to a PADMÉ length bucket. The
    /// returned bytes are what gets handed to the AEAD layer as plaintext.
    pub fn to_padded_plaintext(&self) -> Vec<u8> {
        let mut buf = WriteBuffer::new();
        buf.push_byte(PLAINTEXT_VERSION);
        buf.push_bytes(&self.timestamp.to_canonical_bytes());
        encode_bytes(&mut buf, self.table.as_bytes());
        buf.push_bytes(&self.row_id);
        encode_varuint(&mut buf, self.columns.len() as u64);
        for (name, value) in &self.columns {
            encode_bytes(&mut buf, name.as_bytes());
            encode_value(&mut buf, value);
        }
        let unpadded = buf.into_vec();
        pad_padme(unpadded)
    }

    /// Decodes a (still-padded) plaintext buffer, ignoring trailing padding
    /// bytes past the logical content — the content is fully self-delimiting
    /// via length prefixes and the column count, so padding never needs its
    /// own length field.
    pub fn from_padded_plaintext(
        plaintext: &[u8],
        outer_timestamp: Timestamp,
    ) -> Result<EncryptedDbChange, DecodeError> {
        let mut cur = ReadCursor::new(plaintext);
        let version = cur.read_byte().ok_or(DecodeError::UnexpectedEof {
            needed: 1,
            available: 0,
        })?;
        if version != PLAINTEXT_VERSION {
            return Err(DecodeError::MessagePack(format!(
                "unsupported change plaintext version {version}"
            )));
        }

        let ts_bytes = cur
            .read_n(Timestamp::BYTES_LENGTH)
            .ok_or(DecodeError::UnexpectedEof {
                needed: Timestamp::BYTES_LENGTH,
                available: cur.remaining(),
            })?;
        if ts_bytes != outer_timestamp.to_canonical_bytes() {
            return Err(DecodeError::EmbeddedTimestampMismatch);
        }

        let table_bytes = decode_bytes_owned(&mut cur, MAX_TABLE_NAME_LEN)?;
        let table = String::from_utf8(table_bytes)
            .map_err(|e| DecodeError::MessagePack(format!("invalid utf-8 table name: {e}")))?;

        let row_slice = cur.read_n(ROW_ID_LEN).ok_or(DecodeError::UnexpectedEof {
            needed: ROW_ID_LEN,
            available: cur.remaining(),
        })?;
        let mut row_id = [0u8; ROW_ID_LEN];
        row_id.copy_from_slice(row_slice);

        let column_count = decode_varuint(&mut cur)?;
        if column_count > MAX_COLUMNS {
            return Err(DecodeError::LengthExceeded {
                max: MAX_COLUMNS as usize,
                actual: column_count as usize,
            });
        }
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let name_bytes = decode_bytes_owned(&mut cur, MAX_COLUMN_NAME_LEN)?;
            let name = String::from_utf8(name_bytes)
                .map_err(|e| DecodeError::MessagePack(format!("invalid utf-8 column name: {e}")))?;
            let value = decode_value(&mut cur)?;
            columns.push((name, value));
        }

        Ok(EncryptedDbChange {
            timestamp: outer_timestamp,
            table,
            row_id,
            columns,
        })
    }

    /// Encrypts this change under `aead` and frames it as the opaque
    /// `nonce ∥ ciphertext-length ∥ ciphertext` blob (§3) that is the actual
    /// bit pattern carried on the wire and stored by a `Storage`
    /// implementation — the sync core and a relay only ever handle these
    /// bytes verbatim, never this struct, since neither holds the AEAD key
    /// (key derivation is out of scope, §1).
    pub fn encrypt(&self, aead: &impl Aead) -> Vec<u8> {
        let plaintext = self.to_padded_plaintext();
        let (nonce, ciphertext) = aead.encrypt(&plaintext);
        frame_encrypted_blob(&nonce, &ciphertext)
    }

    /// Inverse of [`EncryptedDbChange::encrypt`]: unframes the blob,
    /// decrypts it under `aead`, and checks the embedded timestamp against
    /// `outer_timestamp` (data-model invariant 7). Only a party holding the
    /// owner's AEAD key — the owning client, not a relay — can call this.
    pub fn decrypt_and_decode(
        blob: &[u8],
        aead: &impl Aead,
        outer_timestamp: Timestamp,
    ) -> Result<EncryptedDbChange, DecodeError> {
        let (nonce, ciphertext) =
            unframe_encrypted_blob(blob).map_err(|e| DecodeError::MessagePack(e.to_string()))?;
        let plaintext = aead
            .decrypt(&ciphertext, &nonce)
            .map_err(|_: DecryptError| DecodeError::MessagePack("decrypt failed".into()))?;
        Self::from_padded_plaintext(&plaintext, outer_timestamp)
    }
}

/// PADMÉ padding (Pfitzmann et al.): pads `len(data)` up to the smallest
/// bucket boundary such that the leaked length information is bounded to
/// `O(log log L)` bits, controlled by `PADME_S`. Buckets get coarser as `L`
/// grows, which is what keeps the padding overhead sublinear.
pub fn pad_padme(mut data: Vec<u8>) -> Vec<u8> {
    let len = data.len();
    let target = padme_bucket(len);
    data.resize(target, 0);
    data
}

fn padme_bucket(len: usize) -> usize {
    if len <= 1 {
        return 1;
    }
    let e = usize::BITS - 1 - (len as u64).leading_zeros() as u32; // floor(log2(len))
    let s = PADME_S.min(e);
    let mask = (1usize << (e - s)) - 1;
    (len + mask) & !mask
}

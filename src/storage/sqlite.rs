//! Reference `Storage` implementation backed by `rusqlite`.
//!
//! One connection per `SqliteStorage`, opened WAL-mode and guarded by a
//! `Mutex` — the sync engine never needs concurrent access to one owner's
//! connection (§5: single-threaded per owner), so a simple mutex is enough
//! rather than a connection pool.

use crate::config::WRITE_KEY_LENGTH;
use crate::error::StorageError;
use crate::message::OwnerId;
use crate::range::RangeUpperBound;
use crate::storage::{balanced_bucket_bounds, FingerprintRange, Storage};
use crate::timestamp::{Fingerprint, Timestamp};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS evolu_timestamp (
                ownerId BLOB NOT NULL,
                ts BLOB NOT NULL,
                PRIMARY KEY (ownerId, ts)
            ) STRICT;
            CREATE TABLE IF NOT EXISTS evolu_message (
                ownerId BLOB NOT NULL,
                ts BLOB NOT NULL,
                change BLOB NOT NULL,
                PRIMARY KEY (ownerId, ts)
            ) STRICT;
            CREATE TABLE IF NOT EXISTS evolu_writeKey (
                ownerId BLOB PRIMARY KEY,
                writeKey BLOB NOT NULL
            ) STRICT;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn ordered_timestamps(conn: &Connection, owner: &OwnerId) -> Result<Vec<[u8; 14]>, StorageError> {
        let mut stmt =
            conn.prepare_cached("SELECT ts FROM evolu_timestamp WHERE ownerId = ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![owner.as_slice()], |row| {
            let bytes: Vec<u8> = row.get(0)?;
            Ok(bytes)
        })?;
        let mut out = Vec::new();
        for row in rows {
            let bytes = row?;
            let mut arr = [0u8; 14];
            arr.copy_from_slice(&bytes[..14]);
            out.push(arr);
        }
        Ok(out)
    }
}

impl Storage for SqliteStorage {
    fn size(&self, owner: &OwnerId) -> Result<Option<usize>, StorageError> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM evolu_timestamp WHERE ownerId = ?1",
            params![owner.as_slice()],
            |row| row.get(0),
        )?;
        Ok(Some(count as usize))
    }

    fn fingerprint(&self, owner: &OwnerId, lo: usize, hi: usize) -> Result<Option<Fingerprint>, StorageError> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let all = Self::ordered_timestamps(&conn, owner)?;
        if lo > hi || hi > all.len() {
            return Ok(None);
        }
        let fp = all[lo..hi]
            .iter()
            .map(|bytes| canonical_bytes_fingerprint(bytes))
            .fold(Fingerprint::ZERO, Fingerprint::xor);
        Ok(Some(fp))
    }

    fn fingerprint_ranges(
        &self,
        owner: &OwnerId,
        lo: usize,
        hi: usize,
        bucket_count: usize,
    ) -> Result<Option<Vec<FingerprintRange>>, StorageError> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let all = Self::ordered_timestamps(&conn, owner)?;
        if lo > hi || hi > all.len() {
            return Ok(None);
        }
        let bounds = balanced_bucket_bounds(lo, hi, bucket_count);
        let mut out = Vec::with_capacity(bounds.len());
        let mut cursor = lo;
        for upper in bounds {
            let fp = all[cursor..upper]
                .iter()
                .map(|bytes| canonical_bytes_fingerprint(bytes))
                .fold(Fingerprint::ZERO, Fingerprint::xor);
            out.push(FingerprintRange {
                upper_index: upper,
                fingerprint: fp,
            });
            cursor = upper;
        }
        Ok(Some(out))
    }

    fn find_lower_bound(
        &self,
        owner: &OwnerId,
        lo: usize,
        hi: usize,
        upper_bound: RangeUpperBound,
    ) -> Result<Option<usize>, StorageError> {
        let RangeUpperBound::Finite(bound_ts) = upper_bound else {
            return Ok(Some(hi));
        };
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let all = Self::ordered_timestamps(&conn, owner)?;
        if lo > hi || hi > all.len() {
            return Ok(None);
        }
        let bound_bytes = bound_ts.to_canonical_bytes();
        for (i, bytes) in all[lo..hi].iter().enumerate() {
            if bytes[..] > bound_bytes[..] {
                return Ok(Some(lo + i));
            }
        }
        Ok(Some(hi))
    }

    fn iterate(
        &self,
        owner: &OwnerId,
        lo: usize,
        hi: usize,
        visit: &mut dyn FnMut(usize, Timestamp) -> bool,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let all = Self::ordered_timestamps(&conn, owner)?;
        let hi = hi.min(all.len());
        for (i, bytes) in all.iter().enumerate().take(hi).skip(lo) {
            let ts = timestamp_from_canonical_bytes(bytes);
            if !visit(i, ts) {
                break;
            }
        }
        Ok(())
    }

    fn validate_write_key(&self, owner: &OwnerId, key: &[u8; WRITE_KEY_LENGTH]) -> Result<bool, StorageError> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let existing: Option<Vec<u8>> = conn
            .query_row(
                "SELECT writeKey FROM evolu_writeKey WHERE ownerId = ?1",
                params![owner.as_slice()],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO evolu_writeKey (ownerId, writeKey) VALUES (?1, ?2)",
                    params![owner.as_slice(), key.as_slice()],
                )?;
                Ok(true)
            }
            Some(stored) => Ok(constant_time_eq(&stored, key)),
        }
    }

    fn write_messages(&self, owner: &OwnerId, messages: &[(Timestamp, Vec<u8>)]) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        for (ts, blob) in messages {
            let ts_bytes = ts.to_canonical_bytes();
            tx.execute(
                "INSERT OR IGNORE INTO evolu_timestamp (ownerId, ts) VALUES (?1, ?2)",
                params![owner.as_slice(), ts_bytes.as_slice()],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO evolu_message (ownerId, ts, change) VALUES (?1, ?2, ?3)",
                params![owner.as_slice(), ts_bytes.as_slice(), blob.as_slice()],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn read_change(&self, owner: &OwnerId, ts: Timestamp) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let ts_bytes = ts.to_canonical_bytes();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT change FROM evolu_message WHERE ownerId = ?1 AND ts = ?2",
                params![owner.as_slice(), ts_bytes.as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob)
    }

    fn delete_owner(&self, owner: &OwnerId) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM evolu_timestamp WHERE ownerId = ?1",
            params![owner.as_slice()],
        )?;
        tx.execute(
            "DELETE FROM evolu_message WHERE ownerId = ?1",
            params![owner.as_slice()],
        )?;
        tx.execute(
            "DELETE FROM evolu_writeKey WHERE ownerId = ?1",
            params![owner.as_slice()],
        )?;
        tx.commit()?;
        Ok(true)
    }
}

fn canonical_bytes_fingerprint(bytes: &[u8; 14]) -> Fingerprint {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; crate::config::FINGERPRINT_SIZE];
    out.copy_from_slice(&digest[0..crate::config::FINGERPRINT_SIZE]);
    Fingerprint(out)
}

fn timestamp_from_canonical_bytes(bytes: &[u8; 14]) -> Timestamp {
    let mut millis_bytes = [0u8; 8];
    millis_bytes[2..8].copy_from_slice(&bytes[0..6]);
    let millis = u64::from_be_bytes(millis_bytes);
    let counter = u16::from_be_bytes([bytes[6], bytes[7]]) as u32;
    let mut node_id = [0u8; 8];
    node_id[0..6].copy_from_slice(&bytes[8..14]);
    Timestamp {
        millis,
        counter,
        node_id,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::EncryptedDbChange;
    use crate::config::OWNER_ID_LENGTH;
    use crate::crypto::XChaCha20Poly1305Aead;

    fn owner() -> OwnerId {
        [7u8; OWNER_ID_LENGTH]
    }

    fn ts(millis: u64, counter: u32) -> Timestamp {
        Timestamp {
            millis,
            counter,
            node_id: [1; 8],
        }
    }

    /// Storage only ever moves opaque encrypted blob bytes — this test
    /// helper encrypts under a throwaway key so the bytes written are
    /// realistic, not a stand-in for the real wire bytes.
    fn change(ts: Timestamp, table: &str) -> Vec<u8> {
        let aead = XChaCha20Poly1305Aead::new(&[9u8; 32]);
        EncryptedDbChange {
            timestamp: ts,
            table: table.into(),
            row_id: [0; 16],
            columns: vec![],
        }
        .encrypt(&aead)
    }

    #[test]
    fn empty_storage_reports_zero_size_and_zero_fingerprint() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let owner = owner();
        assert_eq!(storage.size(&owner).unwrap(), Some(0));
        assert_eq!(storage.fingerprint(&owner, 0, 0).unwrap(), Some(Fingerprint::ZERO));
    }

    #[test]
    fn write_then_read_roundtrips() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let owner = owner();
        let t = ts(1000, 0);
        storage
            .write_messages(&owner, &[(t, change(t, "todos"))])
            .unwrap();
        assert_eq!(storage.size(&owner).unwrap(), Some(1));
        let blob = storage.read_change(&owner, t).unwrap().unwrap();
        let aead = XChaCha20Poly1305Aead::new(&[9u8; 32]);
        let decoded = EncryptedDbChange::decrypt_and_decode(&blob, &aead, t).unwrap();
        assert_eq!(decoded.table, "todos");
    }

    #[test]
    fn write_is_idempotent() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let owner = owner();
        let t = ts(1000, 0);
        storage
            .write_messages(&owner, &[(t, change(t, "todos"))])
            .unwrap();
        storage
            .write_messages(&owner, &[(t, change(t, "todos"))])
            .unwrap();
        assert_eq!(storage.size(&owner).unwrap(), Some(1));
    }

    #[test]
    fn fingerprint_matches_xor_of_individual_fingerprints() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let owner = owner();
        let t1 = ts(1000, 0);
        let t2 = ts(1001, 0);
        storage
            .write_messages(&owner, &[(t1, change(t1, "a")), (t2, change(t2, "b"))])
            .unwrap();
        let fp = storage.fingerprint(&owner, 0, 2).unwrap().unwrap();
        assert_eq!(fp, t1.fingerprint().xor(t2.fingerprint()));
    }

    #[test]
    fn write_key_trust_on_first_use_then_rejects_mismatch() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let owner = owner();
        let key_a = [1u8; WRITE_KEY_LENGTH];
        let key_b = [2u8; WRITE_KEY_LENGTH];
        assert!(storage.validate_write_key(&owner, &key_a).unwrap());
        assert!(storage.validate_write_key(&owner, &key_a).unwrap());
        assert!(!storage.validate_write_key(&owner, &key_b).unwrap());
    }

    #[test]
    fn delete_owner_removes_all_rows() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let owner = owner();
        let t = ts(1000, 0);
        storage
            .write_messages(&owner, &[(t, change(t, "todos"))])
            .unwrap();
        storage.validate_write_key(&owner, &[3u8; WRITE_KEY_LENGTH]).unwrap();
        storage.delete_owner(&owner).unwrap();
        assert_eq!(storage.size(&owner).unwrap(), Some(0));
        assert!(storage.validate_write_key(&owner, &[4u8; WRITE_KEY_LENGTH]).unwrap());
    }

    #[test]
    fn find_lower_bound_returns_hi_for_infinite_bound() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let owner = owner();
        let t = ts(1000, 0);
        storage
            .write_messages(&owner, &[(t, change(t, "todos"))])
            .unwrap();
        let bound = storage
            .find_lower_bound(&owner, 0, 1, RangeUpperBound::Infinite)
            .unwrap();
        assert_eq!(bound, Some(1));
    }
}

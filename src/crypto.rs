//! Symmetric AEAD contract and its reference implementation.
//!
//! The protocol only depends on the three-operation contract in `Aead`;
//! `XChaCha20Poly1305Aead` is one concrete implementation of it, chosen per
//! spec §6's recommendation (IND-CCA2, large nonce space). A host free to
//! swap in a different AEAD need only implement the trait.

use crate::config::AEAD_NONCE_LENGTH;
use crate::error::DecryptError;
use chacha20poly1305::aead::{Aead as _, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;

pub type Nonce = [u8; AEAD_NONCE_LENGTH];

pub trait Aead {
    const NONCE_LENGTH: usize;

    fn encrypt(&self, plaintext: &[u8]) -> (Nonce, Vec<u8>);
    fn decrypt(&self, ciphertext: &[u8], nonce: &Nonce) -> Result<Vec<u8>, DecryptError>;
}

/// XChaCha20-Poly1305 with a 32-byte key and a CSPRNG-drawn 24-byte nonce
/// per message. A random nonce (rather than a counter) is appropriate here
/// because changes from many nodes may be encrypted under the same key
/// without any shared nonce-counter state between them.
pub struct XChaCha20Poly1305Aead {
    cipher: XChaCha20Poly1305,
}

impl XChaCha20Poly1305Aead {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }
}

impl Aead for XChaCha20Poly1305Aead {
    const NONCE_LENGTH: usize = AEAD_NONCE_LENGTH;

    fn encrypt(&self, plaintext: &[u8]) -> (Nonce, Vec<u8>) {
        let mut nonce_bytes = [0u8; AEAD_NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .expect("XChaCha20Poly1305 encryption does not fail for valid inputs");
        (nonce_bytes, ciphertext)
    }

    fn decrypt(&self, ciphertext: &[u8], nonce: &Nonce) -> Result<Vec<u8>, DecryptError> {
        let nonce = XNonce::from_slice(nonce);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| DecryptError::TagMismatch)
    }
}

/// Generates a fresh random 32-byte AEAD key.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Wire framing for one `EncryptedDbChange`: nonce, then length-prefixed
/// ciphertext, matching §3's "nonce ∥ ciphertext-length ∥ ciphertext"
/// layout for the opaque blob a `Storage` stores and a protocol message
/// carries.
pub fn frame_encrypted_blob(nonce: &Nonce, ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nonce.len() + 8 + ciphertext.len());
    out.extend_from_slice(nonce);
    let mut buf = crate::buffer::WriteBuffer::new();
    crate::codec::encode_bytes(&mut buf, ciphertext);
    out.extend_from_slice(buf.as_slice());
    out
}

pub fn unframe_encrypted_blob(blob: &[u8]) -> Result<(Nonce, Vec<u8>), DecryptError> {
    if blob.len() < AEAD_NONCE_LENGTH {
        return Err(DecryptError::Malformed("blob shorter than nonce".into()));
    }
    let mut nonce = [0u8; AEAD_NONCE_LENGTH];
    nonce.copy_from_slice(&blob[0..AEAD_NONCE_LENGTH]);
    let mut cur = crate::buffer::ReadCursor::new(&blob[AEAD_NONCE_LENGTH..]);
    let ciphertext = crate::codec::decode_bytes_owned(&mut cur, blob.len())
        .map_err(|e| DecryptError::Malformed(e.to_string()))?;
    Ok((nonce, ciphertext))
}

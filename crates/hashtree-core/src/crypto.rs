//! Convergent-Hash Key (CHK) encryption.
//!
//! The key for a plaintext blob is its own digest, so two independent
//! encryptions of the same plaintext converge on the same key, the same
//! ciphertext, and therefore the same stored address — deduplication
//! survives encryption.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use thiserror::Error;

use crate::hash::sha256;
use crate::types::{EncryptionKey, Hash};

const NONCE_LEN: usize = 12;
/// ChaCha20-Poly1305 appends a 16-byte authentication tag.
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("decryption failed: authenticator mismatch")]
    DecryptionFailed,
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("ciphertext too short to contain an authentication tag")]
    CiphertextTooShort,
}

fn nonce_from_key(key: &EncryptionKey) -> Nonce {
    *Nonce::from_slice(&key[..NONCE_LEN])
}

/// `K = sha256(P)` — the deterministic CHK key for a plaintext.
pub fn content_hash(plaintext: &[u8]) -> Hash {
    sha256(plaintext)
}

/// Encrypt `plaintext` under `key` with the deterministic CHK nonce.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = nonce_from_key(key);
    cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Decrypt `ciphertext` under `key`, failing on authenticator mismatch.
pub fn decrypt(ciphertext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::CiphertextTooShort);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = nonce_from_key(key);
    cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Full CHK flow for a blob: derive `K = hash(P)`, encrypt, return
/// `(ciphertext, key)`. The caller stores the ciphertext at `hash(ciphertext)`
/// and builds a `Cid { hash: hash(ciphertext), key: Some(K) }`.
pub fn encrypt_chk(plaintext: &[u8]) -> Result<(Vec<u8>, EncryptionKey), CryptoError> {
    let key = content_hash(plaintext);
    let ciphertext = encrypt(plaintext, &key)?;
    Ok((ciphertext, key))
}

/// Inverse of `encrypt_chk`: decrypt `ciphertext` under `key`.
pub fn decrypt_chk(ciphertext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    decrypt(ciphertext, key)
}

/// Could these bytes plausibly be CHK ciphertext? (Length sanity check
/// only — ciphertext is indistinguishable from random bytes otherwise.)
pub fn could_be_encrypted(bytes: &[u8]) -> bool {
    bytes.len() >= TAG_LEN
}

/// Size of the ciphertext for a plaintext of length `plaintext_len`.
pub fn encrypted_size(plaintext_len: u64) -> u64 {
    plaintext_len + TAG_LEN as u64
}

/// Alias kept for call sites that think in terms of "CHK-encrypted size".
pub fn encrypted_size_chk(plaintext_len: u64) -> u64 {
    encrypted_size(plaintext_len)
}

/// Inverse of `encrypted_size`: the plaintext size given a ciphertext length.
pub fn plaintext_size(ciphertext_len: u64) -> u64 {
    ciphertext_len.saturating_sub(TAG_LEN as u64)
}

/// Generate a fresh random 32-byte key (used for link secrets, not for CHK
/// content keys, which are always derived from plaintext).
pub fn generate_key() -> EncryptionKey {
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

pub fn key_from_hex(s: &str) -> Result<EncryptionKey, CryptoError> {
    let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidKeyLength(0))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength(len))
}

pub fn key_to_hex(key: &EncryptionKey) -> String {
    hex::encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chk_round_trip() {
        let plaintext = b"hello hashtree";
        let (ciphertext, key) = encrypt_chk(plaintext).unwrap();
        let decrypted = decrypt_chk(&ciphertext, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn chk_is_convergent() {
        let plaintext = b"same content twice";
        let (c1, k1) = encrypt_chk(plaintext).unwrap();
        let (c2, k2) = encrypt_chk(plaintext).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(c1, c2);
    }

    #[test]
    fn chk_key_is_plaintext_digest() {
        let plaintext = b"key derivation";
        let (_, key) = encrypt_chk(plaintext).unwrap();
        assert_eq!(key, content_hash(plaintext));
    }

    #[test]
    fn decrypt_rejects_tampered_ciphertext() {
        let (mut ciphertext, key) = encrypt_chk(b"tamper me").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(matches!(
            decrypt_chk(&ciphertext, &key),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn decrypt_rejects_wrong_key() {
        let (ciphertext, _) = encrypt_chk(b"wrong key test").unwrap();
        let wrong_key = [0xAAu8; 32];
        assert!(decrypt_chk(&ciphertext, &wrong_key).is_err());
    }

    #[test]
    fn size_accounting_round_trips() {
        let plaintext_len = 1234u64;
        let enc = encrypted_size(plaintext_len);
        assert_eq!(enc, plaintext_len + 16);
        assert_eq!(plaintext_size(enc), plaintext_len);
    }
}

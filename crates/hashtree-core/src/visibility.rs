//! Tree visibility tiers and the key-wrapping schemes that distinguish them.
//!
//! The three tiers differ only in how a root's CHK key is carried in the
//! reference record: plaintext (public), XOR-masked with a shared secret
//! (link-visible), or asymmetrically encrypted to the publisher (private).

use std::str::FromStr;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::hash::sha256;
use crate::types::EncryptionKey;

/// Tree visibility modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeVisibility {
    Public,
    LinkVisible,
    Private,
}

impl TreeVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeVisibility::Public => "public",
            TreeVisibility::LinkVisible => "link-visible",
            TreeVisibility::Private => "private",
        }
    }
}

impl FromStr for TreeVisibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "public" => Ok(TreeVisibility::Public),
            "link-visible" | "link_visible" | "linkvisible" | "unlisted" => {
                Ok(TreeVisibility::LinkVisible)
            }
            "private" => Ok(TreeVisibility::Private),
            _ => Err(format!("invalid visibility: {}", s)),
        }
    }
}

/// XOR two 32-byte keys (used for link-visible key masking)
pub fn xor_keys(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Mask a CHK key for link-visible publication: one-time-pad XOR against
/// the out-of-band link secret.
pub fn wrap_for_unlisted(chk_key: &EncryptionKey, link_secret: &[u8; 32]) -> EncryptionKey {
    xor_keys(chk_key, link_secret)
}

/// Recover a CHK key from its link-visible wrapping. Also accepts the
/// legacy 60-byte AEAD-wrapped form (12-byte nonce || 32-byte ciphertext ||
/// 16-byte tag) for backward compatibility with older reference records;
/// returns `None` on authenticator failure rather than erroring, so callers
/// can treat it as "this link secret doesn't open this record."
pub fn unwrap_from_unlisted(
    encrypted_key: &[u8],
    link_secret: &[u8; 32],
) -> Option<EncryptionKey> {
    if encrypted_key.len() == 32 {
        let masked: [u8; 32] = encrypted_key.try_into().ok()?;
        return Some(xor_keys(&masked, link_secret));
    }

    if encrypted_key.len() == 60 {
        let nonce = Nonce::from_slice(&encrypted_key[..12]);
        let ciphertext = &encrypted_key[12..];
        let cipher = ChaCha20Poly1305::new(Key::from_slice(link_secret));
        let plaintext = cipher.decrypt(nonce, ciphertext).ok()?;
        return plaintext.try_into().ok();
    }

    None
}

/// `derive_key_id(link_secret) -> 8 bytes`: the first 8 bytes of
/// `sha256(link_secret)`, carried in the reference record so a reader can
/// tell which link secret a wrapped key was produced for without trying
/// every secret it knows.
pub fn derive_key_id(link_secret: &[u8; 32]) -> [u8; 8] {
    let digest = sha256(link_secret);
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_parse() {
        assert_eq!(TreeVisibility::from_str("public").unwrap(), TreeVisibility::Public);
        assert_eq!(TreeVisibility::from_str("link-visible").unwrap(), TreeVisibility::LinkVisible);
        assert_eq!(TreeVisibility::from_str("link_visible").unwrap(), TreeVisibility::LinkVisible);
        assert_eq!(TreeVisibility::from_str("unlisted").unwrap(), TreeVisibility::LinkVisible);
        assert_eq!(TreeVisibility::from_str("private").unwrap(), TreeVisibility::Private);
        assert!(TreeVisibility::from_str("unknown").is_err());
    }

    #[test]
    fn test_xor_keys_roundtrip() {
        let a = [0x11u8; 32];
        let b = [0x22u8; 32];
        let masked = xor_keys(&a, &b);
        let unmasked = xor_keys(&masked, &b);
        assert_eq!(unmasked, a);
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let chk_key = [0x42u8; 32];
        let link_secret = [0x99u8; 32];
        let wrapped = wrap_for_unlisted(&chk_key, &link_secret);
        let unwrapped = unwrap_from_unlisted(&wrapped, &link_secret).unwrap();
        assert_eq!(unwrapped, chk_key);
    }

    #[test]
    fn unwrap_accepts_legacy_aead_form() {
        let chk_key = [0x55u8; 32];
        let link_secret = [0x77u8; 32];
        let nonce = Nonce::from_slice(b"legacy-nonc!");
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&link_secret));
        let ciphertext = cipher.encrypt(nonce, chk_key.as_slice()).unwrap();
        let mut legacy = Vec::with_capacity(60);
        legacy.extend_from_slice(nonce);
        legacy.extend_from_slice(&ciphertext);
        assert_eq!(legacy.len(), 60);

        let unwrapped = unwrap_from_unlisted(&legacy, &link_secret).unwrap();
        assert_eq!(unwrapped, chk_key);
    }

    #[test]
    fn unwrap_legacy_form_rejects_wrong_secret() {
        let chk_key = [0x55u8; 32];
        let link_secret = [0x77u8; 32];
        let nonce = Nonce::from_slice(b"legacy-nonc!");
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&link_secret));
        let ciphertext = cipher.encrypt(nonce, chk_key.as_slice()).unwrap();
        let mut legacy = Vec::with_capacity(60);
        legacy.extend_from_slice(nonce);
        legacy.extend_from_slice(&ciphertext);

        let wrong_secret = [0x01u8; 32];
        assert!(unwrap_from_unlisted(&legacy, &wrong_secret).is_none());
    }

    #[test]
    fn derive_key_id_is_stable() {
        let secret = [0x13u8; 32];
        assert_eq!(derive_key_id(&secret), derive_key_id(&secret));
    }
}

//! The authentication capability a `BlossomClient` signs requests with.
//! Kept as a trait (rather than hardcoding the reference project's nostr
//! keypair) because the wire format only requires an opaque bearer token
//! binding `{verb, hash, expiry}` — the signature scheme itself is out of
//! scope for this system to mandate.

use async_trait::async_trait;

use crate::BlossomError;

#[async_trait]
pub trait Signer: Send + Sync {
    /// Produces the full `Authorization` header value for a request with
    /// HTTP method `verb` against blob `hash_hex`, expiring at
    /// `expiry_unix` (unix seconds).
    async fn sign(&self, verb: &str, hash_hex: &str, expiry_unix: u64) -> Result<String, BlossomError>;
}

/// Blossom auth event kind (BUD-02).
const BLOSSOM_AUTH_KIND: u16 = 24242;

/// Signs requests with a nostr keypair, the reference project's scheme:
/// a kind-24242 event with `t`/`x`/`expiration` tags, base64-encoded into
/// the `Authorization: Nostr <event>` header.
#[cfg(feature = "nostr-signer")]
pub struct NostrKeysSigner {
    keys: nostr::Keys,
}

#[cfg(feature = "nostr-signer")]
impl NostrKeysSigner {
    pub fn new(keys: nostr::Keys) -> Self {
        Self { keys }
    }
}

#[cfg(feature = "nostr-signer")]
#[async_trait]
impl Signer for NostrKeysSigner {
    async fn sign(&self, verb: &str, hash_hex: &str, expiry_unix: u64) -> Result<String, BlossomError> {
        use base64::Engine;
        use nostr::{EventBuilder, Kind, Tag};

        let tags = vec![
            Tag::hashtag(verb.to_lowercase()),
            Tag::custom(
                nostr::TagKind::SingleLetter(nostr::SingleLetterTag::lowercase(nostr::Alphabet::X)),
                vec![hash_hex.to_string()],
            ),
            Tag::expiration(nostr::Timestamp::from(expiry_unix)),
        ];

        let event = EventBuilder::new(Kind::Custom(BLOSSOM_AUTH_KIND), "hashtree blob auth", tags)
            .to_event(&self.keys)
            .map_err(|e| BlossomError::EndpointError(format!("sign: {e}")))?;

        let json = event.as_json();
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        Ok(format!("Nostr {encoded}"))
    }
}

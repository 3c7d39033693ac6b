//! Key management layered on top of `hashtree_config`'s `~/.hashtree/keys`
//! convention: generate-on-first-use nostr identity, npub parsing, and the
//! HTTP basic-auth cookie the daemon hands out for its own CLI to read
//! back.

use anyhow::{Context, Result};
use nostr::nips::nip19::{FromBech32, ToBech32};
use nostr::Keys;

pub use hashtree_config::{get_auth_cookie_path, get_hashtree_dir, Config};

/// Returns the node's nostr keypair, generating and persisting one to
/// `~/.hashtree/keys` on first use. The second element is `true` when a
/// fresh key was just generated.
pub fn ensure_keys() -> Result<(Keys, bool)> {
    if let Some(secret) = hashtree_config::read_first_key() {
        let keys = parse_secret(&secret)?;
        return Ok((keys, false));
    }

    let keys = Keys::generate();
    let keys_path = hashtree_config::get_keys_path();
    if let Some(parent) = keys_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&keys_path, format!("{}\n", keys.secret_key().to_bech32()?))
        .context("failed to write keys file")?;
    Ok((keys, true))
}

/// Same as [`ensure_keys`] but returns the bech32 `nsec` string, the form
/// `BlossomClient`/`NostrKeysSigner` callers parse from.
pub fn ensure_keys_string() -> Result<(String, bool)> {
    let (keys, was_generated) = ensure_keys()?;
    Ok((keys.secret_key().to_bech32()?, was_generated))
}

fn parse_secret(secret: &str) -> Result<Keys> {
    if let Some(stripped) = secret.strip_prefix("nsec1") {
        let _ = stripped;
        return Keys::parse(secret).context("invalid nsec in keys file");
    }
    Keys::parse(secret).context("invalid secret key in keys file")
}

/// Parse an `npub1...` (or bare hex) public key into its 32-byte form.
pub fn parse_npub(input: &str) -> Result<[u8; 32]> {
    use nostr::PublicKey;

    let input = input.trim();
    let pk = if input.starts_with("npub1") {
        PublicKey::from_bech32(input).context("invalid npub")?
    } else {
        PublicKey::from_hex(input).context("invalid pubkey hex")?
    };
    Ok(pk.to_bytes())
}

pub fn pubkey_bytes(keys: &Keys) -> [u8; 32] {
    keys.public_key().to_bytes()
}

/// Generate (if missing) and return the daemon's basic-auth password,
/// stored alongside the keys file so a co-located CLI invocation can read
/// it back without the user copy-pasting anything.
pub fn ensure_auth_cookie() -> Result<String> {
    let path = get_auth_cookie_path();
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }

    let token = hex::encode(rand_bytes());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &token)?;
    Ok(token)
}

fn rand_bytes() -> [u8; 16] {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_npub_accepts_hex() {
        let hex_str = "0".repeat(64);
        assert_eq!(parse_npub(&hex_str).unwrap(), [0u8; 32]);
    }

    #[test]
    fn parse_npub_rejects_garbage() {
        assert!(parse_npub("not-a-key").is_err());
    }
}

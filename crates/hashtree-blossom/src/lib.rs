//! HTTP blob-exchange client for a Blossom-style content-addressed remote
//! store: `PUT /upload`, `HEAD`/`GET`/`DELETE /{hex}.bin`, authenticated via an opaque
//! caller-supplied [`Signer`] token so the core doesn't hardcode a
//! signature scheme.
//!
//! Per-endpoint health tracking and per-hash give-up live one layer up,
//! in the composed layered store — this crate only executes requests
//! against named endpoints and reports what happened.

mod client;
mod signer;

pub use client::{BlossomClient, UploadOutcome};
pub use signer::Signer;

#[cfg(feature = "nostr-signer")]
pub use signer::NostrKeysSigner;

use thiserror::Error;

/// The size threshold above which `upload_if_missing` issues a HEAD
/// pre-check before attempting a `PUT`, per the read/write algorithm.
pub const HEAD_PRECHECK_THRESHOLD: usize = 256 * 1024;

/// Timeout for the parallel HEAD pre-check.
pub const HEAD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Horizon for a signed auth token, in seconds.
pub const TOKEN_EXPIRY_SECONDS: u64 = 300;

#[derive(Debug, Error)]
pub enum BlossomError {
    #[error("endpoint error: {0}")]
    EndpointError(String),
    #[error("unauthenticated: write requires a signer")]
    Unauthenticated,
    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },
    #[error("no endpoints configured")]
    NoEndpoints,
    #[error("not found")]
    NotFound,
}

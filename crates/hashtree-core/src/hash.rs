//! SHA-256 content hashing.

use sha2::{Digest, Sha256};

use crate::types::Hash;

/// Compute the 32-byte SHA-256 digest of `bytes`.
pub fn sha256(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Check whether `bytes` hashes to `expected`.
pub fn verify(bytes: &[u8], expected: &Hash) -> bool {
    sha256(bytes) == *expected
}

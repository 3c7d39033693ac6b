//! The `Store` capability: a pluggable hash-addressed key/value contract
//! that every backend (in-memory, local filesystem, layered composite)
//! implements identically, so the tree engine never sees the layering.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::hash::sha256;
use crate::types::Hash;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },
    #[error("temporarily unavailable")]
    TemporarilyUnavailable,
    #[error("endpoint error: {0}")]
    EndpointError(String),
    #[error("unauthenticated: write requires a signer")]
    Unauthenticated,
    #[error("cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(String),
}

/// Hash-addressed byte store. `put` reports whether the value was newly
/// written (`true`) or already present (`false`) — idempotent by
/// construction, since the address *is* the content hash.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<bool, StoreError>;
    async fn has(&self, hash: &Hash) -> Result<bool, StoreError>;
    async fn delete(&self, hash: &Hash) -> Result<bool, StoreError>;
}

/// Reference in-memory `Store` implementation, used by the core's own
/// tests and doctests and as a building block for composed stores.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().await.get(hash).cloned())
    }

    async fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<bool, StoreError> {
        let actual = sha256(&bytes);
        if actual != *hash {
            return Err(StoreError::HashMismatch {
                expected: crate::types::to_hex(hash),
                got: crate::types::to_hex(&actual),
            });
        }
        let mut data = self.data.write().await;
        let is_new = !data.contains_key(hash);
        data.insert(*hash, bytes);
        Ok(is_new)
    }

    async fn has(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.data.read().await.contains_key(hash))
    }

    async fn delete(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.data.write().await.remove(hash).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = MemoryStore::new();
        let data = b"payload".to_vec();
        let hash = sha256(&data);
        let is_new = store.put(&hash, data.clone()).await.unwrap();
        assert!(is_new);
        assert_eq!(store.get(&hash).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn put_idempotent() {
        let store = MemoryStore::new();
        let data = b"same content".to_vec();
        let hash = sha256(&data);
        assert!(store.put(&hash, data.clone()).await.unwrap());
        assert!(!store.put(&hash, data).await.unwrap());
    }

    #[tokio::test]
    async fn put_rejects_mismatched_hash() {
        let store = MemoryStore::new();
        let wrong_hash = [0u8; 32];
        let err = store.put(&wrong_hash, b"data".to_vec()).await.unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_removes_value() {
        let store = MemoryStore::new();
        let data = b"gone soon".to_vec();
        let hash = sha256(&data);
        store.put(&hash, data).await.unwrap();
        assert!(store.delete(&hash).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap(), None);
        assert!(!store.delete(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn has_reflects_presence() {
        let store = MemoryStore::new();
        let data = b"present".to_vec();
        let hash = sha256(&data);
        assert!(!store.has(&hash).await.unwrap());
        store.put(&hash, data).await.unwrap();
        assert!(store.has(&hash).await.unwrap());
    }
}

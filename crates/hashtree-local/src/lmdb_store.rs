//! LMDB-backed blob store, for deployments that would rather avoid one
//! file handle per blob. A single-file append-mostly key/value database
//! keyed by raw hash bytes.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use hashtree_core::hash::sha256;
use hashtree_core::store::{Store, StoreError};
use hashtree_core::types::{to_hex, Hash};

const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024 * 1024; // 10 GiB address space, grows lazily.

pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = data_dir.as_ref().join("lmdb");
        std::fs::create_dir_all(&path).map_err(|e| StoreError::Io(e.to_string()))?;

        // heed's env open and transactions are blocking; run on a blocking
        // thread so callers don't stall the async runtime.
        let path_owned = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(Env, Database<Bytes, Bytes>), StoreError> {
            let env = unsafe {
                EnvOpenOptions::new()
                    .map_size(DEFAULT_MAP_SIZE)
                    .max_dbs(1)
                    .open(&path_owned)
            }
            .map_err(|e| StoreError::Io(e.to_string()))?;
            let mut wtxn = env.write_txn().map_err(|e| StoreError::Io(e.to_string()))?;
            let db: Database<Bytes, Bytes> = env
                .create_database(&mut wtxn, Some("blobs"))
                .map_err(|e| StoreError::Io(e.to_string()))?;
            wtxn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
            Ok((env, db))
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
        .map(|(env, db)| Self { env, db })
    }
}

#[async_trait]
impl Store for LmdbStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        let env = self.env.clone();
        let db = self.db;
        let key = *hash;
        tokio::task::spawn_blocking(move || {
            let rtxn = env.read_txn().map_err(|e| StoreError::Io(e.to_string()))?;
            let value = db
                .get(&rtxn, &key)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            Ok(value.map(|v| v.to_vec()))
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }

    async fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<bool, StoreError> {
        let actual = sha256(&bytes);
        if actual != *hash {
            return Err(StoreError::HashMismatch {
                expected: to_hex(hash),
                got: to_hex(&actual),
            });
        }

        let env = self.env.clone();
        let db = self.db;
        let key = *hash;
        tokio::task::spawn_blocking(move || {
            let mut wtxn = env.write_txn().map_err(|e| StoreError::Io(e.to_string()))?;
            let existed = db
                .get(&wtxn, &key)
                .map_err(|e| StoreError::Io(e.to_string()))?
                .is_some();
            if !existed {
                db.put(&mut wtxn, &key, &bytes)
                    .map_err(|e| StoreError::Io(e.to_string()))?;
                wtxn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
            }
            Ok(!existed)
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }

    async fn has(&self, hash: &Hash) -> Result<bool, StoreError> {
        let env = self.env.clone();
        let db = self.db;
        let key = *hash;
        tokio::task::spawn_blocking(move || {
            let rtxn = env.read_txn().map_err(|e| StoreError::Io(e.to_string()))?;
            Ok(db
                .get(&rtxn, &key)
                .map_err(|e| StoreError::Io(e.to_string()))?
                .is_some())
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }

    async fn delete(&self, hash: &Hash) -> Result<bool, StoreError> {
        let env = self.env.clone();
        let db = self.db;
        let key = *hash;
        tokio::task::spawn_blocking(move || {
            let mut wtxn = env.write_txn().map_err(|e| StoreError::Io(e.to_string()))?;
            let deleted = db
                .delete(&mut wtxn, &key)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            wtxn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
            Ok(deleted)
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbStore::new(dir.path()).await.unwrap();
        let data = b"lmdb payload".to_vec();
        let hash = sha256(&data);
        assert!(store.put(&hash, data.clone()).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbStore::new(dir.path()).await.unwrap();
        let data = b"same content".to_vec();
        let hash = sha256(&data);
        assert!(store.put(&hash, data.clone()).await.unwrap());
        assert!(!store.put(&hash, data).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbStore::new(dir.path()).await.unwrap();
        let data = b"gone".to_vec();
        let hash = sha256(&data);
        store.put(&hash, data).await.unwrap();
        assert!(store.delete(&hash).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap(), None);
    }
}

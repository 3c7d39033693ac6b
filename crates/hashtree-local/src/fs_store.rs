//! Filesystem-sharded blob store: `{data_dir}/blobs/{hex[0..2]}/{hex}`.
//! Writes land in a temp file in the same shard directory and are renamed
//! into place, so a reader never observes a half-written blob.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use hashtree_core::hash::sha256;
use hashtree_core::store::{Store, StoreError};
use hashtree_core::types::{to_hex, Hash};

/// Sharded, content-addressed filesystem store.
pub struct FsStore {
    root: PathBuf,
    max_size_bytes: Option<u64>,
    access_times: RwLock<HashMap<Hash, Instant>>,
    tmp_counter: AtomicU64,
}

impl FsStore {
    /// Opens (creating if necessary) a blob store rooted at
    /// `{data_dir}/blobs`.
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_max_size(data_dir, None).await
    }

    pub async fn with_max_size(
        data_dir: impl AsRef<Path>,
        max_size_bytes: Option<u64>,
    ) -> Result<Self, StoreError> {
        let root = data_dir.as_ref().join("blobs");
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self {
            root,
            max_size_bytes,
            access_times: RwLock::new(HashMap::new()),
            tmp_counter: AtomicU64::new(0),
        })
    }

    fn shard_dir(&self, hex: &str) -> PathBuf {
        self.root.join(&hex[0..2])
    }

    fn path_for(&self, hash: &Hash) -> PathBuf {
        let hex = to_hex(hash);
        self.shard_dir(&hex).join(hex)
    }

    fn tmp_path(&self, shard_dir: &Path) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        shard_dir.join(format!(".tmp-{}-{}", std::process::id(), n))
    }

    async fn touch(&self, hash: &Hash) {
        self.access_times.write().await.insert(*hash, Instant::now());
    }

    /// Evicts least-recently-accessed blobs (within this process's
    /// lifetime; blobs never accessed are evicted first) until total size
    /// is at or under `max_size_bytes`, skipping anything in `pinned`.
    /// Returns bytes freed. No-op if no cap is configured.
    pub async fn evict_if_needed(&self, pinned: &HashSet<Hash>) -> Result<u64, StoreError> {
        let Some(cap) = self.max_size_bytes else {
            return Ok(0);
        };

        let mut entries = self.scan_entries().await?;
        let total: u64 = entries.iter().map(|(_, _, size)| size).sum();
        if total <= cap {
            return Ok(0);
        }

        let access_times = self.access_times.read().await.clone();
        entries.sort_by_key(|(hash, _, _)| access_times.get(hash).copied());

        let mut freed = 0u64;
        let mut remaining = total;
        for (hash, path, size) in entries {
            if remaining <= cap {
                break;
            }
            if pinned.contains(&hash) {
                continue;
            }
            if fs::remove_file(&path).await.is_ok() {
                remaining -= size;
                freed += size;
                self.access_times.write().await.remove(&hash);
            }
        }
        Ok(freed)
    }

    async fn scan_entries(&self) -> Result<Vec<(Hash, PathBuf, u64)>, StoreError> {
        let mut out = Vec::new();
        let mut shards = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        while let Some(shard) = shards
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            if !shard.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let mut files = fs::read_dir(shard.path())
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?
            {
                let name = file.file_name();
                let name = name.to_string_lossy();
                if name.starts_with(".tmp-") {
                    continue;
                }
                let Ok(hash) = hashtree_core::types::from_hex(&name) else {
                    continue;
                };
                let meta = file
                    .metadata()
                    .await
                    .map_err(|e| StoreError::Io(e.to_string()))?;
                out.push((hash, file.path(), meta.len()));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Store for FsStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(hash);
        match fs::read(&path).await {
            Ok(bytes) => {
                self.touch(hash).await;
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    async fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<bool, StoreError> {
        let actual = sha256(&bytes);
        if actual != *hash {
            return Err(StoreError::HashMismatch {
                expected: to_hex(hash),
                got: to_hex(&actual),
            });
        }

        let final_path = self.path_for(hash);
        if fs::try_exists(&final_path).await.unwrap_or(false) {
            self.touch(hash).await;
            return Ok(false);
        }

        let shard_dir = self.shard_dir(&to_hex(hash));
        fs::create_dir_all(&shard_dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let tmp_path = self.tmp_path(&shard_dir);
        fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        match fs::rename(&tmp_path, &final_path).await {
            Ok(()) => {}
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                if fs::try_exists(&final_path).await.unwrap_or(false) {
                    // Lost the race to a concurrent writer of identical content.
                } else {
                    return Err(StoreError::Io(e.to_string()));
                }
            }
        }
        self.touch(hash).await;
        Ok(true)
    }

    async fn has(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.path_for(hash)).await.unwrap_or(false))
    }

    async fn delete(&self, hash: &Hash) -> Result<bool, StoreError> {
        let path = self.path_for(hash);
        match fs::remove_file(&path).await {
            Ok(()) => {
                self.access_times.write().await.remove(hash);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let data = b"hello hashtree".to_vec();
        let hash = sha256(&data);
        assert!(store.put(&hash, data.clone()).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let data = b"same bytes".to_vec();
        let hash = sha256(&data);
        assert!(store.put(&hash, data.clone()).await.unwrap());
        assert!(!store.put(&hash, data).await.unwrap());
    }

    #[tokio::test]
    async fn put_rejects_mismatched_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let err = store.put(&[0u8; 32], b"data".to_vec()).await.unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        assert_eq!(store.get(&[7u8; 32]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let data = b"to be deleted".to_vec();
        let hash = sha256(&data);
        store.put(&hash, data).await.unwrap();
        assert!(store.delete(&hash).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap(), None);
        assert!(!store.delete(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn blobs_are_sharded_by_hash_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let data = b"shard me".to_vec();
        let hash = sha256(&data);
        store.put(&hash, data).await.unwrap();
        let hex = to_hex(&hash);
        let expected = dir.path().join("blobs").join(&hex[0..2]).join(&hex);
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn evict_if_needed_frees_bytes_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::with_max_size(dir.path(), Some(10)).await.unwrap();
        let a = b"aaaaaaaaaa".to_vec();
        let b = b"bbbbbbbbbb".to_vec();
        let hash_a = sha256(&a);
        let hash_b = sha256(&b);
        store.put(&hash_a, a).await.unwrap();
        store.put(&hash_b, b).await.unwrap();

        let freed = store.evict_if_needed(&HashSet::new()).await.unwrap();
        assert!(freed >= 10);
        // At least one of the two blobs was evicted to get under the cap.
        let a_present = store.has(&hash_a).await.unwrap();
        let b_present = store.has(&hash_b).await.unwrap();
        assert!(!(a_present && b_present));
    }

    #[tokio::test]
    async fn evict_if_needed_skips_pinned_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::with_max_size(dir.path(), Some(5)).await.unwrap();
        let data = b"pinned data".to_vec();
        let hash = sha256(&data);
        store.put(&hash, data).await.unwrap();

        let mut pinned = HashSet::new();
        pinned.insert(hash);
        store.evict_if_needed(&pinned).await.unwrap();
        assert!(store.has(&hash).await.unwrap());
    }
}

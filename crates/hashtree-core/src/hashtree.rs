//! `HashTree`: the facade tying `builder`, `reader`, and a `Store`
//! together, plus the copy-on-write edit operations (`set_entry`,
//! `remove_entry`, `rename_entry`, `move_entry`) that rewrite only the
//! ancestor path to a changed entry and reuse every untouched subtree by
//! hash.

use std::sync::Arc;

use thiserror::Error;

use crate::builder::{self, BuilderError};
use crate::reader::{self, ReaderError, VerifyResult, WalkEntry};
use crate::store::Store;
use crate::types::{Cid, DirEntry, PutResult};

#[derive(Debug, Error)]
pub enum HashTreeError {
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("moving entries within an encrypted tree is not supported")]
    UnsupportedForEncryptedTree,
    #[error("empty path")]
    EmptyPath,
}

/// Tunables for a `HashTree` instance; currently just whether writes are
/// CHK-encrypted. Kept as a struct (rather than a bare bool parameter) so
/// new options don't break call sites.
#[derive(Debug, Clone, Copy)]
pub struct HashTreeConfig {
    pub encrypt: bool,
}

impl Default for HashTreeConfig {
    fn default() -> Self {
        Self { encrypt: false }
    }
}

/// The merkle tree engine: a thin facade over a `Store` that exposes
/// whole-tree operations (put a file, read a path, walk a directory,
/// edit an entry) instead of raw blob get/put.
pub struct HashTree<S: Store> {
    store: Arc<S>,
    config: HashTreeConfig,
}

impl<S: Store> HashTree<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            config: HashTreeConfig::default(),
        }
    }

    pub fn with_config(store: Arc<S>, config: HashTreeConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn put_file(&self, bytes: &[u8]) -> Result<PutResult, HashTreeError> {
        Ok(builder::put_file(self.store.as_ref(), bytes, self.config.encrypt).await?)
    }

    pub async fn put_directory(
        &self,
        entries: Vec<DirEntry>,
    ) -> Result<PutResult, HashTreeError> {
        Ok(builder::put_directory(self.store.as_ref(), entries, self.config.encrypt).await?)
    }

    pub async fn read_file(&self, cid: &Cid) -> Result<Vec<u8>, HashTreeError> {
        Ok(reader::read_file(self.store.as_ref(), cid).await?)
    }

    pub async fn read_file_range(
        &self,
        cid: &Cid,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, HashTreeError> {
        Ok(reader::read_file_range(self.store.as_ref(), cid, offset, len).await?)
    }

    pub async fn list_directory(&self, cid: &Cid) -> Result<Vec<DirEntry>, HashTreeError> {
        Ok(reader::list_directory(self.store.as_ref(), cid).await?)
    }

    pub async fn resolve_path(&self, root: &Cid, path: &str) -> Result<Cid, HashTreeError> {
        Ok(reader::resolve_path(self.store.as_ref(), root, path).await?)
    }

    pub async fn walk(&self, root: &Cid) -> Result<Vec<WalkEntry>, HashTreeError> {
        use futures::StreamExt;
        reader::walk(self.store.as_ref(), *root)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(HashTreeError::from)
    }

    pub async fn read_file_stream<'a>(
        &'a self,
        cid: Cid,
    ) -> impl futures::Stream<Item = Result<Vec<u8>, ReaderError>> + 'a {
        reader::read_file_stream(self.store.as_ref(), cid)
    }

    pub async fn get_size(&self, cid: &Cid) -> Result<u64, HashTreeError> {
        Ok(reader::get_size(self.store.as_ref(), cid).await?)
    }

    pub async fn verify_tree(&self, root: &Cid) -> Result<VerifyResult, HashTreeError> {
        Ok(reader::verify_tree(self.store.as_ref(), root).await?)
    }

    pub async fn is_directory(&self, cid: &Cid) -> Result<bool, HashTreeError> {
        Ok(reader::is_directory(self.store.as_ref(), cid).await?)
    }

    /// Create or replace the entry at `path` under `root`, rewriting only
    /// the directory nodes along the path and reusing every sibling
    /// subtree by hash. `root` must not be an encrypted tree — combining
    /// CHK's convergent-key scheme with an edit that changes only part of
    /// a node isn't supported; re-encrypt fresh with `put_directory`
    /// instead.
    pub async fn set_entry(
        &self,
        root: &Cid,
        path: &str,
        new_entry: DirEntry,
    ) -> Result<Cid, HashTreeError> {
        if root.key.is_some() {
            return Err(HashTreeError::UnsupportedForEncryptedTree);
        }
        let components = split_path(path)?;
        self.rewrite_path(root, &components, EditOp::Upsert(new_entry))
            .await
    }

    /// Remove the entry at `path` under `root`.
    pub async fn remove_entry(&self, root: &Cid, path: &str) -> Result<Cid, HashTreeError> {
        if root.key.is_some() {
            return Err(HashTreeError::UnsupportedForEncryptedTree);
        }
        let components = split_path(path)?;
        self.rewrite_path(root, &components, EditOp::Remove).await
    }

    /// Rename the entry at `path` in place (same directory, new name).
    pub async fn rename_entry(
        &self,
        root: &Cid,
        path: &str,
        new_name: &str,
    ) -> Result<Cid, HashTreeError> {
        if root.key.is_some() {
            return Err(HashTreeError::UnsupportedForEncryptedTree);
        }
        let components = split_path(path)?;
        let entry = self.entry_at(root, &components).await?;
        let renamed = DirEntry {
            name: new_name.to_string(),
            ..entry
        };
        let after_remove = self.rewrite_path(root, &components, EditOp::Remove).await?;
        let parent_path = &components[..components.len() - 1];
        let new_path = {
            let mut p = parent_path.to_vec();
            p.push(new_name.to_string());
            p
        };
        self.rewrite_path(&after_remove, &new_path, EditOp::Upsert(renamed))
            .await
    }

    /// Move an entry from `from_path` to `to_path`, across directories if
    /// needed. Both paths are resolved against the same `root`.
    pub async fn move_entry(
        &self,
        root: &Cid,
        from_path: &str,
        to_path: &str,
    ) -> Result<Cid, HashTreeError> {
        if root.key.is_some() {
            return Err(HashTreeError::UnsupportedForEncryptedTree);
        }
        let from_components = split_path(from_path)?;
        let to_components = split_path(to_path)?;

        let entry = self.entry_at(root, &from_components).await?;
        let last_name = to_components
            .last()
            .cloned()
            .ok_or(HashTreeError::EmptyPath)?;
        let moved_entry = DirEntry {
            name: last_name,
            ..entry
        };

        let after_remove = self
            .rewrite_path(root, &from_components, EditOp::Remove)
            .await?;
        self.rewrite_path(&after_remove, &to_components, EditOp::Upsert(moved_entry))
            .await
    }

    /// Ensure every directory along `path` exists under `root`, creating
    /// empty directories for whichever intermediate segments are missing.
    /// `set_entry` deliberately never does this on its own (a typo in the
    /// middle of a path should surface as `PathNotFound`, not silently
    /// fabricate a tree); this is the opt-in convenience built from
    /// `set_entry` + `resolve_path` instead.
    pub async fn ensure_path(&self, root: &Cid, path: &str) -> Result<Cid, HashTreeError> {
        if root.key.is_some() {
            return Err(HashTreeError::UnsupportedForEncryptedTree);
        }
        let components = split_path(path)?;
        let mut current_root = *root;
        for i in 0..components.len() {
            let partial = components[..=i].join("/");
            match self.resolve_path(&current_root, &partial).await {
                Ok(_) => continue,
                Err(HashTreeError::Reader(ReaderError::PathNotFound(_))) => {
                    let empty_dir = self.put_directory(vec![]).await?;
                    current_root = self
                        .set_entry(
                            &current_root,
                            &partial,
                            DirEntry::from_cid(components[i].clone(), &empty_dir.cid).as_tree(),
                        )
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(current_root)
    }

    async fn entry_at(&self, root: &Cid, components: &[String]) -> Result<DirEntry, HashTreeError> {
        if components.is_empty() {
            return Err(HashTreeError::EmptyPath);
        }
        let (parent_components, name) = components.split_at(components.len() - 1);
        let parent_cid = self
            .resolve_components(root, parent_components)
            .await?;
        let entries = self.list_directory(&parent_cid).await?;
        entries
            .into_iter()
            .find(|e| e.name == name[0])
            .ok_or_else(|| HashTreeError::PathNotFound(components.join("/")))
    }

    async fn resolve_components(
        &self,
        root: &Cid,
        components: &[String],
    ) -> Result<Cid, HashTreeError> {
        let mut current = *root;
        for component in components {
            let entries = self.list_directory(&current).await?;
            let found = entries
                .into_iter()
                .find(|e| &e.name == component)
                .ok_or_else(|| HashTreeError::PathNotFound(component.clone()))?;
            current = found.cid;
        }
        Ok(current)
    }

    fn rewrite_path<'a>(
        &'a self,
        root: &'a Cid,
        components: &'a [String],
        op: EditOp,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Cid, HashTreeError>> + 'a>>
    {
        Box::pin(async move {
            if components.is_empty() {
                return Err(HashTreeError::EmptyPath);
            }

            let mut entries = self.list_directory(root).await?;
            let (head, rest) = (&components[0], &components[1..]);

            if rest.is_empty() {
                entries.retain(|e| &e.name != head);
                if let EditOp::Upsert(entry) = op {
                    entries.push(entry);
                }
            } else {
                let existing = entries.iter().position(|e| &e.name == head);
                let child_cid = match existing {
                    Some(idx) => entries[idx].cid,
                    None => return Err(HashTreeError::PathNotFound(head.clone())),
                };
                let new_child = self.rewrite_path(&child_cid, rest, op).await?;
                let new_size = self.get_size(&new_child).await.ok();
                if let Some(idx) = existing {
                    entries.remove(idx);
                }
                let mut updated = DirEntry::from_cid(head.clone(), &new_child).as_tree();
                if let Some(size) = new_size {
                    updated = updated.with_size(size);
                }
                entries.push(updated);
            }

            let result = self.put_directory(entries).await?;
            Ok(result.cid)
        })
    }
}

#[derive(Clone)]
enum EditOp {
    Upsert(DirEntry),
    Remove,
}

fn split_path(path: &str) -> Result<Vec<String>, HashTreeError> {
    let components: Vec<String> = path
        .split('/')
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();
    if components.is_empty() {
        return Err(HashTreeError::EmptyPath);
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn make_tree() -> (HashTree<MemoryStore>, Cid) {
        let store = Arc::new(MemoryStore::new());
        let tree = HashTree::new(store);
        let file = tree.put_file(b"original").await.unwrap();
        let dir = tree
            .put_directory(vec![DirEntry::from_cid("a.txt", &file.cid).with_size(file.size)])
            .await
            .unwrap();
        (tree, dir.cid)
    }

    #[tokio::test]
    async fn set_entry_adds_new_file() {
        let (tree, root) = make_tree().await;
        let new_file = tree.put_file(b"new content").await.unwrap();
        let new_root = tree
            .set_entry(
                &root,
                "b.txt",
                DirEntry::from_cid("b.txt", &new_file.cid).with_size(new_file.size),
            )
            .await
            .unwrap();

        let entries = tree.list_directory(&new_root).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.name == "b.txt"));
        assert!(entries.iter().any(|e| e.name == "a.txt"));
    }

    #[tokio::test]
    async fn set_entry_replaces_existing_file() {
        let (tree, root) = make_tree().await;
        let replacement = tree.put_file(b"replaced content").await.unwrap();
        let new_root = tree
            .set_entry(
                &root,
                "a.txt",
                DirEntry::from_cid("a.txt", &replacement.cid).with_size(replacement.size),
            )
            .await
            .unwrap();

        let entries = tree.list_directory(&new_root).await.unwrap();
        assert_eq!(entries.len(), 1);
        let bytes = tree.read_file(&entries[0].cid).await.unwrap();
        assert_eq!(bytes, b"replaced content");
    }

    #[tokio::test]
    async fn ensure_path_creates_missing_intermediate_directories() {
        let (tree, root) = make_tree().await;
        let new_root = tree.ensure_path(&root, "a/b/c").await.unwrap();

        let a = tree.resolve_path(&new_root, "a").await.unwrap();
        assert!(tree.is_directory(&a).await.unwrap());
        let b = tree.resolve_path(&new_root, "a/b").await.unwrap();
        assert!(tree.is_directory(&b).await.unwrap());
        let c = tree.resolve_path(&new_root, "a/b/c").await.unwrap();
        assert!(tree.is_directory(&c).await.unwrap());
        assert!(tree.list_directory(&c).await.unwrap().is_empty());

        // the pre-existing file is untouched
        let entries = tree.list_directory(&new_root).await.unwrap();
        assert!(entries.iter().any(|e| e.name == "a.txt"));
    }

    #[tokio::test]
    async fn ensure_path_is_a_no_op_when_the_path_already_exists() {
        let (tree, root) = make_tree().await;
        let with_sub = tree.ensure_path(&root, "sub").await.unwrap();
        let again = tree.ensure_path(&with_sub, "sub").await.unwrap();
        assert_eq!(with_sub, again);
    }

    #[tokio::test]
    async fn remove_entry_deletes_file() {
        let (tree, root) = make_tree().await;
        let new_root = tree.remove_entry(&root, "a.txt").await.unwrap();
        let entries = tree.list_directory(&new_root).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn move_entry_relocates_into_subdirectory() {
        let (tree, root) = make_tree().await;
        let empty_subdir = tree.put_directory(vec![]).await.unwrap();
        let with_subdir = tree
            .set_entry(
                &root,
                "sub",
                DirEntry::from_cid("sub", &empty_subdir.cid)
                    .with_size(0)
                    .as_tree(),
            )
            .await
            .unwrap();

        let moved_root = tree
            .move_entry(&with_subdir, "a.txt", "sub/a.txt")
            .await
            .unwrap();

        let top_entries = tree.list_directory(&moved_root).await.unwrap();
        assert!(!top_entries.iter().any(|e| e.name == "a.txt"));

        let sub_cid = top_entries
            .iter()
            .find(|e| e.name == "sub")
            .unwrap()
            .cid;
        let sub_entries = tree.list_directory(&sub_cid).await.unwrap();
        assert!(sub_entries.iter().any(|e| e.name == "a.txt"));
    }

    #[tokio::test]
    async fn set_entry_rejects_encrypted_root() {
        let store = Arc::new(MemoryStore::new());
        let tree = HashTree::with_config(store, HashTreeConfig { encrypt: true });
        let file = tree.put_file(b"secret").await.unwrap();
        let dir = tree
            .put_directory(vec![DirEntry::from_cid("s.txt", &file.cid).with_size(file.size)])
            .await
            .unwrap();

        let err = tree
            .set_entry(
                &dir.cid,
                "t.txt",
                DirEntry::from_cid("t.txt", &file.cid).with_size(file.size),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HashTreeError::UnsupportedForEncryptedTree));
    }
}

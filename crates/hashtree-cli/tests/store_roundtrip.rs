//! End-to-end round trips through the composed `HashtreeStore` the CLI
//! opens for every command: put a file and a directory, read them back,
//! verify the tree, and confirm a missing block is reported rather than
//! silently treated as present.

use std::sync::Arc;

use hashtree_core::{DirEntry, HashTree};
use hashtree_store::HashtreeStore;

async fn open_tempdir_store() -> (tempfile::TempDir, Arc<HashtreeStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = HashtreeStore::with_options(dir.path(), None).await.unwrap();
    (dir, Arc::new(store))
}

#[tokio::test]
async fn file_round_trips_through_the_local_tier() {
    let (_dir, store) = open_tempdir_store().await;
    let tree = HashTree::new(store);

    let put = tree.put_file(b"hello from the cli").await.unwrap();
    let bytes = tree.read_file(&put.cid).await.unwrap();

    assert_eq!(bytes, b"hello from the cli");
    assert_eq!(put.size, bytes.len() as u64);
}

#[tokio::test]
async fn directory_lists_its_children_and_resolves_paths() {
    let (_dir, store) = open_tempdir_store().await;
    let tree = HashTree::new(store);

    let a = tree.put_file(b"contents of a").await.unwrap();
    let b = tree.put_file(b"contents of b").await.unwrap();
    let dir = tree
        .put_directory(vec![
            DirEntry::from_cid("a.txt", &a.cid).with_size(a.size),
            DirEntry::from_cid("b.txt", &b.cid).with_size(b.size),
        ])
        .await
        .unwrap();

    let entries = tree.list_directory(&dir.cid).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.name == "a.txt" && !e.is_tree));
    assert!(entries.iter().any(|e| e.name == "b.txt" && !e.is_tree));

    let resolved = tree.resolve_path(&dir.cid, "b.txt").await.unwrap();
    assert_eq!(resolved, b.cid);
    assert_eq!(tree.read_file(&resolved).await.unwrap(), b"contents of b");
}

#[tokio::test]
async fn verify_tree_reports_missing_blocks_after_deletion() {
    let (_dir, store) = open_tempdir_store().await;
    let tree = HashTree::new(store.clone());

    let file = tree.put_file(b"will be deleted").await.unwrap();
    let dir = tree
        .put_directory(vec![DirEntry::from_cid("f.txt", &file.cid).with_size(file.size)])
        .await
        .unwrap();

    let before = tree.verify_tree(&dir.cid).await.unwrap();
    assert!(before.valid);
    assert!(before.missing.is_empty());

    hashtree_core::store::Store::delete(store.as_ref(), &file.cid.hash)
        .await
        .unwrap();

    let after = tree.verify_tree(&dir.cid).await.unwrap();
    assert!(!after.valid);
    assert_eq!(after.missing, vec![file.cid.hash]);
}

#[tokio::test]
async fn encrypted_tree_round_trips_and_rejects_in_place_edits() {
    let (_dir, store) = open_tempdir_store().await;
    let tree = HashTree::with_config(
        store,
        hashtree_core::HashTreeConfig { encrypt: true },
    );

    let file = tree.put_file(b"secret payload").await.unwrap();
    assert!(file.cid.key.is_some());

    let roundtripped = tree.read_file(&file.cid).await.unwrap();
    assert_eq!(roundtripped, b"secret payload");

    let dir = tree
        .put_directory(vec![DirEntry::from_cid("s.bin", &file.cid).with_size(file.size)])
        .await
        .unwrap();

    let err = tree
        .set_entry(
            &dir.cid,
            "t.bin",
            DirEntry::from_cid("t.bin", &file.cid).with_size(file.size),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        hashtree_core::HashTreeError::UnsupportedForEncryptedTree
    ));
}

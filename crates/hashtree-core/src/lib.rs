//! HashTree - content-addressed merkle tree storage
//!
//! Rust-first library for building merkle trees with content-hash addressing:
//! SHA256(content) -> content
//!
//! # Overview
//!
//! HashTree provides a simple, efficient way to build and traverse content-addressed
//! merkle trees. It uses SHA256 for hashing and MessagePack for tree node encoding.
//!
//! Content can be CHK (Convergent-Hash Key) encrypted: the key for a blob is its own
//! digest, so encryption never defeats deduplication. Pass `encrypt: false` in
//! `HashTreeConfig` to store plaintext instead.
//!
//! # Core Concepts
//!
//! - **Blobs**: Raw data stored directly by their hash (SHA256(data) -> data)
//! - **Tree Nodes**: MessagePack-encoded nodes with links to children (SHA256(msgpack(node)) -> msgpack(node))
//! - **Links**: References to child nodes with optional name and size metadata
//! - **Cid**: Content identifier with hash + optional encryption key
//!
//! # Example
//!
//! ```rust
//! use hashtree_core::{HashTree, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let tree = HashTree::new(store);
//!
//!     let result = tree.put_file(b"Hello, World!").await?;
//!     let data = tree.read_file(&result.cid).await?;
//!     assert_eq!(data, b"Hello, World!");
//!
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod codec;
pub mod crypto;
pub mod hash;
pub mod hashtree;
pub mod nhash;
pub mod reader;
pub mod store;
pub mod types;
pub mod visibility;

// Main API - unified HashTree facade
pub use hashtree::{HashTree, HashTreeConfig, HashTreeError};

// Constants
pub use builder::{BEP52_CHUNK_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LINKS};
pub use builder::{put_blob, put_directory, put_file, put_file_stream, BuilderError};

// Low-level codec
pub use codec::{
    decode_tree_node, encode_tree_node, get_node_type, is_tree_node, try_decode_tree_node,
    CodecError, NodeType,
};
pub use hash::{sha256, verify};

// Reader
pub use reader::{
    get_size, get_tree_node, is_directory, is_tree, list_directory, read_file, read_file_range,
    resolve_path, verify_tree, walk, ReaderError, VerifyResult, WalkEntry,
};

// Permalinks
pub use nhash::{
    decode as nhash_decode_any, is_nhash, nhash_decode, nhash_encode, nhash_encode_full,
    DecodeResult, NHashData, NHashError,
};

// Store
pub use store::{MemoryStore, Store, StoreError};
pub use types::{
    from_hex, hash_equals, to_hex, Cid, CidParseError, DirEntry, Hash, Link, LinkType, PutResult,
    TreeNode,
};

pub use crypto::{
    content_hash, could_be_encrypted, decrypt, decrypt_chk, encrypt, encrypt_chk, encrypted_size,
    encrypted_size_chk, generate_key, key_from_hex, key_to_hex, plaintext_size, CryptoError,
    EncryptionKey,
};
pub use visibility::{
    derive_key_id, unwrap_from_unlisted, wrap_for_unlisted, xor_keys, TreeVisibility,
};

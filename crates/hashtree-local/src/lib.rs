//! Local persistent blob stores for hashtree: a default filesystem-sharded
//! backend and an optional LMDB backend, both implementing
//! `hashtree_core::store::Store`. This is tier 1 of the layered store —
//! the durable home for blobs a node has actually fetched or produced.

pub mod fs_store;

#[cfg(feature = "lmdb")]
pub mod lmdb_store;

pub use fs_store::FsStore;

#[cfg(feature = "lmdb")]
pub use lmdb_store::LmdbStore;

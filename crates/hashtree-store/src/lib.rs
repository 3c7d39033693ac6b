//! The composed layered blob store: local persistent storage backed by an
//! optional P2P tier and an optional HTTP backend tier, all behind
//! `hashtree_core::store::Store` so the rest of the system never sees the
//! layering. Also owns the endpoint/hash health bookkeeping those remote
//! tiers share, and a small root-priority model for eviction/sync
//! ordering.

mod health;
mod priority;
mod store;

pub use health::{EndpointHealthTracker, HashAttemptTracker, MAX_HASH_ATTEMPTS};
pub use priority::{CachedRoot, RootRegistry, TreeMeta, PRIORITY_FOLLOWED, PRIORITY_OTHER, PRIORITY_OWN};
pub use store::{HashtreeStore, P2pTier};

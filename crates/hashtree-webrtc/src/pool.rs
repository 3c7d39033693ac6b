//! Peer pools: a node keeps more connections to peers it follows than to
//! strangers, so request forwarding reaches a "trusted" neighborhood first.

use std::sync::Arc;

/// Which pool a peer belongs to, decided by a [`PeerClassifier`] from the
/// peer's advertised identity (e.g. a nostr pubkey).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerPool {
    Follows,
    Other,
}

/// Caller-supplied function deciding which pool a peer identity belongs
/// to. Kept as a boxed closure rather than a trait so callers can close
/// over a social graph or allowlist without this crate knowing its shape.
pub type PeerClassifier = Arc<dyn Fn(&str) -> PeerPool + Send + Sync>;

/// Connection targets for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Stop accepting new connections into this pool once it holds this
    /// many.
    pub max_connections: usize,
    /// Once this many connections are alive, the pool is considered
    /// "satisfied" and stops actively dialing new peers (inbound
    /// connections up to `max_connections` are still accepted).
    pub satisfied_connections: usize,
}

impl PoolSettings {
    pub fn is_satisfied(&self, current: usize) -> bool {
        current >= self.satisfied_connections
    }

    pub fn has_room(&self, current: usize) -> bool {
        current < self.max_connections
    }
}

impl Default for PoolSettings {
    /// A follows-pool-sized default: small and eager, as a caller building
    /// the "other" pool's settings should size that one to taste.
    fn default() -> Self {
        Self {
            max_connections: 8,
            satisfied_connections: 4,
        }
    }
}

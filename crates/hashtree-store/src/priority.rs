//! Small pinning/priority model: which roots a node keeps warm (never
//! evicted) and which order a background sync would fetch them in, were
//! one wired up. No scheduler lives here — just the bookkeeping types a
//! scheduler or `evict_if_needed`'s pin set would consume.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use hashtree_core::Cid;

/// The node's own published roots: highest priority, fetched/kept first.
pub const PRIORITY_OWN: u8 = 0;
/// Roots belonging to followed peers.
pub const PRIORITY_FOLLOWED: u8 = 1;
/// Everything else a caller asked to track.
pub const PRIORITY_OTHER: u8 = 2;

/// One tracked root: its current `Cid`, a human label, and the priority
/// tier controlling eviction/sync order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRoot {
    pub cid: Cid,
    pub label: String,
    pub priority: u8,
    pub last_synced: u64,
}

impl CachedRoot {
    pub fn new(cid: Cid, label: impl Into<String>, priority: u8) -> Self {
        Self {
            cid,
            label: label.into(),
            priority,
            last_synced: 0,
        }
    }
}

/// Per-root metadata kept alongside the blob content: total size (for
/// eviction accounting) and the last time the root was confirmed
/// reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeMeta {
    pub total_size: u64,
    pub last_seen: u64,
}

/// In-memory registry of tracked roots, ordered by priority for whatever
/// consumes it (a background sync loop, a "don't evict these" pin set).
#[derive(Default)]
pub struct RootRegistry {
    roots: HashMap<String, CachedRoot>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, root: CachedRoot) {
        self.roots.insert(root.label.clone(), root);
    }

    pub fn get(&self, label: &str) -> Option<&CachedRoot> {
        self.roots.get(label)
    }

    pub fn touch_synced(&mut self, label: &str) {
        if let Some(root) = self.roots.get_mut(label) {
            root.last_synced = now_unix();
        }
    }

    /// Every tracked root's hash, used to build an eviction pin set.
    pub fn pinned_hashes(&self) -> impl Iterator<Item = &hashtree_core::types::Hash> {
        self.roots.values().map(|r| &r.cid.hash)
    }

    /// Tracked roots ordered by priority (lowest first: own, then
    /// followed, then other), ties broken by label for determinism.
    pub fn by_priority(&self) -> Vec<&CachedRoot> {
        let mut roots: Vec<&CachedRoot> = self.roots.values().collect();
        roots.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.label.cmp(&b.label)));
        roots
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

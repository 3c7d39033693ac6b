//! Bookkeeping for in-flight requests: who asked us for a hash (so we know
//! who to forward a response to), and which hashes we ourselves already
//! have a request outstanding for (so a second local caller waits on the
//! first instead of issuing a duplicate wire request).

use std::collections::HashMap;

use lru::LruCache;
use tokio::sync::{oneshot, Mutex};

use hashtree_core::types::Hash;

use crate::types::PeerId;

const PENDING_REQUEST_TABLE_CAPACITY: usize = 200;

/// Tracks, per requested hash, which peers are waiting on a response so
/// it can be forwarded to all of them once it arrives. Bounded by an LRU
/// so a flood of distinct requests can't grow this unboundedly — the
/// oldest hash's waiters are simply given up on.
pub struct PendingRequestTable {
    inner: Mutex<LruCache<Hash, Vec<PeerId>>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(PENDING_REQUEST_TABLE_CAPACITY).unwrap(),
            )),
        }
    }

    /// Records that `peer` is waiting on `hash`. Returns `true` if this is
    /// the first waiter for `hash` (the caller should forward the
    /// request onward); `false` if someone was already waiting (the
    /// caller should just register and not forward again).
    pub async fn register(&self, hash: Hash, peer: PeerId) -> bool {
        let mut guard = self.inner.lock().await;
        match guard.get_mut(&hash) {
            Some(waiters) => {
                if !waiters.contains(&peer) {
                    waiters.push(peer);
                }
                false
            }
            None => {
                guard.put(hash, vec![peer]);
                true
            }
        }
    }

    /// Removes and returns every peer waiting on `hash`, if any.
    pub async fn take_waiters(&self, hash: &Hash) -> Vec<PeerId> {
        self.inner.lock().await.pop(hash).unwrap_or_default()
    }
}

impl Default for PendingRequestTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Deduplicates locally-initiated requests: if a `get(hash)` is already
/// in flight, a second caller subscribes to the same result instead of
/// triggering another round of wire requests.
#[derive(Default)]
pub struct LocalRequestTable {
    inner: Mutex<HashMap<Hash, Vec<oneshot::Sender<Option<Vec<u8>>>>>>,
}

impl LocalRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `hash`. Returns `Ok(receiver)` to wait on if
    /// no request is outstanding and the caller should start one, or
    /// `Err(receiver)` if a request is already in flight.
    pub async fn subscribe(
        &self,
        hash: Hash,
    ) -> Result<oneshot::Receiver<Option<Vec<u8>>>, oneshot::Receiver<Option<Vec<u8>>>> {
        let mut guard = self.inner.lock().await;
        let (tx, rx) = oneshot::channel();
        match guard.get_mut(&hash) {
            Some(waiters) => {
                waiters.push(tx);
                Err(rx)
            }
            None => {
                guard.insert(hash, vec![tx]);
                Ok(rx)
            }
        }
    }

    /// Completes every waiter on `hash` with `result` and clears the
    /// in-flight entry.
    pub async fn complete(&self, hash: &Hash, result: Option<Vec<u8>>) {
        let waiters = self.inner.lock().await.remove(hash).unwrap_or_default();
        for (i, tx) in waiters.into_iter().enumerate() {
            let payload = if i == 0 { result.clone() } else { result.clone() };
            let _ = tx.send(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_registration_signals_forward() {
        let table = PendingRequestTable::new();
        let hash = [1u8; 32];
        assert!(table.register(hash, PeerId::new()).await);
        assert!(!table.register(hash, PeerId::new()).await);
    }

    #[tokio::test]
    async fn take_waiters_returns_all_registered_peers() {
        let table = PendingRequestTable::new();
        let hash = [2u8; 32];
        let a = PeerId::new();
        let b = PeerId::new();
        table.register(hash, a).await;
        table.register(hash, b).await;
        let waiters = table.take_waiters(&hash).await;
        assert_eq!(waiters.len(), 2);
        assert!(waiters.contains(&a));
        assert!(waiters.contains(&b));
    }

    #[tokio::test]
    async fn take_waiters_empties_after_taking() {
        let table = PendingRequestTable::new();
        let hash = [3u8; 32];
        table.register(hash, PeerId::new()).await;
        table.take_waiters(&hash).await;
        assert!(table.take_waiters(&hash).await.is_empty());
    }

    #[tokio::test]
    async fn local_request_table_dedups_second_subscriber() {
        let table = LocalRequestTable::new();
        let hash = [4u8; 32];
        let first = table.subscribe(hash).await;
        assert!(first.is_ok());
        let second = table.subscribe(hash).await;
        assert!(second.is_err());

        table.complete(&hash, Some(vec![9])).await;
        let a = first.unwrap().await.unwrap();
        let b = second.unwrap_err().await.unwrap();
        assert_eq!(a, Some(vec![9]));
        assert_eq!(b, Some(vec![9]));
    }
}

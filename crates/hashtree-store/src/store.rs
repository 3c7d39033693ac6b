//! `HashtreeStore`: the composed local + P2P + HTTP store, implementing
//! `hashtree_core::store::Store` so the rest of the system never sees the
//! layering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use hashtree_core::hash::sha256;
use hashtree_core::store::{Store, StoreError};
use hashtree_core::types::{to_hex, Hash};
use hashtree_local::FsStore;

use crate::health::{EndpointHealthTracker, HashAttemptTracker};

/// Hard wait bound for the P2P tier on a `get` before falling through to
/// the HTTP tier (the P2P request, if any, keeps running in the
/// background and write-throughs to local on eventual success).
const P2P_WAIT_BOUND: Duration = Duration::from_secs(1);

/// Decouples `HashtreeStore` from `hashtree_webrtc::Exchange`'s concrete
/// type, so the store can be built and tested without a real transport
/// wired up.
#[async_trait]
pub trait P2pTier: Send + Sync {
    async fn request(&self, hash: Hash) -> Option<Vec<u8>>;
}

#[async_trait]
impl P2pTier for hashtree_webrtc::Exchange {
    async fn request(&self, hash: Hash) -> Option<Vec<u8>> {
        hashtree_webrtc::Exchange::request(self, hash).await
    }
}

/// Composed store: local persistent tier always present, P2P and HTTP
/// tiers optional (a node with neither is just a local cache). Every
/// field is `Arc`-wrapped so `put`'s background HTTP push can own cheap
/// clones without needing an `Arc<Self>` the `Store` trait's `&self`
/// methods don't give us.
pub struct HashtreeStore {
    local: Arc<FsStore>,
    p2p: Option<Arc<dyn P2pTier>>,
    http: Option<Arc<hashtree_blossom::BlossomClient>>,
    endpoint_health: Arc<EndpointHealthTracker>,
    hash_attempts: Arc<HashAttemptTracker>,
}

impl HashtreeStore {
    pub fn new(local: Arc<FsStore>) -> Self {
        Self {
            local,
            p2p: None,
            http: None,
            endpoint_health: Arc::new(EndpointHealthTracker::new()),
            hash_attempts: Arc::new(HashAttemptTracker::new()),
        }
    }

    pub async fn with_options(
        data_dir: &std::path::Path,
        max_size_bytes: Option<u64>,
    ) -> Result<Self, StoreError> {
        let local = FsStore::with_max_size(data_dir, max_size_bytes).await?;
        Ok(Self::new(Arc::new(local)))
    }

    pub fn with_p2p(mut self, p2p: Arc<dyn P2pTier>) -> Self {
        self.p2p = Some(p2p);
        self
    }

    pub fn with_http(mut self, http: Arc<hashtree_blossom::BlossomClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn endpoint_health(&self) -> &EndpointHealthTracker {
        &self.endpoint_health
    }

    pub fn hash_attempts(&self) -> &HashAttemptTracker {
        &self.hash_attempts
    }

    /// Evicts local blobs down to `max_size_bytes`, keeping everything in
    /// `pinned`.
    pub async fn evict_if_needed(
        &self,
        pinned: &std::collections::HashSet<Hash>,
    ) -> Result<u64, StoreError> {
        self.local
            .evict_if_needed(pinned)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn fetch_via_p2p(&self, hash: &Hash) -> Option<Vec<u8>> {
        let p2p = self.p2p.clone()?;
        let hash = *hash;
        match tokio::time::timeout(P2P_WAIT_BOUND, p2p.request(hash)).await {
            Ok(result) => result,
            Err(_) => {
                // The request keeps running inside the exchange engine
                // past our wait bound; we just stop waiting on it here.
                // Its eventual response, if any, write-throughs to local
                // from inside `Exchange` itself.
                debug!(hash = %to_hex(&hash), "p2p fetch exceeded wait bound, continuing in background");
                None
            }
        }
    }

    async fn fetch_via_http(&self, hash: &Hash) -> Option<Vec<u8>> {
        let http = self.http.as_ref()?;
        match http.get(hash).await {
            Ok(found) => found,
            Err(e) => {
                warn!(hash = %to_hex(hash), error = %e, "http tier fetch failed");
                None
            }
        }
    }
}

#[async_trait]
impl Store for HashtreeStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(bytes) = self.local.get(hash).await? {
            return Ok(Some(bytes));
        }

        if let Some(bytes) = self.fetch_via_p2p(hash).await {
            if sha256(&bytes) == *hash {
                self.local.put(hash, bytes.clone()).await?;
                return Ok(Some(bytes));
            }
            warn!(hash = %to_hex(hash), "p2p tier returned a hash mismatch");
        }

        if let Some(bytes) = self.fetch_via_http(hash).await {
            if sha256(&bytes) != *hash {
                warn!(hash = %to_hex(hash), "http tier returned a hash mismatch");
                return Ok(None);
            }
            self.local.put(hash, bytes.clone()).await?;
            return Ok(Some(bytes));
        }

        Ok(None)
    }

    async fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<bool, StoreError> {
        let is_new = self.local.put(hash, bytes.clone()).await?;
        if is_new {
            if let Some(http) = self.http.clone() {
                let hash_attempts = self.hash_attempts.clone();
                let hash = *hash;
                tokio::spawn(async move {
                    if hash_attempts.has_given_up(&hash).await {
                        debug!(hash = %to_hex(&hash), "hash has exceeded max attempts, skipping http push");
                        return;
                    }
                    match http.upload_if_missing(&bytes).await {
                        Ok(_) => hash_attempts.record_success(&hash).await,
                        Err(e) => {
                            warn!(hash = %to_hex(&hash), error = %e, "background http push failed");
                            hash_attempts.record_failure(&hash).await;
                        }
                    }
                });
            }
        }
        Ok(is_new)
    }

    async fn has(&self, hash: &Hash) -> Result<bool, StoreError> {
        if self.local.has(hash).await? {
            return Ok(true);
        }
        if let Some(http) = &self.http {
            if matches!(http.has(hash).await, Ok(true)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete(&self, hash: &Hash) -> Result<bool, StoreError> {
        self.local.delete(hash).await
    }
}

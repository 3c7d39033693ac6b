//! Per-endpoint back-off and per-hash give-up bookkeeping, shared across
//! the P2P and HTTP tiers so a flaky endpoint or a truly-unfetchable
//! hash doesn't get hammered forever.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use hashtree_core::types::Hash;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Failed writes after which a `put` for a given hash is silently
/// skipped rather than retried.
pub const MAX_HASH_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone, Copy, Default)]
struct EndpointHealth {
    consecutive_errors: u32,
    last_error: Option<Instant>,
}

impl EndpointHealth {
    fn in_backoff(&self) -> bool {
        let Some(last_error) = self.last_error else {
            return false;
        };
        if self.consecutive_errors == 0 {
            return false;
        }
        let backoff = BACKOFF_BASE
            .saturating_mul(1u32 << (self.consecutive_errors - 1).min(6))
            .min(BACKOFF_MAX);
        last_error.elapsed() < backoff
    }
}

/// Tracks `(consecutive_errors, last_error_time)` per endpoint. An
/// endpoint is in back-off while
/// `now - last_error_time < min(base * 2^(consecutive_errors - 1), max)`.
#[derive(Default)]
pub struct EndpointHealthTracker {
    endpoints: RwLock<HashMap<String, EndpointHealth>>,
}

impl EndpointHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_available(&self, endpoint: &str) -> bool {
        !self
            .endpoints
            .read()
            .await
            .get(endpoint)
            .map(EndpointHealth::in_backoff)
            .unwrap_or(false)
    }

    pub async fn record_success(&self, endpoint: &str) {
        self.endpoints.write().await.remove(endpoint);
    }

    pub async fn record_error(&self, endpoint: &str) {
        let mut endpoints = self.endpoints.write().await;
        let health = endpoints.entry(endpoint.to_string()).or_default();
        health.consecutive_errors += 1;
        health.last_error = Some(Instant::now());
    }

    pub async fn available<'a>(&self, endpoints: &'a [String]) -> Vec<&'a String> {
        let mut out = Vec::new();
        for endpoint in endpoints {
            if self.is_available(endpoint).await {
                out.push(endpoint);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct HashAttempts {
    attempts: u32,
}

/// Tracks failed-write counts per hash so a hash that genuinely can't be
/// pushed anywhere stops consuming retries.
#[derive(Default)]
pub struct HashAttemptTracker {
    hashes: RwLock<HashMap<Hash, HashAttempts>>,
}

impl HashAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once `hash` has hit [`MAX_HASH_ATTEMPTS`] failed writes —
    /// further `put`s for it should be silently skipped.
    pub async fn has_given_up(&self, hash: &Hash) -> bool {
        self.hashes
            .read()
            .await
            .get(hash)
            .map(|a| a.attempts >= MAX_HASH_ATTEMPTS)
            .unwrap_or(false)
    }

    pub async fn record_failure(&self, hash: &Hash) {
        let mut hashes = self.hashes.write().await;
        hashes.entry(*hash).or_default().attempts += 1;
    }

    pub async fn record_success(&self, hash: &Hash) {
        self.hashes.write().await.remove(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn endpoint_enters_backoff_after_error() {
        let tracker = EndpointHealthTracker::new();
        assert!(tracker.is_available("a").await);
        tracker.record_error("a").await;
        assert!(!tracker.is_available("a").await);
    }

    #[tokio::test]
    async fn endpoint_recovers_after_success() {
        let tracker = EndpointHealthTracker::new();
        tracker.record_error("a").await;
        tracker.record_success("a").await;
        assert!(tracker.is_available("a").await);
    }

    #[tokio::test]
    async fn hash_gives_up_after_max_attempts() {
        let tracker = HashAttemptTracker::new();
        let hash = [1u8; 32];
        for _ in 0..MAX_HASH_ATTEMPTS {
            assert!(!tracker.has_given_up(&hash).await);
            tracker.record_failure(&hash).await;
        }
        assert!(tracker.has_given_up(&hash).await);
    }

    #[tokio::test]
    async fn hash_attempts_reset_on_success() {
        let tracker = HashAttemptTracker::new();
        let hash = [2u8; 32];
        for _ in 0..MAX_HASH_ATTEMPTS {
            tracker.record_failure(&hash).await;
        }
        assert!(tracker.has_given_up(&hash).await);
        tracker.record_success(&hash).await;
        assert!(!tracker.has_given_up(&hash).await);
    }
}

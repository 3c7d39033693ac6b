//! Nostr-backed `RootResolver`: publishes root pointers as parameterized
//! replaceable events (one per key, the `d` tag carries the key) and
//! resolves by querying relays for the latest such event. A
//! [`LocalResolver`] sits in front as the write-through cache and
//! publish throttle, so a publisher's own next `resolve` never blocks on
//! relay round trips.

use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::{Client, ClientBuilder, EventBuilder, EventSource, Filter, Kind, Tag};
pub use nostr_sdk::Keys;
pub use nostr_sdk::ToBech32;

use hashtree_core::visibility::TreeVisibility;
use hashtree_core::Cid;

use crate::{LocalResolver, ResolverEntry, ResolverError, RootResolver, SubscriptionHandle};

/// The replaceable-event kind used for root pointers; arbitrary but
/// fixed so every hashtree node agrees on where to look.
const ROOT_POINTER_KIND: u16 = 30078;

const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct NostrResolverConfig {
    pub relays: Vec<String>,
    pub secret_key: Option<Keys>,
}

impl Default for NostrResolverConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            secret_key: None,
        }
    }
}

pub struct NostrRootResolver {
    client: Client,
    keys: Option<Keys>,
    cache: LocalResolver,
}

impl NostrRootResolver {
    pub async fn new(config: NostrResolverConfig) -> Result<Self, ResolverError> {
        let keys = config.secret_key.clone();
        let client = match &keys {
            Some(k) => ClientBuilder::new().signer(k.clone()).build(),
            None => ClientBuilder::default().build(),
        };
        for relay in &config.relays {
            client
                .add_relay(relay.as_str())
                .await
                .map_err(|e| ResolverError::Backend(e.to_string()))?;
        }
        client.connect().await;

        Ok(Self {
            client,
            keys,
            cache: LocalResolver::new(),
        })
    }

    async fn fetch_remote(&self, key: &str) -> Result<Option<ResolverEntry>, ResolverError> {
        let filter = Filter::new()
            .kind(Kind::Custom(ROOT_POINTER_KIND))
            .custom_tag(nostr_sdk::SingleLetterTag::lowercase(nostr_sdk::Alphabet::D), vec![key.to_string()])
            .limit(1);

        let events = tokio::time::timeout(
            FETCH_TIMEOUT,
            self.client.get_events_of(vec![filter], EventSource::relays(None)),
        )
        .await
        .map_err(|_| ResolverError::Backend("relay fetch timed out".into()))?
        .map_err(|e| ResolverError::Backend(e.to_string()))?;

        let Some(event) = events.into_iter().next() else {
            return Ok(None);
        };

        parse_entry(&event.content)
    }

    /// Resolve `key` then, if the entry is link-visible, unwrap its CHK
    /// key using `link_secret`. See [`crate::resolve_shared`].
    pub async fn resolve_shared(
        &self,
        key: &str,
        link_secret: &hashtree_core::EncryptionKey,
    ) -> Result<Option<Cid>, ResolverError> {
        crate::resolve_shared(self, key, link_secret).await
    }
}

fn parse_entry(content: &str) -> Result<Option<ResolverEntry>, ResolverError> {
    let wire: WireEntry = serde_json::from_str(content)
        .map_err(|e| ResolverError::InvalidEntry(e.to_string()))?;
    let hash = hashtree_core::from_hex(&wire.hash)
        .map_err(|e| ResolverError::InvalidEntry(e.to_string()))?;
    let key = match wire.key {
        Some(hex) => Some(
            hashtree_core::crypto::key_from_hex(&hex)
                .map_err(|e| ResolverError::InvalidEntry(e.to_string()))?,
        ),
        None => None,
    };
    let visibility: TreeVisibility = wire
        .visibility
        .parse()
        .map_err(ResolverError::InvalidEntry)?;

    Ok(Some(ResolverEntry {
        cid: Cid { hash, key },
        visibility,
        encrypted_key: wire.encrypted_key.map(hex::decode).transpose().ok().flatten(),
        key_id: None,
        self_encrypted_key: None,
        created_at: wire.created_at,
    }))
}

#[derive(serde::Serialize, serde::Deserialize)]
struct WireEntry {
    hash: String,
    key: Option<String>,
    visibility: String,
    encrypted_key: Option<String>,
    created_at: u64,
}

#[async_trait]
impl RootResolver for NostrRootResolver {
    async fn get_entry(&self, key: &str) -> Result<Option<ResolverEntry>, ResolverError> {
        if let Some(cached) = self.cache.get_entry(key).await? {
            return Ok(Some(cached));
        }
        let remote = self.fetch_remote(key).await?;
        if let Some(entry) = &remote {
            self.cache.publish(key, entry.clone()).await?;
        }
        Ok(remote)
    }

    async fn publish(&self, key: &str, entry: ResolverEntry) -> Result<(), ResolverError> {
        self.cache.publish(key, entry.clone()).await?;

        let keys = self.keys.as_ref().ok_or(ResolverError::Unauthenticated)?;
        let wire = WireEntry {
            hash: hashtree_core::to_hex(&entry.cid.hash),
            key: entry.cid.key.map(|k| hashtree_core::crypto::key_to_hex(&k)),
            visibility: entry.visibility.as_str().to_string(),
            encrypted_key: entry.encrypted_key.map(hex::encode),
            created_at: entry.created_at,
        };
        let content = serde_json::to_string(&wire)
            .map_err(|e| ResolverError::InvalidEntry(e.to_string()))?;

        let event = EventBuilder::new(Kind::Custom(ROOT_POINTER_KIND), content, [Tag::identifier(key)])
            .to_event(keys)
            .map_err(|e| ResolverError::Backend(e.to_string()))?;

        self.client
            .send_event(event)
            .await
            .map_err(|e| ResolverError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn flush(&self) {
        self.cache.flush().await;
    }

    async fn subscribe(
        &self,
        key: &str,
        callback: Box<dyn Fn(Cid) + Send + Sync>,
    ) -> SubscriptionHandle {
        self.cache.subscribe(key, callback).await
    }

    async fn list(
        &self,
        prefix: &str,
        callback: Box<dyn Fn(String) + Send + Sync>,
    ) -> SubscriptionHandle {
        self.cache.list(prefix, callback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_entry_round_trips_through_json() {
        let wire = WireEntry {
            hash: hashtree_core::to_hex(&[1u8; 32]),
            key: None,
            visibility: "public".to_string(),
            encrypted_key: None,
            created_at: 1234,
        };
        let json = serde_json::to_string(&wire).unwrap();
        let parsed = parse_entry(&json).unwrap().unwrap();
        assert_eq!(parsed.cid.hash, [1u8; 32]);
        assert_eq!(parsed.visibility, TreeVisibility::Public);
        assert_eq!(parsed.created_at, 1234);
    }
}

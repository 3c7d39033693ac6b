//! The P2P exchange engine: turns incoming [`DataMessage`]s into local
//! storage writes and onward forwarding, and turns local cache misses
//! into outgoing requests fanned out across connected peers.
//!
//! Transport-agnostic by construction — see [`Transport`] — so the same
//! engine drives a real WebRTC mesh or an in-memory simulation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use hashtree_core::hash::sha256;
use hashtree_core::store::Store;
use hashtree_core::types::Hash;

use crate::fragment::{fragment_response, FragmentAssembler};
use crate::pending::{LocalRequestTable, PendingRequestTable};
use crate::pool::{PeerClassifier, PeerPool, PoolSettings};
use crate::transport::Transport;
use crate::types::{encode_request, encode_response, parse_message, DataMessage, DataRequest, PeerId, MAX_HTL};

/// How long a locally-initiated request waits for a response before
/// giving up and reporting a miss.
const LOCAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct PeerInfo {
    pool: PeerPool,
    identity: String,
}

/// A snapshot of one connected peer, as returned by [`Exchange::peers`].
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub peer: PeerId,
    pub identity: String,
    pub pool: PeerPool,
}

/// Ties together peer bookkeeping, pending-request tracking, and
/// fragment reassembly against a local [`Store`] and a [`Transport`].
pub struct Exchange {
    local: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    classifier: PeerClassifier,
    peers: Mutex<HashMap<PeerId, PeerInfo>>,
    follows_settings: PoolSettings,
    other_settings: PoolSettings,
    pending: PendingRequestTable,
    local_requests: LocalRequestTable,
    assembler: Mutex<FragmentAssembler>,
}

impl Exchange {
    pub fn new(
        local: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        classifier: PeerClassifier,
        follows_settings: PoolSettings,
        other_settings: PoolSettings,
    ) -> Self {
        Self {
            local,
            transport,
            classifier,
            peers: Mutex::new(HashMap::new()),
            follows_settings,
            other_settings,
            pending: PendingRequestTable::new(),
            local_requests: LocalRequestTable::new(),
            assembler: Mutex::new(FragmentAssembler::new()),
        }
    }

    /// Registers a newly connected peer, classifying it into a pool via
    /// the caller's [`PeerClassifier`]. `identity` is whatever opaque
    /// string the signalling layer used to authenticate the peer (e.g. a
    /// nostr pubkey).
    pub async fn add_peer(&self, peer: PeerId, identity: &str) {
        let pool = (self.classifier)(identity);
        self.peers.lock().await.insert(
            peer,
            PeerInfo {
                pool,
                identity: identity.to_string(),
            },
        );
    }

    pub async fn remove_peer(&self, peer: &PeerId) {
        self.peers.lock().await.remove(peer);
    }

    /// Count of connected peers in `pool`, for deciding whether that pool
    /// is [`PoolSettings::is_satisfied`] or [`PoolSettings::has_room`].
    pub async fn pool_size(&self, pool: PeerPool) -> usize {
        self.peers
            .lock()
            .await
            .values()
            .filter(|info| info.pool == pool)
            .count()
    }

    pub fn settings_for(&self, pool: PeerPool) -> PoolSettings {
        match pool {
            PeerPool::Follows => self.follows_settings,
            PeerPool::Other => self.other_settings,
        }
    }

    /// Snapshot of every currently connected peer, for status/admin
    /// surfaces (e.g. an `/api/peers` endpoint). Order is unspecified.
    pub async fn peers(&self) -> Vec<PeerSnapshot> {
        self.peers
            .lock()
            .await
            .iter()
            .map(|(peer, info)| PeerSnapshot {
                peer: *peer,
                identity: info.identity.clone(),
                pool: info.pool,
            })
            .collect()
    }

    /// Requests `hash` from the network: fans a [`DataRequest`] out to
    /// every connected peer (follows pool first) and waits up to
    /// [`LOCAL_REQUEST_TIMEOUT`] for a response to land via
    /// [`Exchange::handle_incoming`]. A second concurrent caller for the
    /// same hash rides the first caller's request instead of sending a
    /// duplicate.
    pub async fn request(&self, hash: Hash) -> Option<Vec<u8>> {
        let rx = match self.local_requests.subscribe(hash).await {
            Ok(rx) => {
                self.fan_out_request(hash, MAX_HTL).await;
                rx
            }
            Err(rx) => rx,
        };

        match tokio::time::timeout(LOCAL_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => None,
            Err(_) => {
                self.local_requests.complete(&hash, None).await;
                None
            }
        }
    }

    async fn ordered_peers(&self) -> Vec<PeerId> {
        let peers = self.peers.lock().await;
        let mut follows = Vec::new();
        let mut other = Vec::new();
        for (id, info) in peers.iter() {
            match info.pool {
                PeerPool::Follows => follows.push(*id),
                PeerPool::Other => other.push(*id),
            }
        }
        follows.extend(other);
        follows
    }

    async fn fan_out_request(&self, hash: Hash, htl: u8) {
        let frame = match encode_request(&DataRequest { h: hash, htl }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode outgoing request");
                return;
            }
        };
        for peer in self.ordered_peers().await {
            if let Err(e) = self.transport.send(peer, frame.clone()).await {
                debug!(%peer, error = %e, "request send failed, skipping peer");
            }
        }
    }

    /// Feeds a raw inbound frame from `from` through the protocol. Call
    /// this from the transport's per-peer receive loop.
    pub async fn handle_incoming(&self, from: PeerId, frame: &[u8]) {
        let message = match parse_message(frame) {
            Ok(m) => m,
            Err(e) => {
                warn!(%from, error = %e, "dropping malformed data-channel frame");
                return;
            }
        };

        match message {
            DataMessage::Request(req) => self.handle_request(from, req).await,
            DataMessage::Response(resp) => self.handle_response(from, resp).await,
        }
    }

    async fn handle_request(&self, from: PeerId, req: DataRequest) {
        if let Ok(Some(bytes)) = self.local.get(&req.h).await {
            self.send_response(from, req.h, &bytes).await;
            return;
        }

        let should_forward = self.pending.register(req.h, from).await;
        if !should_forward {
            return;
        }
        if req.htl == 0 {
            return;
        }

        let frame = match encode_request(&DataRequest {
            h: req.h,
            htl: req.htl - 1,
        }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode forwarded request");
                return;
            }
        };
        for peer in self.ordered_peers().await {
            if peer == from {
                continue;
            }
            if let Err(e) = self.transport.send(peer, frame.clone()).await {
                debug!(%peer, error = %e, "forwarded request send failed, skipping peer");
            }
        }
    }

    async fn handle_response(&self, from: PeerId, resp: crate::types::DataResponse) {
        let hash = resp.h;
        let complete = {
            let mut assembler = self.assembler.lock().await;
            assembler.push(&resp)
        };
        let Some(bytes) = complete else {
            return;
        };

        if sha256(&bytes) != hash {
            warn!(%from, "response hash mismatch, discarding");
            return;
        }

        if let Err(e) = self.local.put(&hash, bytes.clone()).await {
            warn!(error = %e, "failed to cache response locally");
        }

        self.local_requests.complete(&hash, Some(bytes.clone())).await;

        let waiters = self.pending.take_waiters(&hash).await;
        for waiter in waiters {
            self.send_response(waiter, hash, &bytes).await;
        }
    }

    async fn send_response(&self, to: PeerId, hash: Hash, bytes: &[u8]) {
        for fragment in fragment_response(hash, bytes) {
            let frame = match encode_response(&fragment) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "failed to encode response fragment");
                    return;
                }
            };
            if let Err(e) = self.transport.send(to, frame).await {
                debug!(%to, error = %e, "response send failed");
                return;
            }
        }
    }

    pub async fn expire_stale_assemblies(&self) {
        self.assembler.lock().await.expire_stale();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hashtree_core::store::MemoryStore;
    use std::sync::Mutex as StdMutex;
    use crate::transport::TransportError;

    struct RecordingTransport {
        sent: StdMutex<Vec<(PeerId, Vec<u8>)>>,
        connected: Vec<PeerId>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, peer: PeerId, frame: Vec<u8>) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push((peer, frame));
            Ok(())
        }

        fn connected_peers(&self) -> Vec<PeerId> {
            self.connected.clone()
        }
    }

    fn always_other() -> PeerClassifier {
        Arc::new(|_: &str| PeerPool::Other)
    }

    #[tokio::test]
    async fn request_with_no_peers_times_out_to_none() {
        let exchange = Exchange::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingTransport {
                sent: StdMutex::new(Vec::new()),
                connected: Vec::new(),
            }),
            always_other(),
            PoolSettings::default(),
            PoolSettings::default(),
        );
        // No peers means no response will ever arrive; drive the request
        // with a directly-completed local table entry instead of waiting
        // out the real timeout.
        let hash = [1u8; 32];
        exchange.local_requests.complete(&hash, None).await;
        let result = exchange.request(hash).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn peers_reports_identity_and_pool_classification() {
        let classifier: PeerClassifier = Arc::new(|id: &str| {
            if id == "friend-pubkey" {
                PeerPool::Follows
            } else {
                PeerPool::Other
            }
        });
        let exchange = Exchange::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingTransport {
                sent: StdMutex::new(Vec::new()),
                connected: Vec::new(),
            }),
            classifier,
            PoolSettings::default(),
            PoolSettings::default(),
        );

        let friend = PeerId::new();
        let stranger = PeerId::new();
        exchange.add_peer(friend, "friend-pubkey").await;
        exchange.add_peer(stranger, "stranger-pubkey").await;

        let mut snapshots = exchange.peers().await;
        snapshots.sort_by_key(|s| s.identity.clone());

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].identity, "friend-pubkey");
        assert_eq!(snapshots[0].pool, PeerPool::Follows);
        assert_eq!(snapshots[1].identity, "stranger-pubkey");
        assert_eq!(snapshots[1].pool, PeerPool::Other);

        exchange.remove_peer(&friend).await;
        assert_eq!(exchange.peers().await.len(), 1);
    }

    #[tokio::test]
    async fn local_hit_answers_request_without_forwarding() {
        let store = Arc::new(MemoryStore::new());
        let data = b"hello world".to_vec();
        let hash = sha256(&data);
        store.put(&hash, data.clone()).await.unwrap();

        let requester = PeerId::new();
        let transport = Arc::new(RecordingTransport {
            sent: StdMutex::new(Vec::new()),
            connected: vec![requester],
        });
        let exchange = Exchange::new(store, transport.clone(), always_other(), PoolSettings::default(), PoolSettings::default());
        exchange.add_peer(requester, "peer-a").await;

        exchange
            .handle_incoming(requester, &encode_request(&DataRequest { h: hash, htl: MAX_HTL }).unwrap())
            .await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match parse_message(&sent[0].1).unwrap() {
            DataMessage::Response(resp) => assert_eq!(resp.d, data),
            DataMessage::Request(_) => panic!("expected a response to be sent back"),
        }
    }

    #[tokio::test]
    async fn request_at_zero_htl_is_not_forwarded() {
        let store = Arc::new(MemoryStore::new());
        let from = PeerId::new();
        let other = PeerId::new();
        let transport = Arc::new(RecordingTransport {
            sent: StdMutex::new(Vec::new()),
            connected: vec![from, other],
        });
        let exchange = Exchange::new(store, transport.clone(), always_other(), PoolSettings::default(), PoolSettings::default());
        exchange.add_peer(from, "peer-a").await;
        exchange.add_peer(other, "peer-b").await;

        exchange
            .handle_incoming(from, &encode_request(&DataRequest { h: [5u8; 32], htl: 0 }).unwrap())
            .await;

        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn response_is_cached_locally_and_forwarded_to_waiters() {
        let store = Arc::new(MemoryStore::new());
        let requester = PeerId::new();
        let responder = PeerId::new();
        let transport = Arc::new(RecordingTransport {
            sent: StdMutex::new(Vec::new()),
            connected: vec![requester, responder],
        });
        let exchange = Exchange::new(store.clone(), transport.clone(), always_other(), PoolSettings::default(), PoolSettings::default());
        exchange.add_peer(requester, "peer-a").await;
        exchange.add_peer(responder, "peer-b").await;

        let data = b"payload".to_vec();
        let hash = sha256(&data);

        // `requester` asked us (forwarded through us) for `hash`; we don't
        // have it, so we'd forward — simulate that bookkeeping directly.
        exchange.pending.register(hash, requester).await;

        exchange
            .handle_incoming(
                responder,
                &encode_response(&crate::types::DataResponse {
                    h: hash,
                    d: data.clone(),
                    fragment_index: 0,
                    fragment_total: 1,
                })
                .unwrap(),
            )
            .await;

        assert_eq!(store.get(&hash).await.unwrap(), Some(data.clone()));
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, requester);
    }
}

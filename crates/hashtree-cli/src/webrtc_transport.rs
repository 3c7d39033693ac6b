//! The concrete WebRTC/ICE [`hashtree_webrtc::Transport`] implementation:
//! one `RTCPeerConnection` + data channel per peer, with SDP/ICE
//! negotiated over nostr events per §6's signalling surface (a broadcast
//! `hello` tagged for discovery, directed `offer`/`answer`/`candidate`
//! events addressed with a `p` tag). This is the one piece of the system
//! with no retrievable teacher source (the teacher's own WebRTC module
//! was never checked in) — the shape below follows the `webrtc` crate's
//! own usage conventions and `hashtree_webrtc::types::SignalingMessage`'s
//! wire shape exactly.

use std::collections::HashMap;
use std::sync::Arc;

use hashtree_webrtc::types::{PeerId, SignalingMessage, NOSTR_KIND_HASHTREE};
use hashtree_webrtc::{Exchange, Transport, TransportError};
use nostr_sdk::{
    Client, ClientBuilder, EventBuilder, Filter, Keys, Kind, PublicKey, RelayPoolNotification, Tag,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const DATA_CHANNEL_LABEL: &str = "hashtree";
const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

struct PeerConnectionEntry {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: RwLock<Option<Arc<RTCDataChannel>>>,
}

/// Wires a real `RTCPeerConnection` per peer into an [`Exchange`],
/// discovering and signalling peers via nostr events of kind
/// [`NOSTR_KIND_HASHTREE`].
pub struct WebRtcTransport {
    keys: Keys,
    client: Client,
    api: API,
    ice_servers: Vec<String>,
    peers: Mutex<HashMap<PeerId, PeerConnectionEntry>>,
    /// Maps a peer's nostr pubkey (hex) to the `PeerId` we've assigned it,
    /// so inbound signalling events (addressed by pubkey) can be routed
    /// to the right `RTCPeerConnection`.
    identity_to_peer: Mutex<HashMap<String, PeerId>>,
    exchange: RwLock<Option<Arc<Exchange>>>,
}

impl WebRtcTransport {
    pub async fn new(
        keys: Keys,
        relays: &[String],
        ice_servers: Vec<String>,
    ) -> anyhow::Result<Arc<Self>> {
        let client = ClientBuilder::new().signer(keys.clone()).build();
        for relay in relays {
            client.add_relay(relay.as_str()).await?;
        }
        client.connect().await;

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let transport = Arc::new(Self {
            keys,
            client,
            api,
            ice_servers: if ice_servers.is_empty() {
                vec![DEFAULT_STUN_SERVER.to_string()]
            } else {
                ice_servers
            },
            peers: Mutex::new(HashMap::new()),
            identity_to_peer: Mutex::new(HashMap::new()),
            exchange: RwLock::new(None),
        });

        Ok(transport)
    }

    /// Ties this transport to the `Exchange` it feeds inbound data into.
    /// Done as a second step (rather than at construction) because
    /// `Exchange::new` itself takes an `Arc<dyn Transport>` built from
    /// this transport — the two are mutually referential.
    pub async fn attach_exchange(&self, exchange: Arc<Exchange>) {
        *self.exchange.write().await = Some(exchange);
    }

    /// Publishes a broadcast `hello`, announcing this node for discovery,
    /// and spawns the background task that relays incoming signalling
    /// events into per-peer connection setup.
    pub fn spawn_signaling_loop(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run_signaling_loop().await;
        });
    }

    async fn run_signaling_loop(self: Arc<Self>) {
        let own_pubkey = self.keys.public_key();
        let filter = Filter::new()
            .kind(Kind::Custom(NOSTR_KIND_HASHTREE))
            .pubkey(own_pubkey);

        if let Err(e) = self.client.subscribe(vec![filter], None).await {
            warn!(error = %e, "failed to subscribe to signalling events");
            return;
        }

        let mut notifications = self.client.notifications();
        while let Ok(notification) = notifications.recv().await {
            if let RelayPoolNotification::Event { event, .. } = notification {
                if event.kind != Kind::Custom(NOSTR_KIND_HASHTREE) {
                    continue;
                }
                if let Ok(signal) = serde_json::from_str::<SignalingMessage>(&event.content) {
                    self.clone().handle_signal(signal).await;
                }
            }
        }
    }

    pub fn broadcast_hello(&self) {
        let content = serde_json::to_string(&SignalingMessage::Hello {
            peer_id: self.keys.public_key().to_hex(),
        })
        .expect("SignalingMessage always serializes");
        let tags: Vec<Tag> = vec![];
        self.publish(content, tags);
    }

    fn publish(&self, content: String, tags: Vec<Tag>) {
        let client = self.client.clone();
        let keys = self.keys.clone();
        tokio::spawn(async move {
            let Ok(event) = EventBuilder::new(Kind::Custom(NOSTR_KIND_HASHTREE), content, tags)
                .to_event(&keys)
            else {
                return;
            };
            if let Err(e) = client.send_event(event).await {
                warn!(error = %e, "failed to publish signalling event");
            }
        });
    }

    fn send_directed(&self, target_pubkey_hex: &str, msg: &SignalingMessage) {
        let Ok(target) = PublicKey::from_hex(target_pubkey_hex) else {
            return;
        };
        let Ok(content) = serde_json::to_string(msg) else {
            return;
        };
        let tags = vec![Tag::public_key(target)];
        self.publish(content, tags);
    }

    async fn handle_signal(self: Arc<Self>, signal: SignalingMessage) {
        match &signal {
            SignalingMessage::Hello { peer_id } => {
                debug!(peer_id, "discovered peer via hello broadcast");
                // A lower uuid/pubkey initiates; our `PeerId` is a
                // transport-assigned uuid created lazily in
                // `connect_to`, so we compare pubkeys lexicographically
                // as the tie-break instead.
                let own = self.keys.public_key().to_hex();
                if peer_id < &own {
                    let _ = self.connect_to(peer_id.clone()).await;
                }
            }
            SignalingMessage::Offer {
                peer_id, sdp, ..
            } => {
                if let Err(e) = self.accept_offer(peer_id.clone(), sdp.clone()).await {
                    warn!(error = %e, "failed to accept offer");
                }
            }
            SignalingMessage::Answer { peer_id, sdp, .. } => {
                if let Err(e) = self.accept_answer(peer_id.clone(), sdp.clone()).await {
                    warn!(error = %e, "failed to accept answer");
                }
            }
            SignalingMessage::Candidate {
                peer_id, candidate, ..
            } => {
                if let Err(e) = self.add_candidate(peer_id.clone(), candidate.clone()).await {
                    warn!(error = %e, "failed to add ice candidate");
                }
            }
            SignalingMessage::Candidates {
                peer_id,
                candidates,
                ..
            } => {
                for candidate in candidates {
                    if let Err(e) = self.add_candidate(peer_id.clone(), candidate.clone()).await {
                        warn!(error = %e, "failed to add ice candidate");
                    }
                }
            }
        }
    }

    fn config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn peer_id_for_identity(&self, identity: &str) -> PeerId {
        let mut map = self.identity_to_peer.lock().await;
        *map.entry(identity.to_string()).or_insert_with(PeerId::new)
    }

    fn wire_data_channel(self: &Arc<Self>, peer: PeerId, identity: String, dc: Arc<RTCDataChannel>) {
        let this = self.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let this = this.clone();
            Box::pin(async move {
                let exchange = this.exchange.read().await.clone();
                if let Some(exchange) = exchange {
                    exchange.handle_incoming(peer, &msg.data).await;
                }
            })
        }));

        let this = self.clone();
        dc.on_open(Box::new(move || {
            let this = this.clone();
            let identity = identity.clone();
            Box::pin(async move {
                if let Some(exchange) = this.exchange.read().await.clone() {
                    exchange.add_peer(peer, &identity).await;
                }
            })
        }));
    }

    /// Initiates a connection to a peer discovered via `hello`, creating
    /// the offer side of the handshake.
    async fn connect_to(self: &Arc<Self>, identity: String) -> anyhow::Result<()> {
        let peer = self.peer_id_for_identity(&identity).await;
        let pc = Arc::new(self.api.new_peer_connection(self.config()).await?);

        let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;
        self.wire_data_channel(peer, identity.clone(), dc.clone());

        self.peers.lock().await.insert(
            peer,
            PeerConnectionEntry {
                peer_connection: pc.clone(),
                data_channel: RwLock::new(Some(dc)),
            },
        );

        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer.clone()).await?;
        self.spawn_ice_candidate_forwarding(peer, identity.clone(), pc.clone());

        self.send_directed(
            &identity,
            &SignalingMessage::Offer {
                peer_id: self.keys.public_key().to_hex(),
                target_peer_id: identity,
                sdp: offer.sdp,
            },
        );
        Ok(())
    }

    async fn accept_offer(self: &Arc<Self>, identity: String, sdp: String) -> anyhow::Result<()> {
        let peer = self.peer_id_for_identity(&identity).await;
        let pc = Arc::new(self.api.new_peer_connection(self.config()).await?);

        let this = self.clone();
        let identity_for_dc = identity.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            this.wire_data_channel(peer, identity_for_dc.clone(), dc.clone());
            let this = this.clone();
            Box::pin(async move {
                if let Some(entry) = this.peers.lock().await.get(&peer) {
                    *entry.data_channel.write().await = Some(dc);
                }
            })
        }));

        self.peers.lock().await.insert(
            peer,
            PeerConnectionEntry {
                peer_connection: pc.clone(),
                data_channel: RwLock::new(None),
            },
        );

        let remote = RTCSessionDescription::offer(sdp)?;
        pc.set_remote_description(remote).await?;
        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer.clone()).await?;
        self.spawn_ice_candidate_forwarding(peer, identity.clone(), pc.clone());

        self.send_directed(
            &identity,
            &SignalingMessage::Answer {
                peer_id: self.keys.public_key().to_hex(),
                target_peer_id: identity,
                sdp: answer.sdp,
            },
        );
        Ok(())
    }

    async fn accept_answer(&self, identity: String, sdp: String) -> anyhow::Result<()> {
        let peer = self.peer_id_for_identity(&identity).await;
        let peers = self.peers.lock().await;
        let Some(entry) = peers.get(&peer) else {
            return Ok(());
        };
        let remote = RTCSessionDescription::answer(sdp)?;
        entry.peer_connection.set_remote_description(remote).await?;
        Ok(())
    }

    async fn add_candidate(&self, identity: String, candidate: String) -> anyhow::Result<()> {
        let peer = self.peer_id_for_identity(&identity).await;
        let peers = self.peers.lock().await;
        let Some(entry) = peers.get(&peer) else {
            return Ok(());
        };
        entry
            .peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    fn spawn_ice_candidate_forwarding(
        self: &Arc<Self>,
        _peer: PeerId,
        identity: String,
        pc: Arc<RTCPeerConnection>,
    ) {
        let this = self.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let this = this.clone();
            let identity = identity.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let Ok(init) = candidate.to_json() else { return };
                this.send_directed(
                    &identity,
                    &SignalingMessage::Candidate {
                        peer_id: this.keys.public_key().to_hex(),
                        target_peer_id: identity.clone(),
                        candidate: init.candidate,
                    },
                );
            })
        }));
    }
}

#[async_trait::async_trait]
impl Transport for WebRtcTransport {
    async fn send(&self, peer: PeerId, frame: Vec<u8>) -> Result<(), TransportError> {
        let peers = self.peers.lock().await;
        let Some(entry) = peers.get(&peer) else {
            return Err(TransportError::NotConnected(peer));
        };
        let dc = entry.data_channel.read().await.clone();
        let Some(dc) = dc else {
            return Err(TransportError::NotConnected(peer));
        };
        dc.send(&bytes::Bytes::from(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers
            .try_lock()
            .map(|peers| peers.keys().copied().collect())
            .unwrap_or_default()
    }
}

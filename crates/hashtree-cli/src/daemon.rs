//! Assembles the embedded daemon: the layered [`HashtreeStore`], the
//! nostr-backed root resolver, (optionally) the P2P exchange and its
//! WebRTC transport, the axum HTTP surface, and a background eviction
//! task. `app::run`'s `serve` command is a thin wrapper around this.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use nostr::nips::nip19::ToBech32;
use tokio::net::TcpListener;

use crate::config::{ensure_keys, parse_npub, pubkey_bytes, Config};
use crate::server::auth::{AppState, AuthCredentials, WsRelayState};
use hashtree_blossom::{BlossomClient, NostrKeysSigner};
use hashtree_local::FsStore;
use hashtree_resolver::nostr::{NostrResolverConfig, NostrRootResolver};
use hashtree_store::HashtreeStore;
use hashtree_webrtc::Exchange;

#[cfg(feature = "p2p")]
use crate::webrtc_transport::WebRtcTransport;
#[cfg(feature = "p2p")]
use hashtree_webrtc::{PeerClassifier, PeerPool, PoolSettings};

pub struct EmbeddedDaemonOptions {
    pub config: Config,
    pub data_dir: PathBuf,
    pub bind_address: String,
    pub relays: Option<Vec<String>>,
}

pub struct EmbeddedDaemonInfo {
    pub addr: String,
    pub npub: String,
    pub store: Arc<HashtreeStore>,
    pub resolver: Arc<NostrRootResolver>,
}

pub async fn start_embedded(opts: EmbeddedDaemonOptions) -> Result<EmbeddedDaemonInfo> {
    let mut config = opts.config;
    if let Some(relays) = opts.relays {
        config.nostr.relays = relays;
    }

    let (keys, _was_generated) = ensure_keys()?;
    let pk_bytes = pubkey_bytes(&keys);
    let own_pubkey_hex = hex::encode(pk_bytes);
    let npub = keys
        .public_key()
        .to_bech32()
        .context("failed to encode npub")?;

    let mut allowed_pubkeys: HashSet<String> = HashSet::new();
    allowed_pubkeys.insert(own_pubkey_hex.clone());
    for npub_str in &config.nostr.allowed_npubs {
        match parse_npub(npub_str) {
            Ok(pk) => {
                allowed_pubkeys.insert(hex::encode(pk));
            }
            Err(e) => tracing::warn!(npub = npub_str.as_str(), error = %e, "invalid npub in allowed_npubs"),
        }
    }

    let max_size_bytes = config.storage.max_size_gb.saturating_mul(1024 * 1024 * 1024);
    let local = Arc::new(
        FsStore::with_max_size(&opts.data_dir, Some(max_size_bytes))
            .await
            .context("failed to open local store")?,
    );
    let mut store = HashtreeStore::new(local.clone());

    let signer = Arc::new(NostrKeysSigner::new(keys.clone()));
    let http = BlossomClient::new(signer)
        .with_read_servers(config.http.all_read_servers())
        .with_write_servers(config.http.all_write_servers());
    store = store.with_http(Arc::new(http));

    let exchange: Option<Arc<Exchange>> = if config.server.enable_webrtc {
        #[cfg(feature = "p2p")]
        {
            let contacts_file = opts.data_dir.join("contacts.json");
            let peer_classifier: PeerClassifier = Arc::new(move |pubkey_hex: &str| {
                if let Ok(contents) = std::fs::read_to_string(&contacts_file) {
                    if let Ok(contacts) = serde_json::from_str::<Vec<String>>(&contents) {
                        if contacts.iter().any(|c| c == pubkey_hex) {
                            return PeerPool::Follows;
                        }
                    }
                }
                PeerPool::Other
            });

            let transport = WebRtcTransport::new(keys.clone(), &config.nostr.relays, Vec::new())
                .await
                .context("failed to start webrtc transport")?;
            let exchange = Arc::new(Exchange::new(
                local.clone(),
                transport.clone() as Arc<dyn hashtree_webrtc::Transport>,
                peer_classifier,
                PoolSettings::default(),
                PoolSettings::default(),
            ));
            transport.attach_exchange(exchange.clone()).await;
            transport.spawn_signaling_loop();
            transport.broadcast_hello();

            store = store.with_p2p(exchange.clone());
            Some(exchange)
        }
        #[cfg(not(feature = "p2p"))]
        {
            tracing::warn!("server.enable_webrtc is set but the p2p feature was not built in");
            None
        }
    } else {
        None
    };

    let store = Arc::new(store);

    let resolver = Arc::new(
        NostrRootResolver::new(NostrResolverConfig {
            relays: config.nostr.relays.clone(),
            secret_key: Some(keys.clone()),
        })
        .await
        .context("failed to start nostr root resolver")?,
    );

    let auth = if config.server.enable_auth {
        let password = crate::config::ensure_auth_cookie()?;
        Some(AuthCredentials {
            username: "hashtree".to_string(),
            password,
        })
    } else {
        None
    };

    let state = AppState {
        store: Arc::clone(&store),
        auth,
        exchange,
        ws_relay: Arc::new(WsRelayState::new()),
        max_upload_bytes: (config.http.max_upload_mb as usize) * 1024 * 1024,
        public_writes: config.server.public_writes,
        allowed_pubkeys,
    };

    let router = crate::server::router(state);

    let eviction_store = Arc::clone(&store);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            match eviction_store.evict_if_needed(&HashSet::new()).await {
                Ok(freed) if freed > 0 => {
                    tracing::info!(freed_bytes = freed, "background eviction freed space");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "background eviction failed"),
            }
        }
    });

    let listener = TcpListener::bind(&opts.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", opts.bind_address))?;
    let local_addr = listener.local_addr()?;
    let actual_addr = format!("{}:{}", local_addr.ip(), local_addr.port());

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "embedded daemon server error");
        }
    });

    tracing::info!(addr = actual_addr.as_str(), npub = npub.as_str(), "embedded daemon started");

    Ok(EmbeddedDaemonInfo {
        addr: actual_addr,
        npub,
        store,
        resolver,
    })
}

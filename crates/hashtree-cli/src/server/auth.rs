use axum::{
    body::Body,
    extract::State,
    extract::ws::Message,
    http::{header, Request, Response, StatusCode},
    middleware::Next,
};
use hashtree_store::HashtreeStore;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{mpsc, Mutex};

/// One connected `/ws` signalling client.
pub struct WsRelayState {
    pub clients: Mutex<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    /// Maps a client's declared peer identity (nostr pubkey) to its client id,
    /// so an incoming `SignalingMessage::target_peer_id` can be routed.
    pub identities: Mutex<HashMap<String, u64>>,
    pub next_client_id: AtomicU64,
    pub next_request_id: AtomicU32,
}

impl WsRelayState {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            identities: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            next_request_id: AtomicU32::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<HashtreeStore>,
    pub auth: Option<AuthCredentials>,
    /// P2P exchange engine, present only when the daemon was started with
    /// the `p2p` feature and `server.enable_webrtc` is set.
    pub exchange: Option<Arc<hashtree_webrtc::Exchange>>,
    /// WebSocket relay state for /ws signalling clients.
    pub ws_relay: Arc<WsRelayState>,
    /// Maximum upload size in bytes for Blossom uploads.
    pub max_upload_bytes: usize,
    /// Allow anyone with valid Nostr auth to write. When false, only
    /// `allowed_pubkeys` can write.
    pub public_writes: bool,
    /// Pubkeys allowed to write (hex format, from config allowed_npubs).
    pub allowed_pubkeys: std::collections::HashSet<String>,
}

#[derive(Clone)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

/// Auth middleware - validates HTTP Basic Auth.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response<Body>, StatusCode> {
    let Some(auth) = &state.auth else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let authorized = if let Some(header_value) = auth_header {
        if let Some(credentials) = header_value.strip_prefix("Basic ") {
            use base64::Engine;
            let engine = base64::engine::general_purpose::STANDARD;
            if let Ok(decoded) = engine.decode(credentials) {
                if let Ok(decoded_str) = String::from_utf8(decoded) {
                    let expected = format!("{}:{}", auth.username, auth.password);
                    decoded_str == expected
                } else {
                    false
                }
            } else {
                false
            }
        } else {
            false
        }
    } else {
        false
    };

    if authorized {
        Ok(next.run(request).await)
    } else {
        Ok(Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::WWW_AUTHENTICATE, "Basic realm=\"hashtree\"")
            .body(Body::from("Unauthorized"))
            .unwrap())
    }
}

//! `/ws`: the signalling relay two peers use to exchange
//! [`hashtree_webrtc::types::SignalingMessage`] frames while negotiating a
//! direct WebRTC connection. The relay never inspects `sdp`/`candidate`
//! payloads, only the `peer_id`/`target_peer_id` envelope, so it can route
//! a message to the right connected client without understanding ICE.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use hashtree_webrtc::types::SignalingMessage;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::auth::AppState;

pub async fn ws_signal(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = state.ws_relay.next_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.ws_relay.clients.lock().await.insert(client_id, tx);

    let (mut sender, mut receiver) = socket.split();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut known_identity: Option<String> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let parsed: Result<SignalingMessage, _> = serde_json::from_str(&text);
        let Ok(signal) = parsed else {
            debug!("dropping malformed signalling frame");
            continue;
        };

        let sender_identity = signalling_sender(&signal).to_string();
        if known_identity.as_deref() != Some(sender_identity.as_str()) {
            state
                .ws_relay
                .identities
                .lock()
                .await
                .insert(sender_identity.clone(), client_id);
            known_identity = Some(sender_identity);
        }

        if let SignalingMessage::Hello { .. } = &signal {
            continue;
        }

        let target = signalling_target(&signal);
        let target_client = state.ws_relay.identities.lock().await.get(target).copied();
        let Some(target_client) = target_client else {
            debug!(target, "no connected client for signalling target");
            continue;
        };

        let Some(target_tx) = state.ws_relay.clients.lock().await.get(&target_client).cloned()
        else {
            continue;
        };

        if let Ok(forwarded) = serde_json::to_string(&signal) {
            if target_tx.send(Message::Text(forwarded)).is_err() {
                warn!(target, "failed to forward signalling frame, client gone");
            }
        }
    }

    state.ws_relay.clients.lock().await.remove(&client_id);
    if let Some(identity) = known_identity {
        let mut identities = state.ws_relay.identities.lock().await;
        if identities.get(&identity).copied() == Some(client_id) {
            identities.remove(&identity);
        }
    }

    send_task.abort();
}

fn signalling_sender(msg: &SignalingMessage) -> &str {
    match msg {
        SignalingMessage::Hello { peer_id }
        | SignalingMessage::Offer { peer_id, .. }
        | SignalingMessage::Answer { peer_id, .. }
        | SignalingMessage::Candidate { peer_id, .. }
        | SignalingMessage::Candidates { peer_id, .. } => peer_id,
    }
}

fn signalling_target(msg: &SignalingMessage) -> &str {
    match msg {
        SignalingMessage::Hello { peer_id } => peer_id,
        SignalingMessage::Offer { target_peer_id, .. }
        | SignalingMessage::Answer { target_peer_id, .. }
        | SignalingMessage::Candidate { target_peer_id, .. }
        | SignalingMessage::Candidates { target_peer_id, .. } => target_peer_id,
    }
}

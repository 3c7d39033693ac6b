//! Decouples the exchange engine from the concrete connection medium.
//! The reference deployment wires this against WebRTC data channels
//! established via nostr signalling; tests and simulations wire it
//! against an in-memory mesh instead.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::PeerId;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Sends raw data-channel frames to a connected peer and reports which
/// peers are currently connected. The exchange engine only ever deals in
/// already-encoded bytes (see [`crate::types::encode_request`] /
/// [`crate::types::encode_response`]) — framing and encryption are this
/// trait's concern, not the engine's.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `frame` to `peer`. Errors if the peer isn't connected.
    async fn send(&self, peer: PeerId, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Currently connected peers, in no particular order.
    fn connected_peers(&self) -> Vec<PeerId>;
}

//! Wire types for the P2P exchange protocol: peer identity, the
//! request/response data message, and the nostr-based signalling envelope
//! used to set up a connection before any data message can flow.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hashtree_core::types::Hash as BlobHash;

/// Maximum hop count a `Request` may travel before nodes stop forwarding
/// it. Decremented by exactly one per hop by default; a deployment may
/// substitute a randomized decrement without changing the wire format.
pub const MAX_HTL: u8 = 4;

/// Responses larger than this are split into `FRAGMENT_THRESHOLD`-sized
/// pieces before being sent, so one blob doesn't monopolize a data
/// channel.
pub const FRAGMENT_THRESHOLD: usize = 32 * 1024;

/// Nostr event kind used for out-of-band peer signalling (SDP offer/answer
/// and ICE candidate exchange). Distinct from the reference-resolver's
/// root-pointer kind: signalling events are ephemeral handshake material,
/// never meant to be queried as a tree root.
pub const NOSTR_KIND_HASHTREE: u16 = 30079;

/// Opaque identifier for a peer connection, independent of the underlying
/// transport's own session identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request for a hash, carrying the hop count it's allowed to still
/// travel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub h: BlobHash,
    pub htl: u8,
}

/// One fragment of a response. A response that fits under
/// `FRAGMENT_THRESHOLD` is sent as `fragment_index: 0, fragment_total: 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResponse {
    pub h: BlobHash,
    pub d: Vec<u8>,
    pub fragment_index: u32,
    pub fragment_total: u32,
}

/// The data-channel message envelope: either side of the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataMessage {
    Request(DataRequest),
    Response(DataResponse),
}

const TAG_REQUEST: u8 = 0;
const TAG_RESPONSE: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty message")]
    Empty,
    #[error("unknown message tag: {0}")]
    UnknownTag(u8),
    #[error("msgpack encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Wire encoding: a one-byte tag followed by the MessagePack-encoded body.
pub fn encode_request(req: &DataRequest) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![TAG_REQUEST];
    out.extend(rmp_serde::to_vec(req)?);
    Ok(out)
}

pub fn encode_response(resp: &DataResponse) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![TAG_RESPONSE];
    out.extend(rmp_serde::to_vec(resp)?);
    Ok(out)
}

/// Decodes a tagged data-channel frame back into a [`DataMessage`].
pub fn parse_message(bytes: &[u8]) -> Result<DataMessage, CodecError> {
    let (tag, body) = bytes.split_first().ok_or(CodecError::Empty)?;
    match *tag {
        TAG_REQUEST => Ok(DataMessage::Request(rmp_serde::from_slice(body)?)),
        TAG_RESPONSE => Ok(DataMessage::Response(rmp_serde::from_slice(body)?)),
        other => Err(CodecError::UnknownTag(other)),
    }
}

/// Signalling messages exchanged out-of-band (over nostr DMs or a
/// `ws_relay`-style channel) to establish a transport connection before
/// any [`DataMessage`] can flow.
///
/// `peer_id`/`target_peer_id` are plain strings rather than [`PeerId`]:
/// the signalling channel addresses peers by their nostr identity (a
/// pubkey, optionally composed with a sub-identifier), which predates
/// the `PeerId` a transport assigns once a connection actually exists.
/// The relay-level routing (e.g. a nostr `p` tag) already carries the
/// recipient out-of-band; `target_peer_id` is carried in the payload
/// too so a receiver fanning in signalling from several relays can
/// filter without re-deriving it from transport metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Hello { peer_id: String },
    Offer { peer_id: String, target_peer_id: String, sdp: String },
    Answer { peer_id: String, target_peer_id: String, sdp: String },
    Candidate { peer_id: String, target_peer_id: String, candidate: String },
    Candidates { peer_id: String, target_peer_id: String, candidates: Vec<String> },
}

//! P2P blob exchange: peer pools, hop-limited request flooding, fragment
//! reassembly, and a transport-agnostic exchange engine. The concrete
//! WebRTC/ICE transport and its nostr signalling glue are wired by the
//! worker façade that embeds this crate — everything here only assumes a
//! [`transport::Transport`].

pub mod connection;
pub mod exchange;
pub mod fragment;
pub mod pending;
pub mod pool;
pub mod transport;
pub mod types;

pub use connection::ConnectionState;
pub use exchange::{Exchange, PeerSnapshot};
pub use fragment::FragmentAssembler;
pub use pending::{LocalRequestTable, PendingRequestTable};
pub use pool::{PeerClassifier, PeerPool, PoolSettings};
pub use transport::{Transport, TransportError};
pub use types::{
    encode_request, encode_response, parse_message, CodecError, DataMessage, DataRequest,
    DataResponse, PeerId, SignalingMessage, FRAGMENT_THRESHOLD, MAX_HTL, NOSTR_KIND_HASHTREE,
};

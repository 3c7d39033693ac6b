//! The worker façade: a thin binary composing `hashtree-core`,
//! `hashtree-local`, `hashtree-blossom`, `hashtree-config`,
//! `hashtree-resolver`, `hashtree-store`, and (optionally)
//! `hashtree-webrtc` into the `htree` CLI and its embedded daemon. Logic
//! lives in those crates; this one wires them together.

pub mod config;
pub mod daemon;
pub mod server;
#[cfg(feature = "p2p")]
pub mod webrtc_transport;

pub use config::Config;
pub use hashtree_resolver::nostr::{
    Keys as NostrKeys, NostrResolverConfig, NostrRootResolver, ToBech32 as NostrToBech32,
};
pub use hashtree_resolver::{ResolverEntry, ResolverError, RootResolver};
pub use hashtree_store::HashtreeStore;

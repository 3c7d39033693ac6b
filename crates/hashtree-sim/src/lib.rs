//! In-process simulation tooling for hashtree's P2P protocols: a
//! transport-agnostic `DataMessage` mesh any crate's tests can drive
//! multi-peer HTL forwarding over, and (behind the `nostr` feature) a
//! nostr relay-mesh simulator for root-pointer publish/resolve and
//! signalling relay across several hops.

pub mod data_mesh;

#[cfg(feature = "nostr")]
pub mod nostr_mesh;

//! Transport-agnostic in-memory mesh for `hashtree-webrtc`'s data-channel
//! protocol: peers linked in a topology, frames queued per destination
//! instead of delivered instantly, and a `drain` loop that feeds queued
//! frames into each peer's `Exchange::handle_incoming` until the mesh goes
//! quiet. Mirrors `nostr_mesh`'s queue-and-drain shape but speaks
//! `DataMessage` frames over a `Transport` rather than nostr events.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use hashtree_webrtc::{Exchange, PeerId, Transport, TransportError};

#[derive(Default)]
struct Inner {
    links: HashMap<PeerId, HashSet<PeerId>>,
    queues: HashMap<PeerId, VecDeque<(PeerId, Vec<u8>)>>,
}

/// Shared mesh topology and in-flight frame queues. Cheap to clone (an
/// `Arc` underneath) so each simulated node can hold its own handle.
#[derive(Clone, Default)]
pub struct DataMesh {
    inner: Arc<Mutex<Inner>>,
}

impl DataMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links two peers bidirectionally. Frames only queue between linked
    /// peers; an unlinked `send` fails like a dropped connection.
    pub fn link(&self, a: PeerId, b: PeerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.links.entry(a).or_default().insert(b);
        inner.links.entry(b).or_default().insert(a);
    }

    /// Returns a [`Transport`] bound to `peer`'s view of the mesh.
    pub fn transport_for(&self, peer: PeerId) -> MeshTransport {
        MeshTransport {
            peer,
            inner: self.inner.clone(),
        }
    }

    fn pop_frame(&self, peer: PeerId) -> Option<(PeerId, Vec<u8>)> {
        self.inner.lock().unwrap().queues.get_mut(&peer)?.pop_front()
    }

    /// Number of frames currently queued for `peer`, without consuming
    /// them. Useful in tests asserting something was (or wasn't)
    /// forwarded before draining.
    pub fn pending_for(&self, peer: PeerId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .queues
            .get(&peer)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Delivers queued frames to each exchange in `exchanges` until no
    /// peer's queue has anything left, or `max_steps` frames have been
    /// delivered. Returns the number of frames delivered.
    pub async fn drain(&self, exchanges: &HashMap<PeerId, Arc<Exchange>>, max_steps: usize) -> usize {
        let mut steps = 0;
        loop {
            let mut progressed = false;
            let peer_ids: Vec<PeerId> = exchanges.keys().copied().collect();
            for peer in peer_ids {
                if steps >= max_steps {
                    return steps;
                }
                let Some((from, frame)) = self.pop_frame(peer) else {
                    continue;
                };
                if let Some(exchange) = exchanges.get(&peer) {
                    exchange.handle_incoming(from, &frame).await;
                }
                progressed = true;
                steps += 1;
            }
            if !progressed {
                break;
            }
        }
        steps
    }
}

/// One peer's [`Transport`] handle onto a shared [`DataMesh`].
pub struct MeshTransport {
    peer: PeerId,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl Transport for MeshTransport {
    async fn send(&self, peer: PeerId, frame: Vec<u8>) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let linked = inner
            .links
            .get(&self.peer)
            .map(|peers| peers.contains(&peer))
            .unwrap_or(false);
        if !linked {
            return Err(TransportError::NotConnected(peer));
        }
        inner.queues.entry(peer).or_default().push_back((self.peer, frame));
        Ok(())
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.inner
            .lock()
            .unwrap()
            .links
            .get(&self.peer)
            .map(|peers| peers.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlinked_peers_fail_connected_peers_check() {
        let mesh = DataMesh::new();
        let a = PeerId::new();
        let b = PeerId::new();
        mesh.link(a, b);
        let transport_a = mesh.transport_for(a);
        assert_eq!(transport_a.connected_peers(), vec![b]);
    }

    #[tokio::test]
    async fn send_to_unlinked_peer_errors() {
        let mesh = DataMesh::new();
        let a = PeerId::new();
        let stranger = PeerId::new();
        let transport_a = mesh.transport_for(a);
        let result = transport_a.send(stranger, vec![1, 2, 3]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_queues_a_frame_for_the_linked_peer_to_pop() {
        let mesh = DataMesh::new();
        let a = PeerId::new();
        let b = PeerId::new();
        mesh.link(a, b);
        let transport_a = mesh.transport_for(a);
        transport_a.send(b, vec![9, 9, 9]).await.unwrap();
        let (from, frame) = mesh.pop_frame(b).expect("frame queued for b");
        assert_eq!(from, a);
        assert_eq!(frame, vec![9, 9, 9]);
        assert!(mesh.pop_frame(b).is_none());
    }
}

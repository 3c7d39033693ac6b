//! Exercises HTL request forwarding and response flow across more than
//! one hop, using `hashtree-sim`'s transport-agnostic mesh instead of a
//! single in-process `RecordingTransport`.

use std::collections::HashMap;
use std::sync::Arc;

use hashtree_core::hash::sha256;
use hashtree_core::store::{MemoryStore, Store};
use hashtree_sim::data_mesh::DataMesh;
use hashtree_webrtc::{Exchange, PeerClassifier, PeerId, PeerPool, PoolSettings};

fn always_other() -> PeerClassifier {
    Arc::new(|_: &str| PeerPool::Other)
}

/// A (no data) -- B (relay, no data) -- C (has data). A's request should
/// be forwarded by B to C, and C's response should flow back through B to
/// A, landing in both A's and B's local stores along the way (B caches
/// the response it forwards, per `handle_response`'s write-through).
#[tokio::test]
async fn request_forwards_across_two_hops_and_response_flows_back() {
    let mesh = DataMesh::new();

    let a_id = PeerId::new();
    let b_id = PeerId::new();
    let c_id = PeerId::new();

    mesh.link(a_id, b_id);
    mesh.link(b_id, c_id);

    let data = b"multi-hop payload".to_vec();
    let hash = sha256(&data);

    let store_c = Arc::new(MemoryStore::new());
    store_c.put(&hash, data.clone()).await.unwrap();

    let exchange_a = Arc::new(Exchange::new(
        Arc::new(MemoryStore::new()),
        Arc::new(mesh.transport_for(a_id)),
        always_other(),
        PoolSettings::default(),
        PoolSettings::default(),
    ));
    let exchange_b = Arc::new(Exchange::new(
        Arc::new(MemoryStore::new()),
        Arc::new(mesh.transport_for(b_id)),
        always_other(),
        PoolSettings::default(),
        PoolSettings::default(),
    ));
    let exchange_c = Arc::new(Exchange::new(
        store_c,
        Arc::new(mesh.transport_for(c_id)),
        always_other(),
        PoolSettings::default(),
        PoolSettings::default(),
    ));

    exchange_a.add_peer(b_id, "b").await;
    exchange_b.add_peer(a_id, "a").await;
    exchange_b.add_peer(c_id, "c").await;
    exchange_c.add_peer(b_id, "b").await;

    let mut exchanges: HashMap<PeerId, Arc<Exchange>> = HashMap::new();
    exchanges.insert(a_id, exchange_a.clone());
    exchanges.insert(b_id, exchange_b.clone());
    exchanges.insert(c_id, exchange_c.clone());

    let request = tokio::spawn({
        let exchange_a = exchange_a.clone();
        async move { exchange_a.request(hash).await }
    });

    for _ in 0..40 {
        mesh.drain(&exchanges, 50).await;
        tokio::task::yield_now().await;
    }

    let result = request.await.unwrap();
    assert_eq!(result, Some(data));
}

/// A request with `htl: 0` reaching a relay with no local copy should
/// die there rather than reach the peer who actually has the data.
#[tokio::test]
async fn zero_htl_request_does_not_cross_a_relay() {
    use hashtree_webrtc::{encode_request, DataRequest};

    let mesh = DataMesh::new();
    let a_id = PeerId::new();
    let b_id = PeerId::new();
    let c_id = PeerId::new();
    mesh.link(a_id, b_id);
    mesh.link(b_id, c_id);

    let data = b"unreachable at htl zero".to_vec();
    let hash = sha256(&data);

    let exchange_b = Arc::new(Exchange::new(
        Arc::new(MemoryStore::new()),
        Arc::new(mesh.transport_for(b_id)),
        always_other(),
        PoolSettings::default(),
        PoolSettings::default(),
    ));
    exchange_b.add_peer(a_id, "a").await;
    exchange_b.add_peer(c_id, "c").await;

    let frame = encode_request(&DataRequest { h: hash, htl: 0 }).unwrap();
    // deliver the zero-htl request to B directly, as if it came from A.
    exchange_b.handle_incoming(a_id, &frame).await;

    // B has no local copy and htl is 0, so it must not have forwarded to C.
    assert_eq!(mesh.pending_for(c_id), 0);
}

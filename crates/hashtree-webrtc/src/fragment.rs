//! Reassembles fragmented responses. A response over `FRAGMENT_THRESHOLD`
//! arrives as several `DataResponse` frames sharing a hash and a
//! `fragment_total`; this buffers them until complete or expired.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hashtree_core::types::Hash;

use crate::types::DataResponse;

/// How long a partial reassembly is kept before being dropped as
/// abandoned (the peer that started sending it went away, or dropped
/// fragments that will never arrive).
const ASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

struct InFlight {
    total: u32,
    pieces: HashMap<u32, Vec<u8>>,
    started: Instant,
}

/// Bounded, expiring buffer of in-progress fragment reassemblies, keyed
/// by the hash being reassembled.
#[derive(Default)]
pub struct FragmentAssembler {
    inflight: HashMap<Hash, InFlight>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment in. Returns the fully reassembled bytes once
    /// every fragment for its hash has arrived, `None` otherwise.
    pub fn push(&mut self, resp: &DataResponse) -> Option<Vec<u8>> {
        if resp.fragment_total <= 1 {
            return Some(resp.d.clone());
        }

        let entry = self.inflight.entry(resp.h).or_insert_with(|| InFlight {
            total: resp.fragment_total,
            pieces: HashMap::new(),
            started: Instant::now(),
        });
        entry.pieces.insert(resp.fragment_index, resp.d.clone());

        if entry.pieces.len() as u32 >= entry.total {
            let entry = self.inflight.remove(&resp.h)?;
            let mut out = Vec::new();
            for i in 0..entry.total {
                out.extend(entry.pieces.get(&i)?);
            }
            Some(out)
        } else {
            None
        }
    }

    /// Drops any reassembly that has been in progress longer than
    /// [`ASSEMBLY_TIMEOUT`]. Call periodically from the exchange engine's
    /// maintenance loop.
    pub fn expire_stale(&mut self) {
        self.inflight
            .retain(|_, entry| entry.started.elapsed() < ASSEMBLY_TIMEOUT);
    }

    pub fn pending_count(&self) -> usize {
        self.inflight.len()
    }
}

/// Splits `data` into `FRAGMENT_THRESHOLD`-sized [`DataResponse`]
/// fragments ready to send, or a single unfragmented one if it fits.
pub fn fragment_response(hash: Hash, data: &[u8]) -> Vec<DataResponse> {
    if data.len() <= crate::types::FRAGMENT_THRESHOLD {
        return vec![DataResponse {
            h: hash,
            d: data.to_vec(),
            fragment_index: 0,
            fragment_total: 1,
        }];
    }

    let chunks: Vec<&[u8]> = data.chunks(crate::types::FRAGMENT_THRESHOLD).collect();
    let total = chunks.len() as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| DataResponse {
            h: hash,
            d: chunk.to_vec(),
            fragment_index: i as u32,
            fragment_total: total,
        })
        .collect()
}

//! One round of cross-rank ray exchange (§4.7).
//!
//! Convention for the "tail is the next block" rule: by the time a ray sits
//! in a local [`crate::queue::RayQueueMap`] bucket, the shuffler has already
//! popped that bucket's block id off the *front* of its intersection list
//! (§4.1 step 4). To move such a bucket to its block's owning rank, the
//! destination block id is pushed back onto the *tail* of the list before
//! packing; the receiver pops it from the tail and uses it as the queue key
//! directly, with no BVH requery needed.

use std::collections::HashMap;

use crate::queue::RayQueueMap;
use crate::ray::{BlockId, RankId, Ray};
use crate::transport::ClusterTransport;

/// Tag a bucket of rays about to leave this rank for `destination_block`'s
/// home: push the block id back onto each ray's tail.
pub fn tag_for_send(destination_block: BlockId, mut rays: Vec<Ray>) -> Vec<Ray> {
    for ray in &mut rays {
        ray.intersection_list.push(destination_block);
    }
    rays
}

/// Outcome of one exchange round: how many rays were sent to (and received
/// from) each peer, for the voter's `num_pending_rays` bookkeeping.
pub struct ExchangeStats {
    pub sent: usize,
    pub received: usize,
}

/// Run one `Alltoall`-sized-then-`Isend/Irecv`-then-`Waitall` round.
///
/// `outbound[j]` holds rays destined for rank `j` (already tagged per
/// [`tag_for_send`]), empty for ranks with nothing to send. Received rays
/// are unpacked, their destination block id popped from the tail, and
/// pushed directly into `local_queue`.
pub fn run_round(
    transport: &dyn ClusterTransport,
    outbound: Vec<Vec<Ray>>,
    local_queue: &RayQueueMap,
) -> ExchangeStats {
    let world_size = transport.world_size();
    assert_eq!(outbound.len(), world_size);

    let mut packed: Vec<Vec<u8>> = vec![Vec::new(); world_size];
    let mut sent = 0usize;
    for (peer, rays) in outbound.iter().enumerate() {
        sent += rays.len();
        let mut buf = Vec::new();
        for ray in rays {
            ray.pack(&mut buf).expect("packing a ray into an in-memory buffer cannot fail");
        }
        packed[peer] = buf;
    }

    let counts: Vec<(usize, usize)> = outbound.iter().zip(&packed).map(|(r, b)| (r.len(), b.len())).collect();
    let inbound_counts = transport.alltoall_counts(&counts);

    let inbound_bytes = transport.exchange_bytes(packed);

    let mut received = 0usize;
    for (peer, bytes) in inbound_bytes.into_iter().enumerate() {
        let (expected_rays, expected_bytes) = inbound_counts[peer];
        debug_assert_eq!(bytes.len(), expected_bytes);
        let mut cursor = &bytes[..];
        for _ in 0..expected_rays {
            let mut ray = Ray::unpack(&mut cursor).expect("malformed ray on the wire");
            let destination = ray.intersection_list.pop().expect("exchanged rays carry a tail destination block");
            local_queue.push(destination, ray);
            received += 1;
        }
    }

    ExchangeStats { sent, received }
}

/// Partition a rank's non-local queue buckets into per-peer outbound
/// batches, given a `home` function mapping a block id to the rank that
/// should receive its queue this round.
pub fn partition_outbound(
    world_size: usize,
    self_rank: RankId,
    buckets: Vec<(BlockId, Vec<Ray>)>,
    mut home: impl FnMut(BlockId) -> RankId,
) -> Vec<Vec<Ray>> {
    let mut outbound: Vec<Vec<Ray>> = vec![Vec::new(); world_size];
    let mut by_peer: HashMap<RankId, Vec<Ray>> = HashMap::new();
    for (block, rays) in buckets {
        let owner = home(block);
        if owner == self_rank {
            continue;
        }
        by_peer.entry(owner).or_default().extend(tag_for_send(block, rays));
    }
    for (peer, rays) in by_peer {
        outbound[peer.as_usize()] = rays;
    }
    outbound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use cgmath::Vector3;
    use std::thread;

    #[test]
    fn rays_land_in_the_tagged_block_on_the_receiver() {
        let cluster = LocalTransport::cluster(2);
        let handles: Vec<_> = cluster
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    let queue = RayQueueMap::new();
                    let outbound = if t.rank() == RankId(0) {
                        let ray = Ray::primary(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0), 1, 2);
                        vec![Vec::new(), tag_for_send(BlockId(7), vec![ray])]
                    } else {
                        vec![Vec::new(), Vec::new()]
                    };
                    let stats = run_round(&t, outbound, &queue);
                    (t.rank(), stats.sent, stats.received, queue.len_of(BlockId(7)))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let rank0 = results.iter().find(|r| r.0 == RankId(0)).unwrap();
        let rank1 = results.iter().find(|r| r.0 == RankId(1)).unwrap();
        assert_eq!(rank0.1, 1);
        assert_eq!(rank1.2, 1);
        assert_eq!(rank1.3, 1);
    }
}

//! The collaborator interface between the scheduling core and a real
//! cluster fabric (§4.10/§9 Open Question 1).
//!
//! The source system bootstraps over MPI; that bootstrap is an external
//! collaborator here (treated as out of scope, same as scene loading or
//! image I/O). What *is* in scope is the shape of the collective/point-to-
//! point operations the schedulers, the exchange, and the voter need —
//! captured in [`ClusterTransport`]. [`LocalTransport`] is the one
//! concrete implementation this crate ships: it simulates `P` ranks as
//! threads of one process over channels, which is enough to exercise every
//! scheduler and the voter in tests. A production deployment implements
//! this same trait against a real fabric (MPI or otherwise); that
//! implementation is out of scope, exactly as the bootstrap is.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use crate::ray::RankId;

/// The collective/point-to-point surface the core needs from a cluster
/// fabric. All operations are blocking from the caller's point of view,
/// matching §5's suspension-point list (`Alltoall`, `Isend/Irecv+Waitall`,
/// `Gather`, and the voter's point-to-point messages).
pub trait ClusterTransport: Send + Sync {
    fn rank(&self) -> RankId;
    fn world_size(&self) -> usize;

    /// One `(ray_count, byte_count)` pair per peer, exchanged `Alltoall`
    /// style (§4.7 step 1).
    fn alltoall_counts(&self, outbound: &[(usize, usize)]) -> Vec<(usize, usize)>;

    /// Post sends/receives for one per-peer payload each and wait for all
    /// of them (§4.7 steps 2-4). `outbound[i]` is what this rank sends to
    /// rank `i`; the result's `[i]` is what this rank received from rank `i`.
    fn exchange_bytes(&self, outbound: Vec<Vec<u8>>) -> Vec<Vec<u8>>;

    /// Gather one buffer per rank to `root`. `Some` only on `root`.
    fn gather_bytes(&self, root: RankId, local: &[u8]) -> Option<Vec<Vec<u8>>>;

    /// Broadcast `payload` (ignored on non-root callers) from `root` to
    /// every rank, root included.
    fn broadcast_bytes(&self, root: RankId, payload: Option<Vec<u8>>) -> Vec<u8>;

    /// Point-to-point send used by the voter's PROPOSE/VOTE/DO_COMMIT messages.
    fn send_to(&self, peer: RankId, payload: &[u8]);

    /// Point-to-point blocking receive from a specific peer.
    fn recv_from(&self, peer: RankId) -> Vec<u8>;

    fn barrier(&self);
}

struct Shared {
    size: usize,
    /// `chan[i][j]` is the channel rank `i` uses to send to rank `j`.
    tx: Vec<Vec<Sender<Vec<u8>>>>,
    rx: Vec<Vec<Mutex<Receiver<Vec<u8>>>>>,
    barrier: Barrier,
}

/// In-process simulation of a `P`-rank cluster over `std::sync::mpsc`
/// channels, one pair per ordered `(sender, receiver)` rank combination.
pub struct LocalTransport {
    shared: Arc<Shared>,
    rank: RankId,
}

impl LocalTransport {
    /// Build `world_size` handles, one per simulated rank, sharing one
    /// channel fabric. Hand one handle to each rank's thread.
    pub fn cluster(world_size: usize) -> Vec<LocalTransport> {
        assert!(world_size > 0, "a cluster needs at least one rank");
        let mut tx = vec![Vec::with_capacity(world_size); world_size];
        let mut rx = vec![Vec::with_capacity(world_size); world_size];
        for _from in 0..world_size {
            for _to in 0..world_size {
                let (s, r) = std::sync::mpsc::channel();
                tx[_from].push(s);
                rx[_to].push(Mutex::new(r));
            }
        }
        let shared = Arc::new(Shared { size: world_size, tx, rx, barrier: Barrier::new(world_size) });
        (0..world_size).map(|r| LocalTransport { shared: shared.clone(), rank: RankId(r) }).collect()
    }

    fn send(&self, to: RankId, payload: Vec<u8>) {
        self.shared.tx[self.rank.0][to.0].send(payload).expect("peer rank channel closed");
    }

    fn recv(&self, from: RankId) -> Vec<u8> {
        self.shared.rx[self.rank.0][from.0].lock().recv().expect("peer rank channel closed")
    }
}

impl ClusterTransport for LocalTransport {
    fn rank(&self) -> RankId {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.size
    }

    fn alltoall_counts(&self, outbound: &[(usize, usize)]) -> Vec<(usize, usize)> {
        let p = self.world_size();
        assert_eq!(outbound.len(), p);
        for (to, &(rays, bytes)) in outbound.iter().enumerate() {
            if to == self.rank.0 {
                continue;
            }
            let mut buf = Vec::with_capacity(16);
            buf.extend_from_slice(&(rays as u64).to_le_bytes());
            buf.extend_from_slice(&(bytes as u64).to_le_bytes());
            self.send(RankId(to), buf);
        }
        let mut inbound = vec![(0usize, 0usize); p];
        for from in 0..p {
            if from == self.rank.0 {
                inbound[from] = outbound[from];
                continue;
            }
            let buf = self.recv(RankId(from));
            let rays = u64::from_le_bytes(buf[0..8].try_into().unwrap()) as usize;
            let bytes = u64::from_le_bytes(buf[8..16].try_into().unwrap()) as usize;
            inbound[from] = (rays, bytes);
        }
        inbound
    }

    fn exchange_bytes(&self, outbound: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let p = self.world_size();
        assert_eq!(outbound.len(), p);
        for (to, payload) in outbound.iter().enumerate() {
            if to == self.rank.0 {
                continue;
            }
            self.send(RankId(to), payload.clone());
        }
        let mut inbound = vec![Vec::new(); p];
        for from in 0..p {
            inbound[from] = if from == self.rank.0 { outbound[from].clone() } else { self.recv(RankId(from)) };
        }
        inbound
    }

    fn gather_bytes(&self, root: RankId, local: &[u8]) -> Option<Vec<Vec<u8>>> {
        if self.rank == root {
            let mut all = vec![Vec::new(); self.world_size()];
            all[self.rank.0] = local.to_vec();
            for from in 0..self.world_size() {
                if from != self.rank.0 {
                    all[from] = self.recv(RankId(from));
                }
            }
            Some(all)
        } else {
            self.send(root, local.to_vec());
            None
        }
    }

    fn broadcast_bytes(&self, root: RankId, payload: Option<Vec<u8>>) -> Vec<u8> {
        if self.rank == root {
            let payload = payload.expect("broadcast root must supply a payload");
            for to in 0..self.world_size() {
                if to != self.rank.0 {
                    self.send(RankId(to), payload.clone());
                }
            }
            payload
        } else {
            self.recv(root)
        }
    }

    fn send_to(&self, peer: RankId, payload: &[u8]) {
        self.send(peer, payload.to_vec());
    }

    fn recv_from(&self, peer: RankId) -> Vec<u8> {
        self.recv(peer)
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}

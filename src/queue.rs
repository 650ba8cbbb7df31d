//! Per-rank mapping from block id to pending ray batch.
//!
//! Ordering within a queue is irrelevant for correctness; batches are kept
//! FIFO purely for cache locality when an adapter traces them.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::ray::{BlockId, Ray};

/// One mutex per queued block so shuffle-chunk writers only ever contend
/// with peers touching the *same* block, not with every other block in the
/// map (§4.1 concurrency note). The outer `RwLock` only guards the map's
/// shape (which blocks exist at all) — it's taken for writing solely to
/// insert a block's first `Mutex<Vec<Ray>>`, and for reading everywhere
/// else, so two chunks pushing to different blocks never wait on each
/// other.
pub struct RayQueueMap {
    queues: RwLock<HashMap<BlockId, Mutex<Vec<Ray>>>>,
}

impl RayQueueMap {
    pub fn new() -> RayQueueMap {
        RayQueueMap { queues: RwLock::new(HashMap::new()) }
    }

    /// Run `f` against `block`'s queue, creating it first if this is the
    /// first ray ever routed there. Takes the write lock only on that
    /// first-touch path; every later call for an already-known block only
    /// needs the read lock to find its `Mutex` and then locks that alone.
    fn with_queue<R>(&self, block: BlockId, f: impl FnOnce(&mut Vec<Ray>) -> R) -> R {
        if let Some(queue) = self.queues.read().get(&block) {
            return f(&mut queue.lock());
        }
        // First touch: take the write lock just long enough to insert an
        // empty queue, then drop back to the read path above so the mutex
        // lock itself never outlives the map's write guard.
        self.queues.write().entry(block).or_default();
        f(&mut self.queues.read().get(&block).expect("just inserted").lock())
    }

    pub fn push(&self, block: BlockId, ray: Ray) {
        self.with_queue(block, |q| q.push(ray));
    }

    pub fn extend(&self, block: BlockId, rays: impl IntoIterator<Item = Ray>) {
        self.with_queue(block, |q| q.extend(rays));
    }

    /// Remove and return the full batch queued for `block`, if any. Leaves
    /// the (now-empty) per-block `Mutex` in the map rather than removing the
    /// entry, so a concurrent `push` racing this call never has to take the
    /// map's write lock.
    pub fn take(&self, block: BlockId) -> Vec<Ray> {
        match self.queues.read().get(&block) {
            Some(queue) => std::mem::take(&mut *queue.lock()),
            None => Vec::new(),
        }
    }

    pub fn len_of(&self, block: BlockId) -> usize {
        self.queues.read().get(&block).map(|q| q.lock().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().values().all(|q| q.lock().is_empty())
    }

    pub fn total_rays(&self) -> usize {
        self.queues.read().values().map(|q| q.lock().len()).sum()
    }

    /// The block with the largest queue; ties broken by lowest id (§4.3/4.4).
    pub fn largest(&self) -> Option<BlockId> {
        self.queues
            .read()
            .iter()
            .filter_map(|(id, q)| {
                let len = q.lock().len();
                (len > 0).then_some((*id, len))
            })
            .max_by(|(id_a, len_a), (id_b, len_b)| len_a.cmp(len_b).then(id_b.cmp(id_a)))
            .map(|(id, _)| id)
    }

    /// Snapshot of `(block_id, ray_count)` for every non-empty queue, used
    /// by the Hybrid scheduler's per-round report to the coordinator.
    pub fn demand_snapshot(&self) -> Vec<(BlockId, usize)> {
        self.queues
            .read()
            .iter()
            .filter_map(|(id, q)| {
                let len = q.lock().len();
                (len > 0).then_some((*id, len))
            })
            .collect()
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.queues.read().keys().copied().collect()
    }
}

impl Default for RayQueueMap {
    fn default() -> Self {
        Self::new()
    }
}

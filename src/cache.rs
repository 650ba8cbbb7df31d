//! Per-rank cache of loaded data blocks. The only process-wide mutable
//! singleton in the design (§9); scope its lifetime to one frame where
//! possible.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::adapter::AdapterAPI;
use crate::error::{Error, Result};
use crate::ray::BlockId;

/// Residency state for one block on this rank.
struct Entry {
    adapter: Arc<dyn AdapterAPI>,
    resident: bool,
}

/// Tracks which blocks are resident on this rank and mediates `load`/
/// `unload` through the adapter. Residency decisions (what to evict, what
/// to load ahead of a round) are made by the scheduler/policy layer; this
/// type only executes them and reports current state.
pub struct BlockCache {
    entries: Mutex<HashMap<BlockId, Entry>>,
}

impl BlockCache {
    pub fn new() -> BlockCache {
        BlockCache { entries: Mutex::new(HashMap::new()) }
    }

    /// Register a block's adapter without loading it.
    pub fn register(&self, id: BlockId, adapter: Arc<dyn AdapterAPI>) {
        self.entries.lock().insert(id, Entry { adapter, resident: false });
    }

    /// Ensure `id` is resident, loading it via its adapter if not.
    pub fn ensure_resident(&self, id: BlockId) -> Result<Arc<dyn AdapterAPI>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or_else(|| {
            Error::Resource(format!("block {:?} was never registered with the cache", id))
        })?;
        if !entry.resident {
            entry
                .adapter
                .load()
                .map_err(|message| Error::Adapter { block: id, message })?;
            entry.resident = true;
        }
        Ok(entry.adapter.clone())
    }

    pub fn is_resident(&self, id: BlockId) -> bool {
        self.entries.lock().get(&id).map(|e| e.resident).unwrap_or(false)
    }

    /// Evict `id`, dropping its residency (cheap per §3). A no-op if the
    /// block was never resident.
    pub fn evict(&self, id: BlockId) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&id) {
            if entry.resident {
                entry.adapter.unload();
                entry.resident = false;
            }
        }
    }

    /// Evict every resident block except `keep`. Used by scheduler variants
    /// (Hybrid) that hold at most one target block per round.
    pub fn evict_all_except(&self, keep: BlockId) {
        let mut entries = self.entries.lock();
        for (id, entry) in entries.iter_mut() {
            if *id != keep && entry.resident {
                entry.adapter.unload();
                entry.resident = false;
            }
        }
    }

    pub fn resident_ids(&self) -> Vec<BlockId> {
        self.entries.lock().iter().filter(|(_, e)| e.resident).map(|(id, _)| *id).collect()
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}

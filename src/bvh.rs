//! The replicated, read-only global block BVH the shuffler falls back to
//! when a ray's intersection list runs dry and `march_out` didn't refill it.

use cgmath::{Point3, Vector3};

use crate::block::Block;
use crate::ray::BlockId;

/// Queried by the shuffler (§4.1 step 2) with a ray's current segment;
/// returns hit block ids in increasing-`t` order.
pub trait BlockBvh: Send + Sync {
    fn query(&self, origin: Point3<f32>, dir: Vector3<f32>, t_min: f32, t_max: f32) -> Vec<BlockId>;
}

/// A brute-force BVH over the replicated block bounds. Scene/config loading
/// is out of scope for this core; this type exists so the core has a
/// working `BlockBvh` to exercise the shuffler's §4.1 algorithm end to end
/// without a real acceleration structure back-end.
pub struct FlatBlockBvh {
    blocks: Vec<Block>,
}

impl FlatBlockBvh {
    pub fn new(blocks: Vec<Block>) -> FlatBlockBvh {
        FlatBlockBvh { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

impl BlockBvh for FlatBlockBvh {
    fn query(&self, origin: Point3<f32>, dir: Vector3<f32>, t_min: f32, t_max: f32) -> Vec<BlockId> {
        let mut hits: Vec<(f32, BlockId)> = self
            .blocks
            .iter()
            .filter_map(|b| {
                b.bounds
                    .intersect(origin, dir, t_min, t_max)
                    .map(|(enter, _exit)| (enter, b.id))
            })
            .collect();
        hits.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        hits.into_iter().map(|(_, id)| id).collect()
    }
}

//! Scene partitions: the unit of data placement across the cluster.

use cgmath::{Point3, Vector3};

use crate::ray::{BlockId, RankId};

/// Axis-aligned bounding box, replicated read-only across ranks as part of
/// the global block BVH the shuffler queries.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl BoundingBox {
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> BoundingBox {
        BoundingBox { min, max }
    }

    pub fn center(&self) -> Point3<f32> {
        Point3::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
            (self.min.z + self.max.z) * 0.5,
        )
    }

    /// Slab-test intersection against a ray segment `[t_min, t_max]`.
    /// Returns the entry/exit `t` if the segment crosses the box at all.
    pub fn intersect(&self, origin: Point3<f32>, dir: Vector3<f32>, t_min: f32, t_max: f32) -> Option<(f32, f32)> {
        let mut t0 = t_min;
        let mut t1 = t_max;
        for axis in 0..3 {
            let (o, d, lo, hi) = match axis {
                0 => (origin.x, dir.x, self.min.x, self.max.x),
                1 => (origin.y, dir.y, self.min.y, self.max.y),
                _ => (origin.z, dir.z, self.min.z, self.max.z),
            };
            let inv_d = 1.0 / d;
            let (mut near, mut far) = ((lo - o) * inv_d, (hi - o) * inv_d);
            if inv_d < 0.0 {
                std::mem::swap(&mut near, &mut far);
            }
            t0 = t0.max(near);
            t1 = t1.min(far);
            if t0 > t1 {
                return None;
            }
        }
        Some((t0, t1))
    }
}

/// Metadata for one scene partition. Block *data* (geometry, volume bricks)
/// lives behind the opaque [`crate::adapter::AdapterAPI`]; this struct only
/// carries what the scheduling core needs to route rays and place data.
#[derive(Clone, Debug)]
pub struct Block {
    pub id: BlockId,
    pub bounds: BoundingBox,
    /// Domain mode only: the rank that permanently owns this block. `None`
    /// in Image/Hybrid mode, where residency is decided per round/rank.
    pub home: Option<RankId>,
}

impl Block {
    pub fn new(id: BlockId, bounds: BoundingBox, home: Option<RankId>) -> Block {
        Block { id, bounds, home }
    }
}

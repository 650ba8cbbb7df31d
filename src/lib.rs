//! `distray`: the distributed ray-scheduling core of a cluster-scale ray
//! tracer.
//!
//! This crate does not intersect rays with geometry — that's delegated to a
//! pluggable [`adapter::AdapterAPI`] back-end. What it owns is *matching*:
//! getting every ray to a rank that has (or will load) the data block it
//! needs next, with bounded memory and bounded message traffic, terminating
//! deterministically even as rays spawn secondary rays that cross block
//! boundaries.
//!
//! Three interchangeable [`scheduler::Scheduler`] variants share one tracing
//! loop: `Image` (replicate the scene, partition pixels), `Domain` (each
//! block has a fixed home rank, rays migrate, a [`voter::TpcVoter`] detects
//! quiescence), and `Hybrid` (round-based block→rank reassignment under a
//! pluggable [`policy::HybridPolicy`]). A [`shuffler::Shuffler`] classifies
//! rays into local queues or the framebuffer every round; a
//! [`compositor::CompositeStrategy`] merges per-rank framebuffers into the
//! final image.
//!
//! Cluster fabric, scene/config loading, image I/O, and intersection
//! back-ends are all external collaborators, modeled as traits
//! ([`transport::ClusterTransport`], [`adapter::AdapterAPI`],
//! [`compositor::CompositeStrategy`]) rather than implemented here.

mod adapter;
mod block;
mod bvh;
mod cache;
mod compositor;
mod config;
mod error;
mod exchange;
mod framebuffer;
mod policy;
mod queue;
mod ray;
mod scheduler;
mod shuffler;
mod transport;
mod voter;

pub use adapter::{AdapterAPI, MovedRays};
pub use block::{Block, BoundingBox};
pub use bvh::{BlockBvh, FlatBlockBvh};
pub use cache::BlockCache;
pub use compositor::{CompositeStrategy, GatherBlend};
pub use config::{Accel, AdapterKind, Config, HybridPolicyKind, SchedulerKind};
pub use error::{Error, Result};
pub use framebuffer::Framebuffer;
pub use policy::{HybridPolicy, Placement, RankReport};
pub use queue::RayQueueMap;
pub use ray::{BlockId, ColorAlpha, RankId, Ray, RayType, TermFlags};
pub use scheduler::{RoundContext, Scheduler, SceneData};
pub use transport::{ClusterTransport, LocalTransport};
pub use voter::{RoundOutcome, TpcVoter};

// §5: queues, the framebuffer, the block cache, and the voter are all
// shared across the shuffler's rayon chunks and, for LocalTransport, across
// simulated-rank threads. If any of these stopped being `Send + Sync` it
// would be a silent, load-bearing regression, not a type error anyone would
// notice at the call site — so pin it down at compile time.
static_assertions::assert_impl_all!(RayQueueMap: Send, Sync);
static_assertions::assert_impl_all!(Framebuffer: Send, Sync);
static_assertions::assert_impl_all!(BlockCache: Send, Sync);
static_assertions::assert_impl_all!(TpcVoter: Send, Sync);
static_assertions::assert_impl_all!(LocalTransport: Send, Sync);

#[cfg(test)]
mod tests {
    //! Integration-style coverage for the testable properties in §8 that
    //! need more than one module wired together: single- and multi-rank
    //! image rendering, domain-scheduler cross-rank migration, ray
    //! conservation, and cross-scheduler equivalence. Scenario-specific
    //! fixtures (the cone mesh, a deterministic mock adapter) live in
    //! `tests/` rather than here, since they exercise the public API the
    //! same way an external crate would.
    use super::*;
    use std::collections::HashMap;
    use std::num::NonZeroUsize;
    use std::sync::Arc;
    use std::thread;

    use cgmath::{Point3, Vector3};

    /// Advance a ray's `t` just past this block's exit, the way a real
    /// adapter leaves the ray positioned for whatever query comes next
    /// (march_out or a BVH requery). Without this the shuffler would keep
    /// re-finding the block it just finished with, since §4.1's BVH query
    /// uses the ray's *current* segment.
    fn advance_past(r: &mut Ray, bounds: &BoundingBox) {
        if let Some((_, exit)) = bounds.intersect(Point3::from_vec(r.origin), r.direction, r.t, r.t_max) {
            r.t = exit + 1e-4;
        }
    }

    /// A block that always reports a surface hit, standing in for the
    /// descoped intersection back-ends (§1). Collapses the ray's remaining
    /// parametric range after advancing past its own bounds, so the
    /// shuffler's follow-up BVH query correctly finds nothing further — the
    /// mock's stand-in for a real adapter leaving `t` at the hit distance.
    struct ConstantColorAdapter {
        bounds: BoundingBox,
        color: ColorAlpha,
    }

    impl AdapterAPI for ConstantColorAdapter {
        fn load(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        fn unload(&self) {}
        fn trace(&self, in_queue: Vec<Ray>) -> MovedRays {
            in_queue
                .into_iter()
                .map(|mut r| {
                    advance_past(&mut r, &self.bounds);
                    r.color = self.color;
                    r.term = TermFlags::SURFACE;
                    r.t_max = r.t;
                    r
                })
                .collect()
        }
        fn march_out(&self, _ray: &mut Ray) {}
    }

    /// A block that never reports a hit: rays pass through, advanced past
    /// its bounds. Used to model a block a ray crosses on its way to
    /// wherever it actually terminates.
    struct PassThroughAdapter {
        bounds: BoundingBox,
    }

    impl AdapterAPI for PassThroughAdapter {
        fn load(&self) -> std::result::Result<(), String> {
            Ok(())
        }
        fn unload(&self) {}
        fn trace(&self, in_queue: Vec<Ray>) -> MovedRays {
            in_queue
                .into_iter()
                .map(|mut r| {
                    advance_past(&mut r, &self.bounds);
                    r
                })
                .collect()
        }
        fn march_out(&self, _ray: &mut Ray) {}
    }

    fn one_block_scene(id: BlockId, color: ColorAlpha) -> SceneData {
        let bounds = BoundingBox::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        let block = Block::new(id, bounds, None);
        let mut adapters: HashMap<BlockId, Arc<dyn AdapterAPI>> = HashMap::new();
        adapters.insert(id, Arc::new(ConstantColorAdapter { bounds, color }));
        SceneData { blocks: vec![block], adapters }
    }

    fn camera_rays(n: u32) -> Vec<Ray> {
        (0..n).map(|i| Ray::primary(Vector3::new(0.0, 0.0, -5.0), Vector3::new(0.0, 0.0, 1.0), i, 4)).collect()
    }

    #[test]
    fn single_rank_image_scheduler_fills_every_pixel() {
        let scene = one_block_scene(BlockId(0), ColorAlpha { r: 0.5, g: 0.5, b: 0.5, a: 1.0 });
        let cache = BlockCache::new();
        for (id, adapter) in &scene.adapters {
            cache.register(*id, adapter.clone());
        }
        let fb = Framebuffer::new(4, 4);
        let cluster = LocalTransport::cluster(1);
        let transport = cluster.into_iter().next().unwrap();
        let ctx = RoundContext {
            transport: &transport,
            scene: &scene,
            cache: &cache,
            framebuffer: &fb,
            hardware_threads: NonZeroUsize::new(2).unwrap(),
        };
        let scheduler = Scheduler::Image;
        let strategy = GatherBlend::new(NonZeroUsize::new(2).unwrap());
        let image = scheduler.run_frame(camera_rays(16), &ctx, &strategy, RankId(0)).unwrap();
        assert_eq!(fb.total_writes(), 16);
        assert!(image.unwrap().iter().all(|c| c.r == 0.5));
    }

    #[test]
    fn domain_scheduler_reaches_quiescence_across_ranks() {
        let world_size = 2;
        let ids = [BlockId(0), BlockId(1)];
        let cluster = LocalTransport::cluster(world_size);
        let handles: Vec<_> = cluster
            .into_iter()
            .enumerate()
            .map(|(rank, transport)| {
                thread::spawn(move || {
                    // Both blocks are replicated (metadata-only) on every
                    // rank, per §3 — only the home rank's adapter is
                    // actually registered with the cache.
                    let bounds0 = BoundingBox::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
                    let bounds1 = BoundingBox::new(Point3::new(1.0, -1.0, -1.0), Point3::new(3.0, 1.0, 1.0));
                    let blocks = vec![
                        Block::new(ids[0], bounds0, Some(RankId(0))),
                        Block::new(ids[1], bounds1, Some(RankId(1))),
                    ];
                    let mut adapters: HashMap<BlockId, Arc<dyn AdapterAPI>> = HashMap::new();
                    if rank == 0 {
                        adapters.insert(ids[0], Arc::new(PassThroughAdapter { bounds: bounds0 }));
                    } else {
                        adapters.insert(
                            ids[1],
                            Arc::new(ConstantColorAdapter { bounds: bounds1, color: ColorAlpha { r: 1.0, g: 0.0, b: 0.0, a: 1.0 } }),
                        );
                    }
                    let scene = SceneData { blocks, adapters };
                    let cache = BlockCache::new();
                    for (id, adapter) in &scene.adapters {
                        cache.register(*id, adapter.clone());
                    }
                    let fb = Framebuffer::new(2, 1);
                    let ctx = RoundContext {
                        transport: &transport,
                        scene: &scene,
                        cache: &cache,
                        framebuffer: &fb,
                        hardware_threads: NonZeroUsize::new(1).unwrap(),
                    };
                    let scheduler = Scheduler::domain();
                    // Rank 0 generates a ray that crosses both blocks: it
                    // terminates on block 1, which is homed on rank 1, so
                    // this exercises the §4.7 cross-rank exchange.
                    let rays = if rank == 0 {
                        vec![Ray::primary(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0), 0, 2)]
                    } else {
                        Vec::new()
                    };
                    let strategy = GatherBlend::new(NonZeroUsize::new(1).unwrap());
                    scheduler.run_frame(rays, &ctx, &strategy, RankId(0)).unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results[0].is_some());
        assert!(results[1].is_none());
    }
}

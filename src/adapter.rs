//! The capability set a pluggable intersection back-end (Manta, Optix,
//! Embree, OSPRay, ...) presents to the core. The core treats this as
//! wholly opaque: no back-end vocabulary leaks past this trait.

use crate::ray::Ray;

/// Rays produced by an adapter call: terminated rays (ready for the
/// framebuffer) and new/continuing rays (ready for reshuffle), in no
/// particular order.
pub type MovedRays = Vec<Ray>;

/// A block's intersection back-end. `trace` is called serially per block
/// (the core never calls `trace` twice concurrently for the same block) but
/// different blocks may be traced in parallel at the scheduler's
/// discretion — this trait does not require that.
pub trait AdapterAPI: Send + Sync {
    /// Idempotent: make this block's data resident. Expensive (disk/decompress).
    fn load(&self) -> Result<(), String>;

    /// Idempotent: drop this block's residency. Cheap.
    fn unload(&self);

    /// Consume an owned ray batch queued for this block; emit moved rays.
    /// Rays that miss and exit or hit a surface are emitted with `term` set;
    /// rays that spawn shadow/secondary children carry fresh intersection
    /// lists populated by the adapter's own geometry query.
    fn trace(&self, in_queue: Vec<Ray>) -> MovedRays;

    /// Cheap geometric step: extend `ray`'s intersection list with whatever
    /// block it crosses next on its way out of this one. Leaves the list
    /// empty if the ray exits the scene entirely.
    fn march_out(&self, ray: &mut Ray);
}

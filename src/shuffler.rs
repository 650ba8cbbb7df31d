//! Classifies a batch of rays into (framebuffer, local queue by block, send
//! buffer) — §4.1.

use std::num::NonZeroUsize;

use rayon::prelude::*;

use crate::adapter::AdapterAPI;
use crate::bvh::BlockBvh;
use crate::framebuffer::Framebuffer;
use crate::queue::RayQueueMap;
use crate::ray::{BlockId, Ray};

/// Classifies moved rays (or the initial camera batch) against the local
/// queue and framebuffer. Holds no per-round state of its own: every field
/// is a borrowed collaborator shared across rounds.
pub struct Shuffler<'a> {
    bvh: &'a dyn BlockBvh,
    hardware_threads: NonZeroUsize,
}

impl<'a> Shuffler<'a> {
    pub fn new(bvh: &'a dyn BlockBvh, hardware_threads: NonZeroUsize) -> Shuffler<'a> {
        Shuffler { bvh, hardware_threads }
    }

    /// Run the §4.1 algorithm over `rays`, the moved-ray output of `source`
    /// (`None` for the initial camera batch). Side effects land in `queue`
    /// and `framebuffer`; nothing is returned.
    pub fn shuffle(
        &self,
        rays: Vec<Ray>,
        source: Option<&dyn AdapterAPI>,
        queue: &RayQueueMap,
        framebuffer: &Framebuffer,
    ) {
        if rays.is_empty() {
            return;
        }
        let chunk_size = (rays.len() / (2 * self.hardware_threads.get())).max(1);
        rays.into_par_iter()
            .chunks(chunk_size)
            .for_each(|chunk| self.shuffle_chunk(chunk, source, queue, framebuffer));
    }

    fn shuffle_chunk(
        &self,
        chunk: Vec<Ray>,
        source: Option<&dyn AdapterAPI>,
        queue: &RayQueueMap,
        framebuffer: &Framebuffer,
    ) {
        for mut ray in chunk {
            if ray.intersection_list.is_empty() {
                if let Some(block) = source {
                    block.march_out(&mut ray);
                }
            }
            if ray.intersection_list.is_empty() {
                let hits = self.bvh.query(
                    cgmath::Point3::from_vec(ray.origin),
                    ray.direction,
                    ray.t,
                    ray.t_max,
                );
                ray.intersection_list.extend(hits);
            }
            match ray.intersection_list.first().copied() {
                Some(_) => {
                    let next: BlockId = ray.intersection_list.remove(0);
                    queue.push(next, ray);
                }
                None => {
                    framebuffer.accumulate(ray.pixel_id, ray.color.clamped());
                }
            }
        }
    }
}

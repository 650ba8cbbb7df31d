//! Dense per-rank color buffer, merged at frame end by the [`crate::compositor`].

use parking_lot::Mutex;

use crate::ray::ColorAlpha;

/// One mutex per pixel row so accumulate writes from different shuffle
/// chunks only contend when they land in the same row (§4.1/§5).
pub struct Framebuffer {
    width: usize,
    height: usize,
    rows: Vec<Mutex<Vec<ColorAlpha>>>,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize) -> Framebuffer {
        let rows = (0..height).map(|_| Mutex::new(vec![ColorAlpha::default(); width])).collect();
        Framebuffer { width, height, rows }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Accumulate `color` into the pixel for `pixel_id`, clamping to `[0,1]`
    /// and setting alpha to 1 as the ray's contribution is committed.
    pub fn accumulate(&self, pixel_id: u32, color: ColorAlpha) {
        let pixel_id = pixel_id as usize;
        let row = pixel_id / self.width;
        let col = pixel_id % self.width;
        let mut guard = self.rows[row].lock();
        guard[col].add(&color);
        guard[col] = guard[col].clamped();
        guard[col].a = 1.0;
    }

    pub fn get(&self, pixel_id: u32) -> ColorAlpha {
        let pixel_id = pixel_id as usize;
        let row = pixel_id / self.width;
        let col = pixel_id % self.width;
        self.rows[row].lock()[col]
    }

    /// Flatten into a dense row-major buffer, for composition/output.
    pub fn to_vec(&self) -> Vec<ColorAlpha> {
        let mut out = Vec::with_capacity(self.width * self.height);
        for row in &self.rows {
            out.extend_from_slice(&row.lock());
        }
        out
    }

    pub fn total_writes(&self) -> usize {
        self.rows.iter().map(|r| r.lock().iter().filter(|c| c.a > 0.0).count()).sum()
    }
}

//! The `Ray` type: the unit of work shuffled between blocks and ranks.
//!
//! Layout mirrors the wire format in one-to-one fashion so packing is a
//! straight field walk (see [`Ray::pack`] / [`Ray::unpack`]).

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use cgmath::Vector3;
use smallvec::SmallVec;

/// Globally unique id of a scene partition (mesh region, volume brick).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Rank (process) identity within the cluster.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RankId(pub usize);

impl RankId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

bitflags::bitflags! {
    /// Why a ray stopped being traced further.
    ///
    /// Carried as a first-class byte on the wire rather than reinterpreted
    /// out of a float field.
    #[derive(Default)]
    pub struct TermFlags: u8 {
        /// Terminated on a surface hit with accumulated color.
        const SURFACE  = 0b0001;
        /// Terminated because it left the scene's outer bound.
        const OPAQUE   = 0b0010;
        /// Crossed a block boundary (not itself terminal, but recorded).
        const BOUNDARY = 0b0100;
        /// The adapter reported it could not finish this ray in budget.
        const TIMEOUT  = 0b1000;
    }
}

/// What kind of ray this is, for bookkeeping and adapter dispatch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RayType {
    Primary = 0,
    Shadow = 1,
    Secondary = 2,
    Empty = 3,
}

impl RayType {
    fn from_u8(v: u8) -> io::Result<RayType> {
        Ok(match v {
            0 => RayType::Primary,
            1 => RayType::Shadow,
            2 => RayType::Secondary,
            3 => RayType::Empty,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unknown ray type tag",
                ))
            }
        })
    }
}

/// Color with alpha, accumulated along a ray's path.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ColorAlpha {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ColorAlpha {
    pub fn clamped(&self) -> ColorAlpha {
        ColorAlpha {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }

    pub fn add(&mut self, other: &ColorAlpha) {
        self.r += other.r;
        self.g += other.g;
        self.b += other.b;
        self.a += other.a;
    }
}

/// A single ray in flight: origin/direction, accumulated color, parametric
/// range, pixel id, remaining bounces, type/termination tags, and the
/// ordered list of block ids it still has to traverse.
///
/// Invariant: a live ray (`Primary`/`Secondary`/`Shadow`) is always either in
/// exactly one block's queue, in flight as a serialized message, or inside
/// an adapter call.
#[derive(Clone, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vector3<f32>,
    pub direction: Vector3<f32>,
    pub color: ColorAlpha,
    pub t: f32,
    pub t_min: f32,
    pub t_max: f32,
    pub pixel_id: u32,
    pub depth: u16,
    pub kind: RayType,
    pub term: TermFlags,
    pub intersection_list: SmallVec<[BlockId; 4]>,
}

impl Ray {
    pub fn primary(origin: Vector3<f32>, direction: Vector3<f32>, pixel_id: u32, depth: u16) -> Ray {
        Ray {
            origin,
            direction,
            color: ColorAlpha::default(),
            t: 0.0,
            t_min: 0.0,
            t_max: f32::INFINITY,
            pixel_id,
            depth,
            kind: RayType::Primary,
            term: TermFlags::empty(),
            intersection_list: SmallVec::new(),
        }
    }

    /// `true` once depth reaches zero: this ray cannot spawn secondaries.
    #[inline]
    pub fn exhausted(&self) -> bool {
        self.depth == 0
    }

    /// Number of bytes this ray occupies on the wire: §6 gives the field
    /// list (origin/direction/color/t's/id/depth/type/term/list_len) and,
    /// separately, the constant `52`; summing the field list's own byte
    /// widths gives `62`, not `52` — the fixed part is 13 `f32`s (52 bytes)
    /// *plus* `id`(4) + `depth`(2) + `type`(1) + `term`(1) + `list_len`(2).
    /// `pack`/`unpack` below implement the full field list, so this follows
    /// that rather than the inconsistent shorthand.
    #[inline]
    pub fn packed_size(&self) -> usize {
        62 + 4 * self.intersection_list.len()
    }

    /// Serialize in the little-endian wire format described in §6.
    pub fn pack<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_f32::<LittleEndian>(self.origin.x)?;
        w.write_f32::<LittleEndian>(self.origin.y)?;
        w.write_f32::<LittleEndian>(self.origin.z)?;
        w.write_f32::<LittleEndian>(self.direction.x)?;
        w.write_f32::<LittleEndian>(self.direction.y)?;
        w.write_f32::<LittleEndian>(self.direction.z)?;
        w.write_f32::<LittleEndian>(self.color.r)?;
        w.write_f32::<LittleEndian>(self.color.g)?;
        w.write_f32::<LittleEndian>(self.color.b)?;
        w.write_f32::<LittleEndian>(self.color.a)?;
        w.write_f32::<LittleEndian>(self.t)?;
        w.write_f32::<LittleEndian>(self.t_min)?;
        w.write_f32::<LittleEndian>(self.t_max)?;
        w.write_u32::<LittleEndian>(self.pixel_id)?;
        w.write_u16::<LittleEndian>(self.depth)?;
        w.write_u8(self.kind as u8)?;
        w.write_u8(self.term.bits())?;
        w.write_u16::<LittleEndian>(self.intersection_list.len() as u16)?;
        for id in &self.intersection_list {
            w.write_u32::<LittleEndian>(id.0)?;
        }
        Ok(())
    }

    /// Deserialize from the wire format, respecting the variable `list_len`
    /// framing on receive.
    pub fn unpack<R: Read>(r: &mut R) -> io::Result<Ray> {
        let origin = Vector3::new(
            r.read_f32::<LittleEndian>()?,
            r.read_f32::<LittleEndian>()?,
            r.read_f32::<LittleEndian>()?,
        );
        let direction = Vector3::new(
            r.read_f32::<LittleEndian>()?,
            r.read_f32::<LittleEndian>()?,
            r.read_f32::<LittleEndian>()?,
        );
        let color = ColorAlpha {
            r: r.read_f32::<LittleEndian>()?,
            g: r.read_f32::<LittleEndian>()?,
            b: r.read_f32::<LittleEndian>()?,
            a: r.read_f32::<LittleEndian>()?,
        };
        let t = r.read_f32::<LittleEndian>()?;
        let t_min = r.read_f32::<LittleEndian>()?;
        let t_max = r.read_f32::<LittleEndian>()?;
        let pixel_id = r.read_u32::<LittleEndian>()?;
        let depth = r.read_u16::<LittleEndian>()?;
        let kind = RayType::from_u8(r.read_u8()?)?;
        let term = TermFlags::from_bits_truncate(r.read_u8()?);
        let list_len = r.read_u16::<LittleEndian>()? as usize;
        let mut intersection_list = SmallVec::with_capacity(list_len);
        for _ in 0..list_len {
            intersection_list.push(BlockId(r.read_u32::<LittleEndian>()?));
        }
        Ok(Ray {
            origin,
            direction,
            color,
            t,
            t_min,
            t_max,
            pixel_id,
            depth,
            kind,
            term,
            intersection_list,
        })
    }
}

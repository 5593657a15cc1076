//! Record types stored in the pools and buffers, and their binary dump format.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::grid::GridObject;
use super::object_pool::PoolObject;
use super::{floating_type_mod::FT, vec2f, V2};

/// Growing cell of the growth simulations.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub position: V2,
    pub velocity: V2,
    pub radius: FT,
    /// Radius at which the particle is fully grown and may divide.
    pub threshold: FT,
    pub links: i32,
    pub alive: u32,
}

/// Spring between two particles of the particle-and-edge simulation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub a: i32,
    pub b: i32,
    pub force: V2,
    pub alive: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphParticle {
    pub position: V2,
    pub velocity: V2,
    pub acceleration: V2,
    pub density: FT,
    pub pressure: FT,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborParticle {
    pub position: V2,
    pub velocity: V2,
    pub neighbor_count: u32,
    pub highlighted: u32,
}

impl PoolObject for Particle {
    fn dead() -> Self {
        Particle {
            position: V2::zeros(),
            velocity: V2::zeros(),
            radius: 0.0,
            threshold: 0.0,
            links: 0,
            alive: 0,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive != 0
    }

    fn set_alive(&mut self, alive: bool) {
        self.alive = alive as u32;
    }
}

impl PoolObject for Edge {
    fn dead() -> Self {
        Edge {
            a: -1,
            b: -1,
            force: V2::zeros(),
            alive: 0,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive != 0
    }

    fn set_alive(&mut self, alive: bool) {
        self.alive = alive as u32;
    }
}

impl GridObject<2> for Particle {
    fn grid_position(&self) -> V2 {
        self.position
    }

    fn is_alive(&self) -> bool {
        self.alive != 0
    }
}

impl GridObject<2> for SphParticle {
    fn grid_position(&self) -> V2 {
        self.position
    }
}

impl GridObject<2> for NeighborParticle {
    fn grid_position(&self) -> V2 {
        self.position
    }
}

/// Fixed little-endian layout, fields in declaration order.
pub trait BinaryRecord: Sized {
    fn write_le<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()>;
    fn read_le<R: Read + ?Sized>(r: &mut R) -> io::Result<Self>;
}

fn write_v2<W: Write + ?Sized>(w: &mut W, v: V2) -> io::Result<()> {
    w.write_f32::<LittleEndian>(v.x)?;
    w.write_f32::<LittleEndian>(v.y)
}

fn read_v2<R: Read + ?Sized>(r: &mut R) -> io::Result<V2> {
    let x = r.read_f32::<LittleEndian>()?;
    let y = r.read_f32::<LittleEndian>()?;
    Ok(vec2f(x, y))
}

impl BinaryRecord for Particle {
    fn write_le<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_v2(w, self.position)?;
        write_v2(w, self.velocity)?;
        w.write_f32::<LittleEndian>(self.radius)?;
        w.write_f32::<LittleEndian>(self.threshold)?;
        w.write_i32::<LittleEndian>(self.links)?;
        w.write_u32::<LittleEndian>(self.alive)
    }

    fn read_le<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        Ok(Particle {
            position: read_v2(r)?,
            velocity: read_v2(r)?,
            radius: r.read_f32::<LittleEndian>()?,
            threshold: r.read_f32::<LittleEndian>()?,
            links: r.read_i32::<LittleEndian>()?,
            alive: r.read_u32::<LittleEndian>()?,
        })
    }
}

impl BinaryRecord for Edge {
    fn write_le<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.a)?;
        w.write_i32::<LittleEndian>(self.b)?;
        write_v2(w, self.force)?;
        w.write_u32::<LittleEndian>(self.alive)
    }

    fn read_le<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        Ok(Edge {
            a: r.read_i32::<LittleEndian>()?,
            b: r.read_i32::<LittleEndian>()?,
            force: read_v2(r)?,
            alive: r.read_u32::<LittleEndian>()?,
        })
    }
}

impl BinaryRecord for SphParticle {
    fn write_le<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_v2(w, self.position)?;
        write_v2(w, self.velocity)?;
        write_v2(w, self.acceleration)?;
        w.write_f32::<LittleEndian>(self.density)?;
        w.write_f32::<LittleEndian>(self.pressure)
    }

    fn read_le<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        Ok(SphParticle {
            position: read_v2(r)?,
            velocity: read_v2(r)?,
            acceleration: read_v2(r)?,
            density: r.read_f32::<LittleEndian>()?,
            pressure: r.read_f32::<LittleEndian>()?,
        })
    }
}

impl BinaryRecord for NeighborParticle {
    fn write_le<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_v2(w, self.position)?;
        write_v2(w, self.velocity)?;
        w.write_u32::<LittleEndian>(self.neighbor_count)?;
        w.write_u32::<LittleEndian>(self.highlighted)
    }

    fn read_le<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        Ok(NeighborParticle {
            position: read_v2(r)?,
            velocity: read_v2(r)?,
            neighbor_count: r.read_u32::<LittleEndian>()?,
            highlighted: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// Writes a `u32` record count followed by the records.
pub fn write_records<T: BinaryRecord, W: Write + ?Sized>(w: &mut W, records: &[T]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(records.len() as u32)?;
    for record in records {
        record.write_le(w)?;
    }
    Ok(())
}

pub fn read_records<T: BinaryRecord, R: Read + ?Sized>(r: &mut R) -> io::Result<Vec<T>> {
    let count = r.read_u32::<LittleEndian>()?;
    (0..count).map(|_| T::read_le(r)).collect()
}

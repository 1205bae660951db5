//! Fixed-layout host value types.
//!
//! These are `#[repr(C)]` so their field offsets are stable and can be
//! published to the JIT through [`crate::reflect`]. Every type that fits the
//! boxed data union is embedded directly in it; `Basis` does not fit and is
//! stored in the heap arena instead.

use std::mem::offset_of;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vector2i {
    pub x: i32,
    pub y: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect2 {
    pub position: Vector2,
    pub size: Vector2,
}

/// 3x3 matrix. 36 bytes, so it is boxed by handle rather than embedded.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Basis {
    pub rows: [Vector3; 3],
}

impl Vector2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub(crate) fn encode(&self, out: &mut [u8]) {
        put_f32(out, offset_of!(Vector2, x), self.x);
        put_f32(out, offset_of!(Vector2, y), self.y);
    }

    pub(crate) fn decode(bytes: &[u8]) -> Self {
        Self {
            x: get_f32(bytes, offset_of!(Vector2, x)),
            y: get_f32(bytes, offset_of!(Vector2, y)),
        }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

impl Vector2i {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub(crate) fn encode(&self, out: &mut [u8]) {
        put_i32(out, offset_of!(Vector2i, x), self.x);
        put_i32(out, offset_of!(Vector2i, y), self.y);
    }

    pub(crate) fn decode(bytes: &[u8]) -> Self {
        Self {
            x: get_i32(bytes, offset_of!(Vector2i, x)),
            y: get_i32(bytes, offset_of!(Vector2i, y)),
        }
    }
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub(crate) fn encode(&self, out: &mut [u8]) {
        put_f32(out, offset_of!(Vector3, x), self.x);
        put_f32(out, offset_of!(Vector3, y), self.y);
        put_f32(out, offset_of!(Vector3, z), self.z);
    }

    pub(crate) fn decode(bytes: &[u8]) -> Self {
        Self {
            x: get_f32(bytes, offset_of!(Vector3, x)),
            y: get_f32(bytes, offset_of!(Vector3, y)),
            z: get_f32(bytes, offset_of!(Vector3, z)),
        }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl Rect2 {
    pub const fn new(position: Vector2, size: Vector2) -> Self {
        Self { position, size }
    }

    pub(crate) fn encode(&self, out: &mut [u8]) {
        self.position.encode(&mut out[offset_of!(Rect2, position)..]);
        self.size.encode(&mut out[offset_of!(Rect2, size)..]);
    }

    pub(crate) fn decode(bytes: &[u8]) -> Self {
        Self {
            position: Vector2::decode(&bytes[offset_of!(Rect2, position)..]),
            size: Vector2::decode(&bytes[offset_of!(Rect2, size)..]),
        }
    }
}

impl Basis {
    pub const IDENTITY: Basis = Basis {
        rows: [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ],
    };
}

fn put_f32(out: &mut [u8], offset: usize, value: f32) {
    out[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn put_i32(out: &mut [u8], offset: usize, value: i32) {
    out[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn get_f32(bytes: &[u8], offset: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    f32::from_ne_bytes(raw)
}

fn get_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_ne_bytes(raw)
}

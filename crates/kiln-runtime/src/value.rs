//! The boxed dynamic value and its interpreter-level view.
//!
//! A [`BoxedValue`] is what crosses every runtime API boundary: a `u32` tag
//! followed by an 8-byte-aligned data union. Native code reads and writes the
//! union directly at the offsets published here, so this layout is ABI.

use std::fmt;
use std::mem::{align_of, offset_of, size_of};
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::heap::{self, HeapObject};
use crate::types::{Basis, Rect2, Vector2, Vector2i, Vector3};

/// Size in bytes of the data union inside a boxed value.
pub const DATA_SIZE: usize = 24;

#[repr(C, align(8))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoxedValue {
    tag: u32,
    reserved: u32,
    data: [u8; DATA_SIZE],
}

pub const TAG_OFFSET: usize = offset_of!(BoxedValue, tag);
pub const DATA_OFFSET: usize = offset_of!(BoxedValue, data);
pub const BOXED_SIZE: usize = size_of::<BoxedValue>();
pub const BOXED_ALIGN: usize = align_of::<BoxedValue>();

const _: () = assert!(BOXED_SIZE == 32);
const _: () = assert!(DATA_OFFSET % 8 == 0);

/// Dynamic type tag stored in the first word of every boxed value.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Vector3 = 7,
    Rect2 = 8,
    Basis = 9,
}

impl Tag {
    pub const ALL: [Tag; 10] = [
        Tag::Nil,
        Tag::Bool,
        Tag::Int,
        Tag::Float,
        Tag::String,
        Tag::Vector2,
        Tag::Vector2i,
        Tag::Vector3,
        Tag::Rect2,
        Tag::Basis,
    ];

    pub fn from_raw(raw: u32) -> Option<Tag> {
        Tag::ALL.get(raw as usize).copied()
    }

    pub const fn raw(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::Nil => "Nil",
            Tag::Bool => "bool",
            Tag::Int => "int",
            Tag::Float => "float",
            Tag::String => "String",
            Tag::Vector2 => "Vector2",
            Tag::Vector2i => "Vector2i",
            Tag::Vector3 => "Vector3",
            Tag::Rect2 => "Rect2",
            Tag::Basis => "Basis",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl BoxedValue {
    pub const NIL: BoxedValue = BoxedValue {
        tag: Tag::Nil as u32,
        reserved: 0,
        data: [0; DATA_SIZE],
    };

    pub fn raw_tag(&self) -> u32 {
        self.tag
    }

    pub fn tag(&self) -> Result<Tag, RuntimeError> {
        Tag::from_raw(self.tag).ok_or(RuntimeError::UnknownTag(self.tag))
    }

    pub fn data(&self) -> &[u8; DATA_SIZE] {
        &self.data
    }

    /// The whole box as bytes, for byte-level comparisons.
    pub fn to_bytes(&self) -> [u8; BOXED_SIZE] {
        let mut out = [0u8; BOXED_SIZE];
        out[TAG_OFFSET..TAG_OFFSET + 4].copy_from_slice(&self.tag.to_ne_bytes());
        out[TAG_OFFSET + 4..DATA_OFFSET].copy_from_slice(&self.reserved.to_ne_bytes());
        out[DATA_OFFSET..].copy_from_slice(&self.data);
        out
    }

    pub fn from_value(value: &Value) -> BoxedValue {
        let mut boxed = BoxedValue::NIL;
        boxed.tag = value.tag().raw();
        let data = &mut boxed.data;
        match value {
            Value::Nil => {}
            Value::Bool(b) => data[0] = u8::from(*b),
            Value::Int(i) => data[..8].copy_from_slice(&i.to_ne_bytes()),
            Value::Float(f) => data[..8].copy_from_slice(&f.to_ne_bytes()),
            Value::String(text) => {
                data[..8].copy_from_slice(&heap::intern_string(text).to_ne_bytes())
            }
            Value::Vector2(v) => v.encode(data),
            Value::Vector2i(v) => v.encode(data),
            Value::Vector3(v) => v.encode(data),
            Value::Rect2(r) => r.encode(data),
            Value::Basis(b) => data[..8].copy_from_slice(&heap::store_basis(*b).to_ne_bytes()),
        }
        boxed
    }

    pub fn to_value(&self) -> Result<Value, RuntimeError> {
        let data = &self.data;
        Ok(match self.tag()? {
            Tag::Nil => Value::Nil,
            Tag::Bool => Value::Bool(data[0] != 0),
            Tag::Int => Value::Int(i64::from_ne_bytes(word(data))),
            Tag::Float => Value::Float(f64::from_ne_bytes(word(data))),
            Tag::String => match heap::load(u64::from_ne_bytes(word(data))) {
                Some(HeapObject::String(text)) => Value::String(text),
                _ => return Err(RuntimeError::DanglingHandle(Tag::String)),
            },
            Tag::Vector2 => Value::Vector2(Vector2::decode(data)),
            Tag::Vector2i => Value::Vector2i(Vector2i::decode(data)),
            Tag::Vector3 => Value::Vector3(Vector3::decode(data)),
            Tag::Rect2 => Value::Rect2(Rect2::decode(data)),
            Tag::Basis => match heap::load(u64::from_ne_bytes(word(data))) {
                Some(HeapObject::Basis(basis)) => Value::Basis(basis),
                _ => return Err(RuntimeError::DanglingHandle(Tag::Basis)),
            },
        })
    }
}

impl Default for BoxedValue {
    fn default() -> Self {
        BoxedValue::NIL
    }
}

impl fmt::Debug for BoxedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_value() {
            Ok(value) => write!(f, "BoxedValue({value:?})"),
            Err(_) => write!(f, "BoxedValue(<raw tag {}>)", self.tag),
        }
    }
}

fn word(data: &[u8; DATA_SIZE]) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[..8]);
    raw
}

/// Interpreter-level dynamic value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Vector2(Vector2),
    Vector2i(Vector2i),
    Vector3(Vector3),
    Rect2(Rect2),
    Basis(Basis),
}

impl Value {
    pub fn tag(&self) -> Tag {
        match self {
            Value::Nil => Tag::Nil,
            Value::Bool(_) => Tag::Bool,
            Value::Int(_) => Tag::Int,
            Value::Float(_) => Tag::Float,
            Value::String(_) => Tag::String,
            Value::Vector2(_) => Tag::Vector2,
            Value::Vector2i(_) => Tag::Vector2i,
            Value::Vector3(_) => Tag::Vector3,
            Value::Rect2(_) => Tag::Rect2,
            Value::Basis(_) => Tag::Basis,
        }
    }

    pub fn string(text: &str) -> Value {
        Value::String(Arc::from(text))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(text) => f.write_str(text),
            Value::Vector2(v) => write!(f, "({}, {})", v.x, v.y),
            Value::Vector2i(v) => write!(f, "({}, {})", v.x, v.y),
            Value::Vector3(v) => write!(f, "({}, {}, {})", v.x, v.y, v.z),
            Value::Rect2(r) => write!(
                f,
                "[P: ({}, {}), S: ({}, {})]",
                r.position.x, r.position.y, r.size.x, r.size.y
            ),
            Value::Basis(b) => {
                let [a, c, d] = &b.rows;
                write!(
                    f,
                    "[X: ({}, {}, {}), Y: ({}, {}, {}), Z: ({}, {}, {})]",
                    a.x, a.y, a.z, c.x, c.y, c.z, d.x, d.y, d.z
                )
            }
        }
    }
}

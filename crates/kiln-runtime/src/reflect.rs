//! Host reflection metadata consumed once by the JIT's type catalog.
//!
//! `host_metadata()` is what the runtime *publishes*; `RuntimeLayout` answers
//! what the compiled Rust layout actually *is*. The catalog cross-checks the
//! two so that a metadata/runtime version skew is caught before any code is
//! emitted against stale offsets.

use std::fmt;
use std::mem::{align_of, offset_of, size_of};

use crate::types::{Basis, Rect2, Vector2, Vector2i, Vector3};
use crate::value::{BOXED_ALIGN, BOXED_SIZE, DATA_SIZE, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostTypeId(pub u32);

impl HostTypeId {
    pub const NIL: HostTypeId = HostTypeId(0);
    pub const BOOL: HostTypeId = HostTypeId(1);
    pub const INT: HostTypeId = HostTypeId(2);
    pub const FLOAT: HostTypeId = HostTypeId(3);
    pub const STRING: HostTypeId = HostTypeId(4);
    pub const VECTOR2: HostTypeId = HostTypeId(5);
    pub const VECTOR2I: HostTypeId = HostTypeId(6);
    pub const VECTOR3: HostTypeId = HostTypeId(7);
    pub const RECT2: HostTypeId = HostTypeId(8);
    pub const BASIS: HostTypeId = HostTypeId(9);
    pub const INT32: HostTypeId = HostTypeId(10);
    pub const FLOAT32: HostTypeId = HostTypeId(11);
    /// Any boxed value whose tag is only known at run time.
    pub const VARIANT: HostTypeId = HostTypeId(12);

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HostTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Machine-level scalar kinds the host exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ScalarKind {
    pub const fn size(self) -> usize {
        match self {
            ScalarKind::Bool => 1,
            ScalarKind::Int32 | ScalarKind::Float32 => 4,
            ScalarKind::Int64 | ScalarKind::Float64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ScalarKind::Float32 | ScalarKind::Float64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostField {
    pub name: String,
    pub ty: HostTypeId,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostKind {
    Scalar(ScalarKind),
    /// A struct type. `fields` is `None` when the host cannot publish offsets.
    Struct { fields: Option<Vec<HostField>> },
    /// Boxed-only value with no native layout (heap handles, nil, variants).
    Handle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostTypeInfo {
    pub id: HostTypeId,
    pub name: String,
    pub kind: HostKind,
    pub size: usize,
    pub align: usize,
    pub tag: Option<Tag>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HostMetadata {
    pub types: Vec<HostTypeInfo>,
}

/// Real layout answers, independent of the published metadata.
pub trait LayoutProbe {
    /// Offset of `field` within `ty` as laid out by the running host.
    fn field_offset(&self, ty: HostTypeId, field: &str) -> Option<usize>;

    /// Size of the boxed value's data union.
    fn data_size(&self) -> usize;
}

/// Probe backed by the compiled `#[repr(C)]` definitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeLayout;

impl LayoutProbe for RuntimeLayout {
    fn field_offset(&self, ty: HostTypeId, field: &str) -> Option<usize> {
        let offset = match (ty, field) {
            (HostTypeId::VECTOR2, "x") => offset_of!(Vector2, x),
            (HostTypeId::VECTOR2, "y") => offset_of!(Vector2, y),
            (HostTypeId::VECTOR2I, "x") => offset_of!(Vector2i, x),
            (HostTypeId::VECTOR2I, "y") => offset_of!(Vector2i, y),
            (HostTypeId::VECTOR3, "x") => offset_of!(Vector3, x),
            (HostTypeId::VECTOR3, "y") => offset_of!(Vector3, y),
            (HostTypeId::VECTOR3, "z") => offset_of!(Vector3, z),
            (HostTypeId::RECT2, "position") => offset_of!(Rect2, position),
            (HostTypeId::RECT2, "size") => offset_of!(Rect2, size),
            _ => return None,
        };
        Some(offset)
    }

    fn data_size(&self) -> usize {
        DATA_SIZE
    }
}

fn scalar(id: HostTypeId, name: &str, kind: ScalarKind, tag: Option<Tag>) -> HostTypeInfo {
    HostTypeInfo {
        id,
        name: name.to_string(),
        kind: HostKind::Scalar(kind),
        size: kind.size(),
        align: kind.size(),
        tag,
    }
}

fn handle(id: HostTypeId, name: &str, tag: Option<Tag>) -> HostTypeInfo {
    HostTypeInfo {
        id,
        name: name.to_string(),
        kind: HostKind::Handle,
        size: BOXED_SIZE,
        align: BOXED_ALIGN,
        tag,
    }
}

fn structure<T>(
    id: HostTypeId,
    name: &str,
    tag: Tag,
    fields: Option<Vec<(&str, HostTypeId, usize)>>,
) -> HostTypeInfo {
    HostTypeInfo {
        id,
        name: name.to_string(),
        kind: HostKind::Struct {
            fields: fields.map(|fields| {
                fields
                    .into_iter()
                    .map(|(name, ty, offset)| HostField {
                        name: name.to_string(),
                        ty,
                        offset,
                    })
                    .collect()
            }),
        },
        size: size_of::<T>(),
        align: align_of::<T>(),
        tag: Some(tag),
    }
}

/// Metadata for every type the host runtime knows about.
pub fn host_metadata() -> HostMetadata {
    use HostTypeId as Id;
    let types = vec![
        handle(Id::NIL, "Nil", Some(Tag::Nil)),
        scalar(Id::BOOL, "bool", ScalarKind::Bool, Some(Tag::Bool)),
        scalar(Id::INT, "int", ScalarKind::Int64, Some(Tag::Int)),
        scalar(Id::FLOAT, "float", ScalarKind::Float64, Some(Tag::Float)),
        handle(Id::STRING, "String", Some(Tag::String)),
        structure::<Vector2>(
            Id::VECTOR2,
            "Vector2",
            Tag::Vector2,
            Some(vec![
                ("x", Id::FLOAT32, offset_of!(Vector2, x)),
                ("y", Id::FLOAT32, offset_of!(Vector2, y)),
            ]),
        ),
        structure::<Vector2i>(
            Id::VECTOR2I,
            "Vector2i",
            Tag::Vector2i,
            Some(vec![
                ("x", Id::INT32, offset_of!(Vector2i, x)),
                ("y", Id::INT32, offset_of!(Vector2i, y)),
            ]),
        ),
        structure::<Vector3>(
            Id::VECTOR3,
            "Vector3",
            Tag::Vector3,
            Some(vec![
                ("x", Id::FLOAT32, offset_of!(Vector3, x)),
                ("y", Id::FLOAT32, offset_of!(Vector3, y)),
                ("z", Id::FLOAT32, offset_of!(Vector3, z)),
            ]),
        ),
        structure::<Rect2>(
            Id::RECT2,
            "Rect2",
            Tag::Rect2,
            Some(vec![
                ("position", Id::VECTOR2, offset_of!(Rect2, position)),
                ("size", Id::VECTOR2, offset_of!(Rect2, size)),
            ]),
        ),
        // Basis does not fit the data union, so no offsets are published.
        structure::<Basis>(Id::BASIS, "Basis", Tag::Basis, None),
        scalar(Id::INT32, "int32", ScalarKind::Int32, None),
        scalar(Id::FLOAT32, "float32", ScalarKind::Float32, None),
        handle(Id::VARIANT, "Variant", None),
    ];
    HostMetadata { types }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_indexed_by_id() {
        for (index, info) in host_metadata().types.iter().enumerate() {
            assert_eq!(info.id.index(), index, "{} out of place", info.name);
        }
    }

    #[test]
    fn published_offsets_agree_with_probe() {
        let probe = RuntimeLayout;
        for info in host_metadata().types {
            if let HostKind::Struct { fields: Some(fields) } = &info.kind {
                for field in fields {
                    assert_eq!(probe.field_offset(info.id, &field.name), Some(field.offset));
                }
            }
        }
    }
}

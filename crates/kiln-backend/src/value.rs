//! Compile-time view of one live value.

use cranelift_codegen::ir::{self, types, Type};
use kiln_runtime::{HostTypeId, ScalarKind};

use crate::ir::Address;
use crate::slots::SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(pub(crate) u32);

/// An SSA value together with the scalar width it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandle {
    pub value: ir::Value,
    pub kind: ScalarKind,
}

/// Base pointer plus constant offset of a value's data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPointer {
    pub base: ir::Value,
    pub offset: i32,
}

impl DataPointer {
    pub fn at(self, extra: u32) -> DataPointer {
        DataPointer {
            base: self.base,
            offset: self.offset + extra as i32,
        }
    }
}

/// Where a value's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Home {
    /// No memory yet; the value exists only as a native handle.
    Unassigned,
    /// A frame slot owned by this value.
    Slot { id: SlotId, object: ir::Value },
    /// A box owned by someone else. Constants and arguments are read-only;
    /// members and externals are written back at sync points.
    Borrowed { object: ir::Value, writable: bool },
    /// Interior of another value's data region.
    Field {
        parent: RefId,
        data: DataPointer,
        storage: ScalarOrComposite,
    },
}

/// Storage form of a field: a scalar that may be narrower than its
/// canonical width, or a nested composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalarOrComposite {
    Scalar(ScalarKind),
    Composite,
}

#[derive(Debug, Clone)]
pub(crate) struct ValueRef {
    pub(crate) address: Option<Address>,
    pub(crate) ty: HostTypeId,
    pub(crate) native: Option<NativeHandle>,
    pub(crate) home: Home,
    /// Memory holds the authoritative value.
    pub(crate) memory_current: bool,
    pub(crate) tag_current: bool,
    /// Field values aliasing this value's memory.
    pub(crate) derived: Vec<RefId>,
}

impl ValueRef {
    pub(crate) fn new(address: Option<Address>, ty: HostTypeId, home: Home) -> Self {
        let in_memory = !matches!(home, Home::Unassigned);
        Self {
            address,
            ty,
            native: None,
            home,
            memory_current: in_memory,
            tag_current: matches!(home, Home::Borrowed { .. }),
            derived: Vec::new(),
        }
    }

    pub(crate) fn native(address: Option<Address>, ty: HostTypeId, handle: NativeHandle) -> Self {
        Self {
            native: Some(handle),
            ..Self::new(address, ty, Home::Unassigned)
        }
    }

    pub(crate) fn object(&self) -> Option<ir::Value> {
        match self.home {
            Home::Slot { object, .. } | Home::Borrowed { object, .. } => Some(object),
            Home::Unassigned | Home::Field { .. } => None,
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.native.is_some() && !self.memory_current
    }
}

pub(crate) fn clif_type(kind: ScalarKind) -> Type {
    match kind {
        ScalarKind::Bool => types::I8,
        ScalarKind::Int32 => types::I32,
        ScalarKind::Int64 => types::I64,
        ScalarKind::Float32 => types::F32,
        ScalarKind::Float64 => types::F64,
    }
}

/// Register width a scalar is computed at.
pub(crate) fn canonical_kind(kind: ScalarKind) -> ScalarKind {
    match kind {
        ScalarKind::Int32 => ScalarKind::Int64,
        ScalarKind::Float32 => ScalarKind::Float64,
        other => other,
    }
}

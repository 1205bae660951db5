#![deny(clippy::unwrap_used)]

mod api;
mod error;
mod heap;
mod instance;
pub mod ops;
pub mod reflect;
mod types;
mod value;

pub use api::{
    kiln_rt_call_dynamic, kiln_rt_convert, kiln_rt_evaluate_binary, kiln_rt_evaluate_unary,
    runtime_symbols, Binding, HostFn, HostFunction, HostFunctions,
};
pub use error::RuntimeError;
pub use heap::{intern_string, load as load_heap_object, store_basis, HeapObject};
pub use instance::HostInstance;
pub use ops::{BinaryOp, UnaryOp};
pub use reflect::{
    host_metadata, HostField, HostKind, HostMetadata, HostTypeId, HostTypeInfo, LayoutProbe,
    RuntimeLayout, ScalarKind,
};
pub use types::{Basis, Rect2, Vector2, Vector2i, Vector3};
pub use value::{BoxedValue, Tag, Value, BOXED_ALIGN, BOXED_SIZE, DATA_OFFSET, DATA_SIZE, TAG_OFFSET};

//! Native code generation for hot paths of the dynamic language.
//!
//! Values are tracked lazily: scalars stay in registers across chains of
//! operations and are boxed only where the runtime needs an addressable,
//! tagged value. Anything the backend cannot specialize goes through the
//! runtime's generic entry points, or the whole function is left to the
//! interpreter.

#![deny(clippy::unwrap_used)]

mod abi;
mod call;
pub mod catalog;
mod compile;
pub mod config;
pub mod dispatch;
mod engine;
mod error;
mod field;
pub mod ir;
mod jit_module;
pub mod liveness;
mod lower;
pub mod slots;
mod stats;
mod value;

pub use catalog::{Category, FieldDescriptor, TypeCatalog, TypeDescriptor};
pub use compile::{CompileOutcome, CompiledFunction, JitCompiler};
pub use config::{JitConfig, OptLevel};
pub use dispatch::{OperatorEntry, OperatorKey, OperatorRegistry};
pub use error::{CompileError, Recovery};
pub use ir::{Address, CallTarget, CompiledTarget, ConstValue, FunctionIr, FunctionIrBuilder, Instr};
pub use stats::FrameStats;

//! JIT module construction with runtime symbols pre-registered.

use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::default_libcall_names;
use kiln_runtime::runtime_symbols;

use crate::config::JitConfig;
use crate::error::CompileError;

/// Create a `JITBuilder` for the host ISA with every runtime entry point
/// registered, so compiled functions can call them.
pub(crate) fn create_jit_builder(config: &JitConfig) -> Result<JITBuilder, CompileError> {
    let mut flag_builder = settings::builder();
    for (name, value) in [
        ("opt_level", config.opt_level.as_flag()),
        ("enable_verifier", if config.verify { "true" } else { "false" }),
        ("is_pic", "false"),
        ("use_colocated_libcalls", "false"),
    ] {
        flag_builder
            .set(name, value)
            .map_err(|e| CompileError::Backend(format!("set {name}: {e}")))?;
    }

    let isa_builder = cranelift_native::builder()
        .map_err(|msg| CompileError::Backend(format!("native ISA not available: {msg}")))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| CompileError::Backend(format!("isa finish: {e}")))?;

    let mut builder = JITBuilder::with_isa(isa, default_libcall_names());
    for (name, ptr) in runtime_symbols() {
        builder.symbol(name, ptr);
    }
    Ok(builder)
}

pub(crate) fn create_jit_module(config: &JitConfig) -> Result<JITModule, CompileError> {
    Ok(JITModule::new(create_jit_builder(config)?))
}

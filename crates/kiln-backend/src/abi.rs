//! Calling convention and runtime helper declarations.
//!
//! Every compiled function and every host function shares one signature:
//!     `(instance, members, constants, args, argc, ret) -> ()`
//! where all but `argc` are pointers. Runtime helpers are imported by name
//! and resolved against the symbols registered on the JIT builder.

use cranelift_codegen::ir::{types, AbiParam, FuncRef, Function, Signature, Type};
use cranelift_module::{FuncId, Linkage, Module};
use kiln_runtime::{Binding, HostFunctions};
use rustc_hash::FxHashMap;

use crate::error::CompileError;

/// Pointer-sized integer type.
pub(crate) const PTR: Type = types::I64;

/// Operator and tag codes are passed as `u32`.
pub(crate) const CODE: Type = types::I32;

pub(crate) fn entry_signature(module: &impl Module) -> Signature {
    let mut sig = module.make_signature();
    for _ in 0..6 {
        sig.params.push(AbiParam::new(PTR));
    }
    sig
}

/// Module-level ids of every imported runtime entry point.
pub(crate) struct DeclaredHelpers {
    evaluate_binary: FuncId,
    evaluate_unary: FuncId,
    convert: FuncId,
    call_dynamic: FuncId,
    host: Vec<(&'static str, FuncId)>,
}

/// Per-function references to the imported runtime entry points.
pub(crate) struct HelperRefs {
    pub(crate) evaluate_binary: FuncRef,
    pub(crate) evaluate_unary: FuncRef,
    pub(crate) convert: FuncRef,
    pub(crate) call_dynamic: FuncRef,
    pub(crate) host: FxHashMap<&'static str, FuncRef>,
}

pub(crate) fn declare_helpers(module: &mut impl Module) -> Result<DeclaredHelpers, CompileError> {
    macro_rules! decl {
        ($name:expr, [$($param:expr),*]) => {{
            let mut sig = module.make_signature();
            $(sig.params.push(AbiParam::new($param));)*
            module
                .declare_function($name, Linkage::Import, &sig)
                .map_err(|e| CompileError::Backend(format!("declare {}: {e}", $name)))?
        }};
    }

    let mut host = Vec::new();
    for function in HostFunctions::standard().iter() {
        if function.binding == Binding::Direct {
            let id = decl!(function.symbol, [PTR, PTR, PTR, PTR, PTR, PTR]);
            host.push((function.name, id));
        }
    }

    Ok(DeclaredHelpers {
        // (instance, op, lhs, rhs, ret)
        evaluate_binary: decl!("kiln_rt_evaluate_binary", [PTR, CODE, PTR, PTR, PTR]),
        // (instance, op, src, ret)
        evaluate_unary: decl!("kiln_rt_evaluate_unary", [PTR, CODE, PTR, PTR]),
        // (instance, src, tag, ret)
        convert: decl!("kiln_rt_convert", [PTR, PTR, CODE, PTR]),
        // entry convention + (name_ptr, name_len)
        call_dynamic: decl!("kiln_rt_call_dynamic", [PTR, PTR, PTR, PTR, PTR, PTR, PTR, PTR]),
        host,
    })
}

impl DeclaredHelpers {
    pub(crate) fn import_into(&self, module: &mut impl Module, func: &mut Function) -> HelperRefs {
        macro_rules! imp {
            ($field:ident) => {
                module.declare_func_in_func(self.$field, func)
            };
        }
        HelperRefs {
            evaluate_binary: imp!(evaluate_binary),
            evaluate_unary: imp!(evaluate_unary),
            convert: imp!(convert),
            call_dynamic: imp!(call_dynamic),
            host: self
                .host
                .iter()
                .map(|(name, id)| (*name, module.declare_func_in_func(*id, func)))
                .collect(),
        }
    }
}

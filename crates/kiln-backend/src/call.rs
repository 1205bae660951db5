//! Call marshalling.
//!
//! Arguments cross into callees as an array of pointers to boxed values.
//! Direct host functions and compiled functions are called through the
//! entry convention; anything that cannot be resolved while compiling goes
//! through the runtime's dynamic dispatcher, which looks the name up when
//! the call executes.

use cranelift_codegen::ir::{self, FuncRef, InstBuilder};
use kiln_runtime::{HostFunctions, HostTypeId};

use crate::abi::PTR;
use crate::engine::FunctionContext;
use crate::error::{CompileError, Recovery};
use crate::ir::{Address, CallTarget, CompiledTarget};
use crate::lower::convert_into_new;
use crate::value::RefId;

#[derive(Debug, Clone)]
pub(crate) enum Callee {
    Direct(FuncRef),
    Indirect(CompiledTarget),
    Dynamic(Box<str>),
}

/// A call whose arguments have been packed but not yet emitted.
#[derive(Debug)]
pub(crate) struct CallSite {
    pub(crate) arg_count: u32,
    pub(crate) pointer_stores: u32,
    callee: Callee,
    arguments: ir::Value,
    /// Argument copies and conversions owned by the call.
    temps: Vec<RefId>,
}

fn resolve_target(ctx: &FunctionContext<'_, '_>, target: &CallTarget) -> Result<Callee, CompileError> {
    match target {
        CallTarget::Compiled(compiled) => Ok(Callee::Indirect(compiled.clone())),
        CallTarget::Host(name) => match ctx.helpers.host.get(name.as_str()) {
            Some(func_ref) => Ok(Callee::Direct(*func_ref)),
            // Either dispatch-only or unknown; the runtime sorts it out.
            None => {
                if HostFunctions::standard().get(name).is_none() {
                    tracing::debug!(function = %name, "call to unknown host function");
                }
                Err(CompileError::TargetUnresolved(name.clone()))
            }
        },
    }
}

/// The value passed for one argument. Compiled callees read arguments at
/// their declared type, so anything else is converted first. Members and
/// externals are copied because the callee may write them while the
/// argument is live.
fn argument_value(
    ctx: &mut FunctionContext<'_, '_>,
    address: Address,
    declared: Option<HostTypeId>,
    temps: &mut Vec<RefId>,
) -> Result<RefId, CompileError> {
    let id = ctx.resolve(address)?;
    let ty = ctx.get(id)?.ty;
    let passed = match declared {
        Some(declared) if declared != ty && declared != HostTypeId::VARIANT => {
            convert_into_new(ctx, id, Some(declared), false)?
        }
        _ if address.is_shared() => ctx.copy_value(id)?,
        _ => return Ok(id),
    };
    temps.push(passed);
    Ok(passed)
}

pub(crate) fn prepare_call(
    ctx: &mut FunctionContext<'_, '_>,
    target: &CallTarget,
    args: &[Address],
) -> Result<CallSite, CompileError> {
    let callee = match resolve_target(ctx, target) {
        Ok(callee) => callee,
        Err(err) if err.recovery() == Recovery::Expression => {
            tracing::debug!(%err, "call lowered through the dynamic dispatcher");
            ctx.counters.unresolved_calls += 1;
            Callee::Dynamic(target.to_string().into_boxed_str())
        }
        Err(err) => return Err(err),
    };

    let params = match &callee {
        Callee::Indirect(compiled) => {
            if compiled.params.len() != args.len() {
                return Err(CompileError::unsupported(format!(
                    "{target} takes {} arguments, called with {}",
                    compiled.params.len(),
                    args.len()
                )));
            }
            Some(compiled.params.as_slice())
        }
        Callee::Direct(_) | Callee::Dynamic(_) => None,
    };

    let mut temps = Vec::new();
    let mut pointers = Vec::with_capacity(args.len());
    for (index, address) in args.iter().enumerate() {
        let declared = params.and_then(|params| params.get(index).copied());
        let id = argument_value(ctx, *address, declared, &mut temps)?;
        pointers.push(ctx.materialize_object(id)?);
    }

    let arg_count = pointers.len() as u32;
    let mut pointer_stores = 0;
    let arguments = if pointers.is_empty() {
        ctx.builder.ins().iconst(PTR, 0)
    } else {
        let array = ctx.slots.argument_array(&mut ctx.builder, arg_count)?;
        for (index, pointer) in pointers.iter().enumerate() {
            ctx.builder.ins().stack_store(*pointer, array, (index * 8) as i32);
            pointer_stores += 1;
        }
        ctx.builder.ins().stack_addr(PTR, array, 0)
    };

    Ok(CallSite {
        arg_count,
        pointer_stores,
        callee,
        arguments,
        temps,
    })
}

/// Emit the call. With `ret_ty` set the result is returned as a value of
/// that type; otherwise the callee receives a null return pointer.
pub(crate) fn emit_call(
    ctx: &mut FunctionContext<'_, '_>,
    site: CallSite,
    ret_ty: Option<HostTypeId>,
) -> Result<Option<RefId>, CompileError> {
    // A compiled callee that already returns `ret_ty` fills a typed box.
    let mut returned = HostTypeId::VARIANT;
    if let (Callee::Indirect(compiled), Some(ty)) = (&site.callee, ret_ty) {
        match compiled.returns {
            Some(returns) if returns == ty => returned = ty,
            Some(_) => {}
            None => {
                return Err(CompileError::unsupported(
                    "result taken from a compiled function that returns nothing",
                ));
            }
        }
    }
    let result = match ret_ty {
        Some(_) => Some(ctx.new_slot_value(returned)?),
        None => None,
    };

    ctx.flush_shared()?;

    let params = ctx.params;
    let ret = match result {
        Some((_, object)) => object,
        None => ctx.builder.ins().iconst(PTR, 0),
    };
    let argc = ctx.builder.ins().iconst(PTR, i64::from(site.arg_count));
    let mut call_args = vec![params.instance, params.members, params.constants, site.arguments, argc, ret];

    match site.callee {
        Callee::Direct(func_ref) => {
            ctx.builder.ins().call(func_ref, &call_args);
            ctx.counters.direct_calls += 1;
        }
        Callee::Indirect(target) => {
            call_args[2] = ctx.builder.ins().iconst(PTR, target.constants as i64);
            let entry = ctx.builder.ins().iconst(PTR, target.entry as i64);
            let sig_ref = ctx.entry_sig_ref();
            ctx.builder.ins().call_indirect(sig_ref, entry, &call_args);
            ctx.counters.direct_calls += 1;
        }
        Callee::Dynamic(name) => {
            call_args.push(ctx.builder.ins().iconst(PTR, name.as_ptr() as i64));
            call_args.push(ctx.builder.ins().iconst(PTR, name.len() as i64));
            // The name must outlive the compiled code.
            ctx.call_names.push(name);
            ctx.builder.ins().call(ctx.helpers.call_dynamic, &call_args);
        }
    }

    ctx.invalidate_shared();
    for temp in site.temps {
        ctx.release(temp)?;
    }

    let Some((id, _)) = result else {
        return Ok(None);
    };
    ctx.mark_written(id, true)?;
    match ret_ty {
        Some(ty) if ty != returned => {
            let typed = ctx.convert_boxed(id, ty)?;
            ctx.release(id)?;
            Ok(Some(typed))
        }
        _ => Ok(Some(id)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::testing::with_context;
    use crate::ir::{ConstValue, FunctionIrBuilder};

    #[test]
    fn one_pointer_store_per_argument() {
        let mut b = FunctionIrBuilder::new("f");
        let two = b.constant(ConstValue::Int(2));
        let x = b.param(HostTypeId::FLOAT);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let target = CallTarget::Host("max".into());
            let site = prepare_call(ctx, &target, &[two, x, two]).unwrap();
            assert_eq!(site.arg_count, 3);
            assert_eq!(site.pointer_stores, 3);
            assert!(matches!(site.callee, Callee::Direct(_)));
            // Constants and arguments are already boxed.
            assert_eq!(ctx.stats().slots_allocated, 0);
        });
    }

    #[test]
    fn shared_arguments_are_copied_for_the_call() {
        let mut b = FunctionIrBuilder::new("f");
        let m = b.member(HostTypeId::VECTOR2);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let site = prepare_call(ctx, &CallTarget::Host("print".into()), &[m]).unwrap();
            assert_eq!(site.temps.len(), 1);
            assert_eq!(ctx.stats().slots_allocated, 1);
            emit_call(ctx, site, None).unwrap();
            // The copy's slot is free again once the call returns.
            ctx.new_slot_value(HostTypeId::VECTOR2).unwrap();
            assert_eq!(ctx.stats().slot_reuses, 1);
        });
    }

    #[test]
    fn argument_arrays_are_shared_across_calls() {
        let mut b = FunctionIrBuilder::new("f");
        let one = b.constant(ConstValue::Int(1));
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let print = CallTarget::Host("print".into());
            let first = prepare_call(ctx, &print, &[one, one]).unwrap();
            emit_call(ctx, first, None).unwrap();
            let second = prepare_call(ctx, &print, &[one]).unwrap();
            emit_call(ctx, second, None).unwrap();
            let stats = ctx.stats();
            assert_eq!(stats.argument_arrays, 1);
            assert_eq!(stats.direct_calls, 2);
        });
    }

    #[test]
    fn unresolved_targets_use_the_dispatcher() {
        let mut b = FunctionIrBuilder::new("f");
        let v = b.param(HostTypeId::VECTOR2);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let site = prepare_call(ctx, &CallTarget::Host("length".into()), &[v]).unwrap();
            assert!(matches!(site.callee, Callee::Dynamic(ref name) if &**name == "length"));
            let result = emit_call(ctx, site, Some(HostTypeId::VARIANT)).unwrap();
            assert!(result.is_some());
            assert_eq!(ctx.call_names.len(), 1);
            let stats = ctx.stats();
            assert_eq!(stats.unresolved_calls, 1);
            assert_eq!(stats.direct_calls, 0);
        });
    }

    #[test]
    fn calls_without_arguments_pass_null() {
        let ir = FunctionIrBuilder::new("f").finish();
        with_context(&ir, |ctx| {
            let site = prepare_call(ctx, &CallTarget::Host("print".into()), &[]).unwrap();
            assert_eq!(site.arg_count, 0);
            emit_call(ctx, site, None).unwrap();
            assert_eq!(ctx.stats().argument_arrays, 0);
        });
    }
}

//! Instruction lowering.
//!
//! Walks the straight-line stream once, handing each instruction to the
//! value engine and its collaborators, and releases every address after its
//! last use so its slot can be reused.

use cranelift_codegen::ir::{types, InstBuilder};
use kiln_runtime::{HostTypeId, BOXED_SIZE};

use crate::abi::CODE;
use crate::call::{emit_call, prepare_call};
use crate::catalog::Category;
use crate::dispatch::{apply_binary, apply_unary};
use crate::engine::{data_of, trusted, FunctionContext};
use crate::error::CompileError;
use crate::field::{get_field, set_field};
use crate::ir::{Address, Instr};
use crate::value::{RefId, ValueRef};

pub(crate) fn lower_body(ctx: &mut FunctionContext<'_, '_>) -> Result<(), CompileError> {
    let ir = ctx.ir;
    let liveness = ctx.liveness;
    for (index, instr) in ir.body.iter().enumerate() {
        if ctx.terminated {
            return Err(CompileError::unsupported(format!(
                "instruction {index} follows a return"
            )));
        }
        lower(ctx, index, instr)?;
        if ctx.terminated {
            continue;
        }
        for address in liveness.released_after(index) {
            ctx.release_address(*address)?;
        }
    }
    if !ctx.terminated {
        emit_return(ctx, None)?;
    }
    Ok(())
}

fn lower(ctx: &mut FunctionContext<'_, '_>, index: usize, instr: &Instr) -> Result<(), CompileError> {
    match instr {
        Instr::Assign { dst, src } => {
            if dst == src {
                return Ok(());
            }
            let value = ctx.resolve(*src)?;
            let movable = matches!(src, Address::Local(_) | Address::Temp(_));
            let owned = movable && ctx.liveness.is_last_use(index, *src);
            if owned {
                ctx.unbind(*src);
            }
            write(ctx, *dst, value, owned)
        }
        Instr::Binary { dst, op, lhs, rhs } => {
            let lhs = ctx.resolve(*lhs)?;
            let rhs = ctx.resolve(*rhs)?;
            let result = apply_binary(ctx, *op, lhs, rhs)?;
            write(ctx, *dst, result, true)
        }
        Instr::Unary { dst, op, src } => {
            let src = ctx.resolve(*src)?;
            let result = apply_unary(ctx, *op, src)?;
            write(ctx, *dst, result, true)
        }
        Instr::GetField { dst, src, field } => {
            let owner = ctx.resolve(*src)?;
            let result = get_field(ctx, owner, field)?;
            write(ctx, *dst, result, true)
        }
        Instr::SetField { owner, field, value } => {
            if let Address::Constant(_) = owner {
                return Err(CompileError::unsupported(format!("field write to {owner}")));
            }
            let owner = ctx.resolve(*owner)?;
            let value = ctx.resolve(*value)?;
            set_field(ctx, owner, field, value)
        }
        Instr::Call {
            target,
            args,
            dst,
            ret_ty,
        } => {
            let site = prepare_call(ctx, target, args)?;
            let result = emit_call(ctx, site, dst.map(|_| *ret_ty))?;
            match (dst, result) {
                (Some(dst), Some(result)) => write(ctx, *dst, result, true),
                _ => Ok(()),
            }
        }
        Instr::Return(value) => emit_return(ctx, *value),
    }
}

/// Store `value` into `dst`. An owned value may be bound directly; anything
/// else is copied so later writes through either name stay independent.
fn write(ctx: &mut FunctionContext<'_, '_>, dst: Address, value: RefId, owned: bool) -> Result<(), CompileError> {
    match dst {
        Address::Constant(_) => Err(CompileError::unsupported(format!("write to {dst}"))),
        Address::Member(_) | Address::External(_) => write_shared(ctx, dst, value, owned),
        Address::Local(_) | Address::Argument(_) | Address::Temp(_) => {
            let declared = ctx.declared_type(dst)?;
            let new = convert_into_new(ctx, value, declared, owned)?;
            ctx.rebind(dst, new)?;
            if owned && new != value {
                ctx.release(value)?;
            }
            Ok(())
        }
    }
}

/// `value` as a value of `declared`. Unless `owned`, the result never
/// aliases `value`.
pub(crate) fn convert_into_new(
    ctx: &mut FunctionContext<'_, '_>,
    value: RefId,
    declared: Option<HostTypeId>,
    owned: bool,
) -> Result<RefId, CompileError> {
    let ty = ctx.get(value)?.ty;
    let target = declared.unwrap_or(ty);
    if target == ty {
        return if owned { Ok(value) } else { ctx.copy_value(value) };
    }

    let catalog = ctx.catalog;
    let (from, to) = (catalog.describe(ty)?, catalog.describe(target)?);
    match (from.scalar, to.scalar) {
        (Some(_), Some(kind)) => {
            let handle = ctx.get_native(value)?;
            let handle = ctx.cast_native(handle, kind);
            Ok(ctx.insert(ValueRef::native(None, target, handle)))
        }
        _ if target == HostTypeId::VARIANT => {
            let object = ctx.materialize_object(value)?;
            if owned {
                ctx.get_mut(value)?.ty = HostTypeId::VARIANT;
                return Ok(value);
            }
            let (copy, to) = ctx.new_slot_value(HostTypeId::VARIANT)?;
            ctx.copy_box(object, to);
            ctx.mark_written(copy, true)?;
            Ok(copy)
        }
        _ if ty == HostTypeId::VARIANT => ctx.convert_boxed(value, target),
        _ => Err(CompileError::unsupported(format!(
            "cannot assign `{}` to `{}`",
            from.name, to.name
        ))),
    }
}

/// Writes to members and externals land in their own boxes. Scalars stay
/// native until the next sync point.
fn write_shared(
    ctx: &mut FunctionContext<'_, '_>,
    dst: Address,
    value: RefId,
    owned: bool,
) -> Result<(), CompileError> {
    let target = ctx.resolve(dst)?;
    if target == value {
        return Ok(());
    }
    ctx.detach_derived(target)?;

    let catalog = ctx.catalog;
    let declared = catalog.describe(ctx.get(target)?.ty)?;
    let source = catalog.describe(ctx.get(value)?.ty)?;

    match (declared.scalar, source.scalar) {
        (Some(_), Some(_)) => {
            let handle = ctx.get_native(value)?;
            ctx.set_native(target, handle)?;
        }
        _ => {
            let object = ctx
                .get(target)?
                .object()
                .ok_or_else(|| CompileError::unsupported(format!("{dst} has no box")))?;
            if declared.id == source.id && declared.category == Category::Composite {
                let from = ctx.materialize_data(value)?;
                ctx.copy_bytes(from, data_of(object), declared.size);
            } else if declared.id == source.id || declared.id == HostTypeId::VARIANT {
                let from = ctx.materialize_object(value)?;
                ctx.copy_box(from, object);
            } else if source.id == HostTypeId::VARIANT {
                let tag = declared.tag.ok_or_else(|| {
                    CompileError::unsupported(format!("{dst} has field-only type `{}`", declared.name))
                })?;
                let from = ctx.materialize_object(value)?;
                let code = ctx.builder.ins().iconst(CODE, i64::from(tag.raw()));
                let instance = ctx.params.instance;
                ctx.builder
                    .ins()
                    .call(ctx.helpers.convert, &[instance, from, code, object]);
            } else {
                return Err(CompileError::unsupported(format!(
                    "cannot assign `{}` to {dst} of type `{}`",
                    source.name, declared.name
                )));
            }
            ctx.mark_written(target, true)?;
        }
    }

    if owned {
        ctx.release(value)?;
    }
    Ok(())
}

fn emit_return(ctx: &mut FunctionContext<'_, '_>, value: Option<Address>) -> Result<(), CompileError> {
    if ctx.terminated {
        return Err(CompileError::unsupported("second return"));
    }
    let object = match value {
        Some(address) => {
            let returns = ctx.ir.returns.ok_or_else(|| {
                CompileError::unsupported("value returned from a function declared without a result")
            })?;
            let mut id = ctx.resolve(address)?;
            if ctx.get(id)?.ty != returns {
                id = convert_into_new(ctx, id, Some(returns), false)?;
            }
            Some(ctx.materialize_object(id)?)
        }
        None => None,
    };
    ctx.flush_shared()?;

    let ret = ctx.params.ret;
    let store = ctx.builder.create_block();
    let exit = ctx.builder.create_block();
    ctx.builder.ins().brif(ret, store, &[], exit, &[]);

    ctx.builder.switch_to_block(store);
    ctx.builder.seal_block(store);
    match object {
        Some(from) => ctx.copy_box(from, ret),
        None => {
            // Nil is all zero bits.
            let zero = ctx.builder.ins().iconst(types::I64, 0);
            for offset in (0..BOXED_SIZE as i32).step_by(8) {
                ctx.builder.ins().store(trusted(), zero, ret, offset);
            }
        }
    }
    ctx.builder.ins().jump(exit, &[]);

    ctx.builder.switch_to_block(exit);
    ctx.builder.seal_block(exit);
    ctx.builder.ins().return_(&[]);
    ctx.terminated = true;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::testing::with_context;
    use crate::ir::{ConstValue, FunctionIrBuilder};
    use kiln_runtime::BinaryOp;

    #[test]
    fn last_use_assignments_move() {
        let mut b = FunctionIrBuilder::new("f");
        let a = b.local(HostTypeId::VECTOR2);
        let c = b.local(HostTypeId::VECTOR2);
        let v = b.param(HostTypeId::VECTOR2);
        let sum = b.binary(BinaryOp::Add, v, v);
        b.assign(a, sum);
        b.assign(c, a);
        b.ret(None);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            lower_body(ctx).unwrap();
            // Only the sum ever needed a slot; both assignments moved it.
            assert_eq!(ctx.stats().slots_allocated, 1);
        });
    }

    #[test]
    fn copies_keep_values_independent() {
        let mut b = FunctionIrBuilder::new("f");
        let a = b.local(HostTypeId::VECTOR2);
        let c = b.local(HostTypeId::VECTOR2);
        let v = b.param(HostTypeId::VECTOR2);
        let one = b.constant(ConstValue::Float(1.0));
        b.assign(a, v);
        b.assign(c, a);
        b.set_field(c, "x", one);
        b.ret(None);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            lower_body(ctx).unwrap();
            let stats = ctx.stats();
            assert_eq!(stats.slots_allocated, 1);
        });
    }

    #[test]
    fn scalar_chains_stay_native() {
        let mut b = FunctionIrBuilder::new("f");
        let i = b.local(HostTypeId::INT);
        let hf = b.local(HostTypeId::FLOAT);
        let two = b.constant(ConstValue::Int(2));
        let two_f = b.constant(ConstValue::Float(2.0));
        b.assign(hf, two_f);
        b.assign(i, two);
        let t = b.binary(BinaryOp::Mul, i, hf);
        b.assign(i, t);
        let u = b.binary(BinaryOp::Add, i, two);
        b.assign(i, u);
        b.ret(None);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            lower_body(ctx).unwrap();
            let stats = ctx.stats();
            assert_eq!(stats.slots_allocated, 0);
            assert_eq!(stats.native_operators, 2);
            assert!(ctx.terminated);
        });
    }

    #[test]
    fn returning_a_value_needs_a_declared_result() {
        let mut b = FunctionIrBuilder::new("f");
        let one = b.constant(ConstValue::Int(1));
        b.ret(Some(one));
        let ir = b.finish();
        with_context(&ir, |ctx| {
            assert!(matches!(lower_body(ctx), Err(CompileError::UnsupportedConstruct(_))));
        });
    }

    #[test]
    fn nothing_may_follow_a_return() {
        let mut b = FunctionIrBuilder::new("f");
        let one = b.constant(ConstValue::Int(1));
        let i = b.local(HostTypeId::INT);
        b.ret(None);
        b.assign(i, one);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            assert!(lower_body(ctx).is_err());
        });
    }

    #[test]
    fn constants_cannot_be_written() {
        let mut b = FunctionIrBuilder::new("f");
        let one = b.constant(ConstValue::Int(1));
        let two = b.constant(ConstValue::Int(2));
        b.assign(one, two);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            assert!(lower_body(ctx).is_err());
        });
    }
}

//! Field reads and writes on composite values.
//!
//! A field read produces a value whose home is the parent's memory at the
//! field offset; nothing is copied until the parent is about to change.
//! All aliases hang off the outermost value so nested reads
//! (`rect.position.x`) are tracked in one list.

use kiln_runtime::HostTypeId;

use crate::engine::FunctionContext;
use crate::error::CompileError;
use crate::value::{DataPointer, Home, NativeHandle, RefId, ScalarOrComposite, ValueRef};

pub(crate) fn get_field(
    ctx: &mut FunctionContext<'_, '_>,
    owner: RefId,
    name: &str,
) -> Result<RefId, CompileError> {
    let catalog = ctx.catalog;
    let (field, field_ty) = catalog.field(ctx.get(owner)?.ty, name)?;
    let data = ctx.materialize_data(owner)?.at(field.offset);
    let root = match ctx.get(owner)?.home {
        Home::Field { parent, .. } => parent,
        _ => owner,
    };

    let (ty, storage) = match field_ty.scalar {
        Some(kind) => (catalog.canonical(field_ty.id)?.id, ScalarOrComposite::Scalar(kind)),
        None => (field_ty.id, ScalarOrComposite::Composite),
    };
    let id = ctx.insert(ValueRef::new(
        None,
        ty,
        Home::Field {
            parent: root,
            data,
            storage,
        },
    ));
    ctx.get_mut(root)?.derived.push(id);
    tracing::trace!(field = name, value = id.0, "field aliased");
    Ok(id)
}

enum Prepared {
    Scalar(NativeHandle),
    Composite { from: DataPointer, size: u32 },
}

pub(crate) fn set_field(
    ctx: &mut FunctionContext<'_, '_>,
    owner: RefId,
    name: &str,
    value: RefId,
) -> Result<(), CompileError> {
    let catalog = ctx.catalog;
    let (field, field_ty) = catalog.field(ctx.get(owner)?.ty, name)?;

    // The owner needs memory of its own before it can be written.
    match ctx.get(owner)?.home {
        Home::Field { .. } => ctx.detach(owner)?,
        Home::Borrowed { writable: false, .. } => ctx.rehome(owner)?,
        _ => {}
    }
    ctx.detach_derived(owner)?;

    let value_ty = ctx.get(value)?.ty;
    let target = catalog.canonical(field_ty.id)?.id;
    let source = if value_ty == HostTypeId::VARIANT {
        ctx.convert_boxed(value, target)?
    } else {
        value
    };
    let prepared = match field_ty.scalar {
        Some(kind) => {
            let handle = ctx.get_native(source)?;
            Prepared::Scalar(ctx.cast_native(handle, kind))
        }
        None if ctx.get(source)?.ty == field_ty.id => Prepared::Composite {
            from: ctx.materialize_data(source)?,
            size: field_ty.size,
        },
        None => {
            return Err(CompileError::unsupported(format!(
                "cannot store `{}` into field `{name}` of type `{}`",
                catalog.describe(value_ty)?.name,
                field_ty.name
            )));
        }
    };

    let at = ctx.materialize_data(owner)?.at(field.offset);
    match prepared {
        Prepared::Scalar(handle) => ctx.store_scalar(at, handle),
        Prepared::Composite { from, size } => ctx.copy_bytes(from, at, size),
    }
    if source != value {
        ctx.release(source)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::testing::{instruction_count, with_context};
    use crate::ir::{ConstValue, FunctionIrBuilder};
    use kiln_runtime::{ScalarKind, Vector2};

    #[test]
    fn reads_alias_the_parent() {
        let mut b = FunctionIrBuilder::new("f");
        let r = b.param(HostTypeId::RECT2);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let rect = ctx.resolve(r).unwrap();
            let size = get_field(ctx, rect, "size").unwrap();
            let before = instruction_count(ctx);
            let y = get_field(ctx, size, "y").unwrap();
            assert_eq!(instruction_count(ctx), before);
            assert_eq!(ctx.get(y).unwrap().ty, HostTypeId::FLOAT);
            assert_eq!(ctx.get(rect).unwrap().derived, vec![size, y]);
            let Home::Field { data, storage, .. } = ctx.get(y).unwrap().home else {
                panic!("field value should alias its parent");
            };
            assert_eq!(storage, ScalarOrComposite::Scalar(ScalarKind::Float32));
            // Box header, then `size`, then `y`.
            assert_eq!(data.offset, 8 + 8 + 4);
        });
    }

    #[test]
    fn writing_the_parent_detaches_earlier_reads() {
        let mut b = FunctionIrBuilder::new("f");
        let v = b.param(HostTypeId::VECTOR2);
        let one = b.constant(ConstValue::Float(1.0));
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let vector = ctx.resolve(v).unwrap();
            let x = get_field(ctx, vector, "x").unwrap();
            let one = ctx.resolve(one).unwrap();
            set_field(ctx, vector, "x", one).unwrap();
            assert!(ctx.get(vector).unwrap().derived.is_empty());
            assert_eq!(ctx.get(x).unwrap().home, Home::Unassigned);
            assert!(ctx.get(x).unwrap().native.is_some());
            // The argument box is read-only, the write went to a slot.
            assert!(matches!(ctx.get(vector).unwrap().home, Home::Slot { .. }));
        });
    }

    #[test]
    fn composite_fields_require_matching_types() {
        let mut b = FunctionIrBuilder::new("f");
        let v = b.constant(ConstValue::Vector2(Vector2::new(1.0, 2.0)));
        let i = b.constant(ConstValue::Int(3));
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let (rect, _) = ctx.new_slot_value(HostTypeId::RECT2).unwrap();
            ctx.mark_written(rect, false).unwrap();
            let v = ctx.resolve(v).unwrap();
            let i = ctx.resolve(i).unwrap();
            set_field(ctx, rect, "position", v).unwrap();
            assert!(matches!(
                set_field(ctx, rect, "size", i),
                Err(CompileError::UnsupportedConstruct(_))
            ));
            assert!(matches!(
                set_field(ctx, rect, "origin", v),
                Err(CompileError::UnknownField { .. })
            ));
        });
    }

    #[test]
    fn degraded_types_report_missing_offsets() {
        let mut b = FunctionIrBuilder::new("f");
        let basis = b.param(HostTypeId::BASIS);
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let basis = ctx.resolve(basis).unwrap();
            assert!(matches!(
                get_field(ctx, basis, "rows"),
                Err(CompileError::MissingFieldOffsetMetadata { .. })
            ));
        });
    }
}

//! Operator dispatch.
//!
//! A declarative table maps `(category, category, operator)` to either a
//! native routine or an explicit "no native form" marker. A routine may still
//! decline a particular pair of concrete types at compile time, e.g. integer
//! division, whose zero check belongs to the runtime. Anything without a
//! native result is lowered as a call to the runtime evaluator.

use std::fmt;
use std::sync::OnceLock;

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{self, types, InstBuilder};
use kiln_runtime::{BinaryOp, HostTypeId, ScalarKind, UnaryOp};
use rustc_hash::FxHashMap;

use crate::abi::CODE;
use crate::catalog::Category;
use crate::engine::{data_of, FunctionContext};
use crate::error::{CompileError, Recovery};
use crate::value::{NativeHandle, RefId, ValueRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKey {
    Binary(Category, Category, BinaryOp),
    Unary(Category, UnaryOp),
}

impl OperatorKey {
    fn symbol(self) -> &'static str {
        match self {
            OperatorKey::Binary(_, _, op) => op.symbol(),
            OperatorKey::Unary(_, op) => op.symbol(),
        }
    }

    fn operands(self) -> String {
        match self {
            OperatorKey::Binary(lhs, rhs, _) => format!("{lhs} x {rhs}"),
            OperatorKey::Unary(operand, _) => operand.to_string(),
        }
    }

    fn categories(self) -> Vec<Category> {
        match self {
            OperatorKey::Binary(lhs, rhs, _) => vec![lhs, rhs],
            OperatorKey::Unary(operand, _) => vec![operand],
        }
    }

    fn unsupported(self) -> CompileError {
        CompileError::UnsupportedOperatorCombination {
            op: self.symbol(),
            operands: self.operands(),
        }
    }
}

impl fmt::Display for OperatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`", self.operands(), self.symbol())
    }
}

type Emitted = Result<Option<RefId>, CompileError>;
type BinaryFn = fn(&mut FunctionContext<'_, '_>, BinaryOp, RefId, RefId) -> Emitted;
type UnaryFn = fn(&mut FunctionContext<'_, '_>, UnaryOp, RefId) -> Emitted;

#[derive(Clone, Copy)]
pub(crate) enum Emitter {
    Binary(BinaryFn),
    Unary(UnaryFn),
}

/// A native lowering. Returning `Ok(None)` declines the concrete operands.
#[derive(Clone, Copy)]
pub struct NativeRoutine {
    pub name: &'static str,
    pub(crate) emit: Emitter,
}

impl fmt::Debug for NativeRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRoutine").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OperatorEntry {
    Native(NativeRoutine),
    NoNative,
}

#[derive(Debug)]
pub struct OperatorRegistry {
    entries: FxHashMap<OperatorKey, OperatorEntry>,
}

static STANDARD: OnceLock<Result<OperatorRegistry, CompileError>> = OnceLock::new();

const SCALAR_CATEGORIES: [Category; 2] = [Category::Native, Category::Composite];

impl OperatorRegistry {
    /// Validate a table. Every operator over native and composite operands
    /// must be listed; opaque operands may only map to `NoNative`.
    pub fn build(
        rows: impl IntoIterator<Item = (OperatorKey, OperatorEntry)>,
    ) -> Result<Self, CompileError> {
        let mut entries = FxHashMap::default();
        for (key, entry) in rows {
            if matches!(entry, OperatorEntry::Native(_)) && key.categories().contains(&Category::Opaque) {
                return Err(CompileError::InvalidOperatorTable(format!(
                    "native routine registered for {key}"
                )));
            }
            if entries.insert(key, entry).is_some() {
                return Err(CompileError::InvalidOperatorTable(format!("{key} listed twice")));
            }
        }

        for lhs in SCALAR_CATEGORIES {
            for op in UnaryOp::ALL {
                let key = OperatorKey::Unary(lhs, op);
                if !entries.contains_key(&key) {
                    return Err(CompileError::InvalidOperatorTable(format!("{key} missing")));
                }
            }
            for rhs in SCALAR_CATEGORIES {
                for op in BinaryOp::ALL {
                    let key = OperatorKey::Binary(lhs, rhs, op);
                    if !entries.contains_key(&key) {
                        return Err(CompileError::InvalidOperatorTable(format!("{key} missing")));
                    }
                }
            }
        }

        tracing::debug!(entries = entries.len(), "operator table built");
        Ok(Self { entries })
    }

    pub fn standard() -> Result<&'static OperatorRegistry, CompileError> {
        STANDARD
            .get_or_init(|| OperatorRegistry::build(standard_rows()))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn entry(&self, key: OperatorKey) -> Option<OperatorEntry> {
        self.entries.get(&key).copied()
    }

    pub fn lookup(&self, key: OperatorKey) -> Result<NativeRoutine, CompileError> {
        match self.entry(key) {
            Some(OperatorEntry::Native(routine)) => Ok(routine),
            Some(OperatorEntry::NoNative) | None => Err(key.unsupported()),
        }
    }

    pub fn lookup_binary(
        &self,
        lhs: Category,
        rhs: Category,
        op: BinaryOp,
    ) -> Result<NativeRoutine, CompileError> {
        self.lookup(OperatorKey::Binary(lhs, rhs, op))
    }

    pub fn lookup_unary(&self, operand: Category, op: UnaryOp) -> Result<NativeRoutine, CompileError> {
        self.lookup(OperatorKey::Unary(operand, op))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Standard table
// ---------------------------------------------------------------------------

fn binary(name: &'static str, emit: BinaryFn) -> OperatorEntry {
    OperatorEntry::Native(NativeRoutine {
        name,
        emit: Emitter::Binary(emit),
    })
}

fn unary(name: &'static str, emit: UnaryFn) -> OperatorEntry {
    OperatorEntry::Native(NativeRoutine {
        name,
        emit: Emitter::Unary(emit),
    })
}

pub fn standard_rows() -> Vec<(OperatorKey, OperatorEntry)> {
    use BinaryOp::*;
    use Category::{Composite, Native};

    let mut rows = Vec::new();
    let mut row = |lhs, rhs, ops: &[BinaryOp], entry: OperatorEntry| {
        for op in ops {
            rows.push((OperatorKey::Binary(lhs, rhs, *op), entry));
        }
    };

    row(Native, Native, &[Add, Sub, Mul, Div], binary("scalar_arithmetic", scalar_arithmetic));
    row(Native, Native, &[Rem], OperatorEntry::NoNative);
    row(Native, Native, &[Eq, Ne, Lt, Le, Gt, Ge], binary("scalar_compare", scalar_compare));
    row(Native, Native, &[BitAnd, BitOr, BitXor], binary("scalar_bitwise", scalar_bitwise));
    row(Native, Native, &[Shl, Shr], binary("scalar_shift", scalar_shift));

    row(Composite, Composite, &[Add, Sub], binary("composite_add_sub", composite_add_sub));
    row(Composite, Composite, &[Eq, Ne], binary("composite_equality", composite_equality));
    row(
        Composite,
        Composite,
        &[Mul, Div, Rem, Lt, Le, Gt, Ge, BitAnd, BitOr, BitXor, Shl, Shr],
        OperatorEntry::NoNative,
    );

    for (lhs, rhs) in [(Composite, Native), (Native, Composite)] {
        row(lhs, rhs, &[Mul], binary("composite_scale", composite_scale));
        row(
            lhs,
            rhs,
            &[Add, Sub, Div, Rem, Eq, Ne, Lt, Le, Gt, Ge, BitAnd, BitOr, BitXor, Shl, Shr],
            OperatorEntry::NoNative,
        );
    }

    for op in UnaryOp::ALL {
        rows.push((OperatorKey::Unary(Native, op), unary("scalar_unary", scalar_unary)));
    }
    rows.push((
        OperatorKey::Unary(Composite, UnaryOp::Neg),
        unary("composite_neg", composite_neg),
    ));
    rows.push((OperatorKey::Unary(Composite, UnaryOp::Not), OperatorEntry::NoNative));
    rows.push((OperatorKey::Unary(Composite, UnaryOp::BitNot), OperatorEntry::NoNative));
    rows
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

pub(crate) fn apply_binary(
    ctx: &mut FunctionContext<'_, '_>,
    op: BinaryOp,
    lhs: RefId,
    rhs: RefId,
) -> Result<RefId, CompileError> {
    let key = OperatorKey::Binary(ctx.category(lhs)?, ctx.category(rhs)?, op);
    let registry = ctx.registry;
    match registry.lookup(key) {
        Ok(NativeRoutine {
            name,
            emit: Emitter::Binary(emit),
        }) => {
            if let Some(result) = emit(ctx, op, lhs, rhs)? {
                ctx.counters.native_operators += 1;
                return Ok(result);
            }
            tracing::trace!(routine = name, %key, "native routine declined operands");
        }
        Ok(routine) => {
            return Err(CompileError::InvalidOperatorTable(format!(
                "`{}` is not a binary routine",
                routine.name
            )));
        }
        Err(err) if err.recovery() == Recovery::Expression => {
            tracing::debug!(%err, "operator lowered as runtime call");
        }
        Err(err) => return Err(err),
    }
    fallback_binary(ctx, op, lhs, rhs)
}

pub(crate) fn apply_unary(
    ctx: &mut FunctionContext<'_, '_>,
    op: UnaryOp,
    src: RefId,
) -> Result<RefId, CompileError> {
    let key = OperatorKey::Unary(ctx.category(src)?, op);
    let registry = ctx.registry;
    match registry.lookup(key) {
        Ok(NativeRoutine {
            name,
            emit: Emitter::Unary(emit),
        }) => {
            if let Some(result) = emit(ctx, op, src)? {
                ctx.counters.native_operators += 1;
                return Ok(result);
            }
            tracing::trace!(routine = name, %key, "native routine declined operand");
        }
        Ok(routine) => {
            return Err(CompileError::InvalidOperatorTable(format!(
                "`{}` is not a unary routine",
                routine.name
            )));
        }
        Err(err) if err.recovery() == Recovery::Expression => {
            tracing::debug!(%err, "operator lowered as runtime call");
        }
        Err(err) => return Err(err),
    }
    fallback_unary(ctx, op, src)
}

fn fallback_binary(
    ctx: &mut FunctionContext<'_, '_>,
    op: BinaryOp,
    lhs: RefId,
    rhs: RefId,
) -> Result<RefId, CompileError> {
    let left = ctx.materialize_object(lhs)?;
    let right = ctx.materialize_object(rhs)?;
    let (result, object) = ctx.new_slot_value(HostTypeId::VARIANT)?;
    let code = ctx.builder.ins().iconst(CODE, i64::from(op.code()));
    let instance = ctx.params.instance;
    ctx.builder
        .ins()
        .call(ctx.helpers.evaluate_binary, &[instance, code, left, right, object]);
    ctx.mark_written(result, true)?;
    ctx.counters.fallback_operators += 1;
    Ok(result)
}

fn fallback_unary(ctx: &mut FunctionContext<'_, '_>, op: UnaryOp, src: RefId) -> Result<RefId, CompileError> {
    let operand = ctx.materialize_object(src)?;
    let (result, object) = ctx.new_slot_value(HostTypeId::VARIANT)?;
    let code = ctx.builder.ins().iconst(CODE, i64::from(op.code()));
    let instance = ctx.params.instance;
    ctx.builder
        .ins()
        .call(ctx.helpers.evaluate_unary, &[instance, code, operand, object]);
    ctx.mark_written(result, true)?;
    ctx.counters.fallback_operators += 1;
    Ok(result)
}

// ---------------------------------------------------------------------------
// Scalar routines
// ---------------------------------------------------------------------------

fn scalar_kind(ctx: &FunctionContext<'_, '_>, id: RefId) -> Result<ScalarKind, CompileError> {
    ctx.scalar_of(id)?
        .ok_or_else(|| CompileError::unsupported("native operand without a scalar kind"))
}

/// Both operands at the common working width: float if either is a float,
/// otherwise int (bools widen to 0/1).
fn promote(
    ctx: &mut FunctionContext<'_, '_>,
    lhs: RefId,
    rhs: RefId,
    work: ScalarKind,
) -> Result<(ir::Value, ir::Value), CompileError> {
    let a = ctx.get_native(lhs)?;
    let a = ctx.cast_native(a, work).value;
    let b = ctx.get_native(rhs)?;
    let b = ctx.cast_native(b, work).value;
    Ok((a, b))
}

fn working_kind(ctx: &FunctionContext<'_, '_>, lhs: RefId, rhs: RefId) -> Result<ScalarKind, CompileError> {
    if scalar_kind(ctx, lhs)?.is_float() || scalar_kind(ctx, rhs)?.is_float() {
        Ok(ScalarKind::Float64)
    } else {
        Ok(ScalarKind::Int64)
    }
}

fn native_result(ctx: &mut FunctionContext<'_, '_>, value: ir::Value, kind: ScalarKind) -> RefId {
    let ty = match kind {
        ScalarKind::Bool => HostTypeId::BOOL,
        ScalarKind::Float32 | ScalarKind::Float64 => HostTypeId::FLOAT,
        ScalarKind::Int32 | ScalarKind::Int64 => HostTypeId::INT,
    };
    ctx.insert(ValueRef::native(None, ty, NativeHandle { value, kind }))
}

fn scalar_arithmetic(ctx: &mut FunctionContext<'_, '_>, op: BinaryOp, lhs: RefId, rhs: RefId) -> Emitted {
    let work = working_kind(ctx, lhs, rhs)?;
    let float = work == ScalarKind::Float64;
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {}
        BinaryOp::Div if float => {}
        _ => return Ok(None),
    }
    let (a, b) = promote(ctx, lhs, rhs, work)?;
    let ins = ctx.builder.ins();
    let value = match (op, float) {
        (BinaryOp::Add, false) => ins.iadd(a, b),
        (BinaryOp::Sub, false) => ins.isub(a, b),
        (BinaryOp::Mul, false) => ins.imul(a, b),
        (BinaryOp::Add, true) => ins.fadd(a, b),
        (BinaryOp::Sub, true) => ins.fsub(a, b),
        (BinaryOp::Mul, true) => ins.fmul(a, b),
        _ => ins.fdiv(a, b),
    };
    Ok(Some(native_result(ctx, value, work)))
}

fn scalar_compare(ctx: &mut FunctionContext<'_, '_>, op: BinaryOp, lhs: RefId, rhs: RefId) -> Emitted {
    if !op.is_comparison() {
        return Ok(None);
    }
    let work = working_kind(ctx, lhs, rhs)?;
    let (a, b) = promote(ctx, lhs, rhs, work)?;
    let value = if work == ScalarKind::Float64 {
        let cc = match op {
            BinaryOp::Eq => FloatCC::Equal,
            BinaryOp::Ne => FloatCC::NotEqual,
            BinaryOp::Lt => FloatCC::LessThan,
            BinaryOp::Le => FloatCC::LessThanOrEqual,
            BinaryOp::Gt => FloatCC::GreaterThan,
            _ => FloatCC::GreaterThanOrEqual,
        };
        ctx.builder.ins().fcmp(cc, a, b)
    } else {
        let cc = match op {
            BinaryOp::Eq => IntCC::Equal,
            BinaryOp::Ne => IntCC::NotEqual,
            BinaryOp::Lt => IntCC::SignedLessThan,
            BinaryOp::Le => IntCC::SignedLessThanOrEqual,
            BinaryOp::Gt => IntCC::SignedGreaterThan,
            _ => IntCC::SignedGreaterThanOrEqual,
        };
        ctx.builder.ins().icmp(cc, a, b)
    };
    Ok(Some(native_result(ctx, value, ScalarKind::Bool)))
}

fn scalar_bitwise(ctx: &mut FunctionContext<'_, '_>, op: BinaryOp, lhs: RefId, rhs: RefId) -> Emitted {
    if working_kind(ctx, lhs, rhs)? == ScalarKind::Float64 || !op.is_bitwise() {
        return Ok(None);
    }
    let both_bool = scalar_kind(ctx, lhs)? == ScalarKind::Bool && scalar_kind(ctx, rhs)? == ScalarKind::Bool;
    let work = if both_bool { ScalarKind::Bool } else { ScalarKind::Int64 };
    let (a, b) = promote(ctx, lhs, rhs, work)?;
    let ins = ctx.builder.ins();
    let value = match op {
        BinaryOp::BitAnd => ins.band(a, b),
        BinaryOp::BitOr => ins.bor(a, b),
        _ => ins.bxor(a, b),
    };
    Ok(Some(native_result(ctx, value, work)))
}

fn scalar_shift(ctx: &mut FunctionContext<'_, '_>, op: BinaryOp, lhs: RefId, rhs: RefId) -> Emitted {
    if working_kind(ctx, lhs, rhs)? == ScalarKind::Float64 {
        return Ok(None);
    }
    let (a, b) = promote(ctx, lhs, rhs, ScalarKind::Int64)?;
    let value = match op {
        BinaryOp::Shl => ctx.builder.ins().ishl(a, b),
        BinaryOp::Shr => ctx.builder.ins().sshr(a, b),
        _ => return Ok(None),
    };
    Ok(Some(native_result(ctx, value, ScalarKind::Int64)))
}

fn scalar_unary(ctx: &mut FunctionContext<'_, '_>, op: UnaryOp, src: RefId) -> Emitted {
    let kind = scalar_kind(ctx, src)?;
    if op == UnaryOp::BitNot && kind.is_float() {
        return Ok(None);
    }
    let handle = ctx.get_native(src)?;
    let (value, kind) = match op {
        UnaryOp::Neg if kind.is_float() => (ctx.builder.ins().fneg(handle.value), ScalarKind::Float64),
        UnaryOp::Neg => {
            let x = ctx.cast_native(handle, ScalarKind::Int64).value;
            (ctx.builder.ins().ineg(x), ScalarKind::Int64)
        }
        UnaryOp::Not if kind.is_float() => {
            let zero = ctx.builder.ins().f64const(0.0);
            (ctx.builder.ins().fcmp(FloatCC::Equal, handle.value, zero), ScalarKind::Bool)
        }
        UnaryOp::Not => {
            let x = ctx.cast_native(handle, ScalarKind::Int64).value;
            (ctx.builder.ins().icmp_imm(IntCC::Equal, x, 0), ScalarKind::Bool)
        }
        UnaryOp::BitNot => {
            let x = ctx.cast_native(handle, ScalarKind::Int64).value;
            (ctx.builder.ins().bnot(x), ScalarKind::Int64)
        }
    };
    Ok(Some(native_result(ctx, value, kind)))
}

// ---------------------------------------------------------------------------
// Composite routines
// ---------------------------------------------------------------------------

/// Scalar kind shared by every leaf of a flat composite.
fn uniform_leaf_kind(leaves: &[(u32, ScalarKind)]) -> Option<ScalarKind> {
    let (_, first) = leaves.first()?;
    leaves.iter().all(|(_, kind)| kind == first).then_some(*first)
}

fn composite_add_sub(ctx: &mut FunctionContext<'_, '_>, op: BinaryOp, lhs: RefId, rhs: RefId) -> Emitted {
    let ty = ctx.get(lhs)?.ty;
    if ty != ctx.get(rhs)?.ty || !ctx.catalog.is_flat(ty) {
        return Ok(None);
    }
    let leaves = ctx.catalog.leaves(ty)?;
    let a = ctx.materialize_data(lhs)?;
    let b = ctx.materialize_data(rhs)?;
    let (result, object) = ctx.new_slot_value(ty)?;
    let out = data_of(object);
    for (offset, kind) in leaves {
        let x = ctx.load_scalar(a.at(offset), kind).value;
        let y = ctx.load_scalar(b.at(offset), kind).value;
        let ins = ctx.builder.ins();
        let value = match (op, kind.is_float()) {
            (BinaryOp::Add, true) => ins.fadd(x, y),
            (BinaryOp::Add, false) => ins.iadd(x, y),
            (_, true) => ins.fsub(x, y),
            (_, false) => ins.isub(x, y),
        };
        ctx.store_scalar(out.at(offset), NativeHandle { value, kind });
    }
    ctx.mark_written(result, false)?;
    Ok(Some(result))
}

fn composite_equality(ctx: &mut FunctionContext<'_, '_>, op: BinaryOp, lhs: RefId, rhs: RefId) -> Emitted {
    let ty = ctx.get(lhs)?.ty;
    if ty != ctx.get(rhs)?.ty {
        return Ok(None);
    }
    let leaves = ctx.catalog.leaves(ty)?;
    let a = ctx.materialize_data(lhs)?;
    let b = ctx.materialize_data(rhs)?;
    let mut all: Option<ir::Value> = None;
    for (offset, kind) in leaves {
        let x = ctx.load_scalar(a.at(offset), kind).value;
        let y = ctx.load_scalar(b.at(offset), kind).value;
        let eq = if kind.is_float() {
            ctx.builder.ins().fcmp(FloatCC::Equal, x, y)
        } else {
            ctx.builder.ins().icmp(IntCC::Equal, x, y)
        };
        all = Some(match all {
            Some(previous) => ctx.builder.ins().band(previous, eq),
            None => eq,
        });
    }
    let Some(equal) = all else {
        return Ok(None);
    };
    let value = match op {
        BinaryOp::Ne => ctx.builder.ins().bxor_imm(equal, 1),
        _ => equal,
    };
    Ok(Some(native_result(ctx, value, ScalarKind::Bool)))
}

fn composite_scale(ctx: &mut FunctionContext<'_, '_>, op: BinaryOp, lhs: RefId, rhs: RefId) -> Emitted {
    let (vector, scalar) = match (ctx.category(lhs)?, ctx.category(rhs)?) {
        (Category::Composite, Category::Native) => (lhs, rhs),
        (Category::Native, Category::Composite) => (rhs, lhs),
        _ => return Ok(None),
    };
    let ty = ctx.get(vector)?.ty;
    let scalar_kind = scalar_kind(ctx, scalar)?;
    if op != BinaryOp::Mul || scalar_kind == ScalarKind::Bool || !ctx.catalog.is_flat(ty) {
        return Ok(None);
    }
    let leaves = ctx.catalog.leaves(ty)?;
    let Some(leaf_kind) = uniform_leaf_kind(&leaves) else {
        return Ok(None);
    };

    let factor = match (leaf_kind, scalar_kind.is_float()) {
        (ScalarKind::Float32, true) => {
            let s = ctx.get_native(scalar)?;
            ctx.cast_native(s, ScalarKind::Float32).value
        }
        (ScalarKind::Float32, false) => {
            // Straight to f32 so the int rounds once.
            let s = ctx.get_native(scalar)?.value;
            ctx.builder.ins().fcvt_from_sint(types::F32, s)
        }
        (ScalarKind::Int32, false) => {
            let s = ctx.get_native(scalar)?;
            ctx.cast_native(s, ScalarKind::Int32).value
        }
        _ => return Ok(None),
    };

    let from = ctx.materialize_data(vector)?;
    let (result, object) = ctx.new_slot_value(ty)?;
    let out = data_of(object);
    for (offset, kind) in leaves {
        let x = ctx.load_scalar(from.at(offset), kind).value;
        let value = if kind.is_float() {
            ctx.builder.ins().fmul(x, factor)
        } else {
            ctx.builder.ins().imul(x, factor)
        };
        ctx.store_scalar(out.at(offset), NativeHandle { value, kind });
    }
    ctx.mark_written(result, false)?;
    Ok(Some(result))
}

fn composite_neg(ctx: &mut FunctionContext<'_, '_>, op: UnaryOp, src: RefId) -> Emitted {
    let ty = ctx.get(src)?.ty;
    if op != UnaryOp::Neg || !ctx.catalog.is_flat(ty) {
        return Ok(None);
    }
    let leaves = ctx.catalog.leaves(ty)?;
    let from = ctx.materialize_data(src)?;
    let (result, object) = ctx.new_slot_value(ty)?;
    let out = data_of(object);
    for (offset, kind) in leaves {
        let x = ctx.load_scalar(from.at(offset), kind).value;
        let value = if kind.is_float() {
            ctx.builder.ins().fneg(x)
        } else {
            ctx.builder.ins().ineg(x)
        };
        ctx.store_scalar(out.at(offset), NativeHandle { value, kind });
    }
    ctx.mark_written(result, false)?;
    Ok(Some(result))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::testing::with_context;
    use crate::ir::{ConstValue, FunctionIrBuilder};
    use kiln_runtime::Vector2;

    #[test]
    fn standard_table_is_complete() {
        let registry = OperatorRegistry::standard().unwrap();
        for lhs in SCALAR_CATEGORIES {
            for rhs in SCALAR_CATEGORIES {
                for op in BinaryOp::ALL {
                    assert!(registry.entry(OperatorKey::Binary(lhs, rhs, op)).is_some());
                }
            }
        }
        assert_eq!(
            registry.lookup_binary(Category::Native, Category::Native, BinaryOp::Mul).unwrap().name,
            "scalar_arithmetic"
        );
    }

    #[test]
    fn opaque_operands_never_resolve_natively() {
        let registry = OperatorRegistry::standard().unwrap();
        for op in BinaryOp::ALL {
            let err = registry
                .lookup_binary(Category::Opaque, Category::Native, op)
                .unwrap_err();
            assert_eq!(err.recovery(), Recovery::Expression);
        }
        assert!(registry.lookup_unary(Category::Opaque, UnaryOp::Neg).is_err());
    }

    #[test]
    fn remainder_has_no_native_form() {
        let registry = OperatorRegistry::standard().unwrap();
        assert!(matches!(
            registry.entry(OperatorKey::Binary(Category::Native, Category::Native, BinaryOp::Rem)),
            Some(OperatorEntry::NoNative)
        ));
    }

    #[test]
    fn native_routines_on_opaque_keys_are_rejected() {
        let mut rows = standard_rows();
        rows.push((
            OperatorKey::Binary(Category::Opaque, Category::Opaque, BinaryOp::Add),
            binary("bogus", scalar_arithmetic),
        ));
        assert!(matches!(
            OperatorRegistry::build(rows),
            Err(CompileError::InvalidOperatorTable(_))
        ));
    }

    #[test]
    fn duplicate_and_missing_rows_are_rejected() {
        let mut rows = standard_rows();
        rows.push(rows[0]);
        assert!(OperatorRegistry::build(rows).is_err());

        let rows: Vec<_> = standard_rows()
            .into_iter()
            .filter(|(key, _)| *key != OperatorKey::Unary(Category::Native, UnaryOp::Not))
            .collect();
        let err = OperatorRegistry::build(rows).unwrap_err();
        assert_eq!(err.recovery(), Recovery::Fatal);
    }

    #[test]
    fn int_times_float_is_native() {
        let mut b = FunctionIrBuilder::new("f");
        let two = b.constant(ConstValue::Int(2));
        let half = b.constant(ConstValue::Float(2.5));
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let lhs = ctx.resolve(two).unwrap();
            let rhs = ctx.resolve(half).unwrap();
            let product = apply_binary(ctx, BinaryOp::Mul, lhs, rhs).unwrap();
            assert_eq!(ctx.get(product).unwrap().ty, HostTypeId::FLOAT);
            let stats = ctx.stats();
            assert_eq!(stats.native_operators, 1);
            assert_eq!(stats.fallback_operators, 0);
            assert_eq!(stats.slots_allocated, 0);
        });
    }

    #[test]
    fn integer_division_goes_through_the_runtime() {
        let mut b = FunctionIrBuilder::new("f");
        let seven = b.constant(ConstValue::Int(7));
        let two = b.constant(ConstValue::Int(2));
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let lhs = ctx.resolve(seven).unwrap();
            let rhs = ctx.resolve(two).unwrap();
            let quotient = apply_binary(ctx, BinaryOp::Div, lhs, rhs).unwrap();
            assert_eq!(ctx.get(quotient).unwrap().ty, HostTypeId::VARIANT);
            assert_eq!(ctx.stats().fallback_operators, 1);
        });
    }

    #[test]
    fn strings_fall_back() {
        let mut b = FunctionIrBuilder::new("f");
        let s = b.constant(ConstValue::String("a".into()));
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let id = ctx.resolve(s).unwrap();
            apply_binary(ctx, BinaryOp::Add, id, id).unwrap();
            assert_eq!(ctx.stats().fallback_operators, 1);
        });
    }

    #[test]
    fn vector_scaling_is_native_but_bool_scaling_is_not() {
        let mut b = FunctionIrBuilder::new("f");
        let v = b.constant(ConstValue::Vector2(Vector2::new(1.0, 2.0)));
        let k = b.constant(ConstValue::Int(3));
        let yes = b.constant(ConstValue::Bool(true));
        let ir = b.finish();
        with_context(&ir, |ctx| {
            let v = ctx.resolve(v).unwrap();
            let k = ctx.resolve(k).unwrap();
            let yes = ctx.resolve(yes).unwrap();
            let scaled = apply_binary(ctx, BinaryOp::Mul, k, v).unwrap();
            assert_eq!(ctx.get(scaled).unwrap().ty, HostTypeId::VECTOR2);
            apply_binary(ctx, BinaryOp::Mul, v, yes).unwrap();
            let stats = ctx.stats();
            assert_eq!(stats.native_operators, 1);
            assert_eq!(stats.fallback_operators, 1);
        });
    }
}

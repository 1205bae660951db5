//! Per-function value tracking.
//!
//! Every live value has a [`ValueRef`] recording which representations hold
//! it: a native SSA handle, a boxed object in memory, or both. Memory is only
//! written when a value must be addressable (runtime calls, field storage,
//! return), and the tag word only when a whole boxed object is needed.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{self, types, InstBuilder, MemFlags, SigRef, Signature};
use cranelift_frontend::FunctionBuilder;
use kiln_runtime::{HostTypeId, ScalarKind, BOXED_SIZE, DATA_OFFSET, TAG_OFFSET};
use rustc_hash::FxHashMap;

use crate::abi::{HelperRefs, CODE, PTR};
use crate::catalog::{Category, TypeCatalog, TypeDescriptor};
use crate::config::JitConfig;
use crate::dispatch::OperatorRegistry;
use crate::error::CompileError;
use crate::ir::{Address, ConstValue, FunctionIr};
use crate::liveness::Liveness;
use crate::slots::{SlotAllocator, SlotGrant};
use crate::stats::FrameStats;
use crate::value::{
    canonical_kind, clif_type, DataPointer, Home, NativeHandle, RefId, ScalarOrComposite, ValueRef,
};

/// Block parameters of the entry convention.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryParams {
    pub(crate) instance: ir::Value,
    pub(crate) members: ir::Value,
    pub(crate) constants: ir::Value,
    pub(crate) args: ir::Value,
    pub(crate) ret: ir::Value,
}

/// All state for compiling one function.
pub(crate) struct FunctionContext<'a, 'f> {
    pub(crate) builder: FunctionBuilder<'f>,
    pub(crate) ir: &'a FunctionIr,
    pub(crate) catalog: &'a TypeCatalog,
    pub(crate) registry: &'a OperatorRegistry,
    pub(crate) helpers: HelperRefs,
    pub(crate) slots: SlotAllocator,
    pub(crate) params: EntryParams,
    pub(crate) counters: FrameStats,
    pub(crate) liveness: &'a Liveness,
    pub(crate) call_names: Vec<Box<str>>,
    pub(crate) terminated: bool,
    refs: Vec<Option<ValueRef>>,
    bindings: FxHashMap<Address, RefId>,
    shared: Vec<RefId>,
    entry_sig: Signature,
    entry_sig_ref: Option<SigRef>,
}

/// Memory flags for accesses the engine knows are in bounds and aligned.
pub(crate) fn trusted() -> MemFlags {
    MemFlags::trusted()
}

impl<'a, 'f> FunctionContext<'a, 'f> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mut builder: FunctionBuilder<'f>,
        ir: &'a FunctionIr,
        catalog: &'a TypeCatalog,
        registry: &'a OperatorRegistry,
        helpers: HelperRefs,
        config: &JitConfig,
        liveness: &'a Liveness,
        entry_sig: Signature,
    ) -> Self {
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let block_params = builder.block_params(entry).to_vec();
        let params = EntryParams {
            instance: block_params[0],
            members: block_params[1],
            constants: block_params[2],
            args: block_params[3],
            ret: block_params[5],
        };

        Self {
            builder,
            ir,
            catalog,
            registry,
            helpers,
            slots: SlotAllocator::new(config),
            params,
            counters: FrameStats::default(),
            liveness,
            call_names: Vec::new(),
            terminated: false,
            refs: Vec::new(),
            bindings: FxHashMap::default(),
            shared: Vec::new(),
            entry_sig,
            entry_sig_ref: None,
        }
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    pub(crate) fn get(&self, id: RefId) -> Result<&ValueRef, CompileError> {
        self.refs
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| CompileError::unsupported(format!("value #{} used after release", id.0)))
    }

    pub(crate) fn get_mut(&mut self, id: RefId) -> Result<&mut ValueRef, CompileError> {
        self.refs
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| CompileError::unsupported(format!("value #{} used after release", id.0)))
    }

    pub(crate) fn insert(&mut self, value: ValueRef) -> RefId {
        let id = RefId(self.refs.len() as u32);
        self.refs.push(Some(value));
        id
    }

    pub(crate) fn descriptor(&self, id: RefId) -> Result<&'a TypeDescriptor, CompileError> {
        let catalog = self.catalog;
        catalog.describe(self.get(id)?.ty)
    }

    pub(crate) fn category(&self, id: RefId) -> Result<Category, CompileError> {
        Ok(self.descriptor(id)?.category)
    }

    pub(crate) fn scalar_of(&self, id: RefId) -> Result<Option<ScalarKind>, CompileError> {
        Ok(self.descriptor(id)?.scalar)
    }

    pub(crate) fn binding(&self, address: Address) -> Option<RefId> {
        self.bindings.get(&address).copied()
    }

    pub(crate) fn unbind(&mut self, address: Address) -> Option<RefId> {
        self.bindings.remove(&address)
    }

    /// Bind `id` to `address`, releasing whatever was bound there before.
    pub(crate) fn rebind(&mut self, address: Address, id: RefId) -> Result<(), CompileError> {
        self.get_mut(id)?.address = Some(address);
        if let Some(old) = self.bindings.insert(address, id) {
            if old != id {
                self.release(old)?;
            }
        }
        Ok(())
    }

    /// Declared type of an address; temporaries have none.
    pub(crate) fn declared_type(&self, address: Address) -> Result<Option<HostTypeId>, CompileError> {
        let ir = self.ir;
        let malformed = || CompileError::unsupported(format!("{address} is out of range"));
        let ty = match address {
            Address::Constant(i) => ir.constants.get(i as usize).map(ConstValue::ty),
            Address::Local(i) => ir.locals.get(i as usize).copied(),
            Address::Argument(i) => ir.params.get(i as usize).copied(),
            Address::Member(i) => ir.members.get(i as usize).copied(),
            Address::External(i) => ir.externals.get(i as usize).map(|external| external.ty),
            Address::Temp(_) => return Ok(None),
        };
        let ty = ty.ok_or_else(malformed)?;
        let descriptor = self.catalog.describe(ty)?;
        if descriptor.tag.is_none() && ty != HostTypeId::VARIANT {
            return Err(CompileError::unsupported(format!(
                "{address} declared with field-only type `{}`",
                descriptor.name
            )));
        }
        Ok(Some(ty))
    }

    pub(crate) fn stats(&self) -> FrameStats {
        let slots = self.slots.stats();
        FrameStats {
            slots_allocated: slots.slots_allocated,
            slot_reuses: slots.slot_reuses,
            argument_arrays: slots.argument_arrays,
            frame_bytes: slots.frame_bytes,
            ..self.counters
        }
    }

    /// Seal the function and hand back its statistics and interned call names.
    pub(crate) fn finish(self) -> (FrameStats, Vec<Box<str>>) {
        let stats = self.stats();
        self.builder.finalize();
        (stats, self.call_names)
    }

    pub(crate) fn entry_sig_ref(&mut self) -> SigRef {
        match self.entry_sig_ref {
            Some(sig_ref) => sig_ref,
            None => {
                let sig_ref = self.builder.import_signature(self.entry_sig.clone());
                self.entry_sig_ref = Some(sig_ref);
                sig_ref
            }
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    fn load_pointer(&mut self, array: ir::Value, index: u32) -> ir::Value {
        self.builder
            .ins()
            .load(PTR, trusted().with_readonly(), array, (index * 8) as i32)
    }

    /// The live value for `address`, creating it on first reference.
    pub(crate) fn resolve(&mut self, address: Address) -> Result<RefId, CompileError> {
        if let Some(id) = self.binding(address) {
            return Ok(id);
        }
        let ty = self
            .declared_type(address)?
            .ok_or_else(|| CompileError::unsupported(format!("{address} read before assignment")))?;

        let value = match address {
            Address::Constant(i) => {
                let ir = self.ir;
                let constant = &ir.constants[i as usize];
                let object = self.load_pointer(self.params.constants, i);
                let mut value = ValueRef::new(
                    Some(address),
                    ty,
                    Home::Borrowed {
                        object,
                        writable: false,
                    },
                );
                value.native = self.immediate(constant);
                value
            }
            Address::Argument(i) => {
                let object = self.load_pointer(self.params.args, i);
                ValueRef::new(
                    Some(address),
                    ty,
                    Home::Borrowed {
                        object,
                        writable: false,
                    },
                )
            }
            Address::Member(i) => {
                let object = self.load_pointer(self.params.members, i);
                ValueRef::new(
                    Some(address),
                    ty,
                    Home::Borrowed {
                        object,
                        writable: true,
                    },
                )
            }
            Address::External(i) => {
                let pointer = self.ir.externals[i as usize].pointer as i64;
                let object = self.builder.ins().iconst(PTR, pointer);
                ValueRef::new(
                    Some(address),
                    ty,
                    Home::Borrowed {
                        object,
                        writable: true,
                    },
                )
            }
            Address::Local(_) | Address::Temp(_) => {
                return Err(CompileError::unsupported(format!("{address} read before assignment")));
            }
        };

        let id = self.insert(value);
        self.bindings.insert(address, id);
        if address.is_shared() {
            self.shared.push(id);
        }
        Ok(id)
    }

    fn immediate(&mut self, constant: &ConstValue) -> Option<NativeHandle> {
        let ins = self.builder.ins();
        let (value, kind) = match constant {
            ConstValue::Bool(b) => (ins.iconst(types::I8, i64::from(*b)), ScalarKind::Bool),
            ConstValue::Int(i) => (ins.iconst(types::I64, *i), ScalarKind::Int64),
            ConstValue::Float(x) => (ins.f64const(*x), ScalarKind::Float64),
            _ => return None,
        };
        Some(NativeHandle { value, kind })
    }

    // -----------------------------------------------------------------------
    // Native representation
    // -----------------------------------------------------------------------

    /// Numeric conversion between scalar widths and kinds. No code is emitted
    /// when the kinds already agree.
    pub(crate) fn cast_native(&mut self, handle: NativeHandle, target: ScalarKind) -> NativeHandle {
        if handle.kind == target {
            return handle;
        }
        let ins = self.builder.ins();
        let (wide, wide_kind) = match handle.kind {
            ScalarKind::Int32 => (ins.sextend(types::I64, handle.value), ScalarKind::Int64),
            ScalarKind::Float32 => (ins.fpromote(types::F64, handle.value), ScalarKind::Float64),
            kind => (handle.value, kind),
        };

        let converted = match (wide_kind, canonical_kind(target)) {
            (ScalarKind::Bool, ScalarKind::Int64) => self.builder.ins().uextend(types::I64, wide),
            (ScalarKind::Bool, ScalarKind::Float64) => {
                let int = self.builder.ins().uextend(types::I64, wide);
                self.builder.ins().fcvt_from_sint(types::F64, int)
            }
            (ScalarKind::Int64, ScalarKind::Bool) => self.builder.ins().icmp_imm(IntCC::NotEqual, wide, 0),
            (ScalarKind::Int64, ScalarKind::Float64) => self.builder.ins().fcvt_from_sint(types::F64, wide),
            (ScalarKind::Float64, ScalarKind::Bool) => {
                let zero = self.builder.ins().f64const(0.0);
                self.builder.ins().fcmp(FloatCC::NotEqual, wide, zero)
            }
            (ScalarKind::Float64, ScalarKind::Int64) => self.builder.ins().fcvt_to_sint_sat(types::I64, wide),
            _ => wide,
        };

        let value = match target {
            ScalarKind::Int32 => self.builder.ins().ireduce(types::I32, converted),
            ScalarKind::Float32 => self.builder.ins().fdemote(types::F32, converted),
            _ => converted,
        };
        NativeHandle { value, kind: target }
    }

    pub(crate) fn load_scalar(&mut self, at: DataPointer, kind: ScalarKind) -> NativeHandle {
        let value = self
            .builder
            .ins()
            .load(clif_type(kind), trusted(), at.base, at.offset);
        NativeHandle { value, kind }
    }

    pub(crate) fn store_scalar(&mut self, at: DataPointer, handle: NativeHandle) {
        self.builder
            .ins()
            .store(trusted(), handle.value, at.base, at.offset);
    }

    /// The value as a native handle at its canonical width.
    pub(crate) fn get_native(&mut self, id: RefId) -> Result<NativeHandle, CompileError> {
        let value = self.get(id)?;
        if let Some(handle) = value.native {
            return Ok(handle);
        }
        let descriptor = self.descriptor(id)?;
        let kind = descriptor.scalar.ok_or_else(|| {
            CompileError::unsupported(format!("`{}` has no native representation", descriptor.name))
        })?;
        let value = self.get(id)?;
        if !value.memory_current {
            return Err(CompileError::unsupported("value has no current representation"));
        }
        let (at, storage) = match value.home {
            Home::Slot { object, .. } | Home::Borrowed { object, .. } => (data_of(object), kind),
            Home::Field {
                data,
                storage: ScalarOrComposite::Scalar(storage),
                ..
            } => (data, storage),
            Home::Unassigned
            | Home::Field {
                storage: ScalarOrComposite::Composite,
                ..
            } => return Err(CompileError::unsupported("scalar value without storage")),
        };
        let raw = self.load_scalar(at, storage);
        let handle = self.cast_native(raw, kind);
        self.get_mut(id)?.native = Some(handle);
        Ok(handle)
    }

    /// Replace the value with `handle`. Memory becomes stale; nothing is
    /// written until the value is materialized.
    pub(crate) fn set_native(&mut self, id: RefId, handle: NativeHandle) -> Result<(), CompileError> {
        let descriptor = self.descriptor(id)?;
        let kind = descriptor.scalar.ok_or_else(|| {
            CompileError::unsupported(format!("`{}` has no native representation", descriptor.name))
        })?;
        let handle = self.cast_native(handle, kind);
        self.unlink(id)?;
        let value = self.get_mut(id)?;
        if matches!(
            value.home,
            Home::Field { .. } | Home::Borrowed { writable: false, .. }
        ) {
            value.home = Home::Unassigned;
        }
        value.native = Some(handle);
        value.memory_current = false;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Materialization
    // -----------------------------------------------------------------------

    /// Give the value a fresh frame slot. Its tag and data are stale.
    pub(crate) fn assign_slot(&mut self, id: RefId) -> Result<ir::Value, CompileError> {
        let grant = self.slots.allocate(&mut self.builder)?;
        if let SlotGrant::Reused(_) = grant {
            tracing::trace!(value = id.0, "value slot reused");
        }
        let slot = self.slots.stack_slot(grant.id());
        let object = self.builder.ins().stack_addr(PTR, slot, 0);
        let value = self.get_mut(id)?;
        value.home = Home::Slot {
            id: grant.id(),
            object,
        };
        value.memory_current = false;
        value.tag_current = false;
        Ok(object)
    }

    /// A fresh value of type `ty` with its own slot.
    pub(crate) fn new_slot_value(&mut self, ty: HostTypeId) -> Result<(RefId, ir::Value), CompileError> {
        let id = self.insert(ValueRef::new(None, ty, Home::Unassigned));
        let object = self.assign_slot(id)?;
        Ok((id, object))
    }

    pub(crate) fn mark_written(&mut self, id: RefId, tag_current: bool) -> Result<(), CompileError> {
        let value = self.get_mut(id)?;
        value.native = None;
        value.memory_current = true;
        value.tag_current = tag_current;
        Ok(())
    }

    /// Pointer to the value's current data region, writing a native-only
    /// value into a slot first.
    pub(crate) fn materialize_data(&mut self, id: RefId) -> Result<DataPointer, CompileError> {
        let value = self.get(id)?;
        let home = value.home;
        if value.memory_current {
            match home {
                Home::Slot { object, .. } | Home::Borrowed { object, .. } => return Ok(data_of(object)),
                Home::Field { data, .. } => return Ok(data),
                Home::Unassigned => {}
            }
        }
        let handle = value
            .native
            .ok_or_else(|| CompileError::unsupported("value has no current representation"))?;
        let object = match home {
            Home::Slot { object, .. }
            | Home::Borrowed {
                object,
                writable: true,
            } => object,
            Home::Unassigned | Home::Borrowed { writable: false, .. } | Home::Field { .. } => {
                self.unlink(id)?;
                self.assign_slot(id)?
            }
        };
        let data = data_of(object);
        self.store_canonical(data, handle);
        self.get_mut(id)?.memory_current = true;
        Ok(data)
    }

    /// Write a scalar as a whole data region: the value in the first word
    /// and zeros after it, as the runtime boxes it.
    fn store_canonical(&mut self, data: DataPointer, handle: NativeHandle) {
        let zero = self.builder.ins().iconst(types::I64, 0);
        if clif_type(handle.kind).bytes() >= 8 {
            self.store_scalar(data, handle);
        } else if handle.kind == ScalarKind::Bool && cfg!(target_endian = "little") {
            let value = self.builder.ins().uextend(types::I64, handle.value);
            self.store_scalar(data, NativeHandle { value, kind: ScalarKind::Int64 });
        } else {
            self.builder.ins().store(trusted(), zero, data.base, data.offset);
            self.store_scalar(data, handle);
        }
        let mut offset = 8;
        while offset < BOXED_SIZE - DATA_OFFSET {
            let at = data.at(offset as u32);
            self.builder.ins().store(trusted(), zero, at.base, at.offset);
            offset += 8;
        }
    }

    /// Pointer to a complete boxed value with a current tag.
    pub(crate) fn materialize_object(&mut self, id: RefId) -> Result<ir::Value, CompileError> {
        if let Home::Field { .. } = self.get(id)?.home {
            self.detach(id)?;
        }
        self.materialize_data(id)?;
        let value = self.get(id)?;
        let object = value
            .object()
            .ok_or_else(|| CompileError::unsupported("value has no boxed form"))?;
        if !value.tag_current {
            let descriptor = self.descriptor(id)?;
            let tag = descriptor.tag.ok_or_else(|| {
                CompileError::unsupported(format!("`{}` has no static tag", descriptor.name))
            })?;
            // Tag and reserved word in one store.
            let word = if cfg!(target_endian = "little") {
                i64::from(tag.raw())
            } else {
                i64::from(tag.raw()) << 32
            };
            let word = self.builder.ins().iconst(types::I64, word);
            self.builder
                .ins()
                .store(trusted(), word, object, TAG_OFFSET as i32);
            self.get_mut(id)?.tag_current = true;
        }
        Ok(object)
    }

    // -----------------------------------------------------------------------
    // Copies and aliasing
    // -----------------------------------------------------------------------

    pub(crate) fn copy_bytes(&mut self, from: DataPointer, to: DataPointer, size: u32) {
        let flags = MemFlags::new().with_notrap();
        let mut offset = 0;
        while offset < size {
            let ty = if size - offset >= 8 { types::I64 } else { types::I32 };
            let word = self
                .builder
                .ins()
                .load(ty, flags, from.base, from.offset + offset as i32);
            self.builder
                .ins()
                .store(flags, word, to.base, to.offset + offset as i32);
            offset += ty.bytes();
        }
    }

    pub(crate) fn copy_box(&mut self, from: ir::Value, to: ir::Value) {
        let whole = |base| DataPointer { base, offset: 0 };
        self.copy_bytes(whole(from), whole(to), BOXED_SIZE as u32);
    }

    /// An independent copy of the value.
    pub(crate) fn copy_value(&mut self, id: RefId) -> Result<RefId, CompileError> {
        let descriptor = self.descriptor(id)?;
        if descriptor.scalar.is_some() {
            let handle = self.get_native(id)?;
            return Ok(self.insert(ValueRef::native(None, descriptor.id, handle)));
        }
        if descriptor.category == Category::Composite {
            let from = self.materialize_data(id)?;
            let (copy, object) = self.new_slot_value(descriptor.id)?;
            self.copy_bytes(from, data_of(object), descriptor.size);
            self.mark_written(copy, false)?;
            return Ok(copy);
        }
        let ty = self.get(id)?.ty;
        let from = self.materialize_object(id)?;
        let (copy, object) = self.new_slot_value(ty)?;
        self.copy_box(from, object);
        self.mark_written(copy, true)?;
        Ok(copy)
    }

    /// Remove a field value from its parent's alias list.
    fn unlink(&mut self, id: RefId) -> Result<(), CompileError> {
        if let Home::Field { parent, .. } = self.get(id)?.home {
            if let Some(Some(parent)) = self.refs.get_mut(parent.0 as usize) {
                parent.derived.retain(|derived| *derived != id);
            }
        }
        Ok(())
    }

    /// Snapshot a field value so it no longer aliases its parent.
    pub(crate) fn detach(&mut self, id: RefId) -> Result<(), CompileError> {
        let Home::Field { data, storage, .. } = self.get(id)?.home else {
            return Ok(());
        };
        match storage {
            ScalarOrComposite::Scalar(_) => {
                self.get_native(id)?;
                self.unlink(id)?;
                let value = self.get_mut(id)?;
                value.home = Home::Unassigned;
                value.memory_current = false;
            }
            ScalarOrComposite::Composite => {
                let size = self.descriptor(id)?.size;
                self.unlink(id)?;
                let object = self.assign_slot(id)?;
                self.copy_bytes(data, data_of(object), size);
                self.get_mut(id)?.memory_current = true;
            }
        }
        tracing::trace!(value = id.0, "field value detached");
        Ok(())
    }

    /// Snapshot every field value aliasing `owner` before its memory changes.
    pub(crate) fn detach_derived(&mut self, owner: RefId) -> Result<(), CompileError> {
        let derived = std::mem::take(&mut self.get_mut(owner)?.derived);
        for id in derived {
            self.detach(id)?;
        }
        Ok(())
    }

    /// Move a value out of a read-only borrowed box into its own slot.
    pub(crate) fn rehome(&mut self, id: RefId) -> Result<(), CompileError> {
        let Home::Borrowed {
            object: from,
            writable: false,
        } = self.get(id)?.home
        else {
            return Ok(());
        };
        self.detach_derived(id)?;
        let native = self.get(id)?.native;
        let to = self.assign_slot(id)?;
        self.copy_box(from, to);
        let value = self.get_mut(id)?;
        value.native = native;
        value.memory_current = true;
        value.tag_current = true;
        Ok(())
    }

    pub(crate) fn release(&mut self, id: RefId) -> Result<(), CompileError> {
        if self.get(id).is_err() {
            return Ok(());
        }
        self.detach_derived(id)?;
        self.unlink(id)?;
        if let Some(Some(value)) = self.refs.get_mut(id.0 as usize).map(Option::take) {
            if let Home::Slot { id: slot, .. } = value.home {
                tracing::trace!(address = ?value.address, value = id.0, "slot released");
                self.slots.release(slot);
            }
        }
        Ok(())
    }

    pub(crate) fn release_address(&mut self, address: Address) -> Result<(), CompileError> {
        if address.is_shared() {
            return Ok(());
        }
        if let Some(id) = self.unbind(address) {
            self.release(id)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sync points
    // -----------------------------------------------------------------------

    /// Write dirty members and externals back to their boxes and snapshot
    /// anything aliasing them.
    pub(crate) fn flush_shared(&mut self) -> Result<(), CompileError> {
        for id in self.shared.clone() {
            self.detach_derived(id)?;
            if self.get(id)?.is_dirty() {
                self.materialize_data(id)?;
            }
        }
        Ok(())
    }

    /// After a call the callee may have changed any member or external.
    pub(crate) fn invalidate_shared(&mut self) {
        for id in &self.shared {
            if let Some(Some(value)) = self.refs.get_mut(id.0 as usize) {
                value.native = None;
                value.memory_current = true;
            }
        }
    }

    /// Convert a boxed value to `ty` through the runtime, into a fresh slot.
    /// A failed conversion leaves Nil in the slot and an error on the instance.
    pub(crate) fn convert_boxed(&mut self, id: RefId, ty: HostTypeId) -> Result<RefId, CompileError> {
        let catalog = self.catalog;
        let descriptor = catalog.describe(ty)?;
        let tag = descriptor.tag.ok_or_else(|| {
            CompileError::unsupported(format!("cannot convert to field-only type `{}`", descriptor.name))
        })?;
        let from = self.materialize_object(id)?;
        let (result, to) = self.new_slot_value(ty)?;
        let code = self.builder.ins().iconst(CODE, i64::from(tag.raw()));
        let instance = self.params.instance;
        self.builder
            .ins()
            .call(self.helpers.convert, &[instance, from, code, to]);
        self.mark_written(result, true)?;
        Ok(result)
    }
}

pub(crate) fn data_of(object: ir::Value) -> DataPointer {
    DataPointer {
        base: object,
        offset: DATA_OFFSET as i32,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod testing {
    use cranelift_codegen::ir::{Function, UserFuncName};
    use cranelift_frontend::FunctionBuilderContext;

    use super::*;
    use crate::abi::{declare_helpers, entry_signature};
    use crate::jit_module::create_jit_module;
    use crate::liveness;

    /// Run `test` against a context for `ir` whose function is never finalized.
    pub(crate) fn with_context<R>(ir: &FunctionIr, test: impl FnOnce(&mut FunctionContext<'_, '_>) -> R) -> R {
        let config = JitConfig::default();
        let mut module = create_jit_module(&config).unwrap();
        let helpers = declare_helpers(&mut module).unwrap();
        let catalog = TypeCatalog::global().unwrap();
        let registry = OperatorRegistry::standard().unwrap();
        let liveness = liveness::analyze(ir);
        let signature = entry_signature(&module);
        let mut function = Function::with_name_signature(UserFuncName::user(0, 0), signature.clone());
        let refs = helpers.import_into(&mut module, &mut function);
        let mut builder_context = FunctionBuilderContext::new();
        let builder = FunctionBuilder::new(&mut function, &mut builder_context);
        let mut ctx =
            FunctionContext::new(builder, ir, &catalog, registry, refs, &config, &liveness, signature);
        test(&mut ctx)
    }

    pub(crate) fn instruction_count(ctx: &FunctionContext<'_, '_>) -> usize {
        ctx.builder.func.dfg.num_insts()
    }
}

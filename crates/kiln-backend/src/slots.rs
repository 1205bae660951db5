//! Per-function frame of reusable boxed-value-sized stack slots.
//!
//! A slot returned to the free list keeps whatever its previous occupant
//! wrote, including the tag; callers treat every granted slot's tag as stale.

use cranelift_codegen::ir::{StackSlot, StackSlotData, StackSlotKind};
use cranelift_frontend::FunctionBuilder;
use kiln_runtime::{BOXED_ALIGN, BOXED_SIZE};

use crate::config::JitConfig;
use crate::error::CompileError;
use crate::stats::FrameStats;

const POINTER_BYTES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGrant {
    Fresh(SlotId),
    Reused(SlotId),
}

impl SlotGrant {
    pub fn id(self) -> SlotId {
        match self {
            SlotGrant::Fresh(id) | SlotGrant::Reused(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ArgumentArray {
    slot: StackSlot,
    capacity: u32,
}

pub struct SlotAllocator {
    slots: Vec<StackSlot>,
    free: Vec<SlotId>,
    argument_array: Option<ArgumentArray>,
    frame_bytes: u32,
    max_frame_bytes: u32,
    reuse_argument_arrays: bool,
    stats: FrameStats,
}

impl SlotAllocator {
    pub fn new(config: &JitConfig) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            argument_array: None,
            frame_bytes: 0,
            max_frame_bytes: config.max_frame_bytes,
            reuse_argument_arrays: config.reuse_argument_arrays,
            stats: FrameStats::default(),
        }
    }

    fn reserve(&mut self, bytes: u32) -> Result<(), CompileError> {
        let requested = self.frame_bytes.saturating_add(bytes);
        if requested > self.max_frame_bytes {
            return Err(CompileError::StackFrameOverflow {
                requested,
                limit: self.max_frame_bytes,
            });
        }
        self.frame_bytes = requested;
        self.stats.frame_bytes = requested;
        Ok(())
    }

    pub fn allocate(&mut self, builder: &mut FunctionBuilder<'_>) -> Result<SlotGrant, CompileError> {
        if let Some(id) = self.free.pop() {
            self.stats.slot_reuses += 1;
            tracing::debug!(slot = id.0, "reusing value slot");
            return Ok(SlotGrant::Reused(id));
        }
        self.reserve(BOXED_SIZE as u32)?;
        let slot = builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            BOXED_SIZE as u32,
            BOXED_ALIGN.trailing_zeros() as u8,
        ));
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(slot);
        self.stats.slots_allocated += 1;
        Ok(SlotGrant::Fresh(id))
    }

    pub fn release(&mut self, id: SlotId) {
        debug_assert!(!self.free.contains(&id), "slot released twice");
        self.free.push(id);
    }

    pub fn stack_slot(&self, id: SlotId) -> StackSlot {
        self.slots[id.0 as usize]
    }

    /// A contiguous region holding `count` pointers.
    pub fn argument_array(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        count: u32,
    ) -> Result<StackSlot, CompileError> {
        if self.reuse_argument_arrays {
            if let Some(array) = self.argument_array {
                if array.capacity >= count {
                    return Ok(array.slot);
                }
            }
        }
        let bytes = count.max(1) * POINTER_BYTES;
        self.reserve(bytes)?;
        let slot = builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            bytes,
            POINTER_BYTES.trailing_zeros() as u8,
        ));
        self.argument_array = Some(ArgumentArray {
            slot,
            capacity: count.max(1),
        });
        self.stats.argument_arrays += 1;
        Ok(slot)
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cranelift_codegen::ir::{Function, Signature, UserFuncName};
    use cranelift_codegen::isa::CallConv;
    use cranelift_frontend::FunctionBuilderContext;

    fn with_builder(test: impl FnOnce(&mut FunctionBuilder<'_>)) {
        let mut function =
            Function::with_name_signature(UserFuncName::user(0, 0), Signature::new(CallConv::SystemV));
        let mut context = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut function, &mut context);
        test(&mut builder);
    }

    #[test]
    fn released_slots_are_reused() {
        with_builder(|builder| {
            let mut slots = SlotAllocator::new(&JitConfig::default());
            let first = slots.allocate(builder).unwrap();
            assert!(matches!(first, SlotGrant::Fresh(_)));
            slots.release(first.id());
            let second = slots.allocate(builder).unwrap();
            assert_eq!(second, SlotGrant::Reused(first.id()));
            let stats = slots.stats();
            assert_eq!(stats.slots_allocated, 1);
            assert_eq!(stats.slot_reuses, 1);
        });
    }

    #[test]
    fn frame_limit_is_enforced() {
        with_builder(|builder| {
            let config = JitConfig {
                max_frame_bytes: 64,
                ..JitConfig::default()
            };
            let mut slots = SlotAllocator::new(&config);
            slots.allocate(builder).unwrap();
            slots.allocate(builder).unwrap();
            let err = slots.allocate(builder).unwrap_err();
            assert_eq!(err, CompileError::StackFrameOverflow { requested: 96, limit: 64 });
        });
    }

    #[test]
    fn argument_arrays_grow_and_are_shared() {
        with_builder(|builder| {
            let mut slots = SlotAllocator::new(&JitConfig::default());
            let two = slots.argument_array(builder, 2).unwrap();
            assert_eq!(slots.argument_array(builder, 1).unwrap(), two);
            let three = slots.argument_array(builder, 3).unwrap();
            assert_ne!(three, two);
            assert_eq!(slots.stats().argument_arrays, 2);
        });
    }

    #[test]
    fn argument_arrays_are_not_shared_when_disabled() {
        with_builder(|builder| {
            let config = JitConfig {
                reuse_argument_arrays: false,
                ..JitConfig::default()
            };
            let mut slots = SlotAllocator::new(&config);
            let a = slots.argument_array(builder, 1).unwrap();
            let b = slots.argument_array(builder, 1).unwrap();
            assert_ne!(a, b);
        });
    }
}

//! Last-use analysis over a straight-line instruction stream.
//!
//! A single reverse pass finds, for every address, the last instruction that
//! reads or writes it. After that instruction the engine drops the address's
//! value and returns its slot to the allocator. Members and externals are
//! never released: their boxes outlive the function and are flushed at the
//! return instead.

use rustc_hash::FxHashSet;

use crate::ir::{Address, FunctionIr};

#[derive(Debug, Default)]
pub struct Liveness {
    released: Vec<Vec<Address>>,
}

impl Liveness {
    /// Addresses whose last reference is instruction `index`.
    pub fn released_after(&self, index: usize) -> &[Address] {
        self.released.get(index).map_or(&[], Vec::as_slice)
    }

    pub fn is_last_use(&self, index: usize, address: Address) -> bool {
        self.released_after(index).contains(&address)
    }
}

pub fn analyze(ir: &FunctionIr) -> Liveness {
    let mut released = vec![Vec::new(); ir.body.len()];
    let mut seen: FxHashSet<Address> = FxHashSet::default();

    for (index, instr) in ir.body.iter().enumerate().rev() {
        let mut touched = instr.uses();
        touched.extend(instr.def());
        for address in touched {
            if address.is_shared() {
                continue;
            }
            if seen.insert(address) {
                released[index].push(address);
            }
        }
    }

    Liveness { released }
}

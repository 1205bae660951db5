//! Process-wide arena for values that do not fit the boxed data union.
//!
//! A boxed `String` or `Basis` stores a `u64` handle into this arena in the
//! first word of its data region. Entries are never freed; handles stay valid
//! for the life of the process, which keeps boxed copies trivially copyable.
//! Equal values share one entry, so the arena is bounded by the number of
//! distinct strings and matrices rather than by the number of boxes.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::Basis;

#[derive(Debug, Clone)]
pub enum HeapObject {
    String(Arc<str>),
    Basis(Basis),
}

#[derive(Default)]
struct HeapInner {
    objects: Vec<HeapObject>,
    strings: FxHashMap<Arc<str>, u64>,
    bases: FxHashMap<[u32; 9], u64>,
}

static HEAP: OnceLock<RwLock<HeapInner>> = OnceLock::new();

fn heap() -> &'static RwLock<HeapInner> {
    HEAP.get_or_init(|| RwLock::new(HeapInner::default()))
}

/// Intern a string, returning its handle. Equal strings share a handle.
pub fn intern_string(text: &str) -> u64 {
    {
        let inner = heap().read();
        if let Some(&handle) = inner.strings.get(text) {
            return handle;
        }
    }
    let mut inner = heap().write();
    if let Some(&handle) = inner.strings.get(text) {
        return handle;
    }
    let shared: Arc<str> = Arc::from(text);
    let handle = inner.objects.len() as u64;
    inner.objects.push(HeapObject::String(shared.clone()));
    inner.strings.insert(shared, handle);
    handle
}

/// Bit pattern of a matrix; `-0.0` and `0.0` are distinct keys.
fn basis_key(basis: &Basis) -> [u32; 9] {
    let mut key = [0; 9];
    for (row, chunk) in basis.rows.iter().zip(key.chunks_exact_mut(3)) {
        chunk.copy_from_slice(&[row.x.to_bits(), row.y.to_bits(), row.z.to_bits()]);
    }
    key
}

/// Store a matrix, returning its handle. Bit-identical matrices share a handle.
pub fn store_basis(basis: Basis) -> u64 {
    let key = basis_key(&basis);
    {
        let inner = heap().read();
        if let Some(&handle) = inner.bases.get(&key) {
            return handle;
        }
    }
    let mut inner = heap().write();
    if let Some(&handle) = inner.bases.get(&key) {
        return handle;
    }
    let handle = inner.objects.len() as u64;
    inner.objects.push(HeapObject::Basis(basis));
    inner.bases.insert(key, handle);
    handle
}

pub fn load(handle: u64) -> Option<HeapObject> {
    let inner = heap().read();
    usize::try_from(handle)
        .ok()
        .and_then(|index| inner.objects.get(index).cloned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Vector3;

    #[test]
    fn equal_strings_share_a_handle() {
        let a = intern_string("hello arena");
        let b = intern_string("hello arena");
        assert_eq!(a, b);
        match load(a) {
            Some(HeapObject::String(text)) => assert_eq!(&*text, "hello arena"),
            other => panic!("unexpected heap entry {other:?}"),
        }
    }

    #[test]
    fn equal_matrices_share_a_handle() {
        let row = |x| Vector3::new(x, 0.5, -2.0);
        let basis = Basis {
            rows: [row(1.0), row(2.0), row(3.0)],
        };
        let first = store_basis(basis);
        assert_eq!(store_basis(basis), first);

        let mut flipped = basis;
        flipped.rows[2].z = 2.0;
        let other = store_basis(flipped);
        assert_ne!(other, first);
        match load(other) {
            Some(HeapObject::Basis(stored)) => assert_eq!(stored, flipped),
            other => panic!("unexpected heap entry {other:?}"),
        }
    }

    #[test]
    fn unknown_handle_is_none() {
        assert!(load(u64::MAX).is_none());
    }
}

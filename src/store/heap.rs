//! Heap-backed [`super::Store`], backed by a `Vec<u8>` arena behind a
//! `Mutex` to allow elastic regrowth through a shared reference (spec
//! §4.1). Bulk transfers into a heap store dispatch through the same
//! generic stride copy as native-to-native, since both ultimately expose
//! a byte pointer (spec's "heap-to-native copy" requirement is satisfied
//! by that shared code path rather than a separate one).

use std::sync::Mutex;

use super::Store;
use crate::error::{BytesError, Result};
use crate::refcount::{RefCount, ReferenceCounted};

/// A `Vec<u8>`-backed store. `addressForRead`/`addressForWrite` are
/// *unsupported* here: a `Vec`'s buffer is not a stable address for
/// external interop the way a native/mapped allocation is.
pub struct HeapStore {
    arena: Mutex<Vec<u8>>,
    max_capacity: usize,
    elastic: bool,
    ref_count: RefCount,
}

impl HeapStore {
    /// A fixed-capacity heap store of exactly `capacity` bytes.
    pub fn fixed(capacity: usize) -> Self {
        HeapStore {
            arena: Mutex::new(vec![0u8; capacity]),
            max_capacity: capacity,
            elastic: false,
            ref_count: RefCount::new(),
        }
    }

    /// An elastic heap store starting at `initial_capacity`.
    pub fn elastic(initial_capacity: usize) -> Self {
        HeapStore {
            arena: Mutex::new(vec![0u8; initial_capacity]),
            max_capacity: usize::MAX,
            elastic: true,
            ref_count: RefCount::new(),
        }
    }
}

impl Store for HeapStore {
    fn capacity(&self) -> usize {
        if self.elastic {
            usize::MAX
        } else {
            self.max_capacity
        }
    }

    fn real_capacity(&self) -> usize {
        self.arena.lock().unwrap().len()
    }

    fn is_elastic(&self) -> bool {
        self.elastic
    }

    fn as_ptr(&self) -> Result<*const u8> {
        Ok(self.arena.lock().unwrap().as_ptr())
    }

    fn as_mut_ptr(&self) -> Result<*mut u8> {
        Ok(self.arena.lock().unwrap().as_mut_ptr())
    }

    fn ensure_writable(&self, end: usize) -> Result<()> {
        let mut arena = self.arena.lock().unwrap();
        if end <= arena.len() {
            return Ok(());
        }

        if !self.elastic {
            return Err(BytesError::BufferOverflow(format!(
                "write end {end} exceeds fixed heap capacity {}",
                arena.len()
            )));
        }

        if end > self.max_capacity {
            return Err(BytesError::BufferOverflow(format!(
                "grow to {end} exceeds max capacity {}",
                self.max_capacity
            )));
        }

        let new_len = std::cmp::max(arena.len() * 3 / 2, end).min(self.max_capacity);
        arena.resize(new_len, 0);
        Ok(())
    }
}

// `Store::as_ptr`/`as_mut_ptr` lock the arena for the duration of the
// pointer's use by the caller (via `StoreExt`'s default methods, which are
// single-call-site uses), so the returned pointer does not outlive the
// lock in practice; this mirrors `harrow`'s own pattern of handing out raw
// pointers from behind a mutex-guarded cache block.
unsafe impl Send for HeapStore {}
unsafe impl Sync for HeapStore {}

impl ReferenceCounted for HeapStore {
    fn resource_name(&self) -> &str {
        "heap store"
    }

    fn ref_count_state(&self) -> &RefCount {
        &self.ref_count
    }

    fn perform_release(&self) {
        self.arena.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreExt;

    #[test]
    fn address_for_read_unsupported() {
        let heap = HeapStore::fixed(8);
        assert!(matches!(
            Store::address_for_read(&heap, 0),
            Err(BytesError::Unsupported(_))
        ));
    }

    #[test]
    fn elastic_grow() {
        let heap = HeapStore::elastic(4);
        heap.write_u64(0, 0xdeadbeef).unwrap();
        assert!(heap.real_capacity() >= 8);
        assert_eq!(heap.read_u64(0).unwrap(), 0xdeadbeef);
    }

    #[test]
    fn fixed_rejects_overflow() {
        let heap = HeapStore::fixed(4);
        assert!(heap.write_u64(0, 1).is_err());
    }
}

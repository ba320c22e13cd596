//! The process-wide zero-length [`EmptyStore`] singleton (spec §3).

use once_cell::sync::Lazy;

use super::Store;
use crate::error::{BytesError, Result};
use crate::refcount::{RefCount, ReferenceCounted};

/// A zero-length store returned when callers pass a zero/empty argument.
/// `reserve`/`release` are no-ops; it is never freed.
pub struct EmptyStore {
    ref_count: RefCount,
}

static INSTANCE: Lazy<EmptyStore> = Lazy::new(|| EmptyStore {
    ref_count: RefCount::new(),
});

impl EmptyStore {
    /// The single process-wide instance.
    pub fn singleton() -> &'static EmptyStore {
        &INSTANCE
    }
}

impl Store for EmptyStore {
    fn capacity(&self) -> usize {
        0
    }

    fn as_ptr(&self) -> Result<*const u8> {
        Ok(std::ptr::NonNull::dangling().as_ptr())
    }

    fn as_mut_ptr(&self) -> Result<*mut u8> {
        Ok(std::ptr::NonNull::dangling().as_ptr())
    }

    fn ensure_writable(&self, end: usize) -> Result<()> {
        if end == 0 {
            Ok(())
        } else {
            Err(BytesError::BufferOverflow(
                "the empty store accepts no writes".into(),
            ))
        }
    }
}

impl ReferenceCounted for EmptyStore {
    fn resource_name(&self) -> &str {
        "empty store"
    }

    fn ref_count_state(&self) -> &RefCount {
        &self.ref_count
    }

    fn perform_release(&self) {
        // Never actually freed: the singleton outlives the process.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcount::Owner;

    #[test]
    fn is_zero_length_and_inert() {
        let store = EmptyStore::singleton();
        assert_eq!(store.capacity(), 0);
        store.reserve(Owner::new()).unwrap();
        store.release(Owner::new());
        assert!(store.ref_count() >= 1);
    }
}

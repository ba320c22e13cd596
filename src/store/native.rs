//! Off-heap (native) [`super::Store`] backed by a page-aligned allocation
//! obtained through [`std::alloc`]. Supports the elastic-grow policy of
//! spec §4.1.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::raw;
use super::Store;
use crate::error::{BytesError, Result};
use crate::refcount::{RefCount, ReferenceCounted};

/// Grow factor applied when an elastic store's `real_capacity` is
/// exceeded: `max(real_capacity * 3/2, requested_end)`, per spec §4.1.
const GROW_NUMERATOR: usize = 3;
const GROW_DENOMINATOR: usize = 2;

/// An off-heap byte store. If constructed as elastic, writes past the
/// current `real_capacity` trigger a grow: a bigger region is allocated,
/// the old contents are copied in, the old region is freed, and the new
/// base address/capacity are published atomically.
///
/// Only single-writer cursors are expected to mutate through a given
/// `NativeStore` at a time (spec §5); nothing here prevents a caller from
/// breaking that contract; it is documented, not enforced.
pub struct NativeStore {
    ptr: AtomicPtr<u8>,
    real_capacity: AtomicUsize,
    max_capacity: usize,
    elastic: bool,
    align: usize,
    grow_lock: Mutex<()>,
    ref_count: RefCount,
}

impl NativeStore {
    /// Allocates a fixed-capacity native store of exactly `capacity` bytes.
    pub fn fixed(capacity: usize) -> Result<Self> {
        Self::new(capacity, capacity, false)
    }

    /// Allocates an elastic native store. `initial_capacity` is the
    /// starting `real_capacity`; `capacity()` always reports
    /// `usize::MAX` for elastic stores per spec §4.1.
    pub fn elastic(initial_capacity: usize) -> Result<Self> {
        Self::new(initial_capacity, usize::MAX, true)
    }

    fn new(initial_capacity: usize, max_capacity: usize, elastic: bool) -> Result<Self> {
        if initial_capacity == 0 {
            return Err(BytesError::InvalidArgument(
                "native store capacity must be non-zero".into(),
            ));
        }

        let align = std::mem::align_of::<u64>();
        let ptr = allocate(initial_capacity, align)?;

        Ok(NativeStore {
            ptr: AtomicPtr::new(ptr.as_ptr()),
            real_capacity: AtomicUsize::new(initial_capacity),
            max_capacity,
            elastic,
            align,
            grow_lock: Mutex::new(()),
            ref_count: RefCount::new(),
        })
    }

    fn raw_ptr(&self) -> Result<*mut u8> {
        let ptr = self.ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            Err(BytesError::Closed("native store has been released".into()))
        } else {
            Ok(ptr)
        }
    }

    fn grow_to(&self, required: usize) -> Result<()> {
        if !self.elastic {
            return Err(BytesError::BufferOverflow(format!(
                "write to offset {required} exceeds fixed capacity {}",
                self.real_capacity.load(Ordering::Acquire)
            )));
        }

        let _guard = self.grow_lock.lock().unwrap();

        let current = self.real_capacity.load(Ordering::Acquire);
        if required <= current {
            return Ok(());
        }

        if required > self.max_capacity {
            return Err(BytesError::BufferOverflow(format!(
                "grow to {required} exceeds max capacity {}",
                self.max_capacity
            )));
        }

        let new_capacity = std::cmp::max(current * GROW_NUMERATOR / GROW_DENOMINATOR, required);
        let new_capacity = new_capacity.min(self.max_capacity);

        let new_ptr = allocate(new_capacity, self.align)?;
        let old_ptr = self.raw_ptr()?;

        // SAFETY: old_ptr is valid for `current` bytes (the previous
        // allocation), new_ptr for `new_capacity >= current` bytes; they
        // are freshly allocated and thus non-overlapping.
        unsafe {
            raw::copy_strided(old_ptr, new_ptr.as_ptr(), current);
        }

        self.ptr.store(new_ptr.as_ptr(), Ordering::Release);
        self.real_capacity.store(new_capacity, Ordering::Release);

        // The old region is released immediately, per spec §3.
        // SAFETY: old_ptr was allocated by `allocate` with `current` bytes
        // and the same alignment, and nothing else references it now that
        // `self.ptr` has been swapped.
        unsafe {
            dealloc(old_ptr, Layout::from_size_align_unchecked(current, self.align));
        }

        Ok(())
    }

    /// Absolute address for native interop. UB if the store has since been
    /// released - the caller accepts that previously obtained addresses
    /// may be invalidated by a subsequent elastic grow (spec §9).
    pub fn address_for_read(&self, offset: usize) -> Result<usize> {
        let ptr = self.raw_ptr()?;
        Ok(unsafe { ptr.add(offset) as usize })
    }

    /// See [`address_for_read`](Self::address_for_read).
    pub fn address_for_write(&self, offset: usize) -> Result<usize> {
        self.address_for_read(offset)
    }
}

fn allocate(capacity: usize, align: usize) -> Result<NonNull<u8>> {
    let layout = Layout::from_size_align(capacity, align)
        .map_err(|e| BytesError::InvalidArgument(e.to_string()))?;

    // SAFETY: layout has non-zero size (capacity is checked non-zero by
    // every caller that can reach here).
    let ptr = unsafe { alloc_zeroed(layout) };
    NonNull::new(ptr).ok_or_else(|| {
        BytesError::InvalidArgument(format!("native allocation of {capacity} bytes failed"))
    })
}

impl Store for NativeStore {
    fn capacity(&self) -> usize {
        if self.elastic {
            usize::MAX
        } else {
            self.real_capacity.load(Ordering::Acquire)
        }
    }

    fn real_capacity(&self) -> usize {
        self.real_capacity.load(Ordering::Acquire)
    }

    fn is_elastic(&self) -> bool {
        self.elastic
    }

    fn as_ptr(&self) -> Result<*const u8> {
        Ok(self.raw_ptr()? as *const u8)
    }

    fn as_mut_ptr(&self) -> Result<*mut u8> {
        self.raw_ptr()
    }

    fn ensure_writable(&self, end: usize) -> Result<()> {
        if end > self.real_capacity.load(Ordering::Acquire) {
            self.grow_to(end)
        } else {
            Ok(())
        }
    }

    fn address_for_read(&self, offset: usize) -> Result<usize> {
        NativeStore::address_for_read(self, offset)
    }

    fn address_for_write(&self, offset: usize) -> Result<usize> {
        NativeStore::address_for_write(self, offset)
    }
}

impl ReferenceCounted for NativeStore {
    fn resource_name(&self) -> &str {
        "native store"
    }

    fn ref_count_state(&self) -> &RefCount {
        &self.ref_count
    }

    fn can_release_in_background(&self) -> bool {
        true
    }

    fn perform_release(&self) {
        // Null the pointer synchronously so a late access fails closed
        // rather than touching freed memory, then defer the actual free.
        let ptr = self.ptr.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            return;
        }

        let capacity = self.real_capacity.load(Ordering::Acquire);
        let align = self.align;

        struct SendPtr(*mut u8);
        unsafe impl Send for SendPtr {}
        let ptr = SendPtr(ptr);

        crate::deferred::defer(move || {
            // SAFETY: ptr was allocated by `allocate` with this exact
            // (capacity, align) and is unreachable from any other store
            // now that `self.ptr` has been nulled.
            unsafe {
                dealloc(ptr.0, Layout::from_size_align_unchecked(capacity, align));
            }
        });
    }
}

unsafe impl Send for NativeStore {}
unsafe impl Sync for NativeStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreExt;

    #[test]
    fn fixed_round_trip() {
        let store = NativeStore::fixed(64).unwrap();
        store.write_i32(0, 42).unwrap();
        assert_eq!(store.read_i32(0).unwrap(), 42);
    }

    #[test]
    fn elastic_grows_and_preserves_content() {
        let store = NativeStore::elastic(8).unwrap();
        for i in 0..256u32 {
            store.ensure_writable(i as usize + 1).unwrap();
            store.write_u8(i as usize, i as u8).unwrap();
        }
        assert!(store.real_capacity() >= 256);
        for i in 0..256u32 {
            assert_eq!(store.read_u8(i as usize).unwrap(), i as u8);
        }
    }

    #[test]
    fn fixed_overflow_errors() {
        let store = NativeStore::fixed(4).unwrap();
        assert!(store.write_i64(0, 1).is_err());
    }

    #[test]
    fn released_store_is_closed() {
        use crate::refcount::Owner;
        let store = NativeStore::fixed(8).unwrap();
        store.release_last(Owner::INIT);
        assert!(store.read_u8(0).is_err());
    }
}

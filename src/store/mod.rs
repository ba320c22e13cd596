//! The [`Store`] capability trait and the [`BytesStore`] tagged variant
//! covering `{Native, Heap, Mapped, Empty}` (spec §4.1, §9 design note on
//! "Polymorphism over store variants").

pub mod empty;
pub mod heap;
pub mod mapped;
pub mod native;
pub mod raw;

use std::sync::Arc;

use crate::error::Result;
use crate::refcount::{Owner, ReferenceCounted};

pub use empty::EmptyStore;
pub use heap::HeapStore;
pub use mapped::MappedBytesStore;
pub use native::NativeStore;

/// Uniform typed random-access read/write contract implemented by every
/// store variant (spec §4.1).
///
/// Bulk transfer, checksum/hash and zero-out are provided as default
/// methods on top of [`as_ptr`](Self::as_ptr)/[`as_mut_ptr`](Self::as_mut_ptr)
/// so each variant only needs to supply raw pointer + capacity accessors
/// and its elastic-grow policy.
pub trait Store {
    /// Declared capacity. For elastic stores this is `usize::MAX`; use
    /// [`real_capacity`](Self::real_capacity) for the current backing size.
    fn capacity(&self) -> usize;

    /// Current backing region length. Equal to `capacity()` for
    /// non-elastic stores.
    fn real_capacity(&self) -> usize {
        self.capacity()
    }

    /// Whether this store replaces its region with a larger one on
    /// out-of-bounds writes instead of failing.
    fn is_elastic(&self) -> bool {
        false
    }

    /// Read-only base pointer, valid for `real_capacity()` bytes.
    fn as_ptr(&self) -> Result<*const u8>;

    /// Mutable base pointer, valid for `real_capacity()` bytes.
    fn as_mut_ptr(&self) -> Result<*mut u8>;

    /// Grows the backing region if needed so that `end` bytes are
    /// writable. No-op (or a bounds error) for non-elastic stores.
    fn ensure_writable(&self, end: usize) -> Result<()> {
        if end > self.real_capacity() {
            Err(crate::error::BytesError::BufferOverflow(format!(
                "write end {end} exceeds capacity {}",
                self.real_capacity()
            )))
        } else {
            Ok(())
        }
    }

    /// Absolute native address for direct interop. *Unsupported* on
    /// variants with no stable address (heap).
    fn address_for_read(&self, _offset: usize) -> Result<usize> {
        Err(crate::error::BytesError::Unsupported(
            "addressForRead is not supported on this store variant".into(),
        ))
    }

    /// See [`address_for_read`](Self::address_for_read).
    fn address_for_write(&self, _offset: usize) -> Result<usize> {
        Err(crate::error::BytesError::Unsupported(
            "addressForWrite is not supported on this store variant".into(),
        ))
    }
}

macro_rules! typed_accessors {
    ($read:ident, $volatile_read:ident, $write:ident, $volatile_write:ident, $ty:ty) => {
        /// Host-endian typed read at `offset`.
        fn $read(&self, offset: usize) -> Result<$ty> {
            let ptr = self.as_ptr()?;
            unsafe { raw::read_at(ptr, offset, self.real_capacity()) }
        }

        /// Volatile read (acquire fence) at `offset`.
        fn $volatile_read(&self, offset: usize) -> Result<$ty> {
            let ptr = self.as_ptr()?;
            unsafe { raw::read_volatile_at(ptr, offset, self.real_capacity()) }
        }

        /// Host-endian typed write at `offset`.
        fn $write(&self, offset: usize, value: $ty) -> Result<()> {
            self.ensure_writable(offset + std::mem::size_of::<$ty>())?;
            let ptr = self.as_mut_ptr()?;
            unsafe { raw::write_at(ptr, offset, self.real_capacity(), value) }
        }

        /// Volatile write (release fence) at `offset`.
        fn $volatile_write(&self, offset: usize, value: $ty) -> Result<()> {
            self.ensure_writable(offset + std::mem::size_of::<$ty>())?;
            let ptr = self.as_mut_ptr()?;
            unsafe { raw::write_volatile_at(ptr, offset, self.real_capacity(), value) }
        }
    };
}

/// Typed primitives extending [`Store`] with default implementations
/// shared by every variant.
pub trait StoreExt: Store {
    typed_accessors!(read_u8, read_volatile_u8, write_u8, write_volatile_u8, u8);
    typed_accessors!(read_i16, read_volatile_i16, write_i16, write_volatile_i16, i16);
    typed_accessors!(read_u16, read_volatile_u16, write_u16, write_volatile_u16, u16);
    typed_accessors!(read_i32, read_volatile_i32, write_i32, write_volatile_i32, i32);
    typed_accessors!(read_u32, read_volatile_u32, write_u32, write_volatile_u32, u32);
    typed_accessors!(read_i64, read_volatile_i64, write_i64, write_volatile_i64, i64);
    typed_accessors!(read_u64, read_volatile_u64, write_u64, write_volatile_u64, u64);
    typed_accessors!(read_f32, read_volatile_f32, write_f32, write_volatile_f32, f32);
    typed_accessors!(read_f64, read_volatile_f64, write_f64, write_volatile_f64, f64);

    /// `writeOrderedInt`: release-only ordered write.
    fn write_ordered_i32(&self, offset: usize, value: i32) -> Result<()> {
        self.ensure_writable(offset + 4)?;
        let ptr = self.as_mut_ptr()?;
        unsafe { raw::write_ordered_at(ptr, offset, self.real_capacity(), value) }
    }

    /// `writeOrderedLong`: release-only ordered write.
    fn write_ordered_i64(&self, offset: usize, value: i64) -> Result<()> {
        self.ensure_writable(offset + 8)?;
        let ptr = self.as_mut_ptr()?;
        unsafe { raw::write_ordered_at(ptr, offset, self.real_capacity(), value) }
    }

    /// `compareAndSwapInt`.
    fn compare_and_swap_i32(&self, offset: usize, expected: i32, new: i32) -> Result<bool> {
        let ptr = self.as_mut_ptr()?;
        unsafe { raw::cas_i32(ptr, offset, self.real_capacity(), expected, new) }
    }

    /// `compareAndSwapLong`.
    fn compare_and_swap_i64(&self, offset: usize, expected: i64, new: i64) -> Result<bool> {
        let ptr = self.as_mut_ptr()?;
        unsafe { raw::cas_i64(ptr, offset, self.real_capacity(), expected, new) }
    }

    /// `addAndGetInt`.
    fn add_and_get_i32(&self, offset: usize, delta: i32) -> Result<i32> {
        let ptr = self.as_mut_ptr()?;
        unsafe { raw::add_and_get_i32(ptr, offset, self.real_capacity(), delta) }
    }

    /// `addAndGetLong`.
    fn add_and_get_i64(&self, offset: usize, delta: i64) -> Result<i64> {
        let ptr = self.as_mut_ptr()?;
        unsafe { raw::add_and_get_i64(ptr, offset, self.real_capacity(), delta) }
    }

    /// `write(destOffset, bytes, offset, length)`: bulk copy from a plain
    /// byte slice, using a single native-to-native stride copy.
    fn write_bytes(&self, dest_offset: usize, bytes: &[u8]) -> Result<()> {
        self.ensure_writable(dest_offset + bytes.len())?;
        let dst = self.as_mut_ptr()?;
        unsafe {
            raw::copy_strided(bytes.as_ptr(), dst.add(dest_offset), bytes.len());
        }
        Ok(())
    }

    /// `write(destOffset, otherStore, srcOffset, length)`: store-to-store
    /// bulk copy. Both sides being native/mapped uses a single stride
    /// copy; this generic implementation works uniformly because every
    /// variant ultimately exposes a byte pointer.
    fn write_from_store(
        &self,
        dest_offset: usize,
        other: &dyn Store,
        src_offset: usize,
        length: usize,
    ) -> Result<()> {
        let src = other.as_ptr()?;
        if src_offset + length > other.real_capacity() {
            return Err(crate::error::BytesError::BufferUnderflow(format!(
                "source range [{src_offset}, {}) exceeds capacity {}",
                src_offset + length,
                other.real_capacity()
            )));
        }

        self.ensure_writable(dest_offset + length)?;
        let dst = self.as_mut_ptr()?;
        unsafe {
            raw::copy_strided(src.add(src_offset), dst.add(dest_offset), length);
        }
        Ok(())
    }

    /// `copyTo(otherStore)`: copies this store's full `real_capacity` into
    /// `other`, growing `other` if it is elastic.
    fn copy_to(&self, other: &dyn Store) -> Result<()> {
        let len = self.real_capacity();
        other.ensure_writable(len)?;
        let src = self.as_ptr()?;
        let dst = other.as_mut_ptr()?;
        unsafe {
            raw::copy_strided(src, dst, len);
        }
        Ok(())
    }

    /// `byteCheckSum(start, end)`.
    fn byte_check_sum(&self, start: usize, end: usize) -> Result<u8> {
        let end = end.min(self.real_capacity());
        let ptr = self.as_ptr()?;
        Ok(unsafe { raw::byte_check_sum(ptr, start, end) })
    }

    /// `fastHash(offset, length)`.
    fn fast_hash(&self, offset: usize, length: usize) -> Result<u32> {
        let ptr = self.as_ptr()?;
        Ok(unsafe { raw::fast_hash(ptr, offset, length) })
    }

    /// `zeroOut(start, end)`, clamped to `[0, real_capacity())`.
    fn zero_out(&self, start: usize, end: usize) -> Result<()> {
        let end = end.min(self.real_capacity());
        let ptr = self.as_mut_ptr()?;
        unsafe { raw::zero_out(ptr, start, end) };
        Ok(())
    }

    /// Byte slice over `[0, real_capacity())`, for equality/hashing.
    fn as_slice(&self) -> Result<&[u8]> {
        let ptr = self.as_ptr()?;
        // SAFETY: ptr is valid for real_capacity() bytes per the Store
        // contract, and outlives this call because the store itself does.
        Ok(unsafe { std::slice::from_raw_parts(ptr, self.real_capacity()) })
    }

    /// `hashCode()`: 32-bit content hash over `[0, real_capacity())`.
    fn content_hash(&self) -> Result<u32> {
        Ok(crate::compare::hash32(self.as_slice()?))
    }

    /// `equals(other)`: byte-for-byte content equality.
    fn content_equals(&self, other: &dyn Store) -> Result<bool> {
        Ok(crate::compare::content_equal(
            Some(self.as_slice()?),
            Some(other.as_slice()?),
        ))
    }
}

impl<T: Store + ?Sized> StoreExt for T {}

/// A tagged union over the four store variants, giving [`crate::bytes::Bytes`]
/// a single concrete type to own regardless of backing.
pub enum BytesStore {
    /// Off-heap allocation.
    Native(Arc<NativeStore>),
    /// Heap-backed `Vec<u8>` arena.
    Heap(Arc<HeapStore>),
    /// A chunk of a memory-mapped file.
    Mapped(Arc<MappedBytesStore>),
    /// The process-wide zero-length singleton.
    Empty,
}

impl BytesStore {
    /// Wraps a fixed-capacity off-heap allocation.
    pub fn native_fixed(capacity: usize) -> Result<Self> {
        Ok(BytesStore::Native(Arc::new(NativeStore::fixed(capacity)?)))
    }

    /// Wraps an elastic off-heap allocation.
    pub fn native_elastic(initial_capacity: usize) -> Result<Self> {
        Ok(BytesStore::Native(Arc::new(NativeStore::elastic(
            initial_capacity,
        )?)))
    }

    /// Wraps a heap-backed arena.
    pub fn heap(capacity: usize) -> Self {
        BytesStore::Heap(Arc::new(HeapStore::fixed(capacity)))
    }

    /// Wraps an elastic heap-backed arena.
    pub fn heap_elastic(initial_capacity: usize) -> Self {
        BytesStore::Heap(Arc::new(HeapStore::elastic(initial_capacity)))
    }

    /// The process-wide empty store.
    pub fn empty() -> Self {
        BytesStore::Empty
    }

    fn as_store(&self) -> &dyn Store {
        match self {
            BytesStore::Native(s) => s.as_ref(),
            BytesStore::Heap(s) => s.as_ref(),
            BytesStore::Mapped(s) => s.as_ref(),
            BytesStore::Empty => EmptyStore::singleton(),
        }
    }

    fn as_refcounted(&self) -> &dyn ReferenceCounted {
        match self {
            BytesStore::Native(s) => s.as_ref(),
            BytesStore::Heap(s) => s.as_ref(),
            BytesStore::Mapped(s) => s.as_ref(),
            BytesStore::Empty => EmptyStore::singleton(),
        }
    }

    /// Reserves a reservation under `owner`; no-op for the empty store.
    pub fn reserve(&self, owner: Owner) -> Result<()> {
        self.as_refcounted().reserve(owner)
    }

    /// Releases the reservation held by `owner`.
    pub fn release(&self, owner: Owner) {
        self.as_refcounted().release(owner)
    }

    /// Current reservation count.
    pub fn ref_count(&self) -> usize {
        self.as_refcounted().ref_count()
    }
}

impl Clone for BytesStore {
    fn clone(&self) -> Self {
        match self {
            BytesStore::Native(s) => BytesStore::Native(s.clone()),
            BytesStore::Heap(s) => BytesStore::Heap(s.clone()),
            BytesStore::Mapped(s) => BytesStore::Mapped(s.clone()),
            BytesStore::Empty => BytesStore::Empty,
        }
    }
}

impl Store for BytesStore {
    fn capacity(&self) -> usize {
        self.as_store().capacity()
    }

    fn real_capacity(&self) -> usize {
        self.as_store().real_capacity()
    }

    fn is_elastic(&self) -> bool {
        self.as_store().is_elastic()
    }

    fn as_ptr(&self) -> Result<*const u8> {
        self.as_store().as_ptr()
    }

    fn as_mut_ptr(&self) -> Result<*mut u8> {
        self.as_store().as_mut_ptr()
    }

    fn ensure_writable(&self, end: usize) -> Result<()> {
        self.as_store().ensure_writable(end)
    }

    fn address_for_read(&self, offset: usize) -> Result<usize> {
        self.as_store().address_for_read(offset)
    }

    fn address_for_write(&self, offset: usize) -> Result<usize> {
        self.as_store().address_for_write(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_and_heap_round_trip() {
        let native = BytesStore::native_fixed(32).unwrap();
        native.write_i64(0, 123456789).unwrap();
        assert_eq!(native.read_i64(0).unwrap(), 123456789);

        let heap = BytesStore::heap(32);
        heap.write_i64(0, 987654321).unwrap();
        assert_eq!(heap.read_i64(0).unwrap(), 987654321);
    }

    #[test]
    fn cross_store_bulk_copy() {
        let native = BytesStore::native_fixed(16).unwrap();
        native.write_bytes(0, b"abcdefgh").unwrap();

        let heap = BytesStore::heap(16);
        heap.write_from_store(0, &native, 0, 8).unwrap();

        assert_eq!(&heap.as_slice().unwrap()[0..8], b"abcdefgh");
    }

    #[test]
    fn content_equal_across_variants() {
        let native = BytesStore::native_fixed(8).unwrap();
        native.write_bytes(0, b"12345678").unwrap();
        let heap = BytesStore::heap(8);
        heap.write_bytes(0, b"12345678").unwrap();
        assert!(native.content_equals(&heap).unwrap());
        assert_eq!(native.content_hash().unwrap(), heap.content_hash().unwrap());
    }

    #[test]
    fn empty_store_is_singleton_and_inert() {
        let a = BytesStore::empty();
        let b = BytesStore::empty();
        assert_eq!(a.capacity(), 0);
        assert_eq!(b.capacity(), 0);
        a.reserve(Owner::new()).unwrap();
        a.release(Owner::new());
    }
}

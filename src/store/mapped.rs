//! A single mapped chunk of a [`crate::mapped_file::MappedFile`] (spec
//! §3's `MappedBytesStore`).

use crate::error::Result;
use crate::os::RawView;
use crate::refcount::{RefCount, ReferenceCounted};

use super::Store;

/// Specialization of a native store whose address came from mapping a
/// window of a file. Knows its chunk index and the chunk's starting
/// offset within the file, so [`inside`](Self::inside) can answer
/// "is this access entirely within my window, including trailing
/// overlap?" in constant time (spec §3, §4.3).
pub struct MappedBytesStore {
    view: RawView,
    chunk_index: u64,
    chunk_offset: usize,
    /// Size of the chunk's primary (non-overlap) region. The mapping
    /// itself (`view.len()`) additionally covers the trailing overlap.
    chunk_size: usize,
    ref_count: RefCount,
}

impl MappedBytesStore {
    pub(crate) fn new(view: RawView, chunk_index: u64, chunk_offset: usize, chunk_size: usize) -> Self {
        MappedBytesStore {
            view,
            chunk_index,
            chunk_offset,
            chunk_size,
            ref_count: RefCount::new(),
        }
    }

    /// Index of this chunk within the owning `MappedFile`.
    pub fn chunk_index(&self) -> u64 {
        self.chunk_index
    }

    /// Absolute file offset this chunk's mapping starts at.
    pub fn chunk_offset(&self) -> usize {
        self.chunk_offset
    }

    /// Size of this chunk's primary (non-overlap) region.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether an access of `length` bytes starting at absolute file
    /// offset `offset` lies entirely within this chunk's mapped window
    /// (primary region plus trailing overlap), per spec §4.3.
    pub fn inside(&self, offset: usize, length: usize) -> bool {
        if offset < self.chunk_offset {
            return false;
        }
        let rel = offset - self.chunk_offset;
        match rel.checked_add(length) {
            Some(end) => end <= self.view.len(),
            None => false,
        }
    }

    /// Flushes dirty pages to the backing file (`msync`).
    pub fn flush(&self) -> Result<()> {
        self.view.flush().map_err(|e| e.into())
    }
}

impl Store for MappedBytesStore {
    fn capacity(&self) -> usize {
        self.view.len()
    }

    fn as_ptr(&self) -> Result<*const u8> {
        Ok(self.view.as_ptr())
    }

    fn as_mut_ptr(&self) -> Result<*mut u8> {
        Ok(self.view.as_ptr() as *mut u8)
    }

    fn address_for_read(&self, offset: usize) -> Result<usize> {
        Ok(unsafe { self.view.as_ptr().add(offset) as usize })
    }

    fn address_for_write(&self, offset: usize) -> Result<usize> {
        self.address_for_read(offset)
    }
}

impl ReferenceCounted for MappedBytesStore {
    fn resource_name(&self) -> &str {
        "mapped chunk"
    }

    fn ref_count_state(&self) -> &RefCount {
        &self.ref_count
    }

    fn can_release_in_background(&self) -> bool {
        // Mapped unmaps must be synchronous: the OS may reuse the address
        // range immediately (spec §9).
        false
    }

    fn perform_release(&self) {
        let _ = self.view.flush();
        // The actual munmap happens in `RawView::drop`, which fires when
        // this `MappedBytesStore` (and its one `Arc` owner, the engine's
        // `stores` slot) is finally dropped.
    }
}

unsafe impl Send for MappedBytesStore {}
unsafe impl Sync for MappedBytesStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os;
    use std::path::PathBuf;

    fn tmp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("chronobytes-mapped-{name}-{}", std::process::id()))
    }

    #[test]
    fn inside_accounts_for_overlap() {
        let path = tmp("inside");
        let alignment = os::get_alignment();
        let raw = os::RawFile::open_writable(&path, 4 * alignment).unwrap();
        let view = raw.view(0, alignment + 64, true).unwrap();
        let store = MappedBytesStore::new(view, 0, 0, alignment);

        assert!(store.inside(0, alignment));
        assert!(store.inside(alignment - 1, 64));
        assert!(!store.inside(alignment + 100, 1));

        std::fs::remove_file(&path).ok();
    }
}

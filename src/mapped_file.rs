//! Chunked memory-mapped file engine (spec §4.3/§4.4): lazy on-demand
//! mapping of fixed-size, optionally overlapping chunks of a growable
//! file, with per-chunk reference counting and cross-instance growth
//! coordination.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, trace, warn};

use crate::align::align_add;
use crate::error::{BytesError, Result};
use crate::os;
use crate::refcount::{Owner, RefCount, ReferenceCounted};
use crate::store::mapped::MappedBytesStore;

/// Process-global table of canonical-path -> lock, so that only one
/// `resize_file_if_too_small` call per physical file runs at a time
/// across every `MappedFile` instance that has it open (spec §4.3, §9
/// design note 3).
fn path_locks() -> &'static Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn path_lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = path_locks().lock().unwrap();
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Engine managing lazily-mapped, fixed-size chunks of a single backing
/// file. Chunks are handed out through [`acquire_byte_store`](Self::acquire_byte_store)
/// and reference-counted independently of the engine itself.
pub struct MappedFile {
    raw: Mutex<Option<os::RawFile>>,
    canonical_path: PathBuf,
    writable: bool,
    chunk_size: usize,
    overlap_size: usize,
    /// Whether the engine keeps its own reservation on every chunk it
    /// maps, released only when the engine itself is released.
    retained: bool,
    /// True for the single-mapped variant (spec §4.4): only
    /// `position == 0` is ever a valid `acquire_byte_store` argument.
    single_mapped: bool,
    stores: Mutex<Vec<Option<Arc<MappedBytesStore>>>>,
    engine_owner: Owner,
    ref_count: RefCount,
}

impl MappedFile {
    /// Opens `path` as a chunked mapped file. `chunk_size` and
    /// `overlap_size` are aligned up to the OS page size; `overlap_size
    /// == 0` disables overlap. `initial_len` is the file's starting
    /// length (ignored, beyond requiring it be nonzero, when `!writable`).
    pub fn open_chunked(
        path: &Path,
        chunk_size: usize,
        overlap_size: usize,
        initial_len: usize,
        writable: bool,
        retained: bool,
    ) -> Result<Self> {
        let chunk_size = align_add(chunk_size.max(1));
        let overlap_size = if overlap_size == 0 {
            0
        } else {
            align_add(overlap_size)
        };

        let raw = if writable {
            os::RawFile::open_writable(path, align_add(initial_len.max(1)))?
        } else {
            os::RawFile::open_readonly(path)?
                .ok_or_else(|| BytesError::InvalidArgument("mapped file is empty".into()))?
        };

        let canonical_path = fs::canonicalize(path)?;

        Ok(MappedFile {
            raw: Mutex::new(Some(raw)),
            canonical_path,
            writable,
            chunk_size,
            overlap_size,
            retained,
            single_mapped: false,
            stores: Mutex::new(Vec::new()),
            engine_owner: Owner::new(),
            ref_count: RefCount::new(),
        })
    }

    /// Opens `path` as a single whole-file mapping (spec §4.4): the
    /// entire file is chunk 0, and only `position == 0` is a valid
    /// request into [`acquire_byte_store`](Self::acquire_byte_store).
    pub fn open_single_mapped(path: &Path, writable: bool) -> Result<Self> {
        let raw = if writable {
            let len = path.metadata().map(|m| m.len() as usize).unwrap_or(0);
            os::RawFile::open_writable(path, align_add(len.max(1)))?
        } else {
            os::RawFile::open_readonly(path)?
                .ok_or_else(|| BytesError::InvalidArgument("mapped file is empty".into()))?
        };

        let whole_len = raw.len();
        let canonical_path = fs::canonicalize(path)?;

        Ok(MappedFile {
            raw: Mutex::new(Some(raw)),
            canonical_path,
            writable,
            chunk_size: whole_len,
            overlap_size: 0,
            retained: true,
            single_mapped: true,
            stores: Mutex::new(Vec::new()),
            engine_owner: Owner::new(),
            ref_count: RefCount::new(),
        })
    }

    /// Size of one chunk's primary (non-overlap) region, aligned up to
    /// the OS allocation granularity.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Size of the trailing window each chunk's mapping extends into
    /// the next chunk, aligned up to the OS allocation granularity.
    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    /// Declared capacity: the fixed whole-file size for the single-mapped
    /// variant, or `usize::MAX` for the chunked variant, which grows the
    /// backing file on demand as chunks past the current length are
    /// acquired.
    pub fn capacity(&self) -> usize {
        if self.single_mapped {
            self.chunk_size
        } else {
            usize::MAX
        }
    }

    /// Acquires the chunk covering absolute file offset `position`,
    /// reserving it under `owner`. Implements the four-step protocol of
    /// spec §4.3.
    pub fn acquire_byte_store(&self, owner: Owner, position: usize) -> Result<Arc<MappedBytesStore>> {
        let chunk = position / self.chunk_size;

        if self.single_mapped && chunk != 0 {
            return Err(BytesError::InvalidArgument(
                "single-mapped file only accepts position == 0".into(),
            ));
        }

        // Step 1: under the stores lock, try the existing mapping.
        if let Some(store) = self.try_existing_chunk(chunk, owner) {
            return Ok(store);
        }

        // Step 2: outside any lock, grow the file if this chunk needs
        // room that doesn't exist yet. Deliberately dropped the stores
        // lock above before this call - growing the file under the
        // canonical-path lock can take tens of milliseconds.
        self.resize_file_if_too_small(chunk)?;

        // Step 3: re-acquire the lock, another thread may have mapped it
        // while we were growing the file.
        if let Some(store) = self.try_existing_chunk(chunk, owner) {
            return Ok(store);
        }

        // Step 4: map it ourselves.
        let mut stores = self.stores.lock().unwrap();
        if let Some(store) = Self::existing_at(&stores, chunk, owner) {
            return Ok(store);
        }

        let offset = chunk * self.chunk_size;
        let map_len = self.chunk_size + self.overlap_size;
        debug!(
            "mapping chunk {chunk} of {:?} at offset {offset}, len {map_len}",
            self.canonical_path
        );

        let view = {
            let raw = self.raw.lock().unwrap();
            let raw = raw.as_ref().ok_or_else(|| BytesError::Closed("mapped file is closed".into()))?;
            raw.view(offset, map_len, self.writable)?
        };

        let store = Arc::new(MappedBytesStore::new(view, chunk as u64, offset, self.chunk_size));
        store.reserve(owner)?;
        if self.retained {
            store.reserve(self.engine_owner)?;
        }
        // `RefCount::new()` seeds every fresh store with an implicit
        // reservation under `Owner::INIT`. From here on the chunk's real
        // owners are `owner` (and `engine_owner` if retained), so hand that
        // placeholder reservation back - otherwise it never gets released
        // and the chunk's own `perform_release` never fires.
        store.release(Owner::INIT);

        if stores.len() <= chunk {
            stores.resize(chunk + 1, None);
        }
        stores[chunk] = Some(store.clone());

        Ok(store)
    }

    fn try_existing_chunk(&self, chunk: usize, owner: Owner) -> Option<Arc<MappedBytesStore>> {
        let stores = self.stores.lock().unwrap();
        Self::existing_at(&stores, chunk, owner)
    }

    fn existing_at(
        stores: &[Option<Arc<MappedBytesStore>>],
        chunk: usize,
        owner: Owner,
    ) -> Option<Arc<MappedBytesStore>> {
        let store = stores.get(chunk)?.as_ref()?;
        if store.reserved_by(owner) {
            trace!("chunk {chunk} already held by this owner");
            Some(store.clone())
        } else if store.try_reserve(owner) {
            Some(store.clone())
        } else {
            None
        }
    }

    fn resize_file_if_too_small(&self, chunk: usize) -> Result<()> {
        let min_size = (chunk + 1) * self.chunk_size + self.overlap_size;

        let lock = path_lock_for(&self.canonical_path);
        let _guard = lock.lock().unwrap();

        let mut raw = self.raw.lock().unwrap();
        let raw = raw.as_mut().ok_or_else(|| BytesError::Closed("mapped file is closed".into()))?;

        let current_len = raw.refresh_len()?;
        if current_len < min_size {
            debug!("growing {:?} from {current_len} to {min_size} bytes", self.canonical_path);
            raw.resize(min_size)?;
        }
        Ok(())
    }
}

impl ReferenceCounted for MappedFile {
    fn resource_name(&self) -> &str {
        "mapped file"
    }

    fn ref_count_state(&self) -> &RefCount {
        &self.ref_count
    }

    fn can_release_in_background(&self) -> bool {
        false
    }

    /// Releases every chunk's engine-held reservation (if retained),
    /// surfacing any surviving external reservation as a leak (spec
    /// scenario S6), then closes the underlying file.
    fn perform_release(&self) {
        let mut stores = self.stores.lock().unwrap();
        for slot in stores.iter_mut() {
            if let Some(store) = slot.take() {
                let surviving: Vec<_> = store
                    .ref_count_state()
                    .surviving_owners()
                    .into_iter()
                    .filter(|&o| o != self.engine_owner && o != Owner::INIT)
                    .collect();
                if !surviving.is_empty() {
                    warn!(
                        "mapped chunk {} released with {} surviving external reservation(s)",
                        store.chunk_index(),
                        surviving.len()
                    );
                }
                if self.retained {
                    store.release(self.engine_owner);
                }
            }
        }
        drop(stores);

        if let Some(raw) = self.raw.lock().unwrap().take() {
            drop(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn tmp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("chronobytes-mappedfile-{name}-{}", std::process::id()))
    }

    #[test]
    fn acquires_and_reuses_chunk_for_same_owner() {
        let path = tmp("reuse");
        let engine = MappedFile::open_chunked(&path, 4096, 0, 4096, true, true).unwrap();
        let owner = Owner::new();

        let a = engine.acquire_byte_store(owner, 10).unwrap();
        let b = engine.acquire_byte_store(owner, 100).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn grows_file_to_cover_requested_chunk() {
        let path = tmp("grow");
        let engine = MappedFile::open_chunked(&path, 4096, 0, 4096, true, true).unwrap();
        let owner = Owner::new();

        let store = engine.acquire_byte_store(owner, 5 * 4096 + 10).unwrap();
        assert_eq!(store.chunk_index(), 5);
        assert!(store.capacity() >= 4096);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn overlap_window_spans_adjacent_chunks() {
        let path = tmp("overlap");
        let alignment = os::get_alignment();
        // overlap_size is aligned up to a full page, so any nonzero
        // request becomes exactly one page here.
        let engine = MappedFile::open_chunked(&path, alignment, alignment, 2 * alignment, true, true).unwrap();
        let owner = Owner::new();

        let first = engine.acquire_byte_store(owner, alignment - 8).unwrap();
        assert!(first.inside(alignment - 8, 8));
        // The overlap region extends chunk 0's window into chunk 1's range.
        assert!(first.inside(alignment, 8));
        assert!(!first.inside(2 * alignment, 8));

        let second = engine.acquire_byte_store(owner, 2 * alignment - 4).unwrap();
        assert_eq!(second.chunk_index(), 1);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn release_logs_surviving_owner_and_unmaps() {
        let path = tmp("leak");
        let engine = MappedFile::open_chunked(&path, 4096, 0, 4096, true, true).unwrap();
        let leaked_owner = Owner::new();

        let store = engine.acquire_byte_store(leaked_owner, 0).unwrap();
        assert!(store.reserved_by(leaked_owner));

        // Owner X is discarded without releasing (S6): the engine's own
        // release must still proceed and unmap the chunk.
        engine.release_last(Owner::INIT);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn chunk_refcount_reaches_zero_when_last_owner_releases() {
        let path = tmp("chunk-release");
        // Not retained: the engine keeps no reservation of its own, so the
        // acquiring owner is the chunk's only reservation.
        let engine = MappedFile::open_chunked(&path, 4096, 0, 4096, true, false).unwrap();
        let owner = Owner::new();

        let store = engine.acquire_byte_store(owner, 0).unwrap();
        assert_eq!(store.ref_count(), 1);

        store.release(owner);
        assert_eq!(store.ref_count(), 0);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn single_mapped_rejects_nonzero_position() {
        let path = tmp("single");
        {
            let f = fs::File::create(&path).unwrap();
            f.set_len(4096).unwrap();
        }
        let engine = MappedFile::open_single_mapped(&path, true).unwrap();
        let owner = Owner::new();

        assert!(engine.acquire_byte_store(owner, 0).is_ok());
        assert!(engine.acquire_byte_store(owner, 4096).is_err());

        fs::remove_file(&path).ok();
    }
}

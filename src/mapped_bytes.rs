//! A [`crate::bytes::Bytes`]-shaped cursor whose current store is
//! whichever chunk of a [`MappedFile`] currently covers its positions
//! (spec §4.5), transparently acquiring and releasing chunks as the
//! cursor crosses chunk boundaries.

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use crate::bytes::apply_skip;
use crate::error::{BytesError, Result};
use crate::mapped_file::MappedFile;
use crate::refcount::{Owner, ReferenceCounted};
use crate::store::mapped::MappedBytesStore;
use crate::store::{Store, StoreExt};

/// A [`crate::bytes::Bytes`]-shaped cursor over a [`MappedFile`], whose
/// current chunk is swapped transparently as the cursor's positions
/// cross chunk boundaries.
pub struct MappedBytes {
    file: Arc<MappedFile>,
    owner: Owner,
    store: Option<Arc<MappedBytesStore>>,
    read_position: usize,
    write_position: usize,
    read_limit: usize,
    write_limit: usize,
}

impl MappedBytes {
    /// Wraps `file`, starting cleared (see [`clear`](Self::clear)). Each
    /// `MappedBytes` is its own reservation owner, so acquiring the same
    /// chunk from two cursors is tracked as two independent reservations.
    pub fn new(file: Arc<MappedFile>) -> Self {
        let write_limit = file.capacity();
        MappedBytes {
            file,
            owner: Owner::new(),
            store: None,
            read_position: 0,
            write_position: 0,
            read_limit: write_limit,
            write_limit,
        }
    }

    /// Next byte to be read.
    pub fn read_position(&self) -> usize {
        self.read_position
    }

    /// Next byte to be written.
    pub fn write_position(&self) -> usize {
        self.write_position
    }

    /// Exclusive upper bound for reads.
    pub fn read_limit(&self) -> usize {
        self.read_limit
    }

    /// Exclusive upper bound for writes.
    pub fn write_limit(&self) -> usize {
        self.write_limit
    }

    /// `readLimit - readPosition`.
    pub fn read_remaining(&self) -> usize {
        self.read_limit.saturating_sub(self.read_position)
    }

    /// Sets `readPosition` directly, enforcing `p ≤ readLimit`.
    pub fn set_read_position(&mut self, p: usize) -> Result<()> {
        if p > self.read_limit {
            return Err(BytesError::InvalidArgument(format!(
                "readPosition {p} past readLimit {}",
                self.read_limit
            )));
        }
        self.read_position = p;
        Ok(())
    }

    /// Resets read/write positions to 0 and `writeLimit` to the backing
    /// file's capacity.
    pub fn clear(&mut self) {
        self.read_position = 0;
        self.write_position = 0;
        self.write_limit = self.file.capacity();
        self.read_limit = self.write_limit;
    }

    /// Sets `readPosition` to `p` and grows `writeLimit` to `p + r` if
    /// needed, so a subsequent bulk read of `r` bytes at `p` is in range.
    pub fn read_position_remaining(&mut self, p: usize, r: usize) -> Result<()> {
        self.read_position = p;
        let need = p.saturating_add(r);
        if need > self.write_limit {
            self.write_limit = need;
        }
        if need > self.read_limit {
            self.read_limit = need;
        }
        Ok(())
    }

    /// Advances `readPosition` by `n`, which may be negative.
    pub fn read_skip(&mut self, n: i64) -> Result<()> {
        let next = apply_skip(self.read_position, n)?;
        if next > self.read_limit {
            return Err(BytesError::BufferUnderflow(format!(
                "readSkip({n}) would move readPosition to {next}, past readLimit {}",
                self.read_limit
            )));
        }
        self.read_position = next;
        Ok(())
    }

    /// Advances `writePosition` by `n`, growing `writeLimit`/`readLimit`
    /// if needed since the backing file always grows on demand.
    pub fn write_skip(&mut self, n: i64) -> Result<()> {
        let next = apply_skip(self.write_position, n)?;
        self.write_position = next;
        if next > self.write_limit {
            self.write_limit = next;
        }
        if next > self.read_limit {
            self.read_limit = next;
        }
        Ok(())
    }

    fn check_read(&self, size: usize) -> Result<usize> {
        let p = self.read_position;
        if p + size > self.read_limit {
            return Err(BytesError::BufferUnderflow(format!(
                "read of {size} bytes at {p} exceeds readLimit {}",
                self.read_limit
            )));
        }
        Ok(p)
    }

    fn check_write(&mut self, size: usize) -> Result<usize> {
        let p = self.write_position;
        let end = p + size;
        if end > self.write_limit {
            self.write_limit = end;
        }
        if end > self.read_limit {
            self.read_limit = end;
        }
        Ok(p)
    }

    /// Implements the three-step chunk hand-off of spec §4.5: if the
    /// current store already covers `[p, p+n)` (including its trailing
    /// overlap), reuse it; otherwise acquire the chunk that does, release
    /// whichever store we held before (if different), and install the
    /// new one.
    fn ensure_chunk(&mut self, p: usize, n: usize) -> Result<&Arc<MappedBytesStore>> {
        let needs_new = match &self.store {
            Some(s) => !s.inside(p, n),
            None => true,
        };

        if needs_new {
            let new_store = self.file.acquire_byte_store(self.owner, p)?;
            if let Some(old) = self.store.take() {
                if !Arc::ptr_eq(&old, &new_store) {
                    old.release(self.owner);
                }
            }
            self.store = Some(new_store);
        }

        Ok(self.store.as_ref().unwrap())
    }

    /// Cache-line-tail-aware volatile read of the `i32` at absolute file
    /// offset `p`, without moving either position. If the 4 bytes lie
    /// entirely within one 64-byte cache line (`address & 63 <= 60`), an
    /// unfenced load preceded by an acquire fence is safe and cheaper
    /// than a fully serialized volatile read, which straddling accesses
    /// still need.
    pub fn peek_volatile_int(&mut self, p: usize) -> Result<i32> {
        let store = self.ensure_chunk(p, 4)?.clone();
        let rel = p - store.chunk_offset();

        let addr = store.address_for_read(rel)?;
        if addr & 63 <= 60 {
            fence(Ordering::Acquire);
            let ptr = store.as_ptr()?;
            // SAFETY: `ensure_chunk` guaranteed `rel..rel+4` is inside the
            // current chunk's mapped window.
            Ok(unsafe { std::ptr::read_unaligned(ptr.add(rel) as *const i32) })
        } else {
            store.read_volatile_i32(rel)
        }
    }
}

macro_rules! mapped_accessors {
    ($read:ident, $write:ident, $store_read:ident, $store_write:ident, $ty:ty) => {
        /// Reads and advances `readPosition` by `size_of::<$ty>()`,
        /// acquiring whichever chunk covers the read if needed.
        pub fn $read(&mut self) -> Result<$ty> {
            let size = std::mem::size_of::<$ty>();
            let p = self.check_read(size)?;
            let store = self.ensure_chunk(p, size)?.clone();
            let rel = p - store.chunk_offset();
            let value = store.$store_read(rel)?;
            self.read_position += size;
            Ok(value)
        }

        /// Writes and advances `writePosition` by `size_of::<$ty>()`,
        /// acquiring whichever chunk covers the write if needed.
        pub fn $write(&mut self, value: $ty) -> Result<()> {
            let size = std::mem::size_of::<$ty>();
            let p = self.check_write(size)?;
            let store = self.ensure_chunk(p, size)?.clone();
            let rel = p - store.chunk_offset();
            store.$store_write(rel, value)?;
            self.write_position += size;
            Ok(())
        }
    };
}

impl MappedBytes {
    mapped_accessors!(read_u8, write_u8, read_u8, write_u8, u8);
    mapped_accessors!(read_i16, write_i16, read_i16, write_i16, i16);
    mapped_accessors!(read_u16, write_u16, read_u16, write_u16, u16);
    mapped_accessors!(read_i32, write_i32, read_i32, write_i32, i32);
    mapped_accessors!(read_u32, write_u32, read_u32, write_u32, u32);
    mapped_accessors!(read_i64, write_i64, read_i64, write_i64, i64);
    mapped_accessors!(read_u64, write_u64, read_u64, write_u64, u64);
    mapped_accessors!(read_f32, write_f32, read_f32, write_f32, f32);
    mapped_accessors!(read_f64, write_f64, read_f64, write_f64, f64);

    /// Writes `bytes` one at a time, so each byte independently triggers
    /// chunk hand-off as `writePosition` crosses chunk boundaries.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for &b in bytes {
            self.write_u8(b)?;
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes one at a time, mirroring [`write_bytes`](Self::write_bytes).
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        for slot in buf.iter_mut() {
            *slot = self.read_u8()?;
        }
        Ok(())
    }
}

impl Drop for MappedBytes {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            store.release(self.owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapped_file::MappedFile;
    use std::path::PathBuf;

    fn tmp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("chronobytes-mappedbytes-{name}-{}", std::process::id()))
    }

    #[test]
    fn s3_typed_writes_cross_chunk_and_overlap_boundaries() {
        let path = tmp("s3");
        let alignment = crate::os::get_alignment();
        let chunk_size = alignment;
        let overlap_size = alignment;
        let capacity = 20 * chunk_size;

        let file = Arc::new(
            MappedFile::open_chunked(&path, chunk_size, overlap_size, capacity, true, true).unwrap(),
        );

        let start = chunk_size - 96;
        {
            let mut writer = MappedBytes::new(file.clone());
            writer.set_read_position(0).unwrap();
            writer.write_skip(start as i64).unwrap();
            for i in 0..1000i64 {
                writer.write_i64(i).unwrap();
            }
        }

        let mut reader = MappedBytes::new(file.clone());
        reader.set_read_position(start).unwrap();
        for i in 0..1000i64 {
            assert_eq!(reader.read_i64().unwrap(), i, "mismatch at index {i}");
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn clear_resets_positions_and_write_limit() {
        let path = tmp("clear");
        let file = Arc::new(MappedFile::open_chunked(&path, 4096, 0, 4096, true, true).unwrap());
        let mut bytes = MappedBytes::new(file);

        bytes.write_u64(1).unwrap();
        bytes.clear();
        assert_eq!(bytes.read_position(), 0);
        assert_eq!(bytes.write_position(), 0);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn peek_volatile_int_matches_plain_read() {
        let path = tmp("peek");
        let file = Arc::new(MappedFile::open_chunked(&path, 4096, 0, 4096, true, true).unwrap());
        let mut bytes = MappedBytes::new(file);

        bytes.write_i32(0x1234_5678).unwrap();
        let peeked = bytes.peek_volatile_int(0).unwrap();
        assert_eq!(peeked, 0x1234_5678);

        std::fs::remove_file(&path).ok();
    }
}

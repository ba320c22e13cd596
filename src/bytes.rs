//! Position/limit streaming cursor over a [`BytesStore`] (spec §4.2).

use crate::error::{BytesError, Result};
use crate::store::{BytesStore, Store, StoreExt};

/// A position/limit view over a single [`BytesStore`].
///
/// Holds four monotone-ish offsets: `read_position ≤ write_position ≤
/// write_limit ≤ capacity`, and `read_position ≤ read_limit ≤ write_limit`.
/// Not safe for concurrent mutation - exactly one thread is expected to
/// hold and advance a given `Bytes` at a time (spec §5).
pub struct Bytes {
    store: BytesStore,
    start: usize,
    read_position: usize,
    write_position: usize,
    read_limit: usize,
    write_limit: usize,
}

impl Bytes {
    /// Wraps `store`, starting cleared: both positions at 0, `read_limit`
    /// and `write_limit` at the store's current capacity.
    pub fn new(store: BytesStore) -> Self {
        let capacity = store.real_capacity();
        Bytes {
            store,
            start: 0,
            read_position: 0,
            write_position: 0,
            read_limit: 0,
            write_limit: capacity,
        }
    }

    /// The lowest valid position, per spec §3 (`start()`).
    pub fn start(&self) -> usize {
        self.start
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

    /// The underlying store.
    pub fn store(&self) -> &BytesStore {
        &self.store
    }

    /// Sets `readPosition` directly, enforcing `start() ≤ p ≤ readLimit`.
    pub fn set_read_position(&mut self, p: usize) -> Result<()> {
        if p < self.start || p > self.read_limit {
            return Err(BytesError::InvalidArgument(format!(
                "readPosition {p} outside [{}, {}]",
                self.start, self.read_limit
            )));
        }
        self.read_position = p;
        Ok(())
    }

    /// Sets `writeLimit` directly, enforcing `writePosition ≤ l ≤ capacity`.
    pub fn set_write_limit(&mut self, l: usize) -> Result<()> {
        if l < self.write_position || l > self.store.capacity() {
            return Err(BytesError::InvalidArgument(format!(
                "writeLimit {l} outside [{}, {}]",
                self.write_position,
                self.store.capacity()
            )));
        }
        self.write_limit = l;
        Ok(())
    }

    /// Resets all positions to `start()`, `readLimit` to `start()` (nothing
    /// is readable until written again) and `writeLimit` to the store's
    /// current capacity.
    pub fn clear(&mut self) {
        self.read_position = self.start;
        self.write_position = self.start;
        self.read_limit = self.start;
        self.write_limit = self.store.capacity();
    }

    /// Advances `readPosition` by `n`. Negative `n` is allowed as long as
    /// the result does not go below `start()`.
    pub fn read_skip(&mut self, n: i64) -> Result<()> {
        let next = apply_skip(self.read_position, n)?;
        if next > self.read_limit {
            return Err(BytesError::BufferUnderflow(format!(
                "readSkip({n}) would move readPosition to {next}, past readLimit {}",
                self.read_limit
            )));
        }
        if next < self.start {
            return Err(BytesError::BufferUnderflow(format!(
                "readSkip({n}) would move readPosition below start {}",
                self.start
            )));
        }
        self.read_position = next;
        Ok(())
    }

    /// Advances `writePosition` by `n`. For large lazy skips (as used by
    /// pretouching a mapped cursor) only the first `min(128, n)` bytes are
    /// bounds-checked; the remainder is trusted (spec §4.2, open question 4).
    pub fn write_skip(&mut self, n: i64) -> Result<()> {
        let next = apply_skip(self.write_position, n)?;
        let checked_end = self
            .write_position
            .saturating_add((n.max(0) as u64).min(128) as usize);

        if self.store.is_elastic() {
            self.store.ensure_writable(checked_end)?;
        } else if checked_end > self.write_limit {
            return Err(BytesError::BufferOverflow(format!(
                "writeSkip({n}) would move writePosition to {next}, past writeLimit {}",
                self.write_limit
            )));
        }

        self.write_position = next;
        if self.write_position > self.write_limit {
            self.write_limit = self.write_position;
        }
        if self.write_position > self.read_limit {
            self.read_limit = self.write_position;
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
        if self.store.is_elastic() {
            self.store.ensure_writable(end)?;
            if end > self.write_limit {
                self.write_limit = end;
            }
        } else if end > self.write_limit {
            return Err(BytesError::BufferOverflow(format!(
                "write of {size} bytes at {p} exceeds writeLimit {}",
                self.write_limit
            )));
        }
        // A write moves the high-water mark of what's readable back, the
        // same "flip as you go" behavior every typed write implies: bytes
        // just written are immediately visible to a subsequent read at the
        // same position.
        if end > self.read_limit {
            self.read_limit = end;
        }
        Ok(p)
    }

    /// Detached byte-wise copy of `[readPosition, readLimit)` into a fresh
    /// heap-backed store.
    pub fn copy(&self) -> Result<BytesStore> {
        let remaining = self.read_remaining();
        let copy = BytesStore::heap(remaining.max(1));
        if remaining > 0 {
            copy.write_from_store(0, &self.store, self.read_position, remaining)?;
        }
        Ok(copy)
    }
}

pub(crate) fn apply_skip(position: usize, n: i64) -> Result<usize> {
    if n >= 0 {
        position
            .checked_add(n as usize)
            .ok_or_else(|| BytesError::InvalidArgument(format!("skip overflowed: {position} + {n}")))
    } else {
        let back = (-n) as usize;
        position
            .checked_sub(back)
            .ok_or_else(|| BytesError::BufferUnderflow(format!("skip({n}) underflowed position {position}")))
    }
}

macro_rules! cursor_accessors {
    ($read:ident, $write:ident, $store_read:ident, $store_write:ident, $ty:ty) => {
        /// Reads and advances `readPosition` by `size_of::<$ty>()`.
        pub fn $read(&mut self) -> Result<$ty> {
            let size = std::mem::size_of::<$ty>();
            let p = self.check_read(size)?;
            let value = self.store.$store_read(p)?;
            self.read_position += size;
            Ok(value)
        }

        /// Writes and advances `writePosition` by `size_of::<$ty>()`.
        pub fn $write(&mut self, value: $ty) -> Result<()> {
            let size = std::mem::size_of::<$ty>();
            let p = self.check_write(size)?;
            self.store.$store_write(p, value)?;
            self.write_position += size;
            Ok(())
        }
    };
}

impl Bytes {
    cursor_accessors!(read_u8, write_u8, read_u8, write_u8, u8);
    cursor_accessors!(read_i16, write_i16, read_i16, write_i16, i16);
    cursor_accessors!(read_u16, write_u16, read_u16, write_u16, u16);
    cursor_accessors!(read_i32, write_i32, read_i32, write_i32, i32);
    cursor_accessors!(read_u32, write_u32, read_u32, write_u32, u32);
    cursor_accessors!(read_i64, write_i64, read_i64, write_i64, i64);
    cursor_accessors!(read_u64, write_u64, read_u64, write_u64, u64);
    cursor_accessors!(read_f32, write_f32, read_f32, write_f32, f32);
    cursor_accessors!(read_f64, write_f64, read_f64, write_f64, f64);

    /// Writes `bytes` at `writePosition`, advancing it by `bytes.len()`.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let p = self.check_write(bytes.len())?;
        self.store.write_bytes(p, bytes)?;
        self.write_position += bytes.len();
        Ok(())
    }

    /// Reads `buf.len()` bytes from `readPosition` into `buf`, advancing it.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let p = self.check_read(buf.len())?;
        buf.copy_from_slice(&self.store.as_slice()?[p..p + buf.len()]);
        self.read_position += buf.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BytesStore;

    #[test]
    fn typed_round_trip_advances_positions() {
        let mut bytes = Bytes::new(BytesStore::native_fixed(64).unwrap());
        bytes.write_i32(42).unwrap();
        bytes.write_f64(3.5).unwrap();
        assert_eq!(bytes.write_position(), 12);

        bytes.set_read_position(0).unwrap();
        assert_eq!(bytes.read_i32().unwrap(), 42);
        assert_eq!(bytes.read_f64().unwrap(), 3.5);
        assert_eq!(bytes.read_position(), bytes.write_position());
    }

    #[test]
    fn clear_resets_to_start_and_capacity() {
        let mut bytes = Bytes::new(BytesStore::heap(16));
        bytes.write_u64(1).unwrap();
        bytes.clear();
        assert_eq!(bytes.read_position(), bytes.start());
        assert_eq!(bytes.write_position(), bytes.start());
        assert_eq!(bytes.read_limit(), bytes.start());
        assert_eq!(bytes.write_limit(), 16);

        // Stale bytes from before the clear must not be readable.
        assert!(bytes.read_u64().is_err());
        bytes.write_u64(2).unwrap();
        bytes.set_read_position(0).unwrap();
        assert_eq!(bytes.read_u64().unwrap(), 2);
    }

    #[test]
    fn write_past_limit_on_fixed_store_overflows() {
        let mut bytes = Bytes::new(BytesStore::heap(4));
        assert!(bytes.write_u64(1).is_err());
    }

    #[test]
    fn elastic_cursor_grows_on_write() {
        let mut bytes = Bytes::new(BytesStore::native_elastic(8).unwrap());
        for i in 0..1024u32 {
            bytes.write_u8((i & 0xFF) as u8).unwrap();
        }
        bytes.set_read_position(0).unwrap();
        for i in 0..1024u32 {
            assert_eq!(bytes.read_u8().unwrap(), (i & 0xFF) as u8);
        }
    }

    #[test]
    fn read_skip_negative_respects_start() {
        let mut bytes = Bytes::new(BytesStore::heap(16));
        bytes.write_u64(0).unwrap();
        bytes.set_read_position(8).unwrap();
        bytes.read_skip(-8).unwrap();
        assert_eq!(bytes.read_position(), 0);
        assert!(bytes.read_skip(-1).is_err());
    }

    #[test]
    fn copy_detaches_readable_remaining() {
        let mut bytes = Bytes::new(BytesStore::heap(16));
        bytes.write_bytes(b"abcdefgh").unwrap();
        bytes.set_read_position(2).unwrap();
        let copy = bytes.copy().unwrap();
        assert_eq!(copy.real_capacity(), 6);
        assert_eq!(&copy.as_slice().unwrap()[..6], b"cdefgh");
    }
}

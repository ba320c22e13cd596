//! A low-level library for high-throughput, off-heap byte buffers and
//! chunked memory-mapped files.
//!
//! *chronobytes* gives serialization frameworks and log/queue engines
//! sub-microsecond, random-access binary record access over three kinds of
//! backing storage — off-heap native allocations, heap `Vec<u8>` arenas,
//! and lazily-mapped chunks of a growable file — through one cursor type,
//! [`Bytes`], plus its mapped-file-aware sibling [`MappedBytes`].
//!
//! *CAUTION:* The library uses a lot of *unsafe* and OS-specific APIs.
//! Do not use it where animals may be harmed. Any help with testing and
//! reviewing is much appreciated.
//!
//! Supported platforms (as far as a small bunch of tests indicate):
//!
//! * Linux (works on my machine)
//! * MacOS (I suppose for its unixness)
//! * Windows (works on Windows 10 inside VirtualBox)
//!
//! Dual-licensed under MIT and [UNLICENSE](https://unlicense.org/). Feel free
//! to use it, contribute or spread the word.
//!
//! # Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! chronobytes = "0.1"
//! ```
//!
//! # Stores and cursors
//!
//! [`BytesStore`] is a tagged union over the four backing variants
//! (native, heap, mapped, empty); [`Bytes`] is a position/limit cursor
//! over one. Elastic stores (`BytesStore::native_elastic`,
//! `BytesStore::heap_elastic`) grow by 3/2 on overflow instead of
//! failing.
//!
//! ```
//! use chronobytes::{Bytes, BytesStore};
//!
//! let mut bytes = Bytes::new(BytesStore::native_fixed(16).unwrap());
//! bytes.write_i64(42).unwrap();
//! bytes.set_read_position(0).unwrap();
//! assert_eq!(bytes.read_i64().unwrap(), 42);
//! ```
//!
//! # Mapped files
//!
//! [`MappedFile`] maps a growable file in fixed-size, optionally
//! overlapping chunks on demand; [`MappedBytes`] is the cursor that
//! transparently hands itself off between chunks as it crosses their
//! boundaries.
//!
//! # Codecs
//!
//! [`write_stop_bit`]/[`read_stop_bit`] implement the stop-bit variable
//! length integer encoding; [`write_8bit_string`]/[`write_utf8_string`]
//! and their `read_*` counterparts implement the length-prefixed string
//! encodings built on top of it. [`to_decimal`]/[`format_decimal`]
//! implement the float-to-decimal-digits codec.
//!
//! # Errors
//!
//! Every fallible operation returns [`Result<T>`](crate::Result), whose
//! error type [`BytesError`] distinguishes buffer underflow/overflow,
//! invalid arguments, use of a released (closed) resource, threading
//! violations, I/O failure, and unsupported operations.
//!
//! # Reference counting
//!
//! Both mapped chunks and `MappedFile` itself use the opaque-owner
//! reference counting scheme in [`ReferenceCounted`]/[`Owner`]: mapped
//! unmaps always happen synchronously, but off-heap native frees may be
//! deferred to a background thread.

#![doc(html_root_url = "https://docs.rs/chronobytes/0.1.0")]
#![deny(missing_docs)]

mod align;
mod bytes;
mod codec;
mod compare;
mod decimal;
mod deferred;
mod error;
mod ext;
mod mapped_bytes;
mod mapped_file;
mod os;
mod refcount;
mod store;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use bytes::Bytes;
pub use codec::{
    read_8bit_string, read_stop_bit, read_stop_bit_u64, read_utf8_string, write_8bit_string,
    write_stop_bit, write_stop_bit_u64, write_utf8_string,
};
pub use decimal::{big_decimal, format_decimal, lite, to_decimal, Decimal};
pub use error::{BytesError, Result};
pub use mapped_bytes::MappedBytes;
pub use mapped_file::MappedFile;
pub use os::granularity;
pub use refcount::{Owner, ReferenceCounted};
pub use store::{BytesStore, EmptyStore, HeapStore, MappedBytesStore, NativeStore, Store, StoreExt};

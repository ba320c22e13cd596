//! Error kinds shared by every store, cursor and mapped-file operation.

use std::io;

/// The error type returned by fallible operations across the crate.
///
/// Programmer-error invariant violations (e.g. breaking the single-writer
/// cursor contract) still panic; only conditions a caller can reasonably
/// recover from are represented here.
#[derive(thiserror::Error, Debug)]
pub enum BytesError {
    /// A read would advance past `read_limit`, or a skip would move
    /// `read_position` below `start()`.
    #[error("buffer underflow: {0}")]
    BufferUnderflow(String),

    /// A write would advance past `write_limit` on a non-elastic store, or
    /// an elastic store failed to grow far enough to satisfy the write.
    #[error("buffer overflow: {0}")]
    BufferOverflow(String),

    /// A negative offset/length was supplied where one must be
    /// non-negative, or a requested capacity is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The resource's reference count has already reached zero.
    #[error("resource closed: {0}")]
    Closed(String),

    /// Diagnostic-only: a second thread entered a single-writer method.
    #[error("threading violation: {0}")]
    ThreadingViolation(String),

    /// Wraps an OS error from the file/channel path.
    #[error("i/o error at {path}: {source}")]
    Io {
        /// Path the failing operation was performed against, when known.
        path: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A primitive that is meaningless on this store variant (e.g.
    /// `address_for_read` on a heap store).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The stop-bit decoder consumed more than 10 continuation bytes.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl From<io::Error> for BytesError {
    fn from(source: io::Error) -> Self {
        BytesError::Io {
            path: String::new(),
            source,
        }
    }
}

impl BytesError {
    /// Attaches a path to an [`BytesError::Io`], or wraps a bare `io::Error`
    /// with one if it didn't have one yet.
    pub fn with_path(self, path: impl Into<String>) -> Self {
        match self {
            BytesError::Io { source, .. } => BytesError::Io {
                path: path.into(),
                source,
            },
            other => other,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BytesError>;

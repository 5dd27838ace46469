//! Error types shared by every layer of the stream crate.

use std::io;

use thiserror::Error;

/// Reasons a stream header is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("bad magic number {found:#010x}")]
    BadMagic { found: u32 },

    #[error("format version {found} not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    /// Header length, block geometry or file length disagree with each other.
    #[error("corrupt header: {0}")]
    CorruptLength(String),

    #[error("stream holds {found}-byte items, caller expects {expected}")]
    ItemSizeMismatch { found: usize, expected: usize },

    #[error("unknown back-end tag {0}")]
    UnknownBackend(u32),
}

/// Every failure the stream layer can report.
///
/// End of stream on ordinary reads is *not* an error: [`crate::TypedStream::read_item`]
/// returns `Ok(None)`. [`StreamError::EndOfStream`] is reserved for helpers
/// that were asked for an exact number of items and ran dry.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("io error: {0}")]
    Io(#[source] io::Error),

    #[error("end of stream")]
    EndOfStream,

    #[error("stream is read-only")]
    ReadOnly,

    #[error("os error: {0}")]
    Os(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("offset {offset} out of range (length {len})")]
    OffsetOutOfRange { offset: u64, len: u64 },

    #[error("no space left on device")]
    OutOfSpace,

    /// The operation would break a sub-stream's bounds, or is not allowed
    /// on a sub-stream at all.
    #[error("operation conflicts with a sub-stream")]
    StreamIsSubstream,

    #[error("stream is write-only")]
    WriteOnly,

    #[error("bad header: {0}")]
    BadHeader(#[from] HeaderError),

    #[error("invalid placeholder block id {0}")]
    InvalidPlaceholder(u64),

    /// Every way of a cache set is pinned, so nothing can be evicted.
    #[error("block cache exhausted: all {ways} entries of set {set} are pinned")]
    CacheExhausted { set: usize, ways: usize },

    #[error("open stream ceiling of {0} reached")]
    HandlesExhausted(usize),
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        #[cfg(unix)]
        if e.raw_os_error() == Some(libc::ENOSPC) {
            return StreamError::OutOfSpace;
        }
        match e.kind() {
            io::ErrorKind::PermissionDenied => StreamError::PermissionDenied(e.to_string()),
            io::ErrorKind::OutOfMemory => StreamError::Memory(e.to_string()),
            _ => StreamError::Io(e),
        }
    }
}

/// Result alias used throughout the stream crate.
pub type Result<T> = std::result::Result<T, StreamError>;

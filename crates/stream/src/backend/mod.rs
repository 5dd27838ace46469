//! Block transfer back ends.
//!
//! A back end moves whole blocks between a stream file and memory. It knows
//! the block geometry and the logical item count, nothing about item types.
//!
//! ```text
//! ┌──────────────────────┐  offset 0
//! │ header block         │  physical_block_size bytes, see `header`
//! ├──────────────────────┤  data_offset
//! │ block 0              │  block_bytes
//! │ block 1              │
//! │ ...                  │
//! │ block n-1 (partial?) │  may be short; item_count decides
//! └──────────────────────┘
//! ```
//!
//! Three variants share the [`BlockBackend`] contract: [`FileBackend`]
//! (positional reads and writes), [`MmapBackend`] (memory-mapped) and
//! [`CompressedBackend`] which frames and compresses each block on top of
//! either of the other two.

mod compressed;
mod file;
mod mmap;

pub use compressed::{uncompressed_length, CompressedBackend, Compressor, ZstdCompressor, FRAME_BYTES};
pub use file::FileBackend;
pub use mmap::MmapBackend;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use config::{BackendKind, Compression};
use log::debug;

use crate::context::{Context, HandleLease};
use crate::error::{HeaderError, Result, StreamError};
use crate::header::{BackendType, StreamHeader, HEADER_BYTES};

/// Index of a data block within a stream file, starting at 0.
pub type BlockId = u64;

/// How items map onto blocks and blocks onto the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub item_size: usize,
    /// Usable bytes per block as seen by the cache.
    pub block_bytes: usize,
    pub items_per_block: usize,
    /// File offset of block 0.
    pub data_offset: u64,
}

impl Geometry {
    pub fn new(item_size: usize, block_bytes: usize, data_offset: u64) -> Result<Self> {
        if item_size == 0 || item_size > block_bytes {
            return Err(HeaderError::CorruptLength(format!(
                "item size {} does not fit a {}-byte block",
                item_size, block_bytes
            ))
            .into());
        }
        Ok(Self {
            item_size,
            block_bytes,
            items_per_block: block_bytes / item_size,
            data_offset,
        })
    }

    pub fn block_of(&self, item: u64) -> BlockId {
        item / self.items_per_block as u64
    }

    /// Byte offset of `item` inside its block.
    pub fn slot_of(&self, item: u64) -> usize {
        (item % self.items_per_block as u64) as usize * self.item_size
    }

    /// Number of blocks needed to hold `items` items.
    pub fn blocks_for(&self, items: u64) -> u64 {
        items.div_ceil(self.items_per_block as u64)
    }

    /// Meaningful bytes in block `id` for a stream of `items` items.
    pub fn bytes_in_block(&self, id: BlockId, items: u64) -> usize {
        let first = id * self.items_per_block as u64;
        let n = items.saturating_sub(first).min(self.items_per_block as u64);
        n as usize * self.item_size
    }
}

/// Raw block I/O over one stream file.
///
/// Implementations are not thread-safe; one stream owns its back end.
pub trait BlockBackend {
    fn kind(&self) -> BackendType;

    fn path(&self) -> &Path;

    fn geometry(&self) -> Geometry;

    fn is_read_only(&self) -> bool;

    /// Logical length in items, as it will be recorded in the header.
    fn item_len(&self) -> u64;

    /// Updates the logical length without touching storage.
    fn set_item_len(&mut self, items: u64);

    /// Reads block `id` into `buf` and returns how many bytes were filled.
    /// A block past the end of the file fills nothing; the last block of a
    /// file may come back short.
    fn read_block(&mut self, id: BlockId, buf: &mut [u8]) -> Result<usize>;

    /// Writes `buf` (at most one block) at block `id`.
    fn write_block(&mut self, id: BlockId, buf: &[u8]) -> Result<()>;

    /// Sets the storage to exactly `blocks` block slots. New slots read back
    /// as zeros.
    fn resize_blocks(&mut self, blocks: u64) -> Result<()>;

    /// Releases the storage behind one block. Its contents become
    /// unspecified; the logical length does not change.
    fn discard_block(&mut self, id: BlockId) -> Result<()>;

    /// Persists the header and pushes buffered data to the OS.
    fn flush(&mut self) -> Result<()>;

    /// Changes the logical length to `items`, growing or shrinking storage
    /// to whole blocks.
    fn truncate(&mut self, items: u64) -> Result<()> {
        if self.is_read_only() {
            return Err(StreamError::ReadOnly);
        }
        let blocks = self.geometry().blocks_for(items);
        self.resize_blocks(blocks)?;
        self.set_item_len(items);
        Ok(())
    }

    /// Flushes and gives the handle back to the process budget.
    fn close(self: Box<Self>) -> Result<()>;
}

/// The file, header and handle lease shared by the raw back ends.
#[derive(Debug)]
pub(crate) struct BackingFile {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
    pub(crate) header: StreamHeader,
    pub(crate) read_only: bool,
    _lease: HandleLease,
}

impl BackingFile {
    /// Creates (or truncates) `path` and writes a fresh header.
    pub(crate) fn create(path: &Path, header: StreamHeader, lease: HandleLease) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(header.data_offset())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.encode())?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            read_only: false,
            _lease: lease,
        })
    }

    /// Opens `path` and reads its header. The caller validates it.
    pub(crate) fn open(path: &Path, read_only: bool, lease: HandleLease) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        let mut buf = [0u8; HEADER_BYTES];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        let header = StreamHeader::decode(&buf[..filled])?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            read_only,
            _lease: lease,
        })
    }

    pub(crate) fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub(crate) fn block_offset(&self, block_bytes: usize, id: BlockId) -> u64 {
        self.header.data_offset() + id * block_bytes as u64
    }

    /// Rewrites the header in place through the file handle.
    pub(crate) fn write_header(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.encode())?;
        Ok(())
    }
}

/// Hands a byte range back to the file system where that is supported.
#[cfg(target_os = "linux")]
pub(crate) fn punch_hole(file: &File, offset: u64, len: u64) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let ret = unsafe {
        libc::fallocate(
            file.as_raw_fd(),
            libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
            offset as libc::off_t,
            len as libc::off_t,
        )
    };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        // Not every file system can punch holes; the block is simply kept.
        if err.raw_os_error() == Some(libc::EOPNOTSUPP) {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn punch_hole(_file: &File, _offset: u64, _len: u64) -> Result<()> {
    Ok(())
}

fn backend_type(kind: BackendKind, compression: Compression) -> BackendType {
    match (kind, compression) {
        (BackendKind::File, Compression::None) => BackendType::File,
        (BackendKind::Mmap, Compression::None) => BackendType::Mmap,
        (BackendKind::File, Compression::Zstd { .. }) => BackendType::CompressedFile,
        (BackendKind::Mmap, Compression::Zstd { .. }) => BackendType::CompressedMmap,
    }
}

/// Creates a new stream file at `path` using the back end and compression
/// chosen in the context's configuration.
pub fn create(ctx: &Context, path: &Path, item_size: usize) -> Result<Box<dyn BlockBackend>> {
    let cfg = ctx.config();
    create_with(
        ctx,
        path,
        item_size,
        backend_type(cfg.backend, cfg.compression),
    )
}

/// Creates a new stream file with an explicit back-end type.
pub fn create_with(
    ctx: &Context,
    path: &Path,
    item_size: usize,
    kind: BackendType,
) -> Result<Box<dyn BlockBackend>> {
    let cfg = ctx.config();
    let header = StreamHeader::new(
        kind,
        item_size,
        cfg.physical_block_size,
        cfg.logical_block_size(),
    );
    header.validate(Some(item_size))?;
    if kind.is_compressed() && item_size > cfg.logical_block_size() - FRAME_BYTES {
        return Err(HeaderError::CorruptLength(format!(
            "item size {} leaves no room for the block frame",
            item_size
        ))
        .into());
    }

    let lease = ctx.acquire_handle()?;
    let backing = BackingFile::create(path, header, lease)?;
    debug!("created stream {} ({:?})", path.display(), kind);
    wrap(backing, kind, ctx)
}

/// Opens an existing stream file. The back end is rebuilt from the header's
/// type tag, so callers never need to know how a file was written.
pub fn open(
    ctx: &Context,
    path: &Path,
    read_only: bool,
    expected_item_size: Option<usize>,
) -> Result<Box<dyn BlockBackend>> {
    let lease = ctx.acquire_handle()?;
    let backing = BackingFile::open(path, read_only, lease)?;
    backing.header.validate(expected_item_size)?;
    let kind = backing.header.backend_type()?;

    let raw = Geometry::new(
        backing.header.item_size as usize,
        backing.header.logical_block_size as usize,
        backing.header.data_offset(),
    )?;
    let count = backing.header.item_count;
    let min_len = if kind.is_compressed() {
        let blocks = compressed::payload_geometry(&raw)?.blocks_for(count);
        match blocks {
            0 => raw.data_offset,
            n => raw.data_offset + (n - 1) * raw.block_bytes as u64 + FRAME_BYTES as u64,
        }
    } else {
        let blocks = raw.blocks_for(count);
        match blocks {
            0 => raw.data_offset,
            n => {
                raw.data_offset
                    + (n - 1) * raw.block_bytes as u64
                    + raw.bytes_in_block(n - 1, count) as u64
            }
        }
    };
    let file_len = backing.file_len()?;
    if file_len < min_len {
        return Err(HeaderError::CorruptLength(format!(
            "{} items need at least {} bytes, file has {}",
            count, min_len, file_len
        ))
        .into());
    }

    debug!("opened stream {} ({:?}, {} items)", path.display(), kind, count);
    wrap(backing, kind, ctx)
}

fn wrap(backing: BackingFile, kind: BackendType, ctx: &Context) -> Result<Box<dyn BlockBackend>> {
    let raw: Box<dyn BlockBackend> = match kind.raw() {
        BackendType::Mmap => Box::new(MmapBackend::from_backing(backing)?),
        _ => Box::new(FileBackend::from_backing(backing)?),
    };
    if !kind.is_compressed() {
        return Ok(raw);
    }
    let level = match ctx.config().compression {
        Compression::Zstd { level } => level,
        Compression::None => config::DEFAULT_ZSTD_LEVEL,
    };
    Ok(Box::new(CompressedBackend::new(
        raw,
        kind,
        Box::new(ZstdCompressor::new(level)),
    )?))
}

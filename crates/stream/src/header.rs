//! On-disk stream header.
//!
//! Every stream file starts with one physical block holding the header. The
//! first [`HEADER_BYTES`] bytes carry the fields below, the rest of the block
//! is zero. Data blocks follow at offset `physical_block_size`.
//!
//! ```text
//! [magic: u32 LE = "UTST"][version: u32 LE][backend: u32 LE][header_len: u32 LE]
//! [item_size: u64 LE][physical_block: u64 LE][logical_block: u64 LE][item_count: u64 LE]
//! ```
//!
//! `item_count` is the logical end of file. The last data block may be
//! partially filled; readers must never infer the length from the file size.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::HeaderError;

/// Magic number identifying stream files (ASCII "UTST").
pub const STREAM_MAGIC: u32 = 0x5554_5354;

/// Current header format version.
pub const STREAM_VERSION: u32 = 1;

/// Encoded header size: four `u32` fields followed by four `u64` fields.
pub const HEADER_BYTES: usize = 4 * 4 + 4 * 8;

/// Which back end wrote the file. Stored so `open` can rebuild the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BackendType {
    File = 1,
    Mmap = 2,
    CompressedFile = 3,
    CompressedMmap = 4,
}

impl BackendType {
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Result<Self, HeaderError> {
        match tag {
            1 => Ok(BackendType::File),
            2 => Ok(BackendType::Mmap),
            3 => Ok(BackendType::CompressedFile),
            4 => Ok(BackendType::CompressedMmap),
            other => Err(HeaderError::UnknownBackend(other)),
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, BackendType::CompressedFile | BackendType::CompressedMmap)
    }

    /// The raw back end underneath a compressed one (or `self`).
    pub fn raw(self) -> Self {
        match self {
            BackendType::CompressedFile => BackendType::File,
            BackendType::CompressedMmap => BackendType::Mmap,
            other => other,
        }
    }
}

/// Decoded stream header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub magic: u32,
    pub version: u32,
    pub backend: u32,
    pub header_len: u32,
    pub item_size: u64,
    pub physical_block_size: u64,
    pub logical_block_size: u64,
    /// Logical end of file, in items.
    pub item_count: u64,
}

impl StreamHeader {
    /// Builds the header for a brand new, empty stream.
    pub fn new(
        backend: BackendType,
        item_size: usize,
        physical_block_size: usize,
        logical_block_size: usize,
    ) -> Self {
        Self {
            magic: STREAM_MAGIC,
            version: STREAM_VERSION,
            backend: backend.tag(),
            header_len: HEADER_BYTES as u32,
            item_size: item_size as u64,
            physical_block_size: physical_block_size as u64,
            logical_block_size: logical_block_size as u64,
            item_count: 0,
        }
    }

    /// Byte offset of the first data block.
    pub fn data_offset(&self) -> u64 {
        self.physical_block_size
    }

    pub fn backend_type(&self) -> Result<BackendType, HeaderError> {
        BackendType::from_tag(self.backend)
    }

    /// Serializes the header into exactly [`HEADER_BYTES`] bytes.
    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut buf = [0u8; HEADER_BYTES];
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.version);
        LittleEndian::write_u32(&mut buf[8..12], self.backend);
        LittleEndian::write_u32(&mut buf[12..16], self.header_len);
        LittleEndian::write_u64(&mut buf[16..24], self.item_size);
        LittleEndian::write_u64(&mut buf[24..32], self.physical_block_size);
        LittleEndian::write_u64(&mut buf[32..40], self.logical_block_size);
        LittleEndian::write_u64(&mut buf[40..48], self.item_count);
        buf
    }

    /// Parses a header without judging it. Call [`StreamHeader::validate`]
    /// before trusting any field.
    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_BYTES {
            return Err(HeaderError::CorruptLength(format!(
                "header needs {} bytes, found {}",
                HEADER_BYTES,
                buf.len()
            )));
        }
        Self::read_from(&mut Cursor::new(buf))
            .map_err(|e| HeaderError::CorruptLength(e.to_string()))
    }

    fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            magic: r.read_u32::<LittleEndian>()?,
            version: r.read_u32::<LittleEndian>()?,
            backend: r.read_u32::<LittleEndian>()?,
            header_len: r.read_u32::<LittleEndian>()?,
            item_size: r.read_u64::<LittleEndian>()?,
            physical_block_size: r.read_u64::<LittleEndian>()?,
            logical_block_size: r.read_u64::<LittleEndian>()?,
            item_count: r.read_u64::<LittleEndian>()?,
        })
    }

    /// Checks magic, version and geometry.
    ///
    /// # Errors
    ///
    /// * [`HeaderError::BadMagic`] / [`HeaderError::VersionMismatch`] - not a
    ///   stream file, or one written by an incompatible version.
    /// * [`HeaderError::CorruptLength`] - header length or block geometry is
    ///   impossible.
    /// * [`HeaderError::ItemSizeMismatch`] - `expected_item_size` was given and
    ///   differs from the stored item size.
    /// * [`HeaderError::UnknownBackend`] - unrecognized back-end tag.
    pub fn validate(&self, expected_item_size: Option<usize>) -> Result<(), HeaderError> {
        if self.magic != STREAM_MAGIC {
            return Err(HeaderError::BadMagic { found: self.magic });
        }
        if self.version != STREAM_VERSION {
            return Err(HeaderError::VersionMismatch {
                found: self.version,
                expected: STREAM_VERSION,
            });
        }
        if self.header_len as usize != HEADER_BYTES {
            return Err(HeaderError::CorruptLength(format!(
                "header length {} (expected {})",
                self.header_len, HEADER_BYTES
            )));
        }
        self.backend_type()?;

        let phys = self.physical_block_size;
        let logical = self.logical_block_size;
        if phys < HEADER_BYTES as u64 || logical == 0 || logical % phys != 0 {
            return Err(HeaderError::CorruptLength(format!(
                "block geometry {}/{} is invalid",
                phys, logical
            )));
        }
        if self.item_size == 0 || self.item_size > logical {
            return Err(HeaderError::CorruptLength(format!(
                "item size {} does not fit a {}-byte block",
                self.item_size, logical
            )));
        }
        if let Some(expected) = expected_item_size {
            if self.item_size != expected as u64 {
                return Err(HeaderError::ItemSizeMismatch {
                    found: self.item_size as usize,
                    expected,
                });
            }
        }
        Ok(())
    }
}

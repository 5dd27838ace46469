//! Block-level compression on top of a raw back end.
//!
//! Each block slot of the raw back end holds one frame:
//!
//! ```text
//! [flag: u8][stored_len: u32 LE][raw_len: u32 LE][crc32: u32 LE][payload ...]
//! ```
//!
//! `flag` is 0 when the payload is stored as is and 1 when it is zstd
//! compressed. `crc32` covers the payload bytes. A block whose compressed
//! form would not be smaller than its raw form is stored raw, so a slot
//! never overflows: usable space per block is the slot size minus
//! [`FRAME_BYTES`].

use std::io;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;

use crate::backend::{BlockBackend, BlockId, Geometry};
use crate::error::{Result, StreamError};
use crate::header::BackendType;

/// Bytes of per-block metadata in front of every payload.
pub const FRAME_BYTES: usize = 1 + 4 + 4 + 4;

const FLAG_RAW: u8 = 0;
const FLAG_COMPRESSED: u8 = 1;

/// A block codec.
pub trait Compressor {
    /// Compresses `input`. The caller decides whether the result is worth
    /// keeping.
    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>>;

    /// Inverse of [`Compressor::compress`]; `raw_len` is the exact output size.
    fn decompress(&self, input: &[u8], raw_len: usize) -> io::Result<Vec<u8>>;
}

/// zstd through its single-shot block API.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        zstd::bulk::compress(input, self.level)
    }

    fn decompress(&self, input: &[u8], raw_len: usize) -> io::Result<Vec<u8>> {
        zstd::bulk::decompress(input, raw_len)
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    flag: u8,
    stored_len: usize,
    raw_len: usize,
    crc: u32,
}

impl Frame {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_BYTES {
            return Err(corrupt("block frame truncated"));
        }
        Ok(Self {
            flag: buf[0],
            stored_len: LittleEndian::read_u32(&buf[1..5]) as usize,
            raw_len: LittleEndian::read_u32(&buf[5..9]) as usize,
            crc: LittleEndian::read_u32(&buf[9..13]),
        })
    }

    fn write(&self, buf: &mut [u8]) {
        buf[0] = self.flag;
        LittleEndian::write_u32(&mut buf[1..5], self.stored_len as u32);
        LittleEndian::write_u32(&mut buf[5..9], self.raw_len as u32);
        LittleEndian::write_u32(&mut buf[9..13], self.crc);
    }
}

fn corrupt(msg: &str) -> StreamError {
    StreamError::Io(io::Error::new(io::ErrorKind::InvalidData, msg.to_string()))
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Reads the uncompressed size recorded in a stored frame.
pub fn uncompressed_length(frame: &[u8]) -> Result<usize> {
    Ok(Frame::parse(frame)?.raw_len)
}

/// Geometry seen by the stream layer when blocks carry a frame.
pub(crate) fn payload_geometry(raw: &Geometry) -> Result<Geometry> {
    let payload = raw.block_bytes.saturating_sub(FRAME_BYTES);
    Geometry::new(raw.item_size, payload, raw.data_offset)
}

/// Compressing wrapper around a raw back end.
pub struct CompressedBackend {
    inner: Box<dyn BlockBackend>,
    kind: BackendType,
    codec: Box<dyn Compressor>,
    geometry: Geometry,
    /// One raw slot worth of scratch space.
    slot: Vec<u8>,
}

impl CompressedBackend {
    pub fn new(
        inner: Box<dyn BlockBackend>,
        kind: BackendType,
        codec: Box<dyn Compressor>,
    ) -> Result<Self> {
        let raw = inner.geometry();
        let geometry = payload_geometry(&raw)?;
        Ok(Self {
            inner,
            kind,
            codec,
            geometry,
            slot: vec![0u8; raw.block_bytes],
        })
    }
}

impl BlockBackend for CompressedBackend {
    fn kind(&self) -> BackendType {
        self.kind
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn item_len(&self) -> u64 {
        self.inner.item_len()
    }

    fn set_item_len(&mut self, items: u64) {
        self.inner.set_item_len(items);
    }

    fn read_block(&mut self, id: BlockId, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read_block(id, &mut self.slot)?;
        if n == 0 {
            return Ok(0);
        }
        let frame = Frame::parse(&self.slot[..n])?;
        if frame.raw_len > self.geometry.block_bytes || FRAME_BYTES + frame.stored_len > n {
            return Err(corrupt("block frame length out of range"));
        }
        let payload = &self.slot[FRAME_BYTES..FRAME_BYTES + frame.stored_len];
        if checksum(payload) != frame.crc {
            return Err(corrupt("block checksum mismatch"));
        }

        let out = buf.len().min(frame.raw_len);
        match frame.flag {
            FLAG_RAW => buf[..out].copy_from_slice(&payload[..out]),
            FLAG_COMPRESSED => {
                let raw = self.codec.decompress(payload, frame.raw_len)?;
                if raw.len() != frame.raw_len {
                    return Err(corrupt("decompressed block has the wrong length"));
                }
                buf[..out].copy_from_slice(&raw[..out]);
            }
            _ => return Err(corrupt("unknown block frame flag")),
        }
        Ok(out)
    }

    fn write_block(&mut self, id: BlockId, buf: &[u8]) -> Result<()> {
        if self.inner.is_read_only() {
            return Err(StreamError::ReadOnly);
        }
        debug_assert!(buf.len() <= self.geometry.block_bytes);

        // Fall back to storing the block raw when compression does not pay.
        let packed = self
            .codec
            .compress(buf)
            .ok()
            .filter(|c| c.len() < buf.len());
        let (flag, payload): (u8, &[u8]) = match &packed {
            Some(c) => (FLAG_COMPRESSED, c),
            None => (FLAG_RAW, buf),
        };

        let frame = Frame {
            flag,
            stored_len: payload.len(),
            raw_len: buf.len(),
            crc: checksum(payload),
        };
        let end = FRAME_BYTES + payload.len();
        frame.write(&mut self.slot[..FRAME_BYTES]);
        self.slot[FRAME_BYTES..end].copy_from_slice(payload);
        self.inner.write_block(id, &self.slot[..end])
    }

    fn resize_blocks(&mut self, blocks: u64) -> Result<()> {
        self.inner.resize_blocks(blocks)
    }

    fn discard_block(&mut self, id: BlockId) -> Result<()> {
        self.inner.discard_block(id)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.inner.close()
    }
}

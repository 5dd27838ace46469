use std::path::Path;

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::backend::{punch_hole, BackingFile, BlockBackend, BlockId, Geometry};
use crate::error::{Result, StreamError};
use crate::header::{BackendType, HEADER_BYTES};

/// Minimum number of blocks added each time the mapping has to grow.
const GROW_BLOCKS: u64 = 64;

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(m) => m,
            Mapping::ReadWrite(m) => m,
        }
    }
}

/// Back end that maps the whole file and copies blocks in and out of the
/// mapping.
///
/// The file is grown ahead of writes in chunks of [`GROW_BLOCKS`] blocks and
/// cut back to the exact data length on flush, so `data_len` and the file
/// length may differ while the stream is open.
pub struct MmapBackend {
    backing: BackingFile,
    geometry: Geometry,
    map: Mapping,
    /// End of the meaningful bytes, header included.
    data_len: u64,
}

impl MmapBackend {
    pub(crate) fn from_backing(backing: BackingFile) -> Result<Self> {
        let geometry = Geometry::new(
            backing.header.item_size as usize,
            backing.header.logical_block_size as usize,
            backing.header.data_offset(),
        )?;
        let data_len = backing.file_len()?;
        let map = Self::map_file(&backing)?;
        Ok(Self {
            backing,
            geometry,
            map,
            data_len,
        })
    }

    fn map_file(backing: &BackingFile) -> Result<Mapping> {
        // SAFETY: the file is owned by this back end for its whole lifetime
        // and is only resized after the previous mapping has been dropped.
        let map = if backing.read_only {
            Mapping::ReadOnly(unsafe { MmapOptions::new().map(&backing.file)? })
        } else {
            Mapping::ReadWrite(unsafe { MmapOptions::new().map_mut(&backing.file)? })
        };
        Ok(map)
    }

    fn mapped_len(&self) -> u64 {
        self.map.bytes().len() as u64
    }

    /// Drops the current mapping, sets the file length and maps it again.
    fn remap(&mut self, file_len: u64) -> Result<()> {
        if let Mapping::ReadWrite(m) = &self.map {
            m.flush()?;
        }
        // Swap in a throwaway anonymous map so the old one is unmapped
        // before the file changes size.
        self.map = Mapping::ReadWrite(MmapMut::map_anon(1)?);
        self.backing.file.set_len(file_len)?;
        self.map = Self::map_file(&self.backing)?;
        Ok(())
    }

    fn ensure_mapped(&mut self, end: u64) -> Result<()> {
        if end <= self.mapped_len() {
            return Ok(());
        }
        let chunk = GROW_BLOCKS * self.geometry.block_bytes as u64;
        let target = end.max(self.mapped_len() + chunk);
        self.remap(target)
    }

    fn writable_map(&mut self) -> Result<&mut MmapMut> {
        match &mut self.map {
            Mapping::ReadWrite(m) => Ok(m),
            Mapping::ReadOnly(_) => Err(StreamError::ReadOnly),
        }
    }

    fn block_offset(&self, id: BlockId) -> u64 {
        self.backing.block_offset(self.geometry.block_bytes, id)
    }
}

impl BlockBackend for MmapBackend {
    fn kind(&self) -> BackendType {
        BackendType::Mmap
    }

    fn path(&self) -> &Path {
        &self.backing.path
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn is_read_only(&self) -> bool {
        self.backing.read_only
    }

    fn item_len(&self) -> u64 {
        self.backing.header.item_count
    }

    fn set_item_len(&mut self, items: u64) {
        self.backing.header.item_count = items;
    }

    fn read_block(&mut self, id: BlockId, buf: &mut [u8]) -> Result<usize> {
        let offset = self.block_offset(id);
        if offset >= self.data_len {
            return Ok(0);
        }
        let want = buf.len().min(self.geometry.block_bytes) as u64;
        let n = want.min(self.data_len - offset) as usize;
        let start = offset as usize;
        buf[..n].copy_from_slice(&self.map.bytes()[start..start + n]);
        Ok(n)
    }

    fn write_block(&mut self, id: BlockId, buf: &[u8]) -> Result<()> {
        if self.backing.read_only {
            return Err(StreamError::ReadOnly);
        }
        debug_assert!(buf.len() <= self.geometry.block_bytes);
        let offset = self.block_offset(id);
        let end = offset + buf.len() as u64;
        self.ensure_mapped(end)?;
        let start = offset as usize;
        self.writable_map()?[start..start + buf.len()].copy_from_slice(buf);
        self.data_len = self.data_len.max(end);
        Ok(())
    }

    fn resize_blocks(&mut self, blocks: u64) -> Result<()> {
        if self.backing.read_only {
            return Err(StreamError::ReadOnly);
        }
        let len = self.block_offset(blocks);
        if len < self.mapped_len() {
            // Shrink for real so bytes past the new end cannot resurface.
            self.remap(len)?;
        } else {
            self.ensure_mapped(len)?;
            let old = self.data_len.min(len) as usize;
            self.writable_map()?[old..len as usize].fill(0);
        }
        self.data_len = len;
        Ok(())
    }

    fn discard_block(&mut self, id: BlockId) -> Result<()> {
        if self.backing.read_only {
            return Err(StreamError::ReadOnly);
        }
        let offset = self.block_offset(id);
        if offset >= self.mapped_len() {
            return Ok(());
        }
        punch_hole(
            &self.backing.file,
            offset,
            self.geometry.block_bytes as u64,
        )
    }

    fn flush(&mut self) -> Result<()> {
        if self.backing.read_only {
            return Ok(());
        }
        let header = self.backing.header.encode();
        self.writable_map()?[..HEADER_BYTES].copy_from_slice(&header);
        if self.mapped_len() != self.data_len {
            self.remap(self.data_len)?;
        }
        if let Mapping::ReadWrite(m) = &self.map {
            m.flush()?;
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.flush()
    }
}

impl Drop for MmapBackend {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!(
                "failed to flush mapped stream {}: {}",
                self.backing.path.display(),
                e
            );
        }
    }
}

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::backend::{punch_hole, BackingFile, BlockBackend, BlockId, Geometry};
use crate::error::{Result, StreamError};
use crate::header::BackendType;

/// Back end doing seek + read/write on a regular file handle.
#[derive(Debug)]
pub struct FileBackend {
    backing: BackingFile,
    geometry: Geometry,
    header_dirty: bool,
}

impl FileBackend {
    pub(crate) fn from_backing(backing: BackingFile) -> Result<Self> {
        let geometry = Geometry::new(
            backing.header.item_size as usize,
            backing.header.logical_block_size as usize,
            backing.header.data_offset(),
        )?;
        Ok(Self {
            backing,
            geometry,
            header_dirty: false,
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.backing.read_only {
            return Err(StreamError::ReadOnly);
        }
        Ok(())
    }
}

impl BlockBackend for FileBackend {
    fn kind(&self) -> BackendType {
        BackendType::File
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
        if self.backing.header.item_count != items {
            self.backing.header.item_count = items;
            self.header_dirty = true;
        }
    }

    fn read_block(&mut self, id: BlockId, buf: &mut [u8]) -> Result<usize> {
        let offset = self.backing.block_offset(self.geometry.block_bytes, id);
        let want = buf.len().min(self.geometry.block_bytes);
        let file = &mut self.backing.file;
        file.seek(SeekFrom::Start(offset))?;

        // A short read is only ever the end of the file.
        let mut filled = 0;
        while filled < want {
            match file.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn write_block(&mut self, id: BlockId, buf: &[u8]) -> Result<()> {
        self.check_writable()?;
        debug_assert!(buf.len() <= self.geometry.block_bytes);
        let offset = self.backing.block_offset(self.geometry.block_bytes, id);
        let file = &mut self.backing.file;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn resize_blocks(&mut self, blocks: u64) -> Result<()> {
        self.check_writable()?;
        let len = self.backing.block_offset(self.geometry.block_bytes, blocks);
        self.backing.file.set_len(len)?;
        Ok(())
    }

    fn discard_block(&mut self, id: BlockId) -> Result<()> {
        self.check_writable()?;
        let offset = self.backing.block_offset(self.geometry.block_bytes, id);
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
        if self.header_dirty {
            self.backing.write_header()?;
            self.header_dirty = false;
        }
        self.backing.file.flush()?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.flush()
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if self.header_dirty {
            if let Err(e) = self.flush() {
                log::warn!(
                    "failed to persist header of {}: {}",
                    self.backing.path.display(),
                    e
                );
            }
        }
    }
}

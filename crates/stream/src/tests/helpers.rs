use std::path::{Path, PathBuf};

use config::{BackendKind, Compression, Config};

use crate::backend::{BlockBackend, BlockId, Geometry};
use crate::context::Context;
use crate::error::Result;
use crate::header::BackendType;

/// Small geometry so tests cross block boundaries quickly: 512-byte blocks,
/// 64 `u64` items per block, two cached blocks per stream.
pub fn small_config(dir: &Path) -> Config {
    Config {
        memory_limit: 1 << 20,
        physical_block_size: 512,
        block_factor: 1,
        cache_blocks: 2,
        cache_associativity: 0,
        max_open_streams: Some(64),
        temp_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

pub fn ctx_in(dir: &Path) -> Context {
    Context::new(small_config(dir)).unwrap()
}

pub fn ctx_with(dir: &Path, backend: BackendKind, compression: Compression) -> Context {
    Context::new(Config {
        backend,
        compression,
        ..small_config(dir)
    })
    .unwrap()
}

/// Every back-end flavour, for tests that must hold for all of them.
pub fn all_backends() -> Vec<(BackendKind, Compression)> {
    vec![
        (BackendKind::File, Compression::None),
        (BackendKind::Mmap, Compression::None),
        (BackendKind::File, Compression::Zstd { level: 1 }),
        (BackendKind::Mmap, Compression::Zstd { level: 1 }),
    ]
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    out.sort();
    out
}

/// In-memory back end that records every block transfer.
pub struct MemBackend {
    pub blocks: Vec<Vec<u8>>,
    pub reads: Vec<BlockId>,
    pub writes: Vec<BlockId>,
    geometry: Geometry,
    items: u64,
    path: PathBuf,
}

impl MemBackend {
    pub fn new(block_bytes: usize) -> Self {
        Self {
            blocks: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            geometry: Geometry::new(8, block_bytes, 0).unwrap(),
            items: 0,
            path: PathBuf::from("mem"),
        }
    }
}

impl BlockBackend for MemBackend {
    fn kind(&self) -> BackendType {
        BackendType::File
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn item_len(&self) -> u64 {
        self.items
    }

    fn set_item_len(&mut self, items: u64) {
        self.items = items;
    }

    fn read_block(&mut self, id: BlockId, buf: &mut [u8]) -> Result<usize> {
        self.reads.push(id);
        match self.blocks.get(id as usize) {
            Some(b) => {
                buf[..b.len()].copy_from_slice(b);
                Ok(b.len())
            }
            None => Ok(0),
        }
    }

    fn write_block(&mut self, id: BlockId, buf: &[u8]) -> Result<()> {
        self.writes.push(id);
        let id = id as usize;
        if self.blocks.len() <= id {
            self.blocks.resize(id + 1, Vec::new());
        }
        self.blocks[id] = buf.to_vec();
        Ok(())
    }

    fn resize_blocks(&mut self, blocks: u64) -> Result<()> {
        self.blocks.resize(blocks as usize, Vec::new());
        Ok(())
    }

    fn discard_block(&mut self, id: BlockId) -> Result<()> {
        if let Some(b) = self.blocks.get_mut(id as usize) {
            b.clear();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

//! Block collections: a file of fixed-size blocks addressed by id, for
//! structures (trees, paged indexes) that manage their own block layout.
//!
//! Ids start at 1; id 0 is the invalid placeholder. Freed ids go onto a
//! free-block stack kept in a sidecar stream `<path>.stk` and are handed out
//! again before the file grows. Freeing the last block shrinks the file
//! instead.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::backend::{self, BlockBackend, BlockId};
use crate::cache::BlockCache;
use crate::context::Context;
use crate::error::{HeaderError, Result, StreamError};
use crate::header::BackendType;
use crate::persist::Persistence;
use crate::stack::ExternalStack;
use crate::stats::{Counter, StatsRecorder, StatsSnapshot};
use crate::stream::{OpenMode, TypedStream};

/// Path of the free-block stack that belongs to `path`.
pub fn free_list_path(path: &Path) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(".stk");
    PathBuf::from(s)
}

/// Blocks of `block_size` bytes behind an LRU cache.
pub struct BlockCollection {
    backend: Option<Box<dyn BlockBackend>>,
    cache: BlockCache,
    free: ExternalStack<u64>,
    /// Mirror of the free-block stack for membership checks.
    freed: HashSet<BlockId>,
    path: PathBuf,
    block_size: usize,
    persistence: Persistence,
    recorder: StatsRecorder,
}

impl BlockCollection {
    /// Creates an empty collection at `path`, replacing any existing one.
    /// Blocks are one logical block of the context's geometry.
    pub fn create<P: AsRef<Path>>(ctx: &Context, path: P) -> Result<Self> {
        let path = path.as_ref();
        let block_size = ctx.config().logical_block_size();
        let kind = match ctx.config().backend {
            config::BackendKind::File => BackendType::File,
            config::BackendKind::Mmap => BackendType::Mmap,
        };
        let backend = backend::create_with(ctx, path, block_size, kind)?;
        let free = TypedStream::create(ctx, free_list_path(path))?;
        let recorder = StatsRecorder::new(ctx.stats_handle());
        recorder.record(Counter::StreamCreate);
        debug!("created block collection {}", path.display());
        Ok(Self::assemble(ctx, backend, free, HashSet::new(), recorder))
    }

    /// Opens an existing collection. A missing free-block stack is treated
    /// as empty.
    pub fn open<P: AsRef<Path>>(ctx: &Context, path: P) -> Result<Self> {
        let path = path.as_ref();
        let backend = backend::open(ctx, path, false, None)?;
        let geometry = backend.geometry();
        if geometry.items_per_block != 1 || geometry.item_size != geometry.block_bytes {
            return Err(HeaderError::CorruptLength(format!(
                "{} is not a block collection",
                path.display()
            ))
            .into());
        }
        let mut free = TypedStream::open(ctx, free_list_path(path), OpenMode::Write)?;
        let mut freed = HashSet::new();
        while let Some(id) = free.read_item()? {
            if id == 0 || id > backend.item_len() || !freed.insert(id) {
                return Err(StreamError::InvalidPlaceholder(id));
            }
        }
        let recorder = StatsRecorder::new(ctx.stats_handle());
        recorder.record(Counter::StreamOpen);
        Ok(Self::assemble(ctx, backend, free, freed, recorder))
    }

    fn assemble(
        ctx: &Context,
        backend: Box<dyn BlockBackend>,
        free: TypedStream<u64>,
        freed: HashSet<BlockId>,
        recorder: StatsRecorder,
    ) -> Self {
        let cfg = ctx.config();
        let block_size = backend.geometry().block_bytes;
        let cache = BlockCache::new(
            cfg.cache_blocks,
            cfg.cache_associativity,
            block_size,
            recorder.clone(),
        );
        Self {
            path: backend.path().to_path_buf(),
            backend: Some(backend),
            cache,
            free: ExternalStack::new(free),
            freed,
            block_size,
            persistence: Persistence::Persist,
            recorder,
        }
    }

    fn parts(&mut self) -> Result<(&mut dyn BlockBackend, &mut BlockCache)> {
        match self.backend.as_mut() {
            Some(b) => Ok((b.as_mut(), &mut self.cache)),
            None => Err(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "block collection already closed",
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Block slots in the file, used or free.
    pub fn slots(&self) -> u64 {
        self.backend.as_ref().map_or(0, |b| b.item_len())
    }

    /// Blocks currently in use.
    pub fn len(&self) -> u64 {
        self.slots() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects the placeholder, ids past the end and freed ids.
    fn check(&self, id: BlockId) -> Result<()> {
        if id == 0 || id > self.slots() || self.freed.contains(&id) {
            return Err(StreamError::InvalidPlaceholder(id));
        }
        Ok(())
    }

    /// Allocates a zeroed block and returns its id.
    pub fn new_block(&mut self) -> Result<BlockId> {
        let id = match self.free.pop()? {
            Some(id) => {
                self.freed.remove(&id);
                id
            }
            None => {
                let slots = self.slots();
                self.parts()?.0.truncate(slots + 1)?;
                slots + 1
            }
        };
        let block_size = self.block_size;
        let (backend, cache) = self.parts()?;
        let entry = cache.get(backend, id - 1)?;
        entry.cut_to(0);
        entry.extend_len(block_size);
        cache.release(id - 1, true);
        Ok(id)
    }

    /// Frees block `id`.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidPlaceholder`] for id 0, an id past the end or
    /// a block that is already free.
    pub fn delete_block(&mut self, id: BlockId) -> Result<()> {
        self.check(id)?;
        let slots = self.slots();
        self.cache.discard(id - 1);
        if id == slots {
            self.parts()?.0.truncate(slots - 1)?;
        } else {
            self.free.push(&id)?;
            self.freed.insert(id);
            self.parts()?.0.discard_block(id - 1)?;
        }
        Ok(())
    }

    /// Runs `f` over the contents of block `id`.
    pub fn with_block<R>(&mut self, id: BlockId, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.check(id)?;
        let (backend, cache) = self.parts()?;
        let out = f(cache.get(backend, id - 1)?.data());
        cache.release(id - 1, false);
        Ok(out)
    }

    /// Runs `f` over a mutable view of block `id`; the block is written
    /// back on eviction or flush.
    pub fn with_block_mut<R>(&mut self, id: BlockId, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.check(id)?;
        let block_size = self.block_size;
        let (backend, cache) = self.parts()?;
        let entry = cache.get(backend, id - 1)?;
        let out = f(entry.data_mut());
        entry.extend_len(block_size);
        cache.release(id - 1, true);
        Ok(out)
    }

    pub fn flush(&mut self) -> Result<()> {
        let (backend, cache) = self.parts()?;
        cache.flush_all(backend)?;
        backend.flush()?;
        self.free.stream_mut().flush()
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    /// Sets the teardown policy for the collection and its free-block stack.
    pub fn set_persistence(&mut self, persistence: Persistence) -> Result<()> {
        self.free.stream_mut().set_persistence(persistence)?;
        self.persistence = persistence;
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.recorder.local().snapshot()
    }

    fn teardown(&mut self) -> Result<()> {
        let Some(mut backend) = self.backend.take() else {
            return Ok(());
        };
        let delete = self.persistence == Persistence::Delete;
        let result = if delete {
            Ok(())
        } else {
            self.cache
                .flush_all(backend.as_mut())
                .and_then(|_| backend.flush())
        };
        let closed = backend.close();
        self.recorder.record(Counter::StreamClose);
        if delete {
            std::fs::remove_file(&self.path)?;
            self.recorder.record(Counter::StreamDelete);
        }
        result.and(closed)
    }

    /// Closes the collection and reports teardown errors.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }
}

impl Drop for BlockCollection {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("closing block collection {} failed: {}", self.path.display(), e);
        }
    }
}

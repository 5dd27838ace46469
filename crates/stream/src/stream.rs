//! Typed item streams.
//!
//! A [`TypedStream`] is a cursor over fixed-size items stored in a stream
//! file. All item access goes through the stream's [`BlockCache`]; each
//! handle keeps at most one block pinned, the one under its cursor.
//!
//! Sub-streams are further handles on the same open file, limited to a
//! contiguous item range of their parent. They share the parent's back end
//! and cache through a reference-counted core, so the file stays open until
//! the last handle is gone. The core keeps a registry of live sub-stream
//! ranges and refuses to truncate underneath any of them.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, warn};

use crate::backend::{self, BlockBackend, BlockId, Geometry};
use crate::cache::BlockCache;
use crate::context::Context;
use crate::error::{Result, StreamError};
use crate::item::Item;
use crate::persist::Persistence;
use crate::stats::{Counter, StatsRecorder, StatsSnapshot};

/// How a stream handle may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, reads only.
    Read,
    /// Reads and writes, cursor at the start. Opening creates the file if
    /// it does not exist.
    Write,
    /// Like [`OpenMode::Write`] with the cursor at the end.
    Append,
    /// Writes only; reads fail with [`StreamError::WriteOnly`].
    WriteOnly,
}

impl OpenMode {
    fn can_write(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    fn can_read(self) -> bool {
        !matches!(self, OpenMode::WriteOnly)
    }
}

#[derive(Debug, Clone, Copy)]
struct SubRange {
    id: u64,
    begin: u64,
    end: u64,
}

/// State shared by a stream and all of its sub-streams.
struct StreamCore {
    backend: Option<Box<dyn BlockBackend>>,
    cache: BlockCache,
    geometry: Geometry,
    path: PathBuf,
    len: u64,
    persistence: Persistence,
    recorder: StatsRecorder,
    subs: Vec<SubRange>,
    next_sub: u64,
}

impl StreamCore {
    fn new(backend: Box<dyn BlockBackend>, ctx: &Context, persistence: Persistence) -> Self {
        let geometry = backend.geometry();
        let recorder = StatsRecorder::new(ctx.stats_handle());
        let cfg = ctx.config();
        let cache = BlockCache::new(
            cfg.cache_blocks,
            cfg.cache_associativity,
            geometry.block_bytes,
            recorder.clone(),
        );
        Self {
            len: backend.item_len(),
            path: backend.path().to_path_buf(),
            backend: Some(backend),
            cache,
            geometry,
            persistence,
            recorder,
            subs: Vec::new(),
            next_sub: 0,
        }
    }

    /// The back end is only taken out during teardown.
    fn parts(&mut self) -> Result<(&mut dyn BlockBackend, &mut BlockCache)> {
        match self.backend.as_mut() {
            Some(b) => Ok((b.as_mut(), &mut self.cache)),
            None => Err(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "stream already closed",
            ))),
        }
    }

    fn backend(&mut self) -> Result<&mut dyn BlockBackend> {
        Ok(self.parts()?.0)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.len = len;
        self.backend()?.set_item_len(len);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let (backend, cache) = self.parts()?;
        cache.flush_all(backend)?;
        backend.flush()
    }

    /// Drops a block that a read-once stream has moved past.
    fn discard_block(&mut self, id: BlockId) -> Result<()> {
        if self.cache.discard(id) {
            self.backend()?.discard_block(id)?;
        }
        Ok(())
    }

    /// Resizes to `len` items. Bytes past the new end in the last block are
    /// zeroed so they cannot come back if the stream grows again.
    fn truncate(&mut self, len: u64) -> Result<()> {
        let geometry = self.geometry;
        self.cache.invalidate_from(geometry.blocks_for(len));
        {
            let (backend, cache) = self.parts()?;
            backend.truncate(len)?;
            if len % geometry.items_per_block as u64 != 0 {
                let tail = geometry.block_of(len);
                let entry = cache.get(backend, tail)?;
                entry.cut_to(geometry.slot_of(len));
                entry.mark_dirty();
                cache.release(tail, true);
            }
        }
        self.len = len;
        Ok(())
    }

    /// Flushes or deletes according to the persistence mode, then closes
    /// the back end. Runs at most once.
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
            debug!("deleted stream {}", self.path.display());
        }
        result.and(closed)
    }
}

impl Drop for StreamCore {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("closing stream {} failed: {}", self.path.display(), e);
        }
    }
}

/// A cursor over the `T` items of a stream file, or of a sub-range of one.
///
/// Offsets used by [`TypedStream::seek`], [`TypedStream::tell`] and
/// [`TypedStream::substream`] are relative to the start of this handle's
/// range.
pub struct TypedStream<T: Item> {
    core: Rc<RefCell<StreamCore>>,
    ctx: Context,
    mode: OpenMode,
    /// Absolute item range. `end` is `None` for a root stream, whose range
    /// always ends at the current logical length.
    begin: u64,
    end: Option<u64>,
    pos: u64,
    level: u32,
    sub_id: Option<u64>,
    pinned: Option<BlockId>,
    /// Set when the last access to the pinned block was a read. Only such
    /// a block may be released by a read-once stream.
    read_pinned: bool,
    _item: PhantomData<T>,
}

impl<T: Item> TypedStream<T> {
    fn from_core(core: StreamCore, ctx: &Context, mode: OpenMode) -> Self {
        let pos = match mode {
            OpenMode::Append => core.len,
            _ => 0,
        };
        Self {
            core: Rc::new(RefCell::new(core)),
            ctx: ctx.clone(),
            mode,
            begin: 0,
            end: None,
            pos,
            level: 0,
            sub_id: None,
            pinned: None,
            read_pinned: false,
            _item: PhantomData,
        }
    }

    /// Creates a new, empty stream at `path`, replacing any existing file.
    /// The file persists after the stream is dropped.
    pub fn create<P: AsRef<Path>>(ctx: &Context, path: P) -> Result<Self> {
        let backend = backend::create(ctx, path.as_ref(), T::SIZE)?;
        Ok(Self::with_counter(
            ctx,
            backend,
            Persistence::Persist,
            OpenMode::Write,
            Counter::StreamCreate,
        ))
    }

    /// Opens an existing stream file.
    ///
    /// [`OpenMode::Write`] and [`OpenMode::Append`] create the file when it
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// [`StreamError::BadHeader`] when the file is not a stream of `T`,
    /// I/O errors from opening it.
    pub fn open<P: AsRef<Path>>(ctx: &Context, path: P, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        if mode != OpenMode::Read && !path.exists() {
            let mut s = Self::create(ctx, path)?;
            s.mode = mode;
            return Ok(s);
        }
        let backend = backend::open(ctx, path, mode == OpenMode::Read, Some(T::SIZE))?;
        Ok(Self::from_backend(ctx, backend, Persistence::Persist, mode))
    }

    /// Creates a scratch stream in the configured temporary directory. It
    /// is deleted when the last handle goes away.
    pub fn temporary(ctx: &Context) -> Result<Self> {
        let path = ctx.scratch_path("undertow_")?;
        let backend = backend::create(ctx, &path, T::SIZE)?;
        Ok(Self::with_counter(
            ctx,
            backend,
            Persistence::Delete,
            OpenMode::Write,
            Counter::StreamCreate,
        ))
    }

    /// Wraps an already opened back end.
    pub fn from_backend(
        ctx: &Context,
        backend: Box<dyn BlockBackend>,
        persistence: Persistence,
        mode: OpenMode,
    ) -> Self {
        Self::with_counter(ctx, backend, persistence, mode, Counter::StreamOpen)
    }

    fn with_counter(
        ctx: &Context,
        backend: Box<dyn BlockBackend>,
        persistence: Persistence,
        mode: OpenMode,
        counter: Counter,
    ) -> Self {
        let core = StreamCore::new(backend, ctx, persistence);
        core.recorder.record(counter);
        Self::from_core(core, ctx, mode)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn path(&self) -> PathBuf {
        self.core.borrow().path.clone()
    }

    /// Nesting depth: 0 for a stream, 1 for its sub-streams, and so on.
    pub fn substream_level(&self) -> u32 {
        self.level
    }

    pub fn is_substream(&self) -> bool {
        self.sub_id.is_some()
    }

    fn abs_end(&self) -> u64 {
        match self.end {
            Some(end) => end,
            None => self.core.borrow().len,
        }
    }

    /// Number of items in this handle's range.
    pub fn len(&self) -> u64 {
        self.abs_end() - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current offset relative to the start of the range.
    pub fn tell(&self) -> u64 {
        self.pos - self.begin
    }

    /// Moves the cursor. `offset == len()` positions for appending.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let len = self.len();
        if offset > len {
            return Err(StreamError::OffsetOutOfRange { offset, len });
        }
        self.pos = self.begin + offset;
        self.core.borrow().recorder.record(Counter::ItemSeek);
        Ok(())
    }

    pub fn persistence(&self) -> Persistence {
        self.core.borrow().persistence
    }

    /// Changes what happens to the file on teardown. Only the owning
    /// stream may do this, and releasing blocks on read needs write access.
    pub fn set_persistence(&mut self, persistence: Persistence) -> Result<()> {
        if self.is_substream() {
            return Err(StreamError::StreamIsSubstream);
        }
        if persistence == Persistence::DeleteBlocksOnRead && !self.mode.can_write() {
            return Err(StreamError::ReadOnly);
        }
        self.core.borrow_mut().persistence = persistence;
        Ok(())
    }

    /// Counters for this stream file, shared with its sub-streams.
    pub fn stats(&self) -> StatsSnapshot {
        self.core.borrow().recorder.local().snapshot()
    }

    /// Makes sure block `id` is the one pinned by this handle.
    ///
    /// A read-once stream releases the previous block only when a forward
    /// read leaves a block that was itself last accessed by a read.
    fn pin(&mut self, core: &mut StreamCore, id: BlockId, reading: bool) -> Result<()> {
        if self.pinned == Some(id) {
            return Ok(());
        }
        if let Some(old) = self.pinned.take() {
            core.cache.release(old, false);
            let consumed = reading && self.read_pinned && old < id;
            if core.persistence == Persistence::DeleteBlocksOnRead && consumed {
                core.discard_block(old)?;
            }
        }
        self.read_pinned = false;
        let (backend, cache) = core.parts()?;
        cache.get(backend, id)?;
        self.pinned = Some(id);
        Ok(())
    }

    fn unpin(&mut self, core: &mut StreamCore) {
        if let Some(old) = self.pinned.take() {
            core.cache.release(old, false);
        }
        self.read_pinned = false;
    }

    /// Reads the item under the cursor and advances.
    ///
    /// Returns `Ok(None)` at the end of the range. For a
    /// [`Persistence::DeleteBlocksOnRead`] stream, reaching the end releases
    /// all remaining storage.
    pub fn read_item(&mut self) -> Result<Option<T>> {
        if !self.mode.can_read() {
            return Err(StreamError::WriteOnly);
        }
        let core_rc = Rc::clone(&self.core);
        let mut core = core_rc.borrow_mut();

        let end = self.end.unwrap_or(core.len);
        if self.pos >= end {
            if core.persistence == Persistence::DeleteBlocksOnRead
                && !self.is_substream()
                && core.subs.is_empty()
                && core.len > 0
            {
                self.unpin(&mut core);
                core.truncate(0)?;
                self.pos = 0;
            }
            return Ok(None);
        }

        let geometry = core.geometry;
        let id = geometry.block_of(self.pos);
        let slot = geometry.slot_of(self.pos);
        self.pin(&mut core, id, true)?;
        let entry = core.cache.pinned_mut(id).ok_or_else(|| not_pinned(id))?;
        let item = T::decode(&entry.data()[slot..slot + T::SIZE]);
        self.read_pinned = true;
        self.pos += 1;
        core.recorder.record(Counter::ItemRead);
        Ok(Some(item))
    }

    /// Writes `item` at the cursor and advances, extending the stream when
    /// the cursor is at the end.
    ///
    /// # Errors
    ///
    /// * [`StreamError::ReadOnly`] for a stream opened with [`OpenMode::Read`].
    /// * [`StreamError::OffsetOutOfRange`] when a sub-stream's cursor is at
    ///   the end of its range.
    /// * [`StreamError::OutOfSpace`] and other I/O errors surface when a
    ///   block is written back.
    pub fn write_item(&mut self, item: &T) -> Result<()> {
        if !self.mode.can_write() {
            return Err(StreamError::ReadOnly);
        }
        if let Some(end) = self.end {
            if self.pos >= end {
                return Err(StreamError::OffsetOutOfRange {
                    offset: self.pos - self.begin,
                    len: end - self.begin,
                });
            }
        }
        let core_rc = Rc::clone(&self.core);
        let mut core = core_rc.borrow_mut();

        let geometry = core.geometry;
        let id = geometry.block_of(self.pos);
        let slot = geometry.slot_of(self.pos);
        self.pin(&mut core, id, false)?;
        let entry = core.cache.pinned_mut(id).ok_or_else(|| not_pinned(id))?;
        item.encode(&mut entry.data_mut()[slot..slot + T::SIZE]);
        entry.extend_len(slot + T::SIZE);
        entry.mark_dirty();
        self.read_pinned = false;

        self.pos += 1;
        if self.pos > core.len {
            core.set_len(self.pos)?;
        }
        core.recorder.record(Counter::ItemWrite);
        Ok(())
    }

    /// Fills `buf` from the cursor and returns how many items were read.
    pub fn read_into(&mut self, buf: &mut [T]) -> Result<usize> {
        for (i, slot) in buf.iter_mut().enumerate() {
            match self.read_item()? {
                Some(item) => *slot = item,
                None => return Ok(i),
            }
        }
        Ok(buf.len())
    }

    /// Reads exactly `n` items.
    ///
    /// # Errors
    ///
    /// [`StreamError::EndOfStream`] if fewer than `n` items remain.
    pub fn read_exact_items(&mut self, n: usize) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.read_item()? {
                Some(item) => out.push(item),
                None => return Err(StreamError::EndOfStream),
            }
        }
        Ok(out)
    }

    pub fn write_all_items(&mut self, items: &[T]) -> Result<()> {
        items.iter().try_for_each(|item| self.write_item(item))
    }

    /// Sets the logical length to `len` items. The cursor is clamped to the
    /// new end.
    ///
    /// # Errors
    ///
    /// [`StreamError::StreamIsSubstream`] when called on a sub-stream or
    /// when a live sub-stream covers items past `len`.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        if self.is_substream() {
            return Err(StreamError::StreamIsSubstream);
        }
        if !self.mode.can_write() {
            return Err(StreamError::ReadOnly);
        }
        let core_rc = Rc::clone(&self.core);
        let mut core = core_rc.borrow_mut();
        if core.subs.iter().any(|s| s.end > len) {
            return Err(StreamError::StreamIsSubstream);
        }
        self.unpin(&mut core);
        core.truncate(len)?;
        self.pos = self.pos.min(len);
        Ok(())
    }

    /// Opens a view over items `[begin, end)` of this handle's range.
    ///
    /// # Errors
    ///
    /// * [`StreamError::OffsetOutOfRange`] when the range is not inside
    ///   this stream.
    /// * [`StreamError::PermissionDenied`] for [`OpenMode::Append`] (a
    ///   sub-stream cannot grow) or for asking write access through a
    ///   read-only parent.
    pub fn substream(&self, begin: u64, end: u64, mode: OpenMode) -> Result<TypedStream<T>> {
        if mode == OpenMode::Append {
            return Err(StreamError::PermissionDenied(
                "sub-streams cannot be opened for append".into(),
            ));
        }
        if mode.can_write() && !self.mode.can_write() {
            return Err(StreamError::PermissionDenied(
                "write access through a read-only stream".into(),
            ));
        }
        let len = self.len();
        if begin > end || end > len {
            return Err(StreamError::OffsetOutOfRange {
                offset: begin.max(end),
                len,
            });
        }

        let (abs_begin, abs_end) = (self.begin + begin, self.begin + end);
        let id = {
            let mut core = self.core.borrow_mut();
            let id = core.next_sub;
            core.next_sub += 1;
            core.subs.push(SubRange {
                id,
                begin: abs_begin,
                end: abs_end,
            });
            core.recorder.record(Counter::SubstreamCreate);
            id
        };
        Ok(TypedStream {
            core: Rc::clone(&self.core),
            ctx: self.ctx.clone(),
            mode,
            begin: abs_begin,
            end: Some(abs_end),
            pos: abs_begin,
            level: self.level + 1,
            sub_id: Some(id),
            pinned: None,
            read_pinned: false,
            _item: PhantomData,
        })
    }

    /// Writes every dirty block and the header.
    pub fn flush(&mut self) -> Result<()> {
        self.core.borrow_mut().flush()
    }

    /// Closes this handle and reports any error the teardown hits. Dropping
    /// a stream does the same but can only log failures.
    pub fn close(mut self) -> Result<()> {
        let core_rc = Rc::clone(&self.core);
        {
            let mut core = core_rc.borrow_mut();
            self.unpin(&mut core);
        }
        if self.is_substream() {
            return Ok(());
        }
        // Still shared with sub-streams: the last of them tears the core down.
        if Rc::strong_count(&core_rc) > 2 {
            return core_rc.borrow_mut().flush();
        }
        drop(self);
        let result = core_rc.borrow_mut().teardown();
        result
    }
}

fn not_pinned(id: BlockId) -> StreamError {
    StreamError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("block {} is not pinned by this handle", id),
    ))
}

impl<T: Item> Drop for TypedStream<T> {
    fn drop(&mut self) {
        if let Ok(mut core) = self.core.try_borrow_mut() {
            if let Some(old) = self.pinned.take() {
                core.cache.release(old, false);
            }
            if let Some(id) = self.sub_id.take() {
                core.subs.retain(|s| s.id != id);
                core.recorder.record(Counter::SubstreamDelete);
            }
        }
    }
}

impl<T: Item> std::fmt::Debug for TypedStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedStream")
            .field("path", &self.path())
            .field("mode", &self.mode)
            .field("begin", &self.begin)
            .field("len", &self.len())
            .field("pos", &self.tell())
            .field("level", &self.level)
            .finish()
    }
}

//! Set-associative LRU block cache.
//!
//! A cache of `capacity` blocks is split into `capacity / ways` sets; block
//! `id` may only live in set `id % sets`. Within a set the least recently
//! used unpinned block is the victim. A fully associative cache is the
//! special case of a single set.
//!
//! Callers pin a block with [`BlockCache::get`] and unpin it with
//! [`BlockCache::release`]. Pinned blocks are never evicted. If a miss finds
//! every way of its set pinned the cache reports
//! [`StreamError::CacheExhausted`]; nothing is retried.

use log::trace;

use crate::backend::{BlockBackend, BlockId};
use crate::error::{Result, StreamError};
use crate::stats::{Counter, StatsRecorder};

/// One resident block.
#[derive(Debug)]
pub struct CacheEntry {
    id: BlockId,
    data: Box<[u8]>,
    /// Bytes that must be written back. Bytes past `len` are zero.
    len: usize,
    dirty: bool,
    pins: u32,
    stamp: u64,
}

impl CacheEntry {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the whole block buffer. Call
    /// [`CacheEntry::mark_dirty`] after changing it.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records that the first `len` bytes are meaningful.
    pub fn extend_len(&mut self, len: usize) {
        self.len = self.len.max(len.min(self.data.len()));
    }

    /// Zeroes everything from `len` on. The write-back length is kept so
    /// the zeros also reach storage.
    pub fn cut_to(&mut self, len: usize) {
        let len = len.min(self.data.len());
        self.data[len..].fill(0);
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn pins(&self) -> u32 {
        self.pins
    }
}

/// Bounded cache of block buffers in front of one back end.
#[derive(Debug)]
pub struct BlockCache {
    sets: Vec<Vec<CacheEntry>>,
    ways: usize,
    block_bytes: usize,
    clock: u64,
    recorder: StatsRecorder,
}

impl BlockCache {
    /// Creates an empty cache.
    ///
    /// `associativity` is the number of ways per set. `0`, or any value not
    /// dividing `capacity`, yields a fully associative cache.
    pub fn new(
        capacity: usize,
        associativity: usize,
        block_bytes: usize,
        recorder: StatsRecorder,
    ) -> Self {
        let capacity = capacity.max(1);
        let ways = if associativity == 0 || capacity % associativity != 0 {
            capacity
        } else {
            associativity
        };
        let sets = (0..capacity / ways).map(|_| Vec::with_capacity(ways)).collect();
        Self {
            sets,
            ways,
            block_bytes,
            clock: 0,
            recorder,
        }
    }

    pub fn capacity(&self) -> usize {
        self.sets.len() * self.ways
    }

    pub fn ways(&self) -> usize {
        self.ways
    }

    /// Number of blocks currently held.
    pub fn resident(&self) -> usize {
        self.sets.iter().map(Vec::len).sum()
    }

    pub fn is_resident(&self, id: BlockId) -> bool {
        self.lookup(id).is_some()
    }

    fn set_of(&self, id: BlockId) -> usize {
        (id % self.sets.len() as u64) as usize
    }

    fn lookup(&self, id: BlockId) -> Option<&CacheEntry> {
        self.sets[self.set_of(id)].iter().find(|e| e.id == id)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Returns block `id` pinned, loading it through `backend` on a miss.
    ///
    /// # Errors
    ///
    /// [`StreamError::CacheExhausted`] when the block's set is full of pinned
    /// blocks, or whatever the back end reports while writing back the
    /// victim or loading the block.
    pub fn get(&mut self, backend: &mut dyn BlockBackend, id: BlockId) -> Result<&mut CacheEntry> {
        let set = self.set_of(id);
        let stamp = self.tick();

        if let Some(pos) = self.sets[set].iter().position(|e| e.id == id) {
            self.recorder.record(Counter::CacheHit);
            let entry = &mut self.sets[set][pos];
            entry.stamp = stamp;
            entry.pins += 1;
            return Ok(entry);
        }
        self.recorder.record(Counter::CacheMiss);

        let pos = if self.sets[set].len() < self.ways {
            self.sets[set].push(CacheEntry {
                id,
                data: vec![0u8; self.block_bytes].into_boxed_slice(),
                len: 0,
                dirty: false,
                pins: 0,
                stamp,
            });
            self.sets[set].len() - 1
        } else {
            let victim = self.sets[set]
                .iter()
                .enumerate()
                .filter(|(_, e)| e.pins == 0)
                .min_by_key(|(_, e)| e.stamp)
                .map(|(i, _)| i)
                .ok_or(StreamError::CacheExhausted {
                    set,
                    ways: self.ways,
                })?;
            let entry = &mut self.sets[set][victim];
            if entry.dirty {
                backend.write_block(entry.id, &entry.data[..entry.len])?;
                self.recorder.record(Counter::BlockWrite);
            }
            trace!("cache evicts block {} for {}", entry.id, id);
            self.recorder.record(Counter::CacheEviction);
            entry.id = id;
            entry.data.fill(0);
            entry.len = 0;
            entry.dirty = false;
            entry.stamp = stamp;
            victim
        };

        let entry = &mut self.sets[set][pos];
        match backend.read_block(id, &mut entry.data) {
            Ok(n) => {
                entry.len = n;
                self.recorder.record(Counter::BlockRead);
            }
            Err(e) => {
                // Leave no half-loaded entry behind.
                self.sets[set].swap_remove(pos);
                return Err(e);
            }
        }
        let entry = &mut self.sets[set][pos];
        entry.pins = 1;
        Ok(entry)
    }

    /// A block the caller already holds pinned.
    pub fn pinned_mut(&mut self, id: BlockId) -> Option<&mut CacheEntry> {
        let set = self.set_of(id);
        self.sets[set]
            .iter_mut()
            .find(|e| e.id == id && e.pins > 0)
    }

    /// Unpins block `id`, marking it dirty if the caller changed it.
    pub fn release(&mut self, id: BlockId, dirty: bool) {
        let set = self.set_of(id);
        if let Some(entry) = self.sets[set].iter_mut().find(|e| e.id == id) {
            debug_assert!(entry.pins > 0, "release of unpinned block {}", id);
            entry.pins = entry.pins.saturating_sub(1);
            entry.dirty |= dirty;
        }
    }

    /// Writes every dirty block back. Entries stay resident and pinned.
    pub fn flush_all(&mut self, backend: &mut dyn BlockBackend) -> Result<()> {
        for set in &mut self.sets {
            for entry in set.iter_mut().filter(|e| e.dirty) {
                backend.write_block(entry.id, &entry.data[..entry.len])?;
                self.recorder.record(Counter::BlockWrite);
                entry.dirty = false;
            }
        }
        Ok(())
    }

    /// Drops block `id` without writing it back. Returns `false` if the
    /// block is pinned and was therefore kept.
    pub fn discard(&mut self, id: BlockId) -> bool {
        let set = self.set_of(id);
        match self.sets[set].iter().position(|e| e.id == id) {
            Some(pos) if self.sets[set][pos].pins > 0 => false,
            Some(pos) => {
                self.sets[set].swap_remove(pos);
                true
            }
            None => true,
        }
    }

    /// Drops every unpinned block with id `>= first` without writing it
    /// back. Used when storage shrinks underneath the cache.
    pub fn invalidate_from(&mut self, first: BlockId) {
        for set in &mut self.sets {
            set.retain(|e| e.id < first || e.pins > 0);
        }
    }
}

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::error::Result;
use crate::item::Item;
use crate::persist::Persistence;
use crate::stack::ExternalStack;
use crate::stream::{OpenMode, TypedStream};

/// A FIFO queue kept in two stream-backed stacks.
///
/// New items are pushed onto the enqueue stack. Dequeue pops from the
/// dequeue stack and, once that is empty, moves the whole enqueue stack
/// over, which reverses it into FIFO order. Every item is moved at most
/// once, so each operation costs O(1) amortized item I/Os.
#[derive(Debug)]
pub struct ExternalQueue<T: Item> {
    enqueue: ExternalStack<T>,
    dequeue: ExternalStack<T>,
}

/// Paths of the two stacks behind a named queue: `<base>.nq` and `<base>.dq`.
pub fn queue_paths(base: &Path) -> (PathBuf, PathBuf) {
    let with = |ext: &str| {
        let mut s = OsString::from(base.as_os_str());
        s.push(ext);
        PathBuf::from(s)
    };
    (with(".nq"), with(".dq"))
}

impl<T: Item> ExternalQueue<T> {
    /// A queue on scratch streams, deleted when dropped.
    pub fn temporary(ctx: &Context) -> Result<Self> {
        Ok(Self {
            enqueue: ExternalStack::temporary(ctx)?,
            dequeue: ExternalStack::temporary(ctx)?,
        })
    }

    /// Opens the queue stored under `base`, creating it when missing. Its
    /// streams persist unless [`ExternalQueue::set_persistence`] says
    /// otherwise.
    pub fn open<P: AsRef<Path>>(ctx: &Context, base: P) -> Result<Self> {
        let (nq, dq) = queue_paths(base.as_ref());
        Ok(Self {
            enqueue: ExternalStack::new(TypedStream::open(ctx, nq, OpenMode::Write)?),
            dequeue: ExternalStack::new(TypedStream::open(ctx, dq, OpenMode::Write)?),
        })
    }

    pub fn len(&self) -> u64 {
        self.enqueue.len() + self.dequeue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enqueue(&mut self, item: &T) -> Result<()> {
        self.enqueue.push(item)
    }

    /// Removes the oldest item. `Ok(None)` when the queue is empty.
    pub fn dequeue(&mut self) -> Result<Option<T>> {
        self.refill()?;
        self.dequeue.pop()
    }

    pub fn peek(&mut self) -> Result<Option<T>> {
        self.refill()?;
        self.dequeue.peek()
    }

    pub fn set_persistence(&mut self, persistence: Persistence) -> Result<()> {
        self.enqueue.stream_mut().set_persistence(persistence)?;
        self.dequeue.stream_mut().set_persistence(persistence)
    }

    fn refill(&mut self) -> Result<()> {
        if !self.dequeue.is_empty() {
            return Ok(());
        }
        while let Some(item) = self.enqueue.pop()? {
            self.dequeue.push(&item)?;
        }
        Ok(())
    }
}

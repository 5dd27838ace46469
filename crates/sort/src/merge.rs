//! Generalized k-to-1 merging.
//!
//! A [`MergeEngine`] drives any [`MergeObject`] over a set of input streams
//! and one output stream. The engine owns the I/O: it keeps one head item
//! per input, hands the heads to the object, writes whatever the object
//! emits and refills every input the object marked as taken.
//!
//! ```text
//!            heads        taken flags
//! input 0 ──► [ 3 ] ─┐   ┌─ [ ] ◄─┐
//! input 1 ──► [ 1 ] ─┼──►│ pick  │──► Output(1) ──► output stream
//! input 2 ──► [ - ] ─┘   └─ [x] ─┘    (input 1 is refilled next round)
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use log::debug;
use stream::{Item, TypedStream};

use crate::error::{Result, SortError};
use crate::heap::{ByComparator, HeapEntry};

/// What a merge object wants done after looking at the heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStep<T> {
    /// Write this item, then refill the taken inputs.
    Output(T),
    /// Refill the taken inputs without writing anything.
    Continue,
    /// The merge is complete.
    Done,
}

/// Pluggable merge logic.
///
/// `heads[i]` is the next unconsumed item of input `i`, or `None` once
/// that input is exhausted. An object is used for exactly one merge.
pub trait MergeObject<T: Item> {
    /// Called once with the first item of every input.
    fn initialize(&mut self, heads: &[Option<T>]) -> Result<()>;

    /// Chooses the next step. Every input whose head was consumed must be
    /// flagged in `taken`; the engine clears the flags before each call.
    fn pick_next(&mut self, heads: &[Option<T>], taken: &mut [bool]) -> Result<MergeStep<T>>;

    /// Transforms one in-memory run before it is written out. Returns
    /// `false` when the object has no in-memory routine and the caller
    /// should sort the run itself.
    fn operate_in_memory(&mut self, _run: &mut Vec<T>) -> Result<bool> {
        Ok(false)
    }
}

/// Lifecycle of one merge invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Init,
    Active,
    Done,
    /// Terminal. The engine cannot be run again.
    Failed,
}

/// Runs a single merge.
pub struct MergeEngine<M> {
    object: M,
    state: MergeState,
    written: u64,
}

impl<M> MergeEngine<M> {
    pub fn new(object: M) -> Self {
        Self {
            object,
            state: MergeState::Init,
            written: 0,
        }
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    /// Items written to the output so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> M {
        self.object
    }

    /// Merges `inputs` from their current positions into `output`.
    ///
    /// # Errors
    ///
    /// * [`SortError::MergeFailed`] if this engine is not in
    ///   [`MergeState::Init`].
    /// * Any stream error from reading an input or writing the output, and
    ///   any error raised by the merge object. Either one leaves the engine
    ///   in [`MergeState::Failed`].
    pub fn run<T>(&mut self, inputs: &mut [TypedStream<T>], output: &mut TypedStream<T>) -> Result<u64>
    where
        T: Item,
        M: MergeObject<T>,
    {
        if self.state != MergeState::Init {
            return Err(SortError::MergeFailed);
        }
        self.state = MergeState::Active;
        match self.drive(inputs, output) {
            Ok(()) => {
                self.state = MergeState::Done;
                debug!("merged {} inputs into {} items", inputs.len(), self.written);
                Ok(self.written)
            }
            Err(e) => {
                self.state = MergeState::Failed;
                Err(e)
            }
        }
    }

    fn drive<T>(&mut self, inputs: &mut [TypedStream<T>], output: &mut TypedStream<T>) -> Result<()>
    where
        T: Item,
        M: MergeObject<T>,
    {
        let mut heads = Vec::with_capacity(inputs.len());
        for input in inputs.iter_mut() {
            heads.push(input.read_item()?);
        }
        let mut taken = vec![false; inputs.len()];
        self.object.initialize(&heads)?;

        while heads.iter().any(Option::is_some) {
            taken.fill(false);
            let step = self.object.pick_next(&heads, &mut taken)?;
            match step {
                MergeStep::Done => return Ok(()),
                MergeStep::Output(item) => {
                    output.write_item(&item)?;
                    self.written += 1;
                }
                MergeStep::Continue => {
                    if !taken.contains(&true) {
                        return Err(SortError::MergeObject(
                            "continue without taking any input".into(),
                        ));
                    }
                }
            }
            for (i, flag) in taken.iter().enumerate() {
                if !*flag {
                    continue;
                }
                if heads[i].is_none() {
                    return Err(SortError::MergeObject(format!(
                        "took from exhausted input {}",
                        i
                    )));
                }
                heads[i] = inputs[i].read_item()?;
            }
        }
        Ok(())
    }
}

/// Stable k-way merge by a comparator. Equal items leave in input order.
pub struct SortingMerge<T, C> {
    cmp: Rc<C>,
    heap: BinaryHeap<HeapEntry<ByComparator<T, C>>>,
    pending: Option<usize>,
}

impl<T: Item, C: Fn(&T, &T) -> Ordering> SortingMerge<T, C> {
    pub fn new(cmp: C) -> Self {
        Self {
            cmp: Rc::new(cmp),
            heap: BinaryHeap::new(),
            pending: None,
        }
    }

    fn push(&mut self, item: T, source: usize) {
        self.heap.push(HeapEntry {
            key: ByComparator::new(item, &self.cmp),
            source,
        });
    }
}

impl<T: Item, C: Fn(&T, &T) -> Ordering> MergeObject<T> for SortingMerge<T, C> {
    fn initialize(&mut self, heads: &[Option<T>]) -> Result<()> {
        self.heap = BinaryHeap::with_capacity(heads.len());
        self.pending = None;
        for (i, head) in heads.iter().enumerate() {
            if let Some(item) = head {
                self.push(*item, i);
            }
        }
        Ok(())
    }

    fn pick_next(&mut self, heads: &[Option<T>], taken: &mut [bool]) -> Result<MergeStep<T>> {
        // The input taken last round has been refilled since.
        if let Some(i) = self.pending.take() {
            if let Some(item) = heads[i] {
                self.push(item, i);
            }
        }
        match self.heap.pop() {
            None => Ok(MergeStep::Done),
            Some(entry) => {
                taken[entry.source] = true;
                self.pending = Some(entry.source);
                Ok(MergeStep::Output(entry.key.item))
            }
        }
    }

    fn operate_in_memory(&mut self, run: &mut Vec<T>) -> Result<bool> {
        let cmp = &*self.cmp;
        run.sort_by(|a, b| cmp(a, b));
        Ok(true)
    }
}

/// Emits every distinct item once. All inputs whose head equals the
/// smallest head are consumed in the same step.
pub struct DedupMerge<T, C> {
    cmp: C,
    last: Option<T>,
}

impl<T: Item, C: Fn(&T, &T) -> Ordering> DedupMerge<T, C> {
    pub fn new(cmp: C) -> Self {
        Self { cmp, last: None }
    }
}

impl<T: Item, C: Fn(&T, &T) -> Ordering> MergeObject<T> for DedupMerge<T, C> {
    fn initialize(&mut self, _heads: &[Option<T>]) -> Result<()> {
        self.last = None;
        Ok(())
    }

    fn pick_next(&mut self, heads: &[Option<T>], taken: &mut [bool]) -> Result<MergeStep<T>> {
        let mut min: Option<T> = None;
        for head in heads.iter().flatten() {
            if min.map_or(true, |m| (self.cmp)(head, &m) == Ordering::Less) {
                min = Some(*head);
            }
        }
        let Some(min) = min else {
            return Ok(MergeStep::Done);
        };
        for (i, head) in heads.iter().enumerate() {
            if matches!(head, Some(h) if (self.cmp)(h, &min) == Ordering::Equal) {
                taken[i] = true;
            }
        }
        // Repeats inside one input surface one round at a time.
        if matches!(self.last, Some(last) if (self.cmp)(&min, &last) == Ordering::Equal) {
            return Ok(MergeStep::Continue);
        }
        self.last = Some(min);
        Ok(MergeStep::Output(min))
    }

    fn operate_in_memory(&mut self, run: &mut Vec<T>) -> Result<bool> {
        run.sort_by(|a, b| (self.cmp)(a, b));
        run.dedup_by(|a, b| (self.cmp)(&*a, &*b) == Ordering::Equal);
        Ok(true)
    }
}

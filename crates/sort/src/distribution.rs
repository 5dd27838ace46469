//! Key-based distribution sort.
//!
//! Every item maps to a `u64` key. Inside a run, items are first scattered
//! into buckets that each cover a slice of a known key range, then each
//! bucket is sorted on its own; the merge phase compares keys only. Both
//! steps are stable, so items with equal keys keep their input order.

use std::collections::BinaryHeap;
use std::marker::PhantomData;

use stream::Item;

use crate::error::{Result, SortError};
use crate::heap::HeapEntry;
use crate::merge::{MergeObject, MergeStep};

/// Upper bound on buckets per run.
pub const MAX_BUCKETS: usize = 1024;

/// The half-open key range `[min, max)` the buckets are spread over.
///
/// Keys outside the range are still sorted correctly; they are clamped into
/// the first or last bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub min: u64,
    pub max: u64,
}

impl KeyRange {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Every possible key.
    pub fn full() -> Self {
        Self {
            min: 0,
            max: u64::MAX,
        }
    }

    fn span(&self) -> u128 {
        (self.max.saturating_sub(self.min) as u128).max(1)
    }

    /// Bucket of `key` when the range is split into `buckets` equal parts.
    pub fn bucket_of(&self, key: u64, buckets: usize) -> usize {
        let offset = key.saturating_sub(self.min) as u128;
        let offset = offset.min(self.span() - 1);
        (offset * buckets as u128 / self.span()) as usize
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::full()
    }
}

/// Merge object for [`crate::Sorter::key_sort`].
///
/// The heap holds precomputed keys; the item itself stays in the engine's
/// head slot until it is emitted.
pub struct KeyBucketMerge<T, K> {
    key: K,
    range: KeyRange,
    heap: BinaryHeap<HeapEntry<u64>>,
    pending: Option<usize>,
    _item: PhantomData<fn(&T)>,
}

impl<T: Item, K: Fn(&T) -> u64> KeyBucketMerge<T, K> {
    pub fn new(key: K, range: KeyRange) -> Self {
        Self {
            key,
            range,
            heap: BinaryHeap::new(),
            pending: None,
            _item: PhantomData,
        }
    }
}

impl<T: Item, K: Fn(&T) -> u64> MergeObject<T> for KeyBucketMerge<T, K> {
    fn initialize(&mut self, heads: &[Option<T>]) -> Result<()> {
        self.heap = BinaryHeap::with_capacity(heads.len());
        self.pending = None;
        for (i, head) in heads.iter().enumerate() {
            if let Some(item) = head {
                self.heap.push(HeapEntry {
                    key: (self.key)(item),
                    source: i,
                });
            }
        }
        Ok(())
    }

    fn pick_next(&mut self, heads: &[Option<T>], taken: &mut [bool]) -> Result<MergeStep<T>> {
        if let Some(i) = self.pending.take() {
            if let Some(item) = &heads[i] {
                self.heap.push(HeapEntry {
                    key: (self.key)(item),
                    source: i,
                });
            }
        }
        let Some(entry) = self.heap.pop() else {
            return Ok(MergeStep::Done);
        };
        let item = heads[entry.source].ok_or_else(|| {
            SortError::MergeObject(format!("input {} has no head to emit", entry.source))
        })?;
        taken[entry.source] = true;
        self.pending = Some(entry.source);
        Ok(MergeStep::Output(item))
    }

    fn operate_in_memory(&mut self, run: &mut Vec<T>) -> Result<bool> {
        if run.len() < 2 {
            return Ok(true);
        }
        let buckets = run.len().min(MAX_BUCKETS);
        let bucket_of: Vec<usize> = run
            .iter()
            .map(|item| self.range.bucket_of((self.key)(item), buckets))
            .collect();

        // Counting scatter: starts[b] is where bucket b begins in the output.
        let mut starts = vec![0usize; buckets + 1];
        for &b in &bucket_of {
            starts[b + 1] += 1;
        }
        for b in 0..buckets {
            starts[b + 1] += starts[b];
        }
        let mut next = starts.clone();
        let mut scattered: Vec<Option<T>> = vec![None; run.len()];
        for (item, &b) in run.iter().zip(&bucket_of) {
            scattered[next[b]] = Some(*item);
            next[b] += 1;
        }
        run.clear();
        run.extend(scattered.into_iter().flatten());

        for b in 0..buckets {
            run[starts[b]..starts[b + 1]].sort_by_key(|item| (self.key)(item));
        }
        Ok(true)
    }
}

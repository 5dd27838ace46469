//! Heap entries for k-way merges.
//!
//! Merges keep one [`HeapEntry`] per live input in a
//! `std::collections::BinaryHeap`, keyed by that input's head.

use std::cmp::Ordering;
use std::rc::Rc;

/// The head of one merge input.
pub(crate) struct HeapEntry<K> {
    pub(crate) key: K,
    /// Index into the merge inputs.
    pub(crate) source: usize,
}

impl<K: Ord> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl<K: Ord> Eq for HeapEntry<K> {}

impl<K: Ord> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeapEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the smallest key first, and on
        // a tie the input with the lower index, so merges stay stable.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// An item ordered by a comparator shared across the heap.
pub(crate) struct ByComparator<T, C> {
    pub(crate) item: T,
    cmp: Rc<C>,
}

impl<T, C: Fn(&T, &T) -> Ordering> ByComparator<T, C> {
    pub(crate) fn new(item: T, cmp: &Rc<C>) -> Self {
        Self {
            item,
            cmp: Rc::clone(cmp),
        }
    }
}

impl<T, C: Fn(&T, &T) -> Ordering> PartialEq for ByComparator<T, C> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, C: Fn(&T, &T) -> Ordering> Eq for ByComparator<T, C> {}

impl<T, C: Fn(&T, &T) -> Ordering> PartialOrd for ByComparator<T, C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, C: Fn(&T, &T) -> Ordering> Ord for ByComparator<T, C> {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self.cmp)(&self.item, &other.item)
    }
}

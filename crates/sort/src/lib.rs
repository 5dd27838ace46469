//! # Sort - external merge sort over typed streams
//!
//! Sorting and merging for streams larger than memory:
//!
//! - [`MergeEngine`] runs any k-to-1 [`MergeObject`] over input streams.
//!   [`SortingMerge`] is the stable k-way merge, [`DedupMerge`] keeps one
//!   copy of every distinct item.
//! - [`Sorter`] cuts the input into memory-sized runs, sorts each run and
//!   merges them under the stream-handle and memory limits of the
//!   [`stream::Context`].
//! - [`Sorter::key_sort`] is the key-based distribution variant: runs are
//!   bucketed by a `u64` key over a [`KeyRange`] before the per-bucket sort.
//!
//! Progress can be reported through a [`ProgressIndicator`]; [`LogProgress`]
//! writes it to the `log` facade.

mod distribution;
mod error;
mod heap;
mod merge;
mod progress;
mod sorter;

pub use distribution::{KeyBucketMerge, KeyRange, MAX_BUCKETS};
pub use error::{Result, SortError};
pub use merge::{DedupMerge, MergeEngine, MergeObject, MergeState, MergeStep, SortingMerge};
pub use progress::{LogProgress, ProgressIndicator};
pub use sorter::{SortPlan, SortReport, Sorter};

#[cfg(test)]
mod tests;

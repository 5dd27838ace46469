use std::io;

use stream::StreamError;
use thiserror::Error;

/// Errors from merging and sorting.
///
/// Stream failures pass through unchanged. The two structural conditions,
/// [`SortError::InsufficientArity`] and [`SortError::InsufficientMemory`],
/// are detected while planning, before any run is written.
#[derive(Debug, Error)]
pub enum SortError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("merge arity {arity} is below 2: too few stream handles or too little memory to merge")]
    InsufficientArity { arity: usize },

    #[error("sorting needs at least {needed} bytes of memory, only {available} allowed")]
    InsufficientMemory { needed: usize, available: usize },

    /// The engine already ran, or an earlier step failed.
    #[error("merge engine is not in its initial state")]
    MergeFailed,

    #[error("merge object: {0}")]
    MergeObject(String),
}

impl From<io::Error> for SortError {
    fn from(e: io::Error) -> Self {
        SortError::Stream(e.into())
    }
}

pub type Result<T> = std::result::Result<T, SortError>;

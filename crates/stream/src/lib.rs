//! # Stream - block-structured external-memory storage
//!
//! Typed item streams over fixed-layout files, for data sets that do not fit
//! in memory. The crate is layered leaves first:
//!
//! 1. [`header`] and [`Persistence`] - the on-disk descriptor and what
//!    happens to a file on teardown.
//! 2. [`backend`] - raw block I/O: plain file, memory map, and a
//!    compressing wrapper over either.
//! 3. [`cache`] - a set-associative LRU cache of block buffers with pinning.
//! 4. [`TypedStream`] - typed sequential/random access and sub-streams, with
//!    [`ExternalStack`], [`ExternalQueue`] and [`BlockCollection`] built on
//!    the same pieces, and [`scan`] for single-pass transforms.
//!
//! Process-wide state (configuration, the open-stream ceiling, global
//! counters) lives in a [`Context`] created once and passed around.
//!
//! ## Example
//!
//! ```rust,no_run
//! use config::Config;
//! use stream::{Context, OpenMode, TypedStream};
//!
//! let ctx = Context::new(Config::default()).unwrap();
//! let mut s = TypedStream::<u64>::create(&ctx, "numbers.uts").unwrap();
//! for i in 0..1000u64 {
//!     s.write_item(&i).unwrap();
//! }
//! s.close().unwrap();
//!
//! let mut s = TypedStream::<u64>::open(&ctx, "numbers.uts", OpenMode::Read).unwrap();
//! while let Some(v) = s.read_item().unwrap() {
//!     println!("{}", v);
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod collection;
pub mod context;
pub mod error;
pub mod header;
pub mod item;
pub mod persist;
pub mod queue;
pub mod scan;
pub mod stack;
pub mod stats;
pub mod stream;

pub use backend::{BlockBackend, BlockId, Geometry};
pub use cache::{BlockCache, CacheEntry};
pub use collection::BlockCollection;
pub use context::Context;
pub use error::{HeaderError, Result, StreamError};
pub use header::{BackendType, StreamHeader};
pub use item::Item;
pub use persist::Persistence;
pub use queue::ExternalQueue;
pub use scan::{copy_stream, scan, IdentityScan, ScanObject, ScanStep};
pub use stack::ExternalStack;
pub use stats::{Counter, Stats, StatsRecorder, StatsSnapshot};
pub use stream::{OpenMode, TypedStream};

#[cfg(test)]
mod tests;

//! I/O counters.
//!
//! Each stream and block collection owns a [`Stats`]; the [`crate::Context`]
//! owns a process-wide one. A [`StatsRecorder`] bumps both at once.
//! Counters are atomics so a snapshot can be taken through a shared reference
//! at any time without disturbing the owner.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One kind of event being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    BlockRead,
    BlockWrite,
    ItemRead,
    ItemWrite,
    ItemSeek,
    StreamOpen,
    StreamClose,
    StreamCreate,
    StreamDelete,
    SubstreamCreate,
    SubstreamDelete,
    CacheHit,
    CacheMiss,
    CacheEviction,
}

const COUNTERS: usize = 14;

impl Counter {
    pub const ALL: [Counter; COUNTERS] = [
        Counter::BlockRead,
        Counter::BlockWrite,
        Counter::ItemRead,
        Counter::ItemWrite,
        Counter::ItemSeek,
        Counter::StreamOpen,
        Counter::StreamClose,
        Counter::StreamCreate,
        Counter::StreamDelete,
        Counter::SubstreamCreate,
        Counter::SubstreamDelete,
        Counter::CacheHit,
        Counter::CacheMiss,
        Counter::CacheEviction,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::BlockRead => "block_read",
            Counter::BlockWrite => "block_write",
            Counter::ItemRead => "item_read",
            Counter::ItemWrite => "item_write",
            Counter::ItemSeek => "item_seek",
            Counter::StreamOpen => "stream_open",
            Counter::StreamClose => "stream_close",
            Counter::StreamCreate => "stream_create",
            Counter::StreamDelete => "stream_delete",
            Counter::SubstreamCreate => "substream_create",
            Counter::SubstreamDelete => "substream_delete",
            Counter::CacheHit => "cache_hit",
            Counter::CacheMiss => "cache_miss",
            Counter::CacheEviction => "cache_eviction",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A set of atomic counters, one per [`Counter`].
#[derive(Debug, Default)]
pub struct Stats {
    counts: [AtomicU64; COUNTERS],
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counts[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut counts = [0u64; COUNTERS];
        for c in Counter::ALL {
            counts[c.index()] = self.get(c);
        }
        StatsSnapshot { counts }
    }
}

/// Plain copy of a [`Stats`] at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    counts: [u64; COUNTERS],
}

impl StatsSnapshot {
    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter.index()]
    }

    /// Non-zero counters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (Counter, u64)> + '_ {
        Counter::ALL
            .iter()
            .map(move |&c| (c, self.get(c)))
            .filter(|&(_, n)| n > 0)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (c, n) in self.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={}", c.name(), n)?;
            first = false;
        }
        if first {
            write!(f, "(no activity)")?;
        }
        Ok(())
    }
}

/// Records into a local [`Stats`] and the process-wide one together.
#[derive(Debug, Clone)]
pub struct StatsRecorder {
    local: Arc<Stats>,
    global: Arc<Stats>,
}

impl StatsRecorder {
    pub fn new(global: Arc<Stats>) -> Self {
        Self {
            local: Arc::new(Stats::new()),
            global,
        }
    }

    pub fn record(&self, counter: Counter) {
        self.record_n(counter, 1);
    }

    pub fn record_n(&self, counter: Counter, n: u64) {
        self.local.add(counter, n);
        self.global.add(counter, n);
    }

    pub fn local(&self) -> &Stats {
        &self.local
    }
}

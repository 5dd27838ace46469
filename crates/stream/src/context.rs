//! Process-scoped state: configuration, the open-stream budget and the
//! process-wide statistics.
//!
//! A [`Context`] is built once at startup and cloned into every component.
//! Clones share the same budget and counters.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use config::Config;
use log::debug;

use crate::error::{Result, StreamError};
use crate::stats::Stats;

/// File descriptors kept back from the OS limit for stdio, logs and the like.
pub const FD_RESERVE: usize = 16;

/// Ceiling used where the OS limit cannot be queried.
pub const FALLBACK_STREAM_CEILING: usize = 512;

#[derive(Debug)]
struct HandleBudget {
    open: AtomicUsize,
    ceiling: AtomicUsize,
}

/// Proof that one stream handle was admitted under the ceiling. Dropping it
/// gives the slot back.
#[derive(Debug)]
pub struct HandleLease {
    budget: Arc<HandleBudget>,
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.budget.open.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
struct ContextInner {
    config: Config,
    handles: Arc<HandleBudget>,
    stats: Arc<Stats>,
}

/// Shared handle to the process-wide state.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Builds the context. The stream ceiling comes from
    /// `config.max_open_streams`, or from the process file-descriptor limit.
    pub fn new(config: Config) -> Result<Self> {
        let ceiling = match config.max_open_streams {
            Some(n) => n,
            None => os_stream_limit()?,
        };
        debug!(
            "stream context ready (ceiling={}, temp_dir={})",
            ceiling,
            config.temp_dir.display()
        );
        Ok(Self {
            inner: Arc::new(ContextInner {
                config,
                handles: Arc::new(HandleBudget {
                    open: AtomicUsize::new(0),
                    ceiling: AtomicUsize::new(ceiling),
                }),
                stats: Arc::new(Stats::new()),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Process-wide counters, summed over every stream ever opened.
    pub fn stats(&self) -> &Stats {
        &self.inner.stats
    }

    pub(crate) fn stats_handle(&self) -> Arc<Stats> {
        Arc::clone(&self.inner.stats)
    }

    pub fn stream_ceiling(&self) -> usize {
        self.inner.handles.ceiling.load(Ordering::Acquire)
    }

    /// Changes the ceiling for handles opened from now on. Handles already
    /// open are not affected.
    pub fn set_stream_ceiling(&self, ceiling: usize) {
        self.inner.handles.ceiling.store(ceiling, Ordering::Release);
    }

    pub fn open_handles(&self) -> usize {
        self.inner.handles.open.load(Ordering::Acquire)
    }

    /// How many more streams may be opened right now.
    pub fn available_handles(&self) -> usize {
        self.stream_ceiling().saturating_sub(self.open_handles())
    }

    pub(crate) fn acquire_handle(&self) -> Result<HandleLease> {
        let budget = &self.inner.handles;
        let ceiling = budget.ceiling.load(Ordering::Acquire);
        budget
            .open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < ceiling).then_some(open + 1)
            })
            .map_err(|_| StreamError::HandlesExhausted(ceiling))?;
        Ok(HandleLease {
            budget: Arc::clone(budget),
        })
    }

    /// Reserves a fresh, uniquely named file in the scratch directory and
    /// returns its path. The file exists (empty) when this returns.
    pub fn scratch_path(&self, prefix: &str) -> Result<PathBuf> {
        let dir = &self.inner.config.temp_dir;
        std::fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".uts")
            .tempfile_in(dir)?;
        let (_, path) = file.keep().map_err(|e| StreamError::from(e.error))?;
        Ok(path)
    }
}

#[cfg(unix)]
fn os_stream_limit() -> Result<usize> {
    let mut rlim: libc::rlimit = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) };
    if ret != 0 {
        return Err(StreamError::Os(std::io::Error::last_os_error().to_string()));
    }
    let soft = if rlim.rlim_cur == libc::RLIM_INFINITY {
        usize::MAX
    } else {
        rlim.rlim_cur as usize
    };
    Ok(soft.saturating_sub(FD_RESERVE))
}

#[cfg(not(unix))]
fn os_stream_limit() -> Result<usize> {
    Ok(FALLBACK_STREAM_CEILING)
}

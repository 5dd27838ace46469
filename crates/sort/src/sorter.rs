//! Partition-and-merge sort.
//!
//! 1. **Plan**: derive the run size and merge arity from the memory budget
//!    and the free stream handles ([`Sorter::plan`]).
//! 2. **Runs**: read the input `max_run_items` at a time, sort each batch in
//!    memory and write it to a run file.
//! 3. **Merge**: merge runs `merge_arity` at a time until at most
//!    `merge_arity` are left, then merge those straight into the output.
//!
//! Run files live in a private scratch directory. Between passes they are
//! closed, so they hold no stream handles; a run is reopened, with
//! delete-on-close persistence, only while it is being merged. Any error
//! drops the scratch directory and everything still in it.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info};
use stream::{copy_stream, Context, Item, OpenMode, Persistence, StreamError, TypedStream};

use crate::distribution::{KeyBucketMerge, KeyRange};
use crate::error::{Result, SortError};
use crate::merge::{MergeEngine, MergeObject, SortingMerge};
use crate::progress::ProgressIndicator;

/// Sizes chosen for one sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortPlan {
    pub item_size: usize,
    pub memory_limit: usize,
    /// Memory charged for every open stream (its block cache).
    pub per_stream_overhead: usize,
    /// What is left for run buffers once the input and output are paid for.
    pub run_memory: usize,
    pub max_run_items: u64,
    pub available_handles: usize,
    pub reserved_streams: usize,
    pub merge_arity: usize,
}

impl SortPlan {
    /// Number of runs an input of `items` items is cut into.
    pub fn runs_for(&self, items: u64) -> u64 {
        items.div_ceil(self.max_run_items)
    }
}

impl fmt::Display for SortPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "item_size={} memory={} overhead={} run_memory={} max_run_items={} handles={} reserved={} arity={}",
            self.item_size,
            self.memory_limit,
            self.per_stream_overhead,
            self.run_memory,
            self.max_run_items,
            self.available_handles,
            self.reserved_streams,
            self.merge_arity
        )
    }
}

/// Outcome of a finished sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortReport {
    pub items: u64,
    pub plan: SortPlan,
    /// Run count before each merge pass and after the last one, e.g.
    /// `[10, 3, 1]`. `[1]` when the input fit in one run, empty for an
    /// empty input.
    pub runs_per_pass: Vec<u64>,
    pub merge_passes: usize,
}

#[derive(Debug, Clone)]
struct Run {
    path: PathBuf,
    len: u64,
}

/// External sorter. Every limit not set on the builder comes from the
/// context's configuration.
///
/// ```rust,no_run
/// use config::Config;
/// use sort::Sorter;
/// use stream::{Context, OpenMode, TypedStream};
///
/// let ctx = Context::new(Config::default()).unwrap();
/// let mut input = TypedStream::<u64>::open(&ctx, "in.uts", OpenMode::Read).unwrap();
/// let mut output = TypedStream::<u64>::create(&ctx, "out.uts").unwrap();
/// let report = Sorter::new(&ctx).sort(&mut input, &mut output).unwrap();
/// println!("{:?}", report.runs_per_pass);
/// ```
pub struct Sorter {
    ctx: Context,
    memory_limit: Option<usize>,
    max_run_items: Option<u64>,
    merge_arity: Option<usize>,
    reserved_streams: Option<usize>,
    per_stream_overhead: Option<usize>,
    progress: Option<Box<dyn ProgressIndicator>>,
}

impl Sorter {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            memory_limit: None,
            max_run_items: None,
            merge_arity: None,
            reserved_streams: None,
            per_stream_overhead: None,
            progress: None,
        }
    }

    /// Total memory the sort may use, in bytes.
    #[must_use]
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Fixes the run length instead of deriving it from memory.
    #[must_use]
    pub fn max_run_items(mut self, items: u64) -> Self {
        self.max_run_items = Some(items);
        self
    }

    /// Fixes the merge arity. It is still capped by the free stream handles.
    #[must_use]
    pub fn merge_arity(mut self, arity: usize) -> Self {
        self.merge_arity = Some(arity);
        self
    }

    /// Handles kept back from merging (merge outputs and the caller's own
    /// streams opened later).
    #[must_use]
    pub fn reserved_streams(mut self, n: usize) -> Self {
        self.reserved_streams = Some(n);
        self
    }

    #[must_use]
    pub fn per_stream_overhead(mut self, bytes: usize) -> Self {
        self.per_stream_overhead = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Box<dyn ProgressIndicator>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Computes run size and merge arity for items of type `T` against the
    /// handles free right now. Does no I/O.
    ///
    /// # Errors
    ///
    /// * [`SortError::InsufficientMemory`] when the budget cannot hold the
    ///   input and output streams plus one item.
    /// * [`SortError::InsufficientArity`] when fewer than two runs could be
    ///   merged at once.
    pub fn plan<T: Item>(&self) -> Result<SortPlan> {
        let cfg = self.ctx.config();
        let per_stream_overhead = self
            .per_stream_overhead
            .unwrap_or(cfg.logical_block_size().saturating_mul(cfg.cache_blocks))
            .max(1);
        let memory_limit = self.memory_limit.unwrap_or(cfg.memory_limit);

        // The input and output streams stay open for the whole sort.
        let streaming = 2 * per_stream_overhead;
        let needed = streaming + T::SIZE;
        if memory_limit < needed {
            return Err(SortError::InsufficientMemory {
                needed,
                available: memory_limit,
            });
        }
        let run_memory = memory_limit - streaming;
        let max_run_items = match self.max_run_items {
            Some(0) => {
                return Err(SortError::InsufficientMemory {
                    needed: T::SIZE,
                    available: 0,
                })
            }
            Some(n) => n,
            None => (run_memory / T::SIZE) as u64,
        };

        let reserved_streams = self.reserved_streams.unwrap_or(cfg.reserved_streams);
        let available_handles = self.ctx.available_handles();
        let handle_bound = available_handles.saturating_sub(reserved_streams);
        let merge_arity = match self.merge_arity {
            Some(arity) => arity.min(handle_bound),
            None => handle_bound.min(run_memory / per_stream_overhead),
        };
        if merge_arity < 2 {
            return Err(SortError::InsufficientArity { arity: merge_arity });
        }

        Ok(SortPlan {
            item_size: T::SIZE,
            memory_limit,
            per_stream_overhead,
            run_memory,
            max_run_items,
            available_handles,
            reserved_streams,
            merge_arity,
        })
    }

    /// Sorts `input` into `output` in ascending order. Equal items keep
    /// their input order.
    pub fn sort<T: Item + Ord>(
        &mut self,
        input: &mut TypedStream<T>,
        output: &mut TypedStream<T>,
    ) -> Result<SortReport> {
        self.sort_by(input, output, |a: &T, b: &T| a.cmp(b))
    }

    /// Stable sort by a comparator.
    pub fn sort_by<T, C>(
        &mut self,
        input: &mut TypedStream<T>,
        output: &mut TypedStream<T>,
        cmp: C,
    ) -> Result<SortReport>
    where
        T: Item,
        C: Fn(&T, &T) -> Ordering,
    {
        self.sort_with(input, output, &cmp, || SortingMerge::new(&cmp))
    }

    /// Sort with custom merge logic. `make_merge` builds one merge object
    /// per run and per merge; when an object has no in-memory routine the
    /// run is sorted with `cmp`.
    ///
    /// The whole of `input` is read from the start. `output` is truncated
    /// first and receives the result.
    ///
    /// # Errors
    ///
    /// Planning errors before any I/O, then any stream or merge-object
    /// error. On error no run file is left behind.
    pub fn sort_with<T, C, M, F>(
        &mut self,
        input: &mut TypedStream<T>,
        output: &mut TypedStream<T>,
        cmp: C,
        mut make_merge: F,
    ) -> Result<SortReport>
    where
        T: Item,
        C: Fn(&T, &T) -> Ordering,
        M: MergeObject<T>,
        F: FnMut() -> M,
    {
        let plan = self.plan::<T>()?;
        let items = input.len();
        info!(
            "sorting {} items: {} runs of up to {} items, arity {}",
            items,
            plan.runs_for(items),
            plan.max_run_items,
            plan.merge_arity
        );
        input.seek(0)?;
        output.truncate(0)?;
        output.seek(0)?;

        let mut report = SortReport {
            items,
            plan,
            runs_per_pass: Vec::new(),
            merge_passes: 0,
        };
        if items == 0 {
            return Ok(report);
        }

        if items <= plan.max_run_items {
            self.progress_init("sorting in memory", items);
            let mut run = Vec::new();
            fill_run(input, &mut run, items)?;
            sort_run(&mut run, &cmp, &mut make_merge())?;
            output.write_all_items(&run)?;
            self.progress_step(items);
            self.progress_done();
            report.runs_per_pass.push(1);
            return Ok(report);
        }

        let temp_dir = &self.ctx.config().temp_dir;
        std::fs::create_dir_all(temp_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix("undertow-sort-")
            .tempdir_in(temp_dir)?;
        let mut runs = self.form_runs(input, &plan, scratch.path(), &cmp, &mut make_merge)?;
        report.runs_per_pass.push(runs.len() as u64);

        while runs.len() > plan.merge_arity {
            report.merge_passes += 1;
            runs = self.merge_pass(
                &runs,
                plan.merge_arity,
                report.merge_passes,
                scratch.path(),
                &mut make_merge,
            )?;
            report.runs_per_pass.push(runs.len() as u64);
        }

        report.merge_passes += 1;
        info!("final merge of {} runs", runs.len());
        self.progress_init("final merge", items);
        let written = self.merge_runs(&runs, output, &mut make_merge)?;
        self.progress_step(written);
        self.progress_done();
        report.runs_per_pass.push(1);

        scratch.close()?;
        Ok(report)
    }

    /// Sorts `stream` onto itself through a scratch stream.
    ///
    /// # Errors
    ///
    /// [`StreamError::ReadOnly`] when `stream` was opened read-only.
    pub fn sort_in_place<T: Item + Ord>(&mut self, stream: &mut TypedStream<T>) -> Result<SortReport> {
        if stream.mode() == OpenMode::Read {
            return Err(StreamError::ReadOnly.into());
        }
        let mut sorted = TypedStream::<T>::temporary(&self.ctx)?;
        let report = self.sort(stream, &mut sorted)?;

        stream.seek(0)?;
        copy_stream(&mut sorted, stream)?;
        sorted.close()?;
        Ok(report)
    }

    /// Key-based distribution sort: orders items by `key`, with runs
    /// bucketed over `range` before the per-bucket sort. Stable.
    pub fn key_sort<T, K>(
        &mut self,
        input: &mut TypedStream<T>,
        output: &mut TypedStream<T>,
        key: K,
        range: KeyRange,
    ) -> Result<SortReport>
    where
        T: Item,
        K: Fn(&T) -> u64,
    {
        self.sort_with(
            input,
            output,
            |a: &T, b: &T| key(a).cmp(&key(b)),
            || KeyBucketMerge::new(&key, range),
        )
    }

    fn form_runs<T, C, M, F>(
        &mut self,
        input: &mut TypedStream<T>,
        plan: &SortPlan,
        dir: &Path,
        cmp: &C,
        make_merge: &mut F,
    ) -> Result<Vec<Run>>
    where
        T: Item,
        C: Fn(&T, &T) -> Ordering,
        M: MergeObject<T>,
        F: FnMut() -> M,
    {
        let total = input.len();
        self.progress_init("forming runs", total);
        let mut runs = Vec::with_capacity(plan.runs_for(total) as usize);
        let mut buf = Vec::new();
        let mut remaining = total;
        while remaining > 0 {
            let n = remaining.min(plan.max_run_items);
            fill_run(input, &mut buf, n)?;
            sort_run(&mut buf, cmp, &mut make_merge())?;

            let path = dir.join(format!("run-0-{}.uts", runs.len()));
            let mut run = TypedStream::<T>::create(&self.ctx, &path)?;
            run.write_all_items(&buf)?;
            run.close()?;
            debug!("wrote run {} ({} items)", path.display(), buf.len());
            runs.push(Run {
                path,
                len: buf.len() as u64,
            });

            remaining -= n;
            self.progress_step(n);
        }
        self.progress_done();
        Ok(runs)
    }

    fn merge_pass<T, M, F>(
        &mut self,
        runs: &[Run],
        arity: usize,
        pass: usize,
        dir: &Path,
        make_merge: &mut F,
    ) -> Result<Vec<Run>>
    where
        T: Item,
        M: MergeObject<T>,
        F: FnMut() -> M,
    {
        info!("merge pass {}: {} runs, arity {}", pass, runs.len(), arity);
        let total = runs.iter().map(|r| r.len).sum();
        self.progress_init(&format!("merge pass {}", pass), total);

        let mut next = Vec::with_capacity(runs.len().div_ceil(arity));
        for (i, batch) in runs.chunks(arity).enumerate() {
            if let [only] = batch {
                next.push(only.clone());
                self.progress_step(only.len);
                continue;
            }
            let path = dir.join(format!("run-{}-{}.uts", pass, i));
            let mut out = TypedStream::<T>::create(&self.ctx, &path)?;
            let len = self.merge_runs(batch, &mut out, make_merge)?;
            out.close()?;
            next.push(Run { path, len });
            self.progress_step(batch.iter().map(|r| r.len).sum());
        }
        self.progress_done();
        Ok(next)
    }

    /// Merges `batch` into `out`. Every run file is deleted once merged.
    fn merge_runs<T, M, F>(
        &mut self,
        batch: &[Run],
        out: &mut TypedStream<T>,
        make_merge: &mut F,
    ) -> Result<u64>
    where
        T: Item,
        M: MergeObject<T>,
        F: FnMut() -> M,
    {
        let mut inputs = Vec::with_capacity(batch.len());
        for run in batch {
            let mut s = TypedStream::<T>::open(&self.ctx, &run.path, OpenMode::Read)?;
            s.set_persistence(Persistence::Delete)?;
            inputs.push(s);
        }
        let written = MergeEngine::new(make_merge()).run(&mut inputs, out)?;
        for s in inputs {
            s.close()?;
        }
        Ok(written)
    }

    fn progress_init(&mut self, description: &str, total: u64) {
        if let Some(p) = self.progress.as_mut() {
            p.init(description, total);
        }
    }

    fn progress_step(&mut self, n: u64) {
        if let Some(p) = self.progress.as_mut() {
            p.step(n);
        }
    }

    fn progress_done(&mut self) {
        if let Some(p) = self.progress.as_mut() {
            p.done();
        }
    }
}

/// Reads the next `n` items of `input` into `buf`, replacing its contents.
fn fill_run<T: Item>(input: &mut TypedStream<T>, buf: &mut Vec<T>, n: u64) -> Result<()> {
    let n = usize::try_from(n)
        .map_err(|_| StreamError::Memory(format!("run of {} items does not fit in memory", n)))?;
    buf.clear();
    buf.try_reserve_exact(n)
        .map_err(|e| StreamError::Memory(format!("run buffer of {} items: {}", n, e)))?;
    for _ in 0..n {
        match input.read_item()? {
            Some(item) => buf.push(item),
            None => return Err(StreamError::EndOfStream.into()),
        }
    }
    Ok(())
}

fn sort_run<T, C, M>(run: &mut Vec<T>, cmp: &C, object: &mut M) -> Result<()>
where
    T: Item,
    C: Fn(&T, &T) -> Ordering,
    M: MergeObject<T>,
{
    if !object.operate_in_memory(run)? {
        run.sort_by(|a, b| cmp(a, b));
    }
    Ok(())
}

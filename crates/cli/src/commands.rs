use anyhow::{bail, Context as _, Result};
use sort::{KeyRange, LogProgress, Sorter};
use stream::{Context, OpenMode, TypedStream};

/// How `GEN` orders the numbers it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Ascending,
    Descending,
    Random,
}

impl std::str::FromStr for Pattern {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Pattern::Ascending),
            "desc" => Ok(Pattern::Descending),
            "random" | "rand" => Ok(Pattern::Random),
            other => bail!("unknown pattern '{}' (asc|desc|random)", other),
        }
    }
}

/// Command implementations. Every stream holds `u64` items.
pub struct Shell {
    ctx: Context,
}

impl Shell {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn open(&self, path: &str) -> Result<TypedStream<u64>> {
        TypedStream::open(&self.ctx, path, OpenMode::Read)
            .with_context(|| format!("cannot open {}", path))
    }

    /// Writes `n` numbers to a new stream at `path`.
    pub fn generate(&self, path: &str, n: u64, pattern: Pattern) -> Result<String> {
        let mut s = TypedStream::<u64>::create(&self.ctx, path)
            .with_context(|| format!("cannot create {}", path))?;
        let mut rng = fastrand::Rng::with_seed(self.ctx.config().seed);
        for i in 0..n {
            let v = match pattern {
                Pattern::Ascending => i,
                Pattern::Descending => n - 1 - i,
                Pattern::Random => rng.u64(..),
            };
            s.write_item(&v)?;
        }
        s.close()?;
        Ok(format!("OK ({} items)", n))
    }

    pub fn sort(&self, input: &str, output: &str) -> Result<String> {
        let mut src = self.open(input)?;
        let mut dst = TypedStream::<u64>::create(&self.ctx, output)
            .with_context(|| format!("cannot create {}", output))?;
        let report = Sorter::new(&self.ctx)
            .with_progress(Box::new(LogProgress::new()))
            .sort(&mut src, &mut dst)?;
        dst.close()?;
        Ok(format!(
            "OK (items={}, runs={:?}, passes={})",
            report.items, report.runs_per_pass, report.merge_passes
        ))
    }

    /// Distribution sort keyed on the value itself, bucketed over the
    /// input's own value range.
    pub fn key_sort(&self, input: &str, output: &str) -> Result<String> {
        let mut src = self.open(input)?;
        let (mut min, mut max) = (u64::MAX, 0u64);
        while let Some(v) = src.read_item()? {
            min = min.min(v);
            max = max.max(v);
        }
        let range = if min > max {
            KeyRange::full()
        } else {
            KeyRange::new(min, max.saturating_add(1))
        };

        let mut dst = TypedStream::<u64>::create(&self.ctx, output)
            .with_context(|| format!("cannot create {}", output))?;
        let report = Sorter::new(&self.ctx)
            .with_progress(Box::new(LogProgress::new()))
            .key_sort(&mut src, &mut dst, |v: &u64| *v, range)?;
        dst.close()?;
        Ok(format!(
            "OK (items={}, runs={:?}, passes={})",
            report.items, report.runs_per_pass, report.merge_passes
        ))
    }

    /// Reports whether the stream is in non-decreasing order.
    pub fn check(&self, path: &str) -> Result<String> {
        let mut s = self.open(path)?;
        let mut prev: Option<u64> = None;
        let mut offset = 0u64;
        while let Some(v) = s.read_item()? {
            if matches!(prev, Some(p) if p > v) {
                return Ok(format!("unsorted at {}", offset));
            }
            prev = Some(v);
            offset += 1;
        }
        Ok(format!("sorted ({} items)", offset))
    }

    pub fn len(&self, path: &str) -> Result<String> {
        Ok(self.open(path)?.len().to_string())
    }

    /// First `n` items. The count is only an upper bound; nothing is
    /// allocated up front.
    pub fn head(&self, path: &str, n: u64) -> Result<String> {
        let mut s = self.open(path)?;
        let mut shown = Vec::new();
        while (shown.len() as u64) < n {
            match s.read_item()? {
                Some(v) => shown.push(v.to_string()),
                None => break,
            }
        }
        if shown.is_empty() {
            return Ok("(empty)".to_string());
        }
        Ok(shown.join(" "))
    }

    pub fn plan(&self) -> Result<String> {
        Ok(Sorter::new(&self.ctx).plan::<u64>()?.to_string())
    }

    pub fn stats(&self) -> String {
        self.ctx.stats().snapshot().to_string()
    }
}

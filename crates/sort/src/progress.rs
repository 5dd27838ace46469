//! Progress reporting for long sorts.
//!
//! Calls are fire-and-forget: an indicator cannot fail or stall the sort.

use log::info;

/// Receives progress from a sort. One `init` starts each phase.
pub trait ProgressIndicator {
    fn init(&mut self, description: &str, total: u64);
    fn step(&mut self, n: u64);
    fn done(&mut self);
}

/// Logs at `info` level each time another `percent_step` percent is done.
pub struct LogProgress {
    description: String,
    total: u64,
    count: u64,
    percent_step: u64,
    next_percent: u64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self {
            description: String::new(),
            total: 0,
            count: 0,
            percent_step: 10,
            next_percent: 10,
        }
    }

    /// Reports every `percent` percent (clamped to 1..=100).
    #[must_use]
    pub fn with_step(mut self, percent: u64) -> Self {
        self.percent_step = percent.clamp(1, 100);
        self.next_percent = self.percent_step;
        self
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn percent(&self) -> u64 {
        if self.total == 0 {
            return 100;
        }
        (self.count.min(self.total) as u128 * 100 / self.total as u128) as u64
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressIndicator for LogProgress {
    fn init(&mut self, description: &str, total: u64) {
        self.description = description.to_string();
        self.total = total;
        self.count = 0;
        self.next_percent = self.percent_step;
    }

    fn step(&mut self, n: u64) {
        self.count += n;
        let percent = self.percent();
        if percent >= self.next_percent {
            info!("{}: {}% ({}/{})", self.description, percent, self.count, self.total);
            while self.next_percent <= percent {
                self.next_percent += self.percent_step;
            }
        }
    }

    fn done(&mut self) {
        info!("{}: done ({} items)", self.description, self.count);
    }
}

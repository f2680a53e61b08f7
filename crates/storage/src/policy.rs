use std::time::{Duration, Instant};

/// Per-provider chunk sizing rules.
///
/// A requested length is rounded down to the provider's native granularity
/// and then clamped into `[min, max]`. A missing (or zero) request selects
/// `default`, which is the sub-chunk size used when a call should run to EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub granularity: u64,
    pub min: u64,
    pub max: u64,
    pub default: u64,
}

impl ChunkPolicy {
    pub const fn new(granularity: u64, min: u64, max: u64, default: u64) -> Self {
        Self {
            granularity,
            min,
            max,
            default,
        }
    }

    /// Returns the chunk size to use for a requested length.
    pub fn normalize(&self, requested: Option<u64>) -> u64 {
        let requested = match requested {
            Some(n) if n > 0 => n,
            _ => return self.default,
        };
        let granularity = self.granularity.max(1);
        let rounded = requested / granularity * granularity;
        rounded.clamp(self.min, self.max)
    }
}

/// Wall-clock budget for a single adapter call or tick.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// Starts a deadline; `None` never expires.
    pub fn start(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Starts a deadline that expires `margin` before the budget runs out,
    /// leaving room to persist state after the last chunk.
    pub fn with_margin(budget: Option<Duration>, margin: Duration) -> Self {
        Self::start(budget.map(|b| b.saturating_sub(margin)))
    }

    pub fn reached(&self) -> bool {
        self.budget
            .is_some_and(|budget| self.started.elapsed() >= budget)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

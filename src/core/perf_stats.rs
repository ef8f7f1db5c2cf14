//! # Execution-Time Statistics
//!
//! Per-core record of how long jobs spend between trigger and completion.
//! Keeps a windowed average over the last [`PERF_WINDOW`] completed jobs
//! next to lifetime min/max/last and totals.

use std::time::Duration;

use serde::Serialize;

/// Jobs in the averaging window.
pub const PERF_WINDOW: usize = 256;

#[derive(Debug)]
pub struct PerfStats {
    window: Box<[u64; PERF_WINDOW]>,
    next: usize,
    filled: usize,
    window_sum: u64,
    min_us: u64,
    max_us: u64,
    last_us: u64,
    completed: u64,
    total_us: u64,
}

/// Serializable view of [`PerfStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerfSummary {
    pub completed: u64,
    pub window_avg_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub last_us: u64,
    pub total_us: u64,
}

impl Default for PerfStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfStats {
    pub fn new() -> Self {
        Self {
            window: Box::new([0; PERF_WINDOW]),
            next: 0,
            filled: 0,
            window_sum: 0,
            min_us: u64::MAX,
            max_us: 0,
            last_us: 0,
            completed: 0,
            total_us: 0,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.window_sum = self.window_sum - self.window[self.next] + us;
        self.window[self.next] = us;
        self.next = (self.next + 1) % PERF_WINDOW;
        self.filled = (self.filled + 1).min(PERF_WINDOW);

        self.min_us = self.min_us.min(us);
        self.max_us = self.max_us.max(us);
        self.last_us = us;
        self.completed += 1;
        self.total_us = self.total_us.saturating_add(us);
    }

    pub fn window_average_us(&self) -> u64 {
        if self.filled == 0 {
            0
        } else {
            self.window_sum / self.filled as u64
        }
    }

    pub fn summary(&self) -> PerfSummary {
        PerfSummary {
            completed: self.completed,
            window_avg_us: self.window_average_us(),
            min_us: if self.completed == 0 { 0 } else { self.min_us },
            max_us: self.max_us,
            last_us: self.last_us,
            total_us: self.total_us,
        }
    }
}

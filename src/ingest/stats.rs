//! Shared import counters, updated lock-free by the workers.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StatsAggregator {
    success: AtomicU64,
    error: AtomicU64,
    tasks_done: AtomicU64,
}

/// A consistent-enough point-in-time view of the counters. Reads are
/// relaxed; totals are exact once the workers have finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub success: u64,
    pub error: u64,
    pub tasks_done: u64,
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.success + self.error
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_success(&self, n: u64) {
        self.success.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_error(&self, n: u64) {
        self.error.fetch_add(n, Ordering::Relaxed);
    }

    pub fn task_done(&self) {
        self.tasks_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            tasks_done: self.tasks_done.load(Ordering::Relaxed),
        }
    }
}

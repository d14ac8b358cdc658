//! Process-wide run counters and the single-batch guard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use civic_core::RunStatsSnapshot;

/// Process-wide run counters plus the one-batch-at-a-time flag.
#[derive(Debug, Default)]
pub struct RunStats {
    total_scraped: AtomicU64,
    total_processed: AtomicU64,
    total_stored: AtomicU64,
    total_duplicates: AtomicU64,
    total_errors: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
    is_running: AtomicBool,
}

/// Holds the run flag; dropping it clears the flag on every exit path.
#[derive(Debug)]
pub struct RunGuard<'a> {
    stats: &'a RunStats,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.stats.is_running.store(false, Ordering::SeqCst);
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run flag, or returns `None` when a batch already holds it.
    pub fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard { stats: self })
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn mark_last_run(&self, at: DateTime<Utc>) {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    pub fn record_scraped(&self) {
        self.total_scraped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.total_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.total_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            total_scraped: self.total_scraped.load(Ordering::Relaxed),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_stored: self.total_stored.load(Ordering::Relaxed),
            total_duplicates: self.total_duplicates.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            last_run_timestamp: *self.last_run.lock().unwrap_or_else(|e| e.into_inner()),
            is_running: self.is_running(),
        }
    }
}

//! Loader counters.
//!
//! ```text
//! submit/complete ─────► LoaderStats ─────► StatsSnapshot ─────► CLI, logs
//!                       (atomic counters)   (point-in-time copy)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated by the loader.
#[derive(Debug, Default)]
pub struct LoaderStats {
    submitted: AtomicU64,
    memory_hits: AtomicU64,
    joined: AtomicU64,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    superseded: AtomicU64,
    rejected: AtomicU64,
}

impl LoaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_joined(&self) {
        self.joined.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// A task finished after its record was removed.
    pub(crate) fn record_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            memory_entries: 0,
            disk_entries: 0,
            disk_bytes: 0,
        }
    }
}

/// Point-in-time view of loader activity and cache occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Calls to `submit`.
    pub submitted: u64,
    /// Submissions answered from the memory cache.
    pub memory_hits: u64,
    /// Submissions that joined an in-flight task.
    pub joined: u64,
    /// Tasks started.
    pub started: u64,
    /// Tasks that produced an image.
    pub succeeded: u64,
    /// Tasks that failed.
    pub failed: u64,
    /// Listener notifications of cancellation.
    pub cancelled: u64,
    /// Tasks whose result arrived after they were cancelled.
    pub superseded: u64,
    /// Submissions refused after shutdown.
    pub rejected: u64,
    /// Decoded images held in memory.
    pub memory_entries: u64,
    /// Entries in the byte store.
    pub disk_entries: u64,
    /// Bytes in the byte store.
    pub disk_bytes: u64,
}

impl StatsSnapshot {
    /// Fraction of submissions served from memory (0.0 when none).
    pub fn memory_hit_rate(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            self.memory_hits as f64 / self.submitted as f64
        }
    }
}

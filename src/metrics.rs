//! Runtime-wide counters.
//!
//! Relaxed atomics bumped from hot paths; `snapshot` is for dashboards and
//! tests, not for cross-counter consistency.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    /// Work items fully executed (including ones that later hit a deadline).
    pub items_executed: AtomicU64,
    /// Reentrant asks served inline without enqueueing.
    pub inline_reentries: AtomicU64,
    /// Work items whose deadline elapsed before completion.
    pub deadline_hits: AtomicU64,
    /// Thunk panics caught and swallowed.
    pub thunk_panics: AtomicU64,

    pub actors_created: AtomicU64,
    pub actors_evicted: AtomicU64,

    pub saves_written: AtomicU64,
    pub saves_skipped: AtomicU64,
    pub save_failures: AtomicU64,

    /// Asks denied by the debug call guard.
    pub guard_denials: AtomicU64,
}

impl RuntimeMetrics {
    pub fn record_item_executed(&self) {
        self.items_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inline_reentry(&self) {
        self.inline_reentries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deadline_hit(&self) {
        self.deadline_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_thunk_panic(&self) {
        self.thunk_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_executed: self.items_executed.load(Ordering::Relaxed),
            inline_reentries: self.inline_reentries.load(Ordering::Relaxed),
            deadline_hits: self.deadline_hits.load(Ordering::Relaxed),
            thunk_panics: self.thunk_panics.load(Ordering::Relaxed),
            actors_created: self.actors_created.load(Ordering::Relaxed),
            actors_evicted: self.actors_evicted.load(Ordering::Relaxed),
            saves_written: self.saves_written.load(Ordering::Relaxed),
            saves_skipped: self.saves_skipped.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            guard_denials: self.guard_denials.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters, serializable for ops endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub items_executed: u64,
    pub inline_reentries: u64,
    pub deadline_hits: u64,
    pub thunk_panics: u64,
    pub actors_created: u64,
    pub actors_evicted: u64,
    pub saves_written: u64,
    pub saves_skipped: u64,
    pub save_failures: u64,
    pub guard_denials: u64,
}

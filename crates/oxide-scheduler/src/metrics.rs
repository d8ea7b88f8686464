//! Counters for scheduler observability.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for the dispatch coordinator.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Stages accepted by `schedule`.
    pub stages_scheduled: AtomicU64,
    /// Waiting stages moved to pending.
    pub stages_promoted: AtomicU64,
    /// Stages handed to a runner.
    pub stages_dispatched: AtomicU64,
    /// Running stages that reached an outcome.
    pub stages_completed: AtomicU64,
    /// Waiting stages closed as blocked.
    pub stages_blocked: AtomicU64,
    /// Waiting stages closed as declined or skipped.
    pub stages_declined: AtomicU64,
    /// Running stages handed back to pending.
    pub stages_requeued: AtomicU64,
    /// Claims lost to a concurrent request.
    pub claim_conflicts: AtomicU64,
    /// Requests that ended by cancellation.
    pub requests_canceled: AtomicU64,
    /// Requests that hit their deadline.
    pub requests_timed_out: AtomicU64,
    /// Requests currently suspended.
    pub waiting_requests: AtomicU64,
}

impl SchedulerMetrics {
    /// Create new metrics instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_scheduled(&self) {
        self.stages_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promoted(&self) {
        self.stages_promoted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.stages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.stages_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.stages_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_declined(&self) {
        self.stages_declined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.stages_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim_conflict(&self) {
        self.claim_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_canceled(&self) {
        self.requests_canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a suspended request until the returned guard drops.
    pub fn track_waiting(self: &Arc<Self>) -> WaitingGuard {
        self.waiting_requests.fetch_add(1, Ordering::Relaxed);
        WaitingGuard {
            metrics: Arc::clone(self),
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stages_scheduled: self.stages_scheduled.load(Ordering::Relaxed),
            stages_promoted: self.stages_promoted.load(Ordering::Relaxed),
            stages_dispatched: self.stages_dispatched.load(Ordering::Relaxed),
            stages_completed: self.stages_completed.load(Ordering::Relaxed),
            stages_blocked: self.stages_blocked.load(Ordering::Relaxed),
            stages_declined: self.stages_declined.load(Ordering::Relaxed),
            stages_requeued: self.stages_requeued.load(Ordering::Relaxed),
            claim_conflicts: self.claim_conflicts.load(Ordering::Relaxed),
            requests_canceled: self.requests_canceled.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            waiting_requests: self.waiting_requests.load(Ordering::Relaxed),
        }
    }
}

pub struct WaitingGuard {
    metrics: Arc<SchedulerMetrics>,
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.metrics.waiting_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub stages_scheduled: u64,
    pub stages_promoted: u64,
    pub stages_dispatched: u64,
    pub stages_completed: u64,
    pub stages_blocked: u64,
    pub stages_declined: u64,
    pub stages_requeued: u64,
    pub claim_conflicts: u64,
    pub requests_canceled: u64,
    pub requests_timed_out: u64,
    pub waiting_requests: u64,
}

//! Executor metrics collection
//!
//! Counts what flows through an executor so callers can check occupancy
//! (an idle serializer must submit nothing) and throughput.

use super::{SharedExecutor, Task, TaskExecutor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Task flow counters
#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    /// Tasks handed to the executor
    pub tasks_submitted: AtomicU64,
    /// Tasks whose body has begun running
    pub tasks_started: AtomicU64,
    /// Tasks whose body has returned
    pub tasks_completed: AtomicU64,
}

impl ExecutorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_started(&self) {
        self.tasks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_started: self.tasks_started.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.tasks_submitted.store(0, Ordering::Relaxed);
        self.tasks_started.store(0, Ordering::Relaxed);
        self.tasks_completed.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_started: u64,
    pub tasks_completed: u64,
}

impl MetricsSnapshot {
    /// Tasks submitted but not yet finished
    pub fn in_flight(&self) -> u64 {
        self.tasks_submitted.saturating_sub(self.tasks_completed)
    }
}

/// Wraps an executor and counts every task passing through it
pub struct MeteredExecutor {
    inner: SharedExecutor,
    metrics: Arc<ExecutorMetrics>,
}

impl MeteredExecutor {
    pub fn new(inner: SharedExecutor) -> Self {
        Self {
            inner,
            metrics: Arc::new(ExecutorMetrics::new()),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl TaskExecutor for MeteredExecutor {
    fn enqueue(&self, task: Task) {
        self.metrics.record_submitted();
        let metrics = Arc::clone(&self.metrics);
        self.inner.enqueue(Box::new(move || {
            metrics.record_started();
            task();
            metrics.record_completed();
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{ManualExecutor, TaskExecutorExt};

    #[test]
    fn test_counts_follow_execution() {
        let base = Arc::new(ManualExecutor::new());
        let metered = MeteredExecutor::new(base.clone());

        metered.submit(|| {});
        metered.submit(|| {});
        assert_eq!(
            metered.snapshot(),
            MetricsSnapshot {
                tasks_submitted: 2,
                tasks_started: 0,
                tasks_completed: 0,
            }
        );
        assert_eq!(metered.snapshot().in_flight(), 2);

        base.run_until_idle();
        let snapshot = metered.snapshot();
        assert_eq!(snapshot.tasks_started, 2);
        assert_eq!(snapshot.tasks_completed, 2);
        assert_eq!(snapshot.in_flight(), 0);
    }

    #[test]
    fn test_reset() {
        let metrics = ExecutorMetrics::new();
        metrics.record_submitted();
        metrics.record_started();
        metrics.reset();
        assert_eq!(metrics.snapshot().tasks_submitted, 0);
        assert_eq!(metrics.snapshot().tasks_started, 0);
    }
}

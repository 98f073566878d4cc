//! Deferred work and the executors that run it.
//!
//! A [`Task`] is a one-shot closure. A [`TaskExecutor`] takes ownership of a
//! task and runs it exactly once, on some worker, at some later point. There is
//! no completion handle: a task that wants something to happen afterwards
//! submits that something itself.

pub mod executor;
pub mod lane;
pub mod metrics;
pub mod serializer;

pub use executor::{ManualExecutor, RuntimeExecutor, WorkerPool};
pub use lane::LaneQueue;
pub use metrics::{ExecutorMetrics, MeteredExecutor, MetricsSnapshot};
pub use serializer::TaskSerializer;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// A zero-argument unit of work, executed exactly once.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts tasks for asynchronous execution.
///
/// No ordering is guaranteed between tasks submitted by different callers.
pub trait TaskExecutor: Send + Sync {
    fn enqueue(&self, task: Task);
}

/// Executor handle shared by forks, sessions and serializers.
pub type SharedExecutor = Arc<dyn TaskExecutor>;

impl<E: TaskExecutor + ?Sized> TaskExecutor for Arc<E> {
    fn enqueue(&self, task: Task) {
        (**self).enqueue(task)
    }
}

/// Closure submission for any executor.
pub trait TaskExecutorExt: TaskExecutor {
    fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f));
    }
}

impl<E: TaskExecutor + ?Sized> TaskExecutorExt for E {}

/// Runs a task, containing any panic so it never unwinds into a worker loop
/// or a serializer's completion path.
pub(crate) fn run_guarded(task: Task, lane: &str) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(lane = %lane, panic = %message, "Task panicked");
    }
}

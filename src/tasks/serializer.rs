use super::lane::LaneQueue;
use super::{run_guarded, SharedExecutor, Task, TaskExecutor};
use std::sync::Arc;
use tracing::{error, trace};

/// Runs the tasks submitted through it one at a time, in submission order, on
/// top of a parallel base executor.
///
/// Any number of producers may enqueue concurrently. Only the producer whose
/// enqueue takes the lane from idle to busy hands a task to the base
/// executor; every other producer just appends. When a task finishes, the
/// lane hands over the next one, or goes idle without holding a worker.
///
/// Guarantees:
/// - at most one task of this lane is scheduled or running at any instant
/// - tasks run in the order their enqueues completed
/// - an empty lane submits nothing to the base executor
///
/// A task that never returns stalls the lane for good. A task that panics is
/// contained and the lane moves on.
///
/// Cloning yields another producer handle onto the same lane.
#[derive(Clone)]
pub struct TaskSerializer {
    inner: Arc<Lane>,
}

struct Lane {
    base: SharedExecutor,
    standby: LaneQueue<Task>,
    label: String,
}

impl TaskSerializer {
    pub fn new(base: SharedExecutor) -> Self {
        Self::with_label(base, "serializer")
    }

    /// Creates a serializer whose log lines carry `label`
    pub fn with_label(base: SharedExecutor, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Lane {
                base,
                standby: LaneQueue::new(),
                label: label.into(),
            }),
        }
    }

    /// Tasks queued or running on this lane
    pub fn pending(&self) -> usize {
        self.inner.standby.pending()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.standby.is_idle()
    }
}

impl TaskExecutor for TaskSerializer {
    fn enqueue(&self, task: Task) {
        if self.inner.standby.push(task) {
            trace!(lane = %self.inner.label, "Lane busy");
            Lane::schedule_head(&self.inner);
        }
    }
}

impl Lane {
    /// Hands the head of the standby queue to the base executor. Called only
    /// by whoever currently owns the lane.
    fn schedule_head(lane: &Arc<Lane>) {
        let Some(task) = lane.standby.pop_head() else {
            error!(
                lane = %lane.label,
                pending = lane.standby.pending(),
                "Lane owned but standby queue is empty"
            );
            return;
        };

        let owner = Arc::clone(lane);
        lane.base.enqueue(Box::new(move || {
            run_guarded(task, &owner.label);
            if owner.standby.complete() {
                Lane::schedule_head(&owner);
            } else {
                trace!(lane = %owner.label, "Lane idle");
            }
        }));
    }
}

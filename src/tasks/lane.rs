use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A lock-free FIFO paired with a pending-count, forming one execution lane.
///
/// The count covers every item that has been pushed and not yet completed,
/// including the one currently running. Producers push first and count
/// second, so whoever observes a nonzero count after a decrement is
/// guaranteed to find an item at the head.
pub struct LaneQueue<T> {
    queue: SegQueue<T>,
    pending: AtomicUsize,
}

impl<T> LaneQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            pending: AtomicUsize::new(0),
        }
    }

    /// Appends an item. Returns true when this push moved the lane from idle
    /// to busy; the caller then owns scheduling the head.
    pub fn push(&self, item: T) -> bool {
        self.queue.push(item);
        self.pending.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Takes the item at the head of the lane
    pub fn pop_head(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Marks the running item as finished. Returns true while more items are
    /// pending; the caller then owns scheduling the next head.
    pub fn complete(&self) -> bool {
        self.pending.fetch_sub(1, Ordering::AcqRel) != 1
    }

    /// Items pushed and not yet completed
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}

impl<T> Default for LaneQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

use super::{run_guarded, Task, TaskExecutor};
use crate::core::errors::{DinnerError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Worker pool executor
///
/// A fixed set of OS threads pulling from one shared unbounded queue. Idle
/// workers block on the queue; nothing polls. Dropping the pool closes the
/// queue, lets the workers drain what is left, and joins them.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(DinnerError::configuration_field(
                "worker pool needs at least one worker",
                "workers",
            ));
        }

        let (sender, receiver) = channel::unbounded::<Task>();
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("dinner-worker-{}", index))
                .spawn(move || worker_loop(index, receiver))
                .map_err(|e| DinnerError::executor_with_source("failed to spawn worker", e))?;
            handles.push(handle);
        }

        info!("Started worker pool with {} workers", workers);
        Ok(Self {
            sender: Some(sender),
            workers: handles,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(index: usize, receiver: Receiver<Task>) {
    let lane = format!("worker-{}", index);
    for task in receiver.iter() {
        run_guarded(task, &lane);
    }
    debug!("Worker {} exiting", index);
}

impl TaskExecutor for WorkerPool {
    fn enqueue(&self, task: Task) {
        match &self.sender {
            Some(sender) => {
                if sender.send(task).is_err() {
                    warn!("Worker pool queue closed, dropping task");
                }
            }
            None => warn!("Worker pool shut down, dropping task"),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop once the queue drains
        self.sender.take();

        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // The last handle may be released from inside a task; that worker
            // exits on its own once the channel is empty.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Worker thread terminated abnormally");
            }
        }
    }
}

/// Adapter that runs tasks on a tokio runtime's blocking pool.
///
/// Task bodies are plain closures that may sleep, so they go through
/// `spawn_blocking` and never hold an async worker.
#[derive(Clone)]
pub struct RuntimeExecutor {
    handle: Handle,
}

impl RuntimeExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Binds to the runtime the caller is running in
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| DinnerError::executor_with_source("no tokio runtime available", e))
    }
}

impl TaskExecutor for RuntimeExecutor {
    fn enqueue(&self, task: Task) {
        self.handle.spawn_blocking(move || run_guarded(task, "runtime"));
    }
}

/// Executor that runs nothing until told to.
///
/// Tasks accumulate in submission order and are executed on the calling
/// thread by [`run_next`](Self::run_next), [`run_until_idle`](Self::run_until_idle)
/// or [`run_shuffled`](Self::run_shuffled). The shuffled mode picks a random
/// pending task each step, which replays arbitrary interleavings of
/// independent lanes deterministically from a seed.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Runs the oldest pending task. Returns false when nothing was pending.
    pub fn run_next(&self) -> bool {
        // The lock is released before running; tasks enqueue more work.
        let task = self.lock().pop_front();
        match task {
            Some(task) => {
                run_guarded(task, "manual");
                true
            }
            None => false,
        }
    }

    /// Runs tasks in submission order until the queue is empty. Returns the
    /// number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Runs tasks in a random order drawn from `seed` until the queue is
    /// empty, calling `after_each` between steps.
    pub fn run_shuffled<F>(&self, seed: u64, mut after_each: F) -> usize
    where
        F: FnMut(),
    {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut ran = 0;
        loop {
            let task = {
                let mut queue = self.lock();
                if queue.is_empty() {
                    break;
                }
                let index = rng.usize(..queue.len());
                queue.remove(index)
            };
            if let Some(task) = task {
                run_guarded(task, "manual");
                ran += 1;
                after_each();
            }
        }
        ran
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Task>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskExecutor for ManualExecutor {
    fn enqueue(&self, task: Task) {
        self.lock().push_back(task);
    }
}

//! Serializer behaviour on a real worker pool
//!
//! Many producers, one lane: tasks must never overlap, each producer's tasks
//! must run in the order it submitted them, and an idle lane must cost
//! nothing.

use philosophers::tasks::{MeteredExecutor, TaskExecutorExt, TaskSerializer, WorkerPool};
use philosophers::SharedExecutor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const PRODUCERS: usize = 8;
const PER_PRODUCER: usize = 250;

#[test]
fn test_concurrent_producers_keep_per_producer_order() {
    let pool: SharedExecutor = Arc::new(WorkerPool::new(6).unwrap());
    let lane = TaskSerializer::new(Arc::clone(&pool));
    let seen = Arc::new(Mutex::new(Vec::with_capacity(PRODUCERS * PER_PRODUCER)));
    let (done_tx, done_rx) = crossbeam::channel::unbounded();

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let lane = lane.clone();
            let seen = Arc::clone(&seen);
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                for n in 0..PER_PRODUCER {
                    let seen = Arc::clone(&seen);
                    let done_tx = done_tx.clone();
                    lane.submit(move || {
                        seen.lock().unwrap().push((producer, n));
                        let _ = done_tx.send(());
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for _ in 0..PRODUCERS * PER_PRODUCER {
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    for producer in 0..PRODUCERS {
        let order: Vec<usize> = seen
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, n)| *n)
            .collect();
        assert_eq!(order, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}

#[test]
fn test_lane_tasks_never_overlap_under_contention() {
    let pool: SharedExecutor = Arc::new(WorkerPool::new(8).unwrap());
    let lane = TaskSerializer::with_label(pool, "contended");
    let inside = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = crossbeam::channel::unbounded();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lane = lane.clone();
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let inside = Arc::clone(&inside);
                    let overlaps = Arc::clone(&overlaps);
                    let done_tx = done_tx.clone();
                    lane.submit(move || {
                        if inside.swap(true, Ordering::SeqCst) {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::yield_now();
                        inside.store(false, Ordering::SeqCst);
                        let _ = done_tx.send(());
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for _ in 0..800 {
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_idle_lanes_submit_nothing() {
    let pool: SharedExecutor = Arc::new(WorkerPool::new(2).unwrap());
    let metered = Arc::new(MeteredExecutor::new(pool));
    let lanes: Vec<TaskSerializer> = (0..16)
        .map(|_| TaskSerializer::new(metered.clone()))
        .collect();

    thread::sleep(Duration::from_millis(20));
    assert_eq!(metered.snapshot().tasks_submitted, 0);

    let (tx, rx) = crossbeam::channel::unbounded();
    let tx2 = tx.clone();
    lanes[3].submit(move || {
        let _ = tx.send(());
    });
    lanes[3].submit(move || {
        let _ = tx2.send(());
    });
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // Two tasks on one lane, nothing on the other fifteen
    thread::sleep(Duration::from_millis(20));
    assert_eq!(metered.snapshot().tasks_submitted, 2);
    assert!(lanes.iter().all(|lane| lane.is_idle()));
}

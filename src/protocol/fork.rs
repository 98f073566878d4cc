use super::{check_table_size, SeatId};
use crate::core::errors::Result;
use crate::tasks::{SharedExecutor, Task, TaskExecutor, TaskExecutorExt, TaskSerializer};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, trace};

/// Index of a fork in its ring
pub type ForkId = usize;

// Holder value of a fork nobody holds
const FREE: usize = usize::MAX;

/// A release that did not come from the fork's holder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("seat {releaser} released fork {fork} held by {holder:?}")]
pub struct ForkFault {
    pub fork: ForkId,
    pub releaser: SeatId,
    pub holder: Option<SeatId>,
}

/// An exclusive resource shared by two neighbouring seats.
///
/// The holder is one atomic word, so "in use" and "owned by whom" always
/// change together. It is only ever written from tasks running on the fork's
/// own lane; readers outside the lane get a snapshot.
pub struct Fork {
    id: ForkId,
    holder: AtomicUsize,
    faults: AtomicU64,
    lane: TaskSerializer,
}

impl Fork {
    fn new(id: ForkId, executor: SharedExecutor) -> Self {
        Self {
            id,
            holder: AtomicUsize::new(FREE),
            faults: AtomicU64::new(0),
            lane: TaskSerializer::with_label(executor, format!("fork-{}", id)),
        }
    }

    pub fn id(&self) -> ForkId {
        self.id
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<SeatId> {
        match self.holder.load(Ordering::Acquire) {
            FREE => None,
            seat => Some(seat),
        }
    }

    pub fn is_free(&self) -> bool {
        self.holder().is_none()
    }

    /// Number of rejected releases seen so far
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Grants the fork if it is free or already held by `requester`
    fn try_grant(&self, requester: SeatId) -> bool {
        let holder = self.holder.load(Ordering::Acquire);
        if holder == FREE || holder == requester {
            self.holder.store(requester, Ordering::Release);
            true
        } else {
            false
        }
    }

    fn release_by(&self, releaser: SeatId) -> std::result::Result<(), ForkFault> {
        let holder = self.holder.load(Ordering::Acquire);
        if holder == releaser {
            self.holder.store(FREE, Ordering::Release);
            Ok(())
        } else {
            self.faults.fetch_add(1, Ordering::Relaxed);
            Err(ForkFault {
                fork: self.id,
                releaser,
                holder: (holder != FREE).then_some(holder),
            })
        }
    }
}

/// The forks of one table, laid out in a ring.
///
/// Seat `i` has fork `i` on its left and fork `(i + 1) % n` on its right, so
/// its right fork is the left fork of the next seat. Sessions refer to forks
/// by index and share the ring, never individual forks.
pub struct ForkRing {
    forks: Vec<Fork>,
}

impl ForkRing {
    /// Lays out `size` free forks; a ring needs at least two.
    pub fn new(size: usize, executor: SharedExecutor) -> Result<Arc<Self>> {
        check_table_size(size)?;
        let forks = (0..size)
            .map(|id| Fork::new(id, Arc::clone(&executor)))
            .collect();
        Ok(Arc::new(Self { forks }))
    }

    pub fn len(&self) -> usize {
        self.forks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forks.is_empty()
    }

    pub fn get(&self, id: ForkId) -> Option<&Fork> {
        self.forks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fork> {
        self.forks.iter()
    }

    pub fn left_of(&self, seat: SeatId) -> ForkId {
        seat % self.forks.len()
    }

    pub fn right_of(&self, seat: SeatId) -> ForkId {
        (seat + 1) % self.forks.len()
    }

    /// How many forks `seat` currently holds
    pub fn held_by(&self, seat: SeatId) -> usize {
        self.forks
            .iter()
            .filter(|fork| fork.holder() == Some(seat))
            .count()
    }

    /// Asks fork `id` for `requester`.
    ///
    /// Never answers inline: the decision is taken on the fork's lane and the
    /// answer (`on_success` or `on_failure`, exactly one of them) is submitted
    /// to `reply`.
    pub fn request(
        self: &Arc<Self>,
        id: ForkId,
        requester: SeatId,
        reply: SharedExecutor,
        on_success: Task,
        on_failure: Task,
    ) {
        let Some(fork) = self.forks.get(id) else {
            error!(fork = id, requester, "Request for a fork outside the ring");
            return;
        };
        let ring = Arc::clone(self);
        fork.lane.submit(move || {
            let fork = &ring.forks[id];
            if fork.try_grant(requester) {
                trace!(fork = id, seat = requester, "Fork granted");
                reply.enqueue(on_success);
            } else {
                trace!(fork = id, seat = requester, holder = ?fork.holder(), "Fork denied");
                reply.enqueue(on_failure);
            }
        });
    }

    /// Returns fork `id` on behalf of `releaser`.
    ///
    /// The release is checked against the holder on the fork's lane. A
    /// foreign or double release is logged, counted on the fork and ignored.
    pub fn release(self: &Arc<Self>, id: ForkId, releaser: SeatId) {
        let Some(fork) = self.forks.get(id) else {
            error!(fork = id, releaser, "Release of a fork outside the ring");
            return;
        };
        let ring = Arc::clone(self);
        fork.lane.submit(move || match ring.forks[id].release_by(releaser) {
            Ok(()) => trace!(fork = id, seat = releaser, "Fork released"),
            Err(fault) => error!(%fault, "Rejected fork release"),
        });
    }
}

//! Fork-level protocol: every fork arbitrates itself.
//!
//! There is no waiter and no global lock. When a philosopher is done thinking
//! its session asks both neighbouring forks at once. Each fork decides on its
//! own lane and answers onto the session's lane, in whatever order the two
//! lanes happen to run. The session lane collects both answers and turns them
//! into one decision:
//!
//! ```text
//!                 think done
//!   Thinking ──────────────────▶ Requesting ──┬── both granted ──▶ Eating
//!      ▲  ▲                                   │                     │
//!      │  └──────── Backoff ◀─ any denied ────┘        eating done  │
//!      │      (granted forks returned first)                        │
//!      └───────────────────────── not leaving ◀─────────────────────┤
//!                                                                   ▼
//!                                                          leaving: Left
//! ```
//!
//! Returning a fork that was granted while its pair was denied is what keeps
//! a session from sitting on one fork forever, which is the hold-and-wait half
//! of a circular wait.

use super::fork::{ForkId, ForkRing};
use super::{
    check_seat, schedule, schedule_after_meal, DiningTasks, ProtocolKind, SeatId, SeatProtocol,
    TableProtocol,
};
use crate::core::errors::Result;
use crate::tasks::{SharedExecutor, TaskExecutorExt, TaskSerializer};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// Where a session is in its dining cycle
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Thinking = 0,
    Requesting = 1,
    Eating = 2,
    Backoff = 3,
    Left = 4,
}

impl SessionState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SessionState::Thinking),
            1 => Some(SessionState::Requesting),
            2 => Some(SessionState::Eating),
            3 => Some(SessionState::Backoff),
            4 => Some(SessionState::Left),
            _ => None,
        }
    }
}

/// Which of the two neighbouring forks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    fn slot(self) -> usize {
        self as usize
    }
}

/// One fork's answer, delivered on the session lane
#[derive(Debug, Clone, Copy)]
struct ForkReply {
    side: Side,
    granted: bool,
}

/// Two-slot response buffer plus counter.
///
/// Only touched from tasks on the session lane, which already orders every
/// access; the atomics just make that sharing expressible without a lock.
#[derive(Default)]
struct FanIn {
    granted: [AtomicBool; 2],
    responses: AtomicU8,
}

impl FanIn {
    /// Records one answer. Once both sides have answered, returns the pair
    /// and resets the buffer for the next round.
    fn record(&self, reply: ForkReply) -> Option<[bool; 2]> {
        self.granted[reply.side.slot()].store(reply.granted, Ordering::Relaxed);
        if self.responses.fetch_add(1, Ordering::Relaxed) + 1 < 2 {
            return None;
        }
        let round = [
            self.granted[0].swap(false, Ordering::Relaxed),
            self.granted[1].swap(false, Ordering::Relaxed),
        ];
        self.responses.store(0, Ordering::Relaxed);
        Some(round)
    }
}

/// Per-seat session of the fork-level protocol
pub struct ForkLevelSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    seat: SeatId,
    ring: Arc<ForkRing>,
    forks: [ForkId; 2],
    executor: SharedExecutor,
    // Fork answers land here, one at a time
    lane: TaskSerializer,
    fan_in: FanIn,
    state: AtomicU8,
    tasks: OnceLock<DiningTasks>,
}

impl ForkLevelSession {
    fn new(seat: SeatId, ring: Arc<ForkRing>, executor: SharedExecutor) -> Self {
        let forks = [ring.left_of(seat), ring.right_of(seat)];
        let lane = TaskSerializer::with_label(Arc::clone(&executor), format!("seat-{}", seat));
        Self {
            inner: Arc::new(SessionInner {
                seat,
                ring,
                forks,
                executor,
                lane,
                fan_in: FanIn::default(),
                state: AtomicU8::new(SessionState::Thinking as u8),
                tasks: OnceLock::new(),
            }),
        }
    }

    pub fn seat(&self) -> SeatId {
        self.inner.seat
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// A handle that observes the session state without owning the session
    pub fn observer(&self) -> SessionObserver {
        SessionObserver {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only view on a session's state
#[derive(Clone)]
pub struct SessionObserver {
    inner: Arc<SessionInner>,
}

impl SessionObserver {
    pub fn seat(&self) -> SeatId {
        self.inner.seat
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }
}

impl SessionInner {
    fn state(&self) -> SessionState {
        // Only valid discriminants are ever stored
        SessionState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(SessionState::Left)
    }

    fn enter(&self, next: SessionState) {
        let previous = self.state();
        self.state.store(next as u8, Ordering::Release);
        debug!(seat = self.seat, from = ?previous, to = ?next, "Session transition");
    }

    fn tasks(&self) -> Option<&DiningTasks> {
        let tasks = self.tasks.get();
        if tasks.is_none() {
            warn!(seat = self.seat, "Session used before start_dining");
        }
        tasks
    }

    /// Thinking -> Requesting: ask both forks, answers come back on our lane
    fn request_forks(self: &Arc<Self>) {
        self.enter(SessionState::Requesting);
        let reply: SharedExecutor = Arc::new(self.lane.clone());
        for side in Side::BOTH {
            let granted = Arc::clone(self);
            let denied = Arc::clone(self);
            self.ring.request(
                self.forks[side.slot()],
                self.seat,
                Arc::clone(&reply),
                Box::new(move || granted.on_fork_reply(ForkReply { side, granted: true })),
                Box::new(move || denied.on_fork_reply(ForkReply { side, granted: false })),
            );
        }
    }

    /// Runs on the session lane
    fn on_fork_reply(self: &Arc<Self>, reply: ForkReply) {
        trace!(seat = self.seat, side = ?reply.side, granted = reply.granted, "Fork reply");
        if let Some(round) = self.fan_in.record(reply) {
            self.decide(round);
        }
    }

    fn decide(self: &Arc<Self>, granted: [bool; 2]) {
        let Some(tasks) = self.tasks() else {
            return;
        };

        if granted == [true, true] {
            self.enter(SessionState::Eating);
            schedule(self.executor.as_ref(), &tasks.eat);
            return;
        }

        // Hand back whatever was granted before backing off
        for side in Side::BOTH {
            if granted[side.slot()] {
                self.ring.release(self.forks[side.slot()], self.seat);
            }
        }
        self.enter(SessionState::Backoff);

        let session = Arc::clone(self);
        let eat_failure = Arc::clone(&tasks.eat_failure);
        self.executor.submit(move || {
            session.enter(SessionState::Thinking);
            eat_failure();
        });
    }
}

impl SeatProtocol for ForkLevelSession {
    fn start_dining(&self, tasks: DiningTasks) {
        if self.inner.tasks.set(tasks).is_err() {
            warn!(seat = self.inner.seat, "start_dining called twice, ignoring");
            return;
        }
        self.inner.enter(SessionState::Thinking);
        if let Some(tasks) = self.inner.tasks() {
            schedule(self.inner.executor.as_ref(), &tasks.think);
        }
    }

    fn on_eating_done(&self, leaving_table: bool) {
        let inner = &self.inner;
        if inner.state() != SessionState::Eating {
            warn!(seat = inner.seat, state = ?inner.state(), "Eating done while not eating, ignoring");
            return;
        }
        let Some(tasks) = inner.tasks() else {
            return;
        };

        for fork in inner.forks {
            inner.ring.release(fork, inner.seat);
        }
        inner.enter(if leaving_table {
            SessionState::Left
        } else {
            SessionState::Thinking
        });
        schedule_after_meal(inner.executor.as_ref(), tasks, leaving_table);
    }

    fn on_thinking_done(&self) {
        match self.inner.state() {
            SessionState::Thinking => self.inner.request_forks(),
            state => {
                warn!(seat = self.inner.seat, ?state, "Thinking done while not thinking, ignoring");
            }
        }
    }
}

/// Table protocol owning the fork ring
pub struct ForkLevelTable {
    ring: Arc<ForkRing>,
    executor: SharedExecutor,
}

impl ForkLevelTable {
    pub fn new(seats: usize, executor: SharedExecutor) -> Result<Self> {
        Ok(Self {
            ring: ForkRing::new(seats, Arc::clone(&executor))?,
            executor,
        })
    }

    pub fn ring(&self) -> &Arc<ForkRing> {
        &self.ring
    }

    /// Same as [`TableProtocol::create_session`], keeping the concrete type
    pub fn session(&self, seat: SeatId) -> Result<ForkLevelSession> {
        check_seat(seat, self.ring.len())?;
        Ok(ForkLevelSession::new(
            seat,
            Arc::clone(&self.ring),
            Arc::clone(&self.executor),
        ))
    }
}

impl TableProtocol for ForkLevelTable {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::ForkLevel
    }

    fn seats(&self) -> usize {
        self.ring.len()
    }

    fn create_session(&self, seat: SeatId) -> Result<Box<dyn SeatProtocol>> {
        Ok(Box::new(self.session(seat)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::ManualExecutor;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        eat: AtomicUsize,
        eat_failure: AtomicUsize,
        think: AtomicUsize,
        leave: AtomicUsize,
    }

    fn counting_tasks(counters: &Arc<Counters>) -> DiningTasks {
        let (a, b, c, d) = (
            Arc::clone(counters),
            Arc::clone(counters),
            Arc::clone(counters),
            Arc::clone(counters),
        );
        DiningTasks::new(
            move || {
                a.eat.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                b.eat_failure.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                c.think.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                d.leave.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    fn table(seats: usize) -> (Arc<ManualExecutor>, ForkLevelTable) {
        let exec = Arc::new(ManualExecutor::new());
        let table = ForkLevelTable::new(seats, exec.clone()).unwrap();
        (exec, table)
    }

    #[test]
    fn test_fan_in_resets_after_two_answers() {
        let fan_in = FanIn::default();
        assert_eq!(fan_in.record(ForkReply { side: Side::Right, granted: true }), None);
        assert_eq!(
            fan_in.record(ForkReply { side: Side::Left, granted: false }),
            Some([false, true])
        );
        assert_eq!(fan_in.responses.load(Ordering::Relaxed), 0);
        assert_eq!(fan_in.record(ForkReply { side: Side::Left, granted: true }), None);
        assert_eq!(
            fan_in.record(ForkReply { side: Side::Right, granted: true }),
            Some([true, true])
        );
    }

    #[test]
    fn test_start_schedules_thinking() {
        let (exec, table) = table(2);
        let counters = Arc::new(Counters::default());
        let session = table.session(0).unwrap();

        session.start_dining(counting_tasks(&counters));
        assert_eq!(session.state(), SessionState::Thinking);
        exec.run_until_idle();
        assert_eq!(counters.think.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_free_forks_lead_to_eating() {
        let (exec, table) = table(3);
        let counters = Arc::new(Counters::default());
        let session = table.session(1).unwrap();
        session.start_dining(counting_tasks(&counters));
        exec.run_until_idle();

        session.on_thinking_done();
        assert_eq!(session.state(), SessionState::Requesting);
        exec.run_until_idle();

        assert_eq!(session.state(), SessionState::Eating);
        assert_eq!(counters.eat.load(Ordering::SeqCst), 1);
        assert_eq!(table.ring().held_by(1), 2);
        assert_eq!(table.ring().get(1).unwrap().holder(), Some(1));
        assert_eq!(table.ring().get(2).unwrap().holder(), Some(1));
    }

    #[test]
    fn test_partial_grant_is_rolled_back() {
        let (exec, table) = table(3);
        let counters = Arc::new(Counters::default());

        // Seat 1 takes fork 1, which is seat 0's right fork
        let neighbour = table.session(1).unwrap();
        neighbour.start_dining(counting_tasks(&Arc::new(Counters::default())));
        exec.run_until_idle();
        neighbour.on_thinking_done();
        exec.run_until_idle();
        assert_eq!(neighbour.state(), SessionState::Eating);

        let session = table.session(0).unwrap();
        session.start_dining(counting_tasks(&counters));
        exec.run_until_idle();
        session.on_thinking_done();
        exec.run_until_idle();

        // Left fork was granted, right denied: nothing stays held
        assert_eq!(counters.eat.load(Ordering::SeqCst), 0);
        assert_eq!(counters.eat_failure.load(Ordering::SeqCst), 1);
        assert_eq!(table.ring().held_by(0), 0);
        assert!(table.ring().get(0).unwrap().is_free());
        assert_eq!(table.ring().get(1).unwrap().holder(), Some(1));
        // Backoff re-enters thinking right away
        assert_eq!(session.state(), SessionState::Thinking);
    }

    #[test]
    fn test_eating_done_releases_and_leaves() {
        let (exec, table) = table(2);
        let counters = Arc::new(Counters::default());
        let session = table.session(0).unwrap();
        session.start_dining(counting_tasks(&counters));
        exec.run_until_idle();
        session.on_thinking_done();
        exec.run_until_idle();
        assert_eq!(session.state(), SessionState::Eating);

        session.on_eating_done(false);
        assert_eq!(session.state(), SessionState::Thinking);
        exec.run_until_idle();
        assert_eq!(table.ring().held_by(0), 0);
        assert_eq!(counters.think.load(Ordering::SeqCst), 2);

        session.on_thinking_done();
        exec.run_until_idle();
        session.on_eating_done(true);
        exec.run_until_idle();
        assert_eq!(session.state(), SessionState::Left);
        assert_eq!(counters.leave.load(Ordering::SeqCst), 1);
        assert!(table.ring().iter().all(|fork| fork.is_free() && fork.faults() == 0));
    }

    #[test]
    fn test_out_of_turn_calls_are_ignored() {
        let (exec, table) = table(2);
        let counters = Arc::new(Counters::default());
        let session = table.session(0).unwrap();
        session.start_dining(counting_tasks(&counters));
        exec.run_until_idle();

        // Not eating: must not release anything
        session.on_eating_done(false);
        exec.run_until_idle();
        assert!(table.ring().iter().all(|fork| fork.faults() == 0));

        // A second think-done while requesting must not start another round
        session.on_thinking_done();
        session.on_thinking_done();
        exec.run_until_idle();
        assert_eq!(counters.eat.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Eating);
    }

    #[test]
    fn test_invalid_seat() {
        let (_, table) = table(2);
        assert!(table.session(2).is_err());
        assert!(table.create_session(5).is_err());
    }

    #[test]
    fn test_single_seat_table_is_rejected() {
        // One seat would have the same fork on both sides
        let exec: SharedExecutor = Arc::new(ManualExecutor::new());
        assert!(ForkLevelTable::new(1, exec.clone()).is_err());
        assert!(ForkLevelTable::new(0, exec).is_err());
    }
}

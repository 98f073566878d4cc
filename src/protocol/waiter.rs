//! Waiter protocols: one waiter hands out fork pairs.
//!
//! Every request goes through the waiter's single lane, so the waiter sees the
//! whole table and can grant both forks of a seat in one step. That is simple
//! and correct, but every philosopher at the table funnels through one point.

use super::{
    check_seat, check_table_size, schedule, schedule_after_meal, DiningTasks, ProtocolKind,
    SeatId, SeatProtocol, TableProtocol,
};
use crate::core::errors::Result;
use crate::tasks::{SharedExecutor, Task, TaskExecutor, TaskExecutorExt, TaskSerializer};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, error, warn};

/// How the waiter treats repeated requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterPolicy {
    /// Grant whenever both forks are free
    FirstCome,
    /// Keep a waiting list of denied seats; a seat is not served while a
    /// neighbour is ahead of it in the list
    Fair,
}

#[derive(Debug)]
struct WaiterState {
    forks_in_use: Vec<bool>,
    waiting: Vec<SeatId>,
}

/// Hands out both forks of a seat at once.
///
/// The state is only touched on the waiter's lane; the mutex is never
/// contended and only exists to make the lane's exclusivity visible to the
/// compiler.
pub struct Waiter {
    policy: WaiterPolicy,
    executor: SharedExecutor,
    lane: TaskSerializer,
    state: Mutex<WaiterState>,
}

impl Waiter {
    pub fn new(
        seats: usize,
        policy: WaiterPolicy,
        executor: SharedExecutor,
    ) -> Result<Arc<Self>> {
        check_table_size(seats)?;
        Ok(Arc::new(Self {
            policy,
            lane: TaskSerializer::with_label(Arc::clone(&executor), "waiter"),
            executor,
            state: Mutex::new(WaiterState {
                forks_in_use: vec![false; seats],
                // Bounded by the number of seats
                waiting: Vec::with_capacity(seats),
            }),
        }))
    }

    pub fn seats(&self) -> usize {
        self.lock().forks_in_use.len()
    }

    pub fn policy(&self) -> WaiterPolicy {
        self.policy
    }

    /// Seats currently waiting, oldest first
    pub fn waiting(&self) -> Vec<SeatId> {
        self.lock().waiting.clone()
    }

    /// Asks for both forks of `seat`; exactly one of the two tasks is
    /// scheduled on the executor. A seat outside the table is always denied.
    pub fn request_forks(self: &Arc<Self>, seat: SeatId, on_success: Task, on_failure: Task) {
        let waiter = Arc::clone(self);
        self.lane.submit(move || {
            let granted = match check_seat(seat, waiter.seats()) {
                Ok(()) => waiter.grant(seat),
                Err(err) => {
                    error!(seat, error = %err, "Fork request from outside the table");
                    false
                }
            };
            debug!(seat, granted, "Waiter decision");
            waiter.executor.enqueue(if granted { on_success } else { on_failure });
        });
    }

    pub fn return_forks(self: &Arc<Self>, seat: SeatId) {
        let waiter = Arc::clone(self);
        self.lane.submit(move || waiter.take_back(seat));
    }

    fn grant(&self, seat: SeatId) -> bool {
        let mut state = self.lock();
        let seats = state.forks_in_use.len();
        let (left, right) = (seat, (seat + 1) % seats);

        let mut can_eat = !state.forks_in_use[left] && !state.forks_in_use[right];

        if self.policy == WaiterPolicy::Fair {
            let left_neighbour = (seat + seats - 1) % seats;
            let right_neighbour = (seat + 1) % seats;
            if can_eat {
                // Served only if no neighbour is ahead of us in the list
                let ahead = state
                    .waiting
                    .iter()
                    .position(|&s| s == seat || s == left_neighbour || s == right_neighbour);
                match ahead {
                    Some(index) if state.waiting[index] == seat => {
                        state.waiting.remove(index);
                    }
                    Some(_) => can_eat = false,
                    None => {}
                }
            }
            if !can_eat && !state.waiting.contains(&seat) {
                state.waiting.push(seat);
            }
        }

        if can_eat {
            state.forks_in_use[left] = true;
            state.forks_in_use[right] = true;
        }
        can_eat
    }

    fn take_back(&self, seat: SeatId) {
        let mut state = self.lock();
        let seats = state.forks_in_use.len();
        if let Err(err) = check_seat(seat, seats) {
            error!(seat, error = %err, "Forks returned from outside the table");
            return;
        }
        let (left, right) = (seat, (seat + 1) % seats);
        if !state.forks_in_use[left] || !state.forks_in_use[right] {
            error!(seat, "Forks returned that were not handed out");
        }
        state.forks_in_use[left] = false;
        state.forks_in_use[right] = false;
    }

    fn lock(&self) -> MutexGuard<'_, WaiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-seat session talking to the shared waiter
pub struct WaiterSession {
    seat: SeatId,
    waiter: Arc<Waiter>,
    executor: SharedExecutor,
    tasks: OnceLock<DiningTasks>,
}

impl WaiterSession {
    fn tasks(&self) -> Option<&DiningTasks> {
        let tasks = self.tasks.get();
        if tasks.is_none() {
            warn!(seat = self.seat, "Session used before start_dining");
        }
        tasks
    }
}

impl SeatProtocol for WaiterSession {
    fn start_dining(&self, tasks: DiningTasks) {
        if self.tasks.set(tasks).is_err() {
            warn!(seat = self.seat, "start_dining called twice, ignoring");
            return;
        }
        if let Some(tasks) = self.tasks() {
            schedule(self.executor.as_ref(), &tasks.think);
        }
    }

    fn on_eating_done(&self, leaving_table: bool) {
        let Some(tasks) = self.tasks() else {
            return;
        };
        self.waiter.return_forks(self.seat);
        schedule_after_meal(self.executor.as_ref(), tasks, leaving_table);
    }

    fn on_thinking_done(&self) {
        let Some(tasks) = self.tasks() else {
            return;
        };
        let eat = Arc::clone(&tasks.eat);
        let eat_failure = Arc::clone(&tasks.eat_failure);
        self.waiter.request_forks(
            self.seat,
            Box::new(move || eat()),
            Box::new(move || eat_failure()),
        );
    }
}

/// Table protocol sharing one waiter among all seats
pub struct WaiterTable {
    seats: usize,
    waiter: Arc<Waiter>,
    executor: SharedExecutor,
}

impl WaiterTable {
    pub fn new(seats: usize, policy: WaiterPolicy, executor: SharedExecutor) -> Result<Self> {
        Ok(Self {
            seats,
            waiter: Waiter::new(seats, policy, Arc::clone(&executor))?,
            executor,
        })
    }

    pub fn waiter(&self) -> &Arc<Waiter> {
        &self.waiter
    }
}

impl TableProtocol for WaiterTable {
    fn kind(&self) -> ProtocolKind {
        match self.waiter.policy {
            WaiterPolicy::FirstCome => ProtocolKind::Waiter,
            WaiterPolicy::Fair => ProtocolKind::FairWaiter,
        }
    }

    fn seats(&self) -> usize {
        self.seats
    }

    fn create_session(&self, seat: SeatId) -> Result<Box<dyn SeatProtocol>> {
        check_seat(seat, self.seats)?;
        Ok(Box::new(WaiterSession {
            seat,
            waiter: Arc::clone(&self.waiter),
            executor: Arc::clone(&self.executor),
            tasks: OnceLock::new(),
        }))
    }
}

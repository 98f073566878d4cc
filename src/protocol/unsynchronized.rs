//! No arbitration at all: thinking is followed straight by eating.
//!
//! Neighbours routinely eat with the same fork. Kept as the control case that
//! shows exclusion does not come for free.

use super::{
    check_seat, check_table_size, schedule, schedule_after_meal, DiningTasks, ProtocolKind,
    SeatId, SeatProtocol, TableProtocol,
};
use crate::core::errors::Result;
use crate::tasks::SharedExecutor;
use std::sync::{Arc, OnceLock};
use tracing::warn;

pub struct UnsynchronizedSession {
    executor: SharedExecutor,
    tasks: OnceLock<DiningTasks>,
}

impl SeatProtocol for UnsynchronizedSession {
    fn start_dining(&self, tasks: DiningTasks) {
        if self.tasks.set(tasks).is_err() {
            warn!("start_dining called twice, ignoring");
            return;
        }
        if let Some(tasks) = self.tasks.get() {
            schedule(self.executor.as_ref(), &tasks.think);
        }
    }

    fn on_eating_done(&self, leaving_table: bool) {
        if let Some(tasks) = self.tasks.get() {
            schedule_after_meal(self.executor.as_ref(), tasks, leaving_table);
        }
    }

    fn on_thinking_done(&self) {
        if let Some(tasks) = self.tasks.get() {
            schedule(self.executor.as_ref(), &tasks.eat);
        }
    }
}

pub struct UnsynchronizedTable {
    seats: usize,
    executor: SharedExecutor,
}

impl UnsynchronizedTable {
    pub fn new(seats: usize, executor: SharedExecutor) -> Result<Self> {
        check_table_size(seats)?;
        Ok(Self { seats, executor })
    }
}

impl TableProtocol for UnsynchronizedTable {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Unsynchronized
    }

    fn seats(&self) -> usize {
        self.seats
    }

    fn create_session(&self, seat: SeatId) -> Result<Box<dyn SeatProtocol>> {
        check_seat(seat, self.seats)?;
        Ok(Box::new(UnsynchronizedSession {
            executor: Arc::clone(&self.executor),
            tasks: OnceLock::new(),
        }))
    }
}

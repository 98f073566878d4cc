//! House rules for the dinner.
//!
//! A [`TableProtocol`] hands out one [`SeatProtocol`] session per seat. The
//! philosopher in that seat describes itself through four continuations
//! ([`DiningTasks`]) and then reports back whenever it finishes eating or
//! thinking; the session decides what gets scheduled next.
//!
//! Variants:
//! - [`UnsynchronizedTable`]: no arbitration at all, the negative control
//! - [`WaiterTable`]: one waiter behind one serializer hands out fork pairs,
//!   optionally with a fair waiting list
//! - [`ForkLevelTable`]: every fork arbitrates itself; sessions combine two
//!   independent answers into an all-or-nothing acquisition

pub mod fork;
pub mod fork_level;
pub mod unsynchronized;
pub mod waiter;

pub use fork::{Fork, ForkFault, ForkId, ForkRing};
pub use fork_level::{ForkLevelSession, ForkLevelTable, SessionObserver, SessionState, Side};
pub use unsynchronized::UnsynchronizedTable;
pub use waiter::{Waiter, WaiterPolicy, WaiterTable};

use crate::core::errors::{DinnerError, Result};
use crate::tasks::{SharedExecutor, TaskExecutor, TaskExecutorExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Index of a seat at the table
pub type SeatId = usize;

/// A re-runnable action supplied by the philosopher
pub type Continuation = Arc<dyn Fn() + Send + Sync>;

/// The four things a philosopher knows how to do
#[derive(Clone)]
pub struct DiningTasks {
    pub eat: Continuation,
    pub eat_failure: Continuation,
    pub think: Continuation,
    pub leave: Continuation,
}

impl DiningTasks {
    pub fn new<E, F, T, L>(eat: E, eat_failure: F, think: T, leave: L) -> Self
    where
        E: Fn() + Send + Sync + 'static,
        F: Fn() + Send + Sync + 'static,
        T: Fn() + Send + Sync + 'static,
        L: Fn() + Send + Sync + 'static,
    {
        Self {
            eat: Arc::new(eat),
            eat_failure: Arc::new(eat_failure),
            think: Arc::new(think),
            leave: Arc::new(leave),
        }
    }
}

/// Schedules one run of a continuation
pub(crate) fn schedule(executor: &dyn TaskExecutor, continuation: &Continuation) {
    let continuation = Arc::clone(continuation);
    executor.submit(move || continuation());
}

/// What comes after a meal: more thinking, or leaving
pub(crate) fn schedule_after_meal(executor: &dyn TaskExecutor, tasks: &DiningTasks, leaving: bool) {
    if leaving {
        schedule(executor, &tasks.leave);
    } else {
        schedule(executor, &tasks.think);
    }
}

/// Per-seat protocol session
pub trait SeatProtocol: Send + Sync {
    /// Called once when the philosopher joins. Schedules the first thinking.
    fn start_dining(&self, tasks: DiningTasks);

    /// Called when the philosopher is done eating. `leaving_table` is true
    /// after the last meal.
    fn on_eating_done(&self, leaving_table: bool);

    /// Called when the philosopher is done thinking, or done recovering from
    /// a failed attempt to eat.
    fn on_thinking_done(&self);
}

/// Creates coherent sessions for every seat at one table
pub trait TableProtocol: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    fn seats(&self) -> usize;

    fn create_session(&self, seat: SeatId) -> Result<Box<dyn SeatProtocol>>;
}

/// Which protocol a dinner runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    Unsynchronized,
    Waiter,
    FairWaiter,
    ForkLevel,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 4] = [
        ProtocolKind::Unsynchronized,
        ProtocolKind::Waiter,
        ProtocolKind::FairWaiter,
        ProtocolKind::ForkLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Unsynchronized => "unsynchronized",
            ProtocolKind::Waiter => "waiter",
            ProtocolKind::FairWaiter => "fair-waiter",
            ProtocolKind::ForkLevel => "fork-level",
        }
    }

    /// Whether the protocol guarantees that neighbours never eat together
    pub fn is_exclusive(&self) -> bool {
        !matches!(self, ProtocolKind::Unsynchronized)
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = DinnerError;

    fn from_str(s: &str) -> Result<Self> {
        ProtocolKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                DinnerError::configuration_field(
                    format!(
                        "unknown protocol '{}', expected one of: unsynchronized, waiter, fair-waiter, fork-level",
                        s
                    ),
                    "protocol",
                )
            })
    }
}

/// Builds the table protocol of the given kind
pub fn build_table(
    kind: ProtocolKind,
    seats: usize,
    executor: SharedExecutor,
) -> Result<Box<dyn TableProtocol>> {
    let table: Box<dyn TableProtocol> = match kind {
        ProtocolKind::Unsynchronized => Box::new(UnsynchronizedTable::new(seats, executor)?),
        ProtocolKind::Waiter => {
            Box::new(WaiterTable::new(seats, WaiterPolicy::FirstCome, executor)?)
        }
        ProtocolKind::FairWaiter => {
            Box::new(WaiterTable::new(seats, WaiterPolicy::Fair, executor)?)
        }
        ProtocolKind::ForkLevel => Box::new(ForkLevelTable::new(seats, executor)?),
    };
    Ok(table)
}

/// A ring of fewer than two seats would hand one fork out as both halves of a pair
pub(crate) fn check_table_size(seats: usize) -> Result<()> {
    if seats < 2 {
        return Err(DinnerError::configuration_field(
            "a table needs at least two seats",
            "seats",
        ));
    }
    Ok(())
}

pub(crate) fn check_seat(seat: SeatId, seats: usize) -> Result<()> {
    if seat < seats {
        Ok(())
    } else {
        Err(DinnerError::invalid_seat(seat, seats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::ManualExecutor;

    #[test]
    fn test_protocol_kind_round_trip_names() {
        for kind in ProtocolKind::ALL {
            assert_eq!(kind.as_str().parse::<ProtocolKind>().unwrap(), kind);
        }
        assert!("philosopher-king".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn test_protocol_kind_serde_names() {
        let yaml = serde_yaml::to_string(&ProtocolKind::FairWaiter).unwrap();
        assert_eq!(yaml.trim(), "fair-waiter");
    }

    #[test]
    fn test_build_table_checks_seats() {
        let exec: SharedExecutor = Arc::new(ManualExecutor::new());
        for kind in ProtocolKind::ALL {
            for seats in [0, 1] {
                let err = build_table(kind, seats, exec.clone()).err().unwrap();
                assert_eq!(err.category(), "configuration", "{kind} seats={seats}");
            }
        }

        let table = build_table(ProtocolKind::Waiter, 3, exec).unwrap();
        assert_eq!(table.kind(), ProtocolKind::Waiter);
        assert_eq!(table.seats(), 3);
        assert!(table.create_session(3).is_err());
        assert!(table.create_session(2).is_ok());
    }
}

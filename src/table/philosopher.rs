use super::activity::{Activity, ActivityLog, ActivityRecorder};
use crate::core::config::{DinnerConfig, MillisRange};
use crate::core::errors::{DinnerError, Result};
use crate::protocol::{DiningTasks, SeatId, SeatProtocol};
use crossbeam::channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const NAMES: [&str; 11] = [
    "Socrates",
    "Plato",
    "Aristotle",
    "Descartes",
    "Spinoza",
    "Kant",
    "Schopenhauer",
    "Nietzsche",
    "Wittgenstein",
    "Heidegger",
    "Sartre",
];

/// Name of whoever sits at `seat`; repeats with a suffix past the classics
pub fn philosopher_name(seat: SeatId) -> String {
    let name = NAMES[seat % NAMES.len()];
    match seat / NAMES.len() {
        0 => name.to_string(),
        round => format!("{} {}", name, round + 1),
    }
}

/// How long each activity lasts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityTimings {
    pub eat: MillisRange,
    pub think: MillisRange,
    pub backoff: MillisRange,
}

impl ActivityTimings {
    /// Everything takes no time at all
    pub const fn instant() -> Self {
        Self {
            eat: MillisRange::instant(),
            think: MillisRange::instant(),
            backoff: MillisRange::instant(),
        }
    }
}

impl From<&DinnerConfig> for ActivityTimings {
    fn from(config: &DinnerConfig) -> Self {
        Self {
            eat: config.eat_ms,
            think: config.think_ms,
            backoff: config.backoff_ms,
        }
    }
}

/// One diner.
///
/// Knows how to eat and think, but when to do either is up to the protocol
/// session it joined with. The continuations handed to the session only hold
/// a weak reference back, so philosopher and session do not keep each other
/// alive.
pub struct Philosopher {
    seat: SeatId,
    name: String,
    timings: ActivityTimings,
    meals_remaining: AtomicU32,
    meals_eaten: AtomicU32,
    done: AtomicBool,
    protocol: OnceLock<Box<dyn SeatProtocol>>,
    recorder: ActivityRecorder,
    departures: Sender<SeatId>,
}

impl Philosopher {
    pub fn new(
        seat: SeatId,
        name: impl Into<String>,
        timings: ActivityTimings,
        epoch: Instant,
        departures: Sender<SeatId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            seat,
            name: name.into(),
            timings,
            meals_remaining: AtomicU32::new(0),
            meals_eaten: AtomicU32::new(0),
            done: AtomicBool::new(false),
            protocol: OnceLock::new(),
            recorder: ActivityRecorder::new(epoch),
            departures,
        })
    }

    /// Sits down with `protocol` and starts dining; returns immediately
    pub fn join(self: &Arc<Self>, protocol: Box<dyn SeatProtocol>, meals: u32) -> Result<()> {
        if meals == 0 {
            return Err(DinnerError::configuration_field(
                "a philosopher needs at least one meal",
                "meals",
            ));
        }
        if self.protocol.set(protocol).is_err() {
            return Err(DinnerError::configuration(format!(
                "{} already joined the table",
                self.name
            )));
        }
        self.meals_remaining.store(meals, Ordering::Release);

        let tasks = DiningTasks::new(
            self.continuation(Philosopher::eat),
            self.continuation(Philosopher::eat_failure),
            self.continuation(Philosopher::think),
            self.continuation(Philosopher::leave),
        );
        info!(seat = self.seat, name = %self.name, meals, "Joining the table");
        if let Some(protocol) = self.protocol.get() {
            protocol.start_dining(tasks);
        }
        Ok(())
    }

    fn continuation(self: &Arc<Self>, body: fn(&Philosopher)) -> impl Fn() + Send + Sync {
        let weak: Weak<Philosopher> = Arc::downgrade(self);
        move || match weak.upgrade() {
            Some(philosopher) => body(&philosopher),
            None => debug!("Philosopher gone, dropping continuation"),
        }
    }

    pub fn seat(&self) -> SeatId {
        self.seat
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn meals_eaten(&self) -> u32 {
        self.meals_eaten.load(Ordering::Acquire)
    }

    pub fn log(&self) -> ActivityLog {
        self.recorder.snapshot()
    }

    fn protocol(&self) -> Option<&dyn SeatProtocol> {
        let protocol = self.protocol.get().map(|p| p.as_ref());
        if protocol.is_none() {
            warn!(seat = self.seat, "Activity ran before joining the table");
        }
        protocol
    }

    fn spend(&self, activity: Activity, range: MillisRange) {
        self.recorder.start(activity);
        pause(range.sample());
        self.recorder.end(activity);
    }

    fn eat(&self) {
        self.spend(Activity::Eat, self.timings.eat);
        self.meals_eaten.fetch_add(1, Ordering::AcqRel);
        let remaining = self
            .meals_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |m| Some(m.saturating_sub(1)))
            .map_or(0, |previous| previous.saturating_sub(1));
        debug!(seat = self.seat, remaining, "Meal finished");
        if let Some(protocol) = self.protocol() {
            protocol.on_eating_done(remaining == 0);
        }
    }

    fn eat_failure(&self) {
        self.spend(Activity::EatFailure, self.timings.backoff);
        if let Some(protocol) = self.protocol() {
            protocol.on_thinking_done();
        }
    }

    fn think(&self) {
        self.spend(Activity::Think, self.timings.think);
        if let Some(protocol) = self.protocol() {
            protocol.on_thinking_done();
        }
    }

    fn leave(&self) {
        self.recorder.start(Activity::Leave);
        self.done.store(true, Ordering::Release);
        info!(seat = self.seat, name = %self.name, "Left the table");
        if self.departures.send(self.seat).is_err() {
            debug!(seat = self.seat, "Nobody waiting for departures");
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ProtocolKind, TableProtocol, UnsynchronizedTable};
    use crate::tasks::{ManualExecutor, SharedExecutor};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_names() {
        assert_eq!(philosopher_name(0), "Socrates");
        assert_eq!(philosopher_name(10), "Sartre");
        assert_eq!(philosopher_name(11), "Socrates 2");
    }

    #[test]
    fn test_dines_and_leaves() {
        let exec = Arc::new(ManualExecutor::new());
        let shared: SharedExecutor = exec.clone();
        let table = UnsynchronizedTable::new(2, shared).unwrap();
        assert_eq!(table.kind(), ProtocolKind::Unsynchronized);

        let (tx, rx) = crossbeam::channel::unbounded();
        let philosopher = Philosopher::new(
            1,
            philosopher_name(1),
            ActivityTimings::instant(),
            Instant::now(),
            tx,
        );
        philosopher
            .join(table.create_session(1).unwrap(), 2)
            .unwrap();

        // Nothing happens until the executor runs
        assert_eq!(philosopher.log().events().len(), 0);
        exec.run_until_idle();

        assert!(philosopher.is_done());
        assert_eq!(philosopher.meals_eaten(), 2);
        assert_eq!(rx.try_recv().unwrap(), 1);

        let log = philosopher.log();
        assert_eq!(log.count(Activity::Eat), 2);
        assert_eq!(log.count(Activity::Think), 2);
        assert_eq!(log.count(Activity::Leave), 1);
    }

    #[test]
    fn test_join_rejects_zero_meals_and_second_join() {
        let exec: SharedExecutor = Arc::new(ManualExecutor::new());
        let table = UnsynchronizedTable::new(2, exec).unwrap();
        let (tx, _rx) = crossbeam::channel::unbounded();
        let philosopher =
            Philosopher::new(0, "Plato", ActivityTimings::instant(), Instant::now(), tx);

        assert!(philosopher
            .join(table.create_session(0).unwrap(), 0)
            .is_err());
        philosopher
            .join(table.create_session(0).unwrap(), 1)
            .unwrap();
        assert!(philosopher
            .join(table.create_session(0).unwrap(), 1)
            .is_err());
    }

    #[test]
    fn test_dropped_philosopher_ignores_pending_tasks() {
        let exec = Arc::new(ManualExecutor::new());
        let table = UnsynchronizedTable::new(2, exec.clone()).unwrap();
        let (tx, rx) = crossbeam::channel::unbounded();
        let philosopher =
            Philosopher::new(0, "Kant", ActivityTimings::instant(), Instant::now(), tx);
        philosopher
            .join(table.create_session(0).unwrap(), 1)
            .unwrap();

        drop(philosopher);
        exec.run_until_idle();
        assert!(rx.try_recv().is_err());
    }
}

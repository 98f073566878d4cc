use super::activity::{overlapping_meals, timeline_row, Activity, ActivityLog, Interval};
use super::philosopher::{philosopher_name, ActivityTimings, Philosopher};
use crate::core::config::DinnerConfig;
use crate::core::errors::{DinnerError, Result};
use crate::protocol::{build_table, ProtocolKind, SeatId, TableProtocol};
use crate::tasks::{SharedExecutor, WorkerPool};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Timeline resolution used by [`DinnerReport::render`]
pub const DEFAULT_STEP_MS: u64 = 5;

/// One table, its philosophers, and the executor they run on
pub struct Dinner {
    config: DinnerConfig,
    table: Box<dyn TableProtocol>,
    philosophers: Vec<Arc<Philosopher>>,
    departures: Receiver<SeatId>,
    epoch: Instant,
    // Keeps the executor alive for as long as the dinner can schedule work
    _executor: SharedExecutor,
}

impl Dinner {
    /// Sets the table for `config.seats` philosophers; nobody sits down yet
    pub fn new(config: DinnerConfig, executor: SharedExecutor) -> Result<Self> {
        config.validate()?;

        let table = build_table(config.protocol, config.seats, Arc::clone(&executor))?;
        let (sender, departures) = channel::unbounded();
        let epoch = Instant::now();
        let timings = ActivityTimings::from(&config);
        let philosophers = (0..config.seats)
            .map(|seat| {
                Philosopher::new(
                    seat,
                    philosopher_name(seat),
                    timings,
                    epoch,
                    sender.clone(),
                )
            })
            .collect();

        Ok(Self {
            config,
            table,
            philosophers,
            departures,
            epoch,
            _executor: executor,
        })
    }

    /// Same as [`Dinner::new`], on a dedicated pool of `config.workers` threads
    pub fn with_worker_pool(config: DinnerConfig) -> Result<Self> {
        let pool: SharedExecutor = Arc::new(WorkerPool::new(config.workers)?);
        Self::new(config, pool)
    }

    pub fn config(&self) -> &DinnerConfig {
        &self.config
    }

    pub fn table(&self) -> &dyn TableProtocol {
        self.table.as_ref()
    }

    pub fn philosophers(&self) -> &[Arc<Philosopher>] {
        &self.philosophers
    }

    /// Seats everyone, then blocks until all have left.
    ///
    /// Fails with [`DinnerError::Stalled`] when someone is still seated once
    /// the configured stall timeout has passed.
    pub fn run(self) -> Result<DinnerReport> {
        info!(
            protocol = %self.config.protocol,
            seats = self.config.seats,
            meals = self.config.meals,
            "Dinner starting"
        );

        for philosopher in &self.philosophers {
            let session = self.table.create_session(philosopher.seat())?;
            philosopher.join(session, self.config.meals)?;
        }

        let mut seated: BTreeSet<SeatId> = (0..self.config.seats).collect();
        let deadline = Instant::now() + self.config.stall_timeout();
        while !seated.is_empty() {
            match self.departures.recv_deadline(deadline) {
                Ok(seat) => {
                    seated.remove(&seat);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    let seats: Vec<SeatId> = seated.into_iter().collect();
                    error!(?seats, "Dinner stalled");
                    return Err(DinnerError::stalled(seats, self.config.stall_timeout_ms));
                }
            }
        }

        let elapsed_ms = self.epoch.elapsed().as_millis() as u64;
        info!(elapsed_ms, "Everyone left the table");

        Ok(DinnerReport {
            protocol: self.config.protocol,
            meals: self.config.meals,
            elapsed_ms,
            seats: self
                .philosophers
                .iter()
                .map(|p| SeatReport {
                    seat: p.seat(),
                    name: p.name().to_string(),
                    log: p.log(),
                })
                .collect(),
        })
    }
}

/// What happened at one seat
#[derive(Debug, Clone, Serialize)]
pub struct SeatReport {
    pub seat: SeatId,
    pub name: String,
    pub log: ActivityLog,
}

/// Two neighbours eating at the same time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MealOverlap {
    pub seat: SeatId,
    pub neighbour: SeatId,
    pub meal: Interval,
    pub neighbour_meal: Interval,
}

/// Outcome of a dinner where everyone left
#[derive(Debug, Clone, Serialize)]
pub struct DinnerReport {
    pub protocol: ProtocolKind,
    pub meals: u32,
    pub elapsed_ms: u64,
    pub seats: Vec<SeatReport>,
}

impl DinnerReport {
    /// One timeline row per philosopher
    pub fn render(&self) -> String {
        self.render_with_step(DEFAULT_STEP_MS)
    }

    pub fn render_with_step(&self, step_ms: u64) -> String {
        let mut out = String::new();
        for seat in &self.seats {
            timeline_row(&mut out, &seat.name, &seat.log, step_ms);
        }
        out
    }

    /// Completed meals of `seat`, or `None` for a seat not at this table
    pub fn meals_eaten(&self, seat: SeatId) -> Option<usize> {
        self.seats
            .get(seat)
            .map(|report| report.log.intervals(Activity::Eat).len())
    }

    /// Every pair of overlapping meals between neighbouring seats
    pub fn adjacent_overlaps(&self) -> Vec<MealOverlap> {
        let n = self.seats.len();
        // A lone seat has no neighbour
        if n < 2 {
            return Vec::new();
        }
        // With two seats the pair (1, 0) is the pair (0, 1)
        let pairs = if n == 2 { 1 } else { n };
        (0..pairs)
            .flat_map(|seat| {
                let neighbour = (seat + 1) % n;
                overlapping_meals(&self.seats[seat].log, &self.seats[neighbour].log)
                    .into_iter()
                    .map(move |(meal, neighbour_meal)| MealOverlap {
                        seat,
                        neighbour,
                        meal,
                        neighbour_meal,
                    })
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

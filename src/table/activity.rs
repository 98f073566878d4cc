//! What every philosopher did, and when.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Something a philosopher spends time on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Activity {
    Eat,
    EatFailure,
    Think,
    Leave,
}

impl Activity {
    pub const ALL: [Activity; 4] = [
        Activity::Think,
        Activity::Eat,
        Activity::EatFailure,
        Activity::Leave,
    ];

    /// Character used for the activity in a timeline
    pub fn symbol(self) -> char {
        match self {
            Activity::Eat => 'E',
            Activity::EatFailure => '.',
            Activity::Think => 't',
            Activity::Leave => 'L',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Eat => "eat",
            Activity::EatFailure => "failed to eat",
            Activity::Think => "think",
            Activity::Leave => "leave",
        }
    }

    /// Key to the timeline symbols, e.g. `t think, E eat, ...`
    pub fn legend() -> String {
        Self::ALL
            .iter()
            .map(|activity| format!("{} {}", activity.symbol(), activity.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Start or end of an activity, in microseconds since the dinner epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub activity: Activity,
    pub at_us: u64,
    pub start: bool,
}

/// Half-open span `[start_us, end_us)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start_us: u64,
    pub end_us: u64,
}

impl Interval {
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start_us < other.end_us && other.start_us < self.end_us
    }
}

/// Ordered events of one philosopher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLog {
    events: Vec<ActivityEvent>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ActivityEvent] {
        &self.events
    }

    pub fn push(&mut self, event: ActivityEvent) {
        self.events.push(event);
    }

    /// Completed spans of `activity`. A start without a matching end (as
    /// with leaving) yields nothing.
    pub fn intervals(&self, activity: Activity) -> Vec<Interval> {
        let mut open = None;
        let mut spans = Vec::new();
        for event in self.events.iter().filter(|e| e.activity == activity) {
            match (event.start, open.take()) {
                (true, _) => open = Some(event.at_us),
                (false, Some(start_us)) => spans.push(Interval {
                    start_us,
                    end_us: event.at_us,
                }),
                (false, None) => {}
            }
        }
        spans
    }

    /// How many times `activity` was started
    pub fn count(&self, activity: Activity) -> usize {
        self.events
            .iter()
            .filter(|e| e.activity == activity && e.start)
            .count()
    }

    /// One character per `step_ms` milliseconds, from the epoch to the last
    /// event: the symbol of the running activity, or a blank when idle.
    pub fn render_timeline(&self, step_ms: u64) -> String {
        let step_us = step_ms.max(1) * 1000;
        let mut line = String::new();
        let mut fill = ' ';
        let mut last_us = 0;
        for event in &self.events {
            let cells = (event.at_us / step_us).saturating_sub(last_us / step_us);
            line.extend(std::iter::repeat(fill).take(cells as usize));
            last_us = event.at_us;
            fill = if event.start {
                event.activity.symbol()
            } else {
                ' '
            };
        }
        line.push(fill);
        line
    }
}

/// Pairs of eat intervals of `a` and `b` that overlap in time
pub fn overlapping_meals(a: &ActivityLog, b: &ActivityLog) -> Vec<(Interval, Interval)> {
    let theirs = b.intervals(Activity::Eat);
    a.intervals(Activity::Eat)
        .into_iter()
        .flat_map(|mine| {
            theirs
                .iter()
                .filter(move |other| mine.overlaps(other))
                .map(move |other| (mine, *other))
        })
        .collect()
}

/// Thread-safe writer of an [`ActivityLog`], stamping against a shared epoch
pub struct ActivityRecorder {
    epoch: Instant,
    log: Mutex<ActivityLog>,
}

impl ActivityRecorder {
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            log: Mutex::new(ActivityLog::new()),
        }
    }

    pub fn start(&self, activity: Activity) {
        self.record(activity, true);
    }

    pub fn end(&self, activity: Activity) {
        self.record(activity, false);
    }

    fn record(&self, activity: Activity, start: bool) {
        let at_us = self.epoch.elapsed().as_micros() as u64;
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ActivityEvent {
                activity,
                at_us,
                start,
            });
    }

    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> ActivityLog {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// `name: timeline` row, names right-aligned to a common width
pub(crate) fn timeline_row(out: &mut String, name: &str, log: &ActivityLog, step_ms: u64) {
    let _ = writeln!(out, "{:>15}: {}", name, log.render_timeline(step_ms));
}

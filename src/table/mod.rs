//! The dinner itself: philosophers, what they did, and the driver that seats
//! them and waits for them to leave.

pub mod activity;
pub mod dinner;
pub mod philosopher;

pub use activity::{overlapping_meals, Activity, ActivityEvent, ActivityLog, ActivityRecorder, Interval};
pub use dinner::{Dinner, DinnerReport, MealOverlap, SeatReport, DEFAULT_STEP_MS};
pub use philosopher::{philosopher_name, ActivityTimings, Philosopher};

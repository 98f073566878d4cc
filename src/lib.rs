//! Dining philosophers on a parallel task executor.
//!
//! Forks are arbitrated without locks: every fork and every protocol session
//! owns a [`TaskSerializer`] lane, so all decisions about one fork happen one
//! at a time while different forks are decided in parallel on the same
//! worker pool.
//!
//! ```no_run
//! use philosophers::{Dinner, DinnerConfig, ProtocolKind};
//!
//! let config = DinnerConfig::builder()
//!     .seats(5)
//!     .protocol(ProtocolKind::ForkLevel)
//!     .build()?;
//! let report = Dinner::with_worker_pool(config)?.run()?;
//! print!("{}", report.render());
//! assert!(report.adjacent_overlaps().is_empty());
//! # Ok::<(), philosophers::DinnerError>(())
//! ```

// Infrastructure shared by everything else
pub mod core;

// Deferred work: executors and serializers
pub mod tasks;

// Table protocols and forks
pub mod protocol;

// Philosophers and the dinner driver
pub mod table;

// Re-exports for convenience
pub use crate::core::config::{DinnerConfig, DinnerConfigBuilder, MillisRange};
pub use crate::core::errors::{DinnerError, Result};
pub use protocol::{
    build_table, DiningTasks, ForkLevelTable, ForkRing, ProtocolKind, SeatId, SeatProtocol,
    TableProtocol,
};
pub use table::{Activity, ActivityLog, Dinner, DinnerReport, Philosopher};
pub use tasks::{
    ManualExecutor, MeteredExecutor, RuntimeExecutor, SharedExecutor, Task, TaskExecutor,
    TaskExecutorExt, TaskSerializer, WorkerPool,
};

// Infrastructure shared by the protocols, the table and the binary

pub mod config;
pub mod errors;

// Re-export commonly used types
pub use config::{DinnerConfig, DinnerConfigBuilder, MillisRange};
pub use errors::{DinnerError, Result};

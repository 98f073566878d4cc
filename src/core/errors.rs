use crate::protocol::SeatId;
use thiserror::Error;

/// Unified error type for everything outside the task boundary.
///
/// Nothing in here is ever produced *inside* a running task: a denied fork is
/// a normal protocol outcome and a stalled lane is only visible to the dinner
/// driver, which reports it as [`DinnerError::Stalled`].
#[derive(Debug, Error)]
pub enum DinnerError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A seat index outside the table
    #[error("Invalid seat {seat} (table has {seats} seats)")]
    InvalidSeat { seat: SeatId, seats: usize },

    /// Some seats never left the table before the deadline
    #[error("Dinner stalled after {timeout_ms}ms, seats still at the table: {seats:?}")]
    Stalled { seats: Vec<SeatId>, timeout_ms: u64 },

    /// Executor construction or submission failures
    #[error("Executor error: {message}")]
    Executor {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl DinnerError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a specific field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn invalid_seat(seat: SeatId, seats: usize) -> Self {
        Self::InvalidSeat { seat, seats }
    }

    pub fn stalled(seats: Vec<SeatId>, timeout_ms: u64) -> Self {
        Self::Stalled { seats, timeout_ms }
    }

    /// Create an executor error with source
    pub fn executor_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Executor {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::InvalidSeat { .. } => "seat",
            Self::Stalled { .. } => "liveness",
            Self::Executor { .. } => "executor",
            Self::Io { .. } => "io",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DinnerError>;

impl From<std::io::Error> for DinnerError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for DinnerError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for DinnerError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(DinnerError::configuration("x").category(), "configuration");
        assert_eq!(DinnerError::invalid_seat(4, 3).category(), "seat");
        assert_eq!(DinnerError::stalled(vec![1], 10).category(), "liveness");
        let spawn = std::io::Error::new(std::io::ErrorKind::Other, "no threads");
        assert_eq!(
            DinnerError::executor_with_source("x", spawn).category(),
            "executor"
        );
    }

    #[test]
    fn test_display() {
        let err = DinnerError::stalled(vec![0, 2], 1500);
        assert_eq!(
            err.to_string(),
            "Dinner stalled after 1500ms, seats still at the table: [0, 2]"
        );

        let err = DinnerError::invalid_seat(5, 3);
        assert_eq!(err.to_string(), "Invalid seat 5 (table has 3 seats)");
    }

    #[test]
    fn test_from_yaml_error() {
        let parse: std::result::Result<u32, _> = serde_yaml::from_str("not: [a number");
        let err: DinnerError = parse.unwrap_err().into();
        assert_eq!(err.category(), "serialization");
    }
}

use crate::core::errors::{DinnerError, Result};
use crate::protocol::ProtocolKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Inclusive range of milliseconds an activity takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MillisRange {
    pub min: u64,
    pub max: u64,
}

impl MillisRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Range that always yields zero
    pub const fn instant() -> Self {
        Self { min: 0, max: 0 }
    }

    /// Draws a duration from the range
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return Duration::from_millis(self.min);
        }
        Duration::from_millis(fastrand::u64(self.min..=self.max))
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.min > self.max {
            return Err(DinnerError::configuration_field(
                format!("{}: min ({}) cannot exceed max ({})", field, self.min, self.max),
                field,
            ));
        }
        Ok(())
    }
}

/// Dinner configuration with all tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DinnerConfig {
    // Table
    /// Number of seats, and so of forks
    pub seats: usize,
    /// Meals every philosopher eats before leaving
    pub meals: u32,
    /// Protocol the table follows
    pub protocol: ProtocolKind,

    // Worker pool
    /// Worker threads in the pool
    pub workers: usize,

    // Activity timings
    /// Time spent eating one meal
    pub eat_ms: MillisRange,
    /// Time spent thinking
    pub think_ms: MillisRange,
    /// Time spent recovering from a denied attempt to eat
    pub backoff_ms: MillisRange,

    // Liveness
    /// How long the driver waits for everyone to leave before reporting a stall
    pub stall_timeout_ms: u64,
}

impl Default for DinnerConfig {
    fn default() -> Self {
        let seats = 3;
        Self {
            seats,
            meals: 3,
            protocol: ProtocolKind::ForkLevel,
            // One worker per philosopher plus one for the arbitration lanes
            workers: seats + 1,
            eat_ms: MillisRange::new(10, 50),
            think_ms: MillisRange::new(5, 30),
            backoff_ms: MillisRange::new(5, 10),
            stall_timeout_ms: 30_000,
        }
    }
}

impl DinnerConfig {
    /// Create a new builder for DinnerConfig
    pub fn builder() -> DinnerConfigBuilder {
        DinnerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.seats < 2 {
            return Err(DinnerError::configuration_field(
                "seats must be at least 2",
                "seats",
            ));
        }
        if self.meals == 0 {
            return Err(DinnerError::configuration_field(
                "meals must be greater than 0",
                "meals",
            ));
        }
        if self.workers == 0 {
            return Err(DinnerError::configuration_field(
                "workers must be greater than 0",
                "workers",
            ));
        }
        if self.stall_timeout_ms == 0 {
            return Err(DinnerError::configuration_field(
                "stall_timeout_ms must be greater than 0",
                "stall_timeout_ms",
            ));
        }
        self.eat_ms.validate("eat_ms")?;
        self.think_ms.validate("think_ms")?;
        self.backoff_ms.validate("backoff_ms")?;
        Ok(())
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Create a configuration with short activities, for development/testing
    pub fn development() -> Self {
        Self {
            eat_ms: MillisRange::new(1, 5),
            think_ms: MillisRange::new(1, 3),
            backoff_ms: MillisRange::new(0, 1),
            stall_timeout_ms: 10_000,
            ..Default::default()
        }
    }

    /// Create a configuration with a full table and many meals
    pub fn stress() -> Self {
        let seats = 11;
        Self {
            seats,
            meals: 20,
            workers: (seats + 1).max(num_cpus::get()),
            eat_ms: MillisRange::new(1, 10),
            think_ms: MillisRange::new(1, 5),
            backoff_ms: MillisRange::new(1, 2),
            stall_timeout_ms: 120_000,
            ..Default::default()
        }
    }

    /// Parse a configuration from YAML. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| DinnerError::io(format!("reading {}", path.display()), e))?;
        Self::from_yaml_str(&yaml)
    }
}

/// Builder for DinnerConfig
pub struct DinnerConfigBuilder {
    config: DinnerConfig,
}

impl DinnerConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: DinnerConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: DinnerConfig) -> Self {
        Self { config }
    }

    pub fn seats(mut self, seats: usize) -> Self {
        self.config.seats = seats;
        self
    }

    pub fn meals(mut self, meals: u32) -> Self {
        self.config.meals = meals;
        self
    }

    pub fn protocol(mut self, protocol: ProtocolKind) -> Self {
        self.config.protocol = protocol;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set all activity timings at once
    pub fn timings(mut self, eat: MillisRange, think: MillisRange, backoff: MillisRange) -> Self {
        self.config.eat_ms = eat;
        self.config.think_ms = think;
        self.config.backoff_ms = backoff;
        self
    }

    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.config.stall_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<DinnerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for DinnerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = DinnerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.seats, 3);
        assert_eq!(config.meals, 3);
        assert_eq!(config.workers, 4);
        assert_eq!(config.protocol, ProtocolKind::ForkLevel);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(DinnerConfig::development().validate().is_ok());
        let stress = DinnerConfig::stress();
        assert!(stress.validate().is_ok());
        assert!(stress.workers > stress.seats);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = DinnerConfig::default();

        config.seats = 1;
        assert!(config.validate().is_err());
        config.seats = 5;

        config.meals = 0;
        assert!(config.validate().is_err());
        config.meals = 2;

        config.workers = 0;
        assert!(config.validate().is_err());
        config.workers = 2;

        config.think_ms = MillisRange::new(10, 1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("think_ms"));
    }

    #[test]
    fn test_builder() {
        let config = DinnerConfig::builder()
            .seats(5)
            .meals(7)
            .workers(6)
            .protocol(ProtocolKind::FairWaiter)
            .timings(
                MillisRange::instant(),
                MillisRange::new(1, 2),
                MillisRange::instant(),
            )
            .stall_timeout(Duration::from_secs(3))
            .build()
            .unwrap();

        assert_eq!(config.seats, 5);
        assert_eq!(config.meals, 7);
        assert_eq!(config.workers, 6);
        assert_eq!(config.protocol, ProtocolKind::FairWaiter);
        assert_eq!(config.eat_ms, MillisRange::instant());
        assert_eq!(config.stall_timeout_ms, 3000);

        assert!(DinnerConfig::builder().meals(0).build().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = DinnerConfig::from_yaml_str(
            "seats: 5\nprotocol: fair-waiter\neat_ms: { min: 2, max: 4 }\n",
        )
        .unwrap();
        assert_eq!(config.seats, 5);
        assert_eq!(config.protocol, ProtocolKind::FairWaiter);
        assert_eq!(config.eat_ms, MillisRange::new(2, 4));
        assert_eq!(config.meals, 3);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(DinnerConfig::from_yaml_str("protocol: waiter-of-doom").is_err());
        assert!(DinnerConfig::from_yaml_str("seats: 1").is_err());
    }

    #[test]
    fn test_sample_stays_in_range() {
        let range = MillisRange::new(3, 6);
        for _ in 0..100 {
            let ms = range.sample().as_millis() as u64;
            assert!((3..=6).contains(&ms));
        }
        assert_eq!(MillisRange::instant().sample(), Duration::ZERO);
    }
}

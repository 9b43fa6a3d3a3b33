//! Engine configuration.
//!
//! All timing constants the engine runs on are configurable; the defaults
//! carry the observed production values (5-second evaluator tick, 10-minute
//! staleness grace, fixed 5-second reconnect delay, hourly clock refresh
//! with five 5-second retries, 100-reading rolling window).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Staleness evaluator settings.
    pub staleness: StalenessConfig,
    /// Reconnect policy settings.
    pub reconnect: ReconnectConfig,
    /// Clock synchronizer settings.
    pub clock: ClockConfig,
    /// Store bounds.
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("{}: {}", path.as_ref().display(), e)))
    }

    /// Load and validate configuration from a TOML file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Checks that every interval is non-zero and that the bounded
    /// collections have room for at least one element.
    pub fn validate(&self) -> Result<()> {
        if self.staleness.tick_interval_secs == 0 {
            return Err(Error::invalid_config("staleness.tick_interval_secs must be > 0"));
        }
        if self.reconnect.delay_secs == 0 {
            return Err(Error::invalid_config("reconnect.delay_secs must be > 0"));
        }
        if self.reconnect.max_delay_secs < self.reconnect.delay_secs {
            return Err(Error::invalid_config(
                "reconnect.max_delay_secs must be >= reconnect.delay_secs",
            ));
        }
        if self.clock.refresh_interval_secs == 0 {
            return Err(Error::invalid_config("clock.refresh_interval_secs must be > 0"));
        }
        if self.clock.retry_delay_secs == 0 {
            return Err(Error::invalid_config("clock.retry_delay_secs must be > 0"));
        }
        if self.store.reading_window == 0 {
            return Err(Error::invalid_config("store.reading_window must be > 0"));
        }
        if self.store.log_window == 0 {
            return Err(Error::invalid_config("store.log_window must be > 0"));
        }
        Ok(())
    }
}

/// Staleness evaluator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    /// Evaluator cadence in seconds.
    pub tick_interval_secs: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
        }
    }
}

impl StalenessConfig {
    /// Evaluator cadence as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Reconnect policy settings.
///
/// The production default is a constant delay, carried over from the
/// original dashboard. Exponential backoff is available as an opt-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before a reconnect attempt, in seconds.
    pub delay_secs: u64,
    /// Whether to grow the delay exponentially between attempts.
    pub exponential: bool,
    /// Cap on the delay when exponential backoff is enabled, in seconds.
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_secs: 5,
            exponential: false,
            max_delay_secs: 60,
        }
    }
}

/// Clock synchronizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Scheduled refresh cadence in seconds.
    pub refresh_interval_secs: u64,
    /// Attempts per refresh window before giving up until the next window.
    pub retry_attempts: u32,
    /// Delay between retry attempts, in seconds.
    pub retry_delay_secs: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 3600,
            retry_attempts: 5,
            retry_delay_secs: 5,
        }
    }
}

impl ClockConfig {
    /// Scheduled refresh cadence as a [`Duration`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Bounds for the in-memory stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Per-device rolling reading window size.
    pub reading_window: usize,
    /// Per-category log list bound.
    pub log_window: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reading_window: 100,
            log_window: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_production_values() {
        let config = EngineConfig::default();
        assert_eq!(config.staleness.tick_interval_secs, 5);
        assert_eq!(config.reconnect.delay_secs, 5);
        assert!(!config.reconnect.exponential);
        assert_eq!(config.clock.refresh_interval_secs, 3600);
        assert_eq!(config.clock.retry_attempts, 5);
        assert_eq!(config.clock.retry_delay_secs, 5);
        assert_eq!(config.store.reading_window, 100);
        assert_eq!(config.store.log_window, 500);
        config.validate().expect("default config should be valid");
    }

    #[test]
    fn test_validation_rejects_zero_intervals() {
        let mut config = EngineConfig::default();
        config.staleness.tick_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.reconnect.delay_secs = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.reconnect.max_delay_secs = 1;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.store.reading_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            r#"
[staleness]
tick_interval_secs = 2

[reconnect]
delay_secs = 3
exponential = true
max_delay_secs = 30
"#,
        )
        .unwrap();

        let config = EngineConfig::load_validated(&path).unwrap();
        assert_eq!(config.staleness.tick_interval_secs, 2);
        assert_eq!(config.reconnect.delay_secs, 3);
        assert!(config.reconnect.exponential);
        // Sections absent from the file keep their defaults.
        assert_eq!(config.clock.retry_attempts, 5);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, crate::error::Error::Io(_)));
    }
}

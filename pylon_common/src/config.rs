//! Configuration loading and validation.
//!
//! All Pylon configuration lives in a single TOML file: server identity
//! and logging, the race format catalogue, and the timer wiring used at
//! startup. Loading is strict (`deny_unknown_fields`) and followed by a
//! semantic `validate()` pass.
//!
//! # Usage
//!
//! ```rust,no_run
//! use pylon_common::config::{ConfigLoader, PylonConfig};
//! use std::path::Path;
//!
//! let config = PylonConfig::load(Path::new("pylon.toml")).expect("load config");
//! config.validate().expect("validate config");
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::HEARTBEAT_INTERVAL_SEC;
use crate::format::RaceFormat;

/// Log level for configuration.
///
/// Serializes to lowercase strings: "trace", "debug", "info", "warn", "error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level verbosity.
    Trace,
    /// Debug-level verbosity.
    Debug,
    /// Info-level verbosity (default).
    Info,
    /// Warning-level verbosity.
    Warn,
    /// Error-level verbosity.
    Error,
}

impl LogLevel {
    /// Convert to a `tracing` level for subscriber installation.
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Trait for loading configuration from TOML files.
///
/// Provides a default implementation for any `serde`-deserializable type.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `ConfigError::FileNotFound` if the file does not exist and
    /// `ConfigError::ParseError` for invalid TOML or I/O failures.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_heartbeat_interval() -> f64 {
    HEARTBEAT_INTERVAL_SEC
}

/// Server identity and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Service name used in logs and event payloads.
    pub name: String,

    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Heartbeat publish interval [s].
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_sec: f64,
}

impl ServerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "server.name cannot be empty".to_string(),
            ));
        }
        if !(self.heartbeat_interval_sec > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "server.heartbeat_interval_sec={} must be positive",
                self.heartbeat_interval_sec
            )));
        }
        Ok(())
    }
}

/// Operational mode for a configured timer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerModeConfig {
    /// The primary timer used for scoring.
    Primary,
    /// A split timer along the course.
    Split,
    /// A failover for the primary.
    Failover,
}

/// One timer interface to bring up at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimerBindingConfig {
    /// Registered driver identifier (e.g. "simulation").
    pub driver: String,
    /// Operational mode for the instance.
    pub mode: TimerModeConfig,
    /// Timer index; orders split timers along the course. The primary
    /// timer is index 0.
    #[serde(default)]
    pub index: usize,
}

/// Top-level Pylon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PylonConfig {
    pub server: ServerConfig,

    /// Race format catalogue; `[[formats]]` tables.
    #[serde(default)]
    pub formats: Vec<RaceFormat>,

    /// Timer interfaces to instantiate at startup; `[[timers]]` tables.
    #[serde(default)]
    pub timers: Vec<TimerBindingConfig>,
}

impl PylonConfig {
    /// Validate the whole configuration tree.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;

        for format in &self.formats {
            format.validate()?;
        }

        let mut names: Vec<&str> = self.formats.iter().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate race format name: {}",
                dup[0]
            )));
        }

        let primaries = self
            .timers
            .iter()
            .filter(|t| t.mode == TimerModeConfig::Primary)
            .count();
        if primaries > 1 {
            return Err(ConfigError::ValidationError(format!(
                "at most one primary timer may be configured, found {primaries}"
            )));
        }

        Ok(())
    }

    /// Look up a race format by name.
    pub fn format(&self, name: &str) -> Option<&RaceFormat> {
        self.formats.iter().find(|f| f.name == name)
    }
}

impl Default for PylonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "pylon".to_string(),
                log_level: default_log_level(),
                heartbeat_interval_sec: default_heartbeat_interval(),
            },
            formats: Vec::new(),
            timers: Vec::new(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        name = "pylon-test"
        log_level = "debug"

        [[formats]]
        name = "sprint"
        stage_time_sec = 3
        race_time_sec = 120
        overtime_sec = 10
        processor_id = "most_laps"

        [[timers]]
        driver = "simulation"
        mode = "primary"
    "#;

    #[test]
    fn sample_parses_and_validates() {
        let config: PylonConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.log_level, LogLevel::Debug);
        assert_eq!(config.server.heartbeat_interval_sec, HEARTBEAT_INTERVAL_SEC);
        assert_eq!(config.formats.len(), 1);
        assert!(config.format("sprint").is_some());
        assert!(config.format("endurance").is_none());
    }

    #[test]
    fn duplicate_format_names_rejected() {
        let mut config: PylonConfig = toml::from_str(SAMPLE).unwrap();
        let dup = config.formats[0].clone();
        config.formats.push(dup);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn second_primary_timer_rejected() {
        let mut config: PylonConfig = toml::from_str(SAMPLE).unwrap();
        config.timers.push(TimerBindingConfig {
            driver: "simulation".to_string(),
            mode: TimerModeConfig::Primary,
            index: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_field_is_parse_error() {
        let toml = r#"
            [server]
            name = "pylon"
            no_such_field = 1
        "#;
        let result: Result<PylonConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}

//! Race format and schedule types.
//!
//! A [`RaceSchedule`] is the timing envelope of a single race: staging
//! duration, optional random stage delay, race clock duration, and the
//! overtime rule. A [`RaceFormat`] is a named, user-facing profile
//! wrapping a schedule, typically loaded from configuration.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::consts::{MAX_RACE_TIME_SEC, MAX_RANDOM_STAGE_DELAY_MS};

/// Timing parameters controlling a race's envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaceSchedule {
    /// Staging duration before the start [s].
    pub stage_time_sec: u32,
    /// Maximum random delay added to staging [ms]. Zero means the start
    /// fires exactly at `stage_time_sec`.
    #[serde(default)]
    pub random_stage_delay_ms: u32,
    /// True if the race clock counts up with no finish deadline.
    #[serde(default)]
    pub unlimited_time: bool,
    /// Race clock duration [s]. Unused when `unlimited_time` is set.
    #[serde(default)]
    pub race_time_sec: u32,
    /// Overtime duration [s]: negative for unlimited overtime, zero for
    /// none, positive for a bounded window. Unused when `unlimited_time`.
    #[serde(default)]
    pub overtime_sec: i32,
    /// Key of the scoring processor to run this race under.
    pub processor_id: String,
}

impl RaceSchedule {
    /// Validate all fields against allowed bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processor_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "processor_id cannot be empty".to_string(),
            ));
        }
        if self.random_stage_delay_ms > MAX_RANDOM_STAGE_DELAY_MS {
            return Err(ConfigError::ValidationError(format!(
                "random_stage_delay_ms={} out of range [0, {MAX_RANDOM_STAGE_DELAY_MS}]",
                self.random_stage_delay_ms
            )));
        }
        if !self.unlimited_time {
            if self.race_time_sec == 0 {
                return Err(ConfigError::ValidationError(
                    "race_time_sec must be positive for a timed race".to_string(),
                ));
            }
            if self.race_time_sec > MAX_RACE_TIME_SEC {
                return Err(ConfigError::ValidationError(format!(
                    "race_time_sec={} out of range [1, {MAX_RACE_TIME_SEC}]",
                    self.race_time_sec
                )));
            }
        }
        Ok(())
    }
}

/// A named race format profile. Every race runs under an assigned format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceFormat {
    /// User-facing name.
    pub name: String,
    /// The timing envelope for races run under this format.
    #[serde(flatten)]
    pub schedule: RaceSchedule,
}

impl RaceFormat {
    /// Validate the format.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "format name cannot be empty".to_string(),
            ));
        }
        self.schedule.validate()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sprint() -> RaceSchedule {
        RaceSchedule {
            stage_time_sec: 3,
            random_stage_delay_ms: 0,
            unlimited_time: false,
            race_time_sec: 120,
            overtime_sec: 0,
            processor_id: "most_laps".to_string(),
        }
    }

    #[test]
    fn valid_schedule_passes() {
        assert!(sprint().validate().is_ok());
    }

    #[test]
    fn timed_race_requires_duration() {
        let mut schedule = sprint();
        schedule.race_time_sec = 0;
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn unlimited_race_ignores_duration() {
        let mut schedule = sprint();
        schedule.unlimited_time = true;
        schedule.race_time_sec = 0;
        assert!(schedule.validate().is_ok());
    }

    #[test]
    fn empty_processor_rejected() {
        let mut schedule = sprint();
        schedule.processor_id.clear();
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn format_flattens_schedule_fields() {
        let toml = r#"
            name = "sprint"
            stage_time_sec = 3
            race_time_sec = 120
            processor_id = "most_laps"
        "#;
        let format: RaceFormat = toml::from_str(toml).unwrap();
        assert_eq!(format.name, "sprint");
        assert_eq!(format.schedule.race_time_sec, 120);
        assert_eq!(format.schedule.overtime_sec, 0);
        assert!(!format.schedule.unlimited_time);
    }
}

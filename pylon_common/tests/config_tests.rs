//! Config loading tests.
//!
//! Tests for `PylonConfig::load()` + `validate()`: file discovery,
//! TOML parsing, defaults, and semantic validation failures.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use pylon_common::config::{ConfigError, ConfigLoader, LogLevel, PylonConfig};

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("pylon.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn full_config_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[server]
name = "pylon-main"
log_level = "warn"
heartbeat_interval_sec = 2.5

[[formats]]
name = "sprint"
stage_time_sec = 3
random_stage_delay_ms = 500
race_time_sec = 120
overtime_sec = 10
processor_id = "most_laps"

[[formats]]
name = "endurance"
stage_time_sec = 5
unlimited_time = true
processor_id = "most_laps"

[[timers]]
driver = "simulation"
mode = "primary"

[[timers]]
driver = "simulation"
mode = "split"
index = 1
"#,
    );

    let config = PylonConfig::load(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.server.name, "pylon-main");
    assert_eq!(config.server.log_level, LogLevel::Warn);
    assert_eq!(config.server.heartbeat_interval_sec, 2.5);
    assert_eq!(config.formats.len(), 2);
    assert!(config.format("endurance").unwrap().schedule.unlimited_time);
    assert_eq!(config.timers.len(), 2);
    assert_eq!(config.timers[1].index, 1);
}

#[test]
fn missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let result = PylonConfig::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}

#[test]
fn invalid_toml_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), "[server\nname = ");
    assert!(matches!(
        PylonConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn bad_format_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[server]
name = "pylon"

[[formats]]
name = "broken"
stage_time_sec = 3
race_time_sec = 0
processor_id = "most_laps"
"#,
    );

    let config = PylonConfig::load(&path).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn zero_heartbeat_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[server]
name = "pylon"
heartbeat_interval_sec = 0.0
"#,
    );

    let config = PylonConfig::load(&path).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError(_))
    ));
}

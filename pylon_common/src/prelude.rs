//! Prelude module for common re-exports.
//!
//! Consumers can `use pylon_common::prelude::*;` to pick up the types
//! that appear in nearly every crate of the workspace.

// ─── Clock & Scheduling ─────────────────────────────────────────────
pub use crate::background::{BackgroundError, BackgroundTasks};
pub use crate::clock::MonotonicClock;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, PylonConfig};

// ─── Race Data ──────────────────────────────────────────────────────
pub use crate::format::{RaceFormat, RaceSchedule};
pub use crate::record::{LapRecord, SignalRecord};

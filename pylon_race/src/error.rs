//! Error types for race operations.
//!
//! User-induced conditions are returned as values; programmer errors
//! (duplicate registrations) panic at the registry, matching the rest
//! of the workspace.

use thiserror::Error;

use crate::status::RaceStatus;

/// Error type for race commands and lap bookkeeping.
#[derive(Debug, Clone, Error)]
pub enum RaceError {
    /// The assigned start is already in the past.
    #[error("assigned start {assigned:.3}s is in the past (now {now:.3}s)")]
    BadTime { assigned: f64, now: f64 },

    /// The command is not applicable in the current status.
    #[error("command not applicable while race status is {status:?}")]
    BadState { status: RaceStatus },

    /// No processor registered under the requested uid.
    #[error("no race processor registered with uid '{0}'")]
    UnknownProcessor(String),

    /// No lap record stored under the given key.
    #[error("no lap record stored under key {key} for slot {slot}")]
    InvalidLapKey { slot: usize, key: u32 },

    /// A lap or query was issued with no active processor.
    #[error("no race processor is active")]
    ProcessorNotSet,
}

//! Race status and coarse status groupings.

use serde::Serialize;

/// Current status of the race life-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceStatus {
    /// Ready to start a new race, no race running.
    Ready,
    /// The race is scheduled to occur.
    Scheduled,
    /// Staging; the race begins imminently.
    Staging,
    /// Racing is underway.
    Racing,
    /// The race duration has been exceeded; racing is still underway.
    Overtime,
    /// Racing is paused.
    Paused,
    /// No longer listening for lap crossings; results must be saved or
    /// discarded.
    Stopped,
}

impl RaceStatus {
    /// Before any racing: READY, SCHEDULED, or STAGING.
    #[inline]
    pub const fn is_prerace(self) -> bool {
        matches!(self, Self::Ready | Self::Scheduled | Self::Staging)
    }

    /// Laps are being scored: RACING or OVERTIME.
    #[inline]
    pub const fn is_underway(self) -> bool {
        matches!(self, Self::Racing | Self::Overtime)
    }

    /// A race has been committed but not started: SCHEDULED or STAGING.
    #[inline]
    pub const fn is_preparation(self) -> bool {
        matches!(self, Self::Scheduled | Self::Staging)
    }

    /// The race clock has expired: OVERTIME or STOPPED.
    #[inline]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Overtime | Self::Stopped)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

//! Monotonic race clock.
//!
//! The sole source of truth for scheduling and race time. All race
//! timestamps are `f64` seconds measured from a process-wide anchor
//! captured on first use, so every clock handle in the process agrees
//! on the same timeline and values are strictly non-decreasing.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::time::Instant;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

fn anchor() -> Instant {
    *ANCHOR.get_or_init(Instant::now)
}

/// Monotonic clock shared by handle across the scheduler, state
/// machine, and timer ingestion path. All handles read the same
/// process-wide timeline.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Instant,
}

impl MonotonicClock {
    /// Create a clock handle on the process timeline.
    pub fn new() -> Self {
        Self { anchor: anchor() }
    }

    /// Seconds elapsed since the process anchor.
    #[inline]
    pub fn now(&self) -> f64 {
        self.anchor.elapsed().as_secs_f64()
    }

    /// Convert a clock timestamp back to an [`Instant`] usable with
    /// `tokio::time::sleep_until`. Negative timestamps clamp to the anchor.
    pub fn instant_at(&self, timestamp: f64) -> Instant {
        self.anchor + Duration::from_secs_f64(timestamp.max(0.0))
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_non_decreasing() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..1_000 {
            let t = clock.now();
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn handles_share_one_timeline() {
        let a = MonotonicClock::new();
        let b = MonotonicClock::new();
        let t_a = a.now();
        let t_b = b.now();
        assert!(t_b >= t_a);
        assert!(t_b - t_a < 0.01);
    }

    #[test]
    fn instant_round_trip() {
        let clock = MonotonicClock::new();
        let t = clock.now() + 1.5;
        let instant = clock.instant_at(t);
        let diff = instant - clock.instant_at(clock.now());
        assert!(diff <= Duration::from_secs_f64(1.5));
        assert!(diff > Duration::from_secs_f64(1.4));
    }

    #[test]
    fn negative_timestamp_clamps_to_anchor() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.instant_at(-5.0), clock.instant_at(0.0));
    }
}

//! System-wide constants for the Pylon workspace.
//!
//! Single source of truth for numeric limits and default intervals.

use std::time::Duration;

/// Lap rows per bulk-append batch on race save.
pub const LAP_BATCH_SIZE: usize = 25;

/// Signal histories per bulk-append batch on race save.
pub const SIGNAL_BATCH_SIZE: usize = 5;

/// Window before a deadline in which the scheduler stops sleeping and
/// spins on the clock to absorb timer jitter.
pub const SCHEDULE_SPIN_WINDOW: Duration = Duration::from_millis(50);

/// Default heartbeat publish interval [s].
pub const HEARTBEAT_INTERVAL_SEC: f64 = 1.0;

/// Default drain timeout for subsystem shutdown [s].
pub const SHUTDOWN_TIMEOUT_SEC: f64 = 5.0;

/// Maximum random stage delay accepted by validation [ms].
pub const MAX_RANDOM_STAGE_DELAY_MS: u32 = 60_000;

/// Maximum race duration accepted by validation [s].
pub const MAX_RACE_TIME_SEC: u32 = 86_400;

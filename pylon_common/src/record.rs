//! Lap and signal record types.
//!
//! These are the immutable data carriers flowing from the timer
//! integration surface into the race processor and signal buffers.

use serde::{Deserialize, Serialize};

/// A single timing-gate crossing, relative to the race start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    /// Seconds since race start.
    pub timedelta: f64,
    /// Slot the crossing belongs to.
    pub node_index: usize,
    /// Identifier of the timer interface that produced the crossing.
    pub timer_identifier: String,
    /// Which physical timer produced it: `0` is the primary gate,
    /// higher values are split timers in course order.
    pub timer_index: usize,
}

impl LapRecord {
    /// True when this crossing came from the primary timing gate.
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.timer_index == 0
    }
}

/// A signal-strength sample (RSSI or another scalar) from a timer node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Seconds since race start.
    pub timedelta: f64,
    /// The sampled value.
    pub value: f64,
    /// Slot the sample belongs to.
    pub node_index: usize,
    /// Which physical timer sampled it.
    pub timer_index: usize,
    /// Identifier of the timer interface that produced the sample.
    pub timer_identifier: String,
}

//! Most-laps ruleset.
//!
//! Ranks slots by completed primary laps; ties break on the furthest
//! split gate reached past the last primary crossing, then on the
//! earlier final crossing.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::debug;

use pylon_common::format::RaceSchedule;
use pylon_common::record::LapRecord;

use crate::error::RaceError;
use crate::laps::LapsManager;
use crate::processor::{RaceProcessor, SlotResult};

/// Registry uid of this ruleset.
pub const UID: &str = "most_laps";

/// Slot score under the most-laps ruleset. Greater compares better.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SlotScore {
    /// Completed primary laps.
    laps: usize,
    /// Timer index of the last split crossing past the final primary
    /// lap; zero when the primary gate was the furthest progress.
    split_index: usize,
    /// Timestamp of the last crossing counted above. Earlier is better.
    last_timestamp: f64,
}

impl Eq for SlotScore {}

impl Ord for SlotScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.laps
            .cmp(&other.laps)
            .then(self.split_index.cmp(&other.split_index))
            // Inverted: the smaller timestamp ranks higher.
            .then(other.last_timestamp.total_cmp(&self.last_timestamp))
    }
}

impl PartialOrd for SlotScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Lap data and memoized score for a single slot.
#[derive(Debug, Default)]
struct SlotLaps {
    laps: LapsManager,
    score: Option<SlotScore>,
}

impl SlotLaps {
    fn score(&mut self) -> SlotScore {
        if let Some(score) = self.score {
            return score;
        }

        let mut laps = 0;
        let mut split_index = 0;
        let mut last_timestamp = 0.0;

        if let Some(last) = self.laps.get_last_primary_lap() {
            laps = self.laps.primary_count();
            last_timestamp = last.timedelta;
        }

        if let Some(last_split) = self.laps.get_last_split_lap() {
            if last_split.timedelta > last_timestamp {
                split_index = last_split.timer_index;
                last_timestamp = last_split.timedelta;
            }
        }

        let score = SlotScore {
            laps,
            split_index,
            last_timestamp,
        };
        self.score = Some(score);
        score
    }
}

/// Processor enforcing the most-laps ruleset.
pub struct MostLapsProcessor {
    schedule: RaceSchedule,
    slots: BTreeMap<usize, SlotLaps>,
    /// Ranked results keyed by slot; rebuilt lazily after mutations.
    results: Option<BTreeMap<usize, SlotResult>>,
    next_key: u32,
}

impl MostLapsProcessor {
    /// Create a processor for the given schedule.
    pub fn new(schedule: RaceSchedule) -> Self {
        Self {
            schedule,
            slots: BTreeMap::new(),
            results: None,
            next_key: 0,
        }
    }

    /// True when the ruleset stops scoring laps at the race deadline.
    fn scoring_window_closed(&self, timedelta: f64) -> bool {
        !self.schedule.unlimited_time
            && self.schedule.overtime_sec == 0
            && timedelta >= self.schedule.race_time_sec as f64
    }

    fn ranked(&mut self) -> &BTreeMap<usize, SlotResult> {
        if self.results.is_none() {
            let mut scored: Vec<(SlotScore, usize, usize)> = self
                .slots
                .iter_mut()
                .map(|(slot, data)| (data.score(), *slot, data.laps.primary_count()))
                .collect();
            scored.sort_by(|a, b| b.cmp(a));

            let mut results = BTreeMap::new();
            let mut position = 0u32;
            let mut advance = 1u32;
            let mut last_score: Option<SlotScore> = None;

            for (score, slot, total_laps) in scored {
                if last_score == Some(score) {
                    advance += 1;
                } else {
                    position += advance;
                    advance = 1;
                }
                results.insert(
                    slot,
                    SlotResult {
                        slot_num: slot,
                        position,
                        data: json!({ "total_laps": total_laps }),
                    },
                );
                last_score = Some(score);
            }

            self.results = Some(results);
        }

        self.results.as_ref().expect("ranking cache just built")
    }
}

impl RaceProcessor for MostLapsProcessor {
    fn uid(&self) -> &'static str {
        UID
    }

    fn add_lap_record(&mut self, slot: usize, record: LapRecord) -> Option<u32> {
        if self.scoring_window_closed(record.timedelta) {
            debug!(
                slot,
                timedelta = record.timedelta,
                "lap outside scoring window discarded"
            );
            return None;
        }

        let key = self.next_key;
        self.next_key += 1;

        let entry = self.slots.entry(slot).or_default();
        entry.laps.add_lap(key, record);
        entry.score = None;
        self.results = None;
        Some(key)
    }

    fn remove_lap_record(&mut self, slot: usize, key: u32) -> Result<(), RaceError> {
        let entry = self
            .slots
            .get_mut(&slot)
            .ok_or(RaceError::InvalidLapKey { slot, key })?;

        if !entry.laps.remove_lap(key) {
            return Err(RaceError::InvalidLapKey { slot, key });
        }
        entry.score = None;
        self.results = None;
        Ok(())
    }

    fn is_slot_done(&self, slot: usize) -> bool {
        self.slots
            .get(&slot)
            .and_then(|data| data.laps.get_last_primary_lap())
            .map(|lap| lap.timedelta > self.schedule.race_time_sec as f64)
            .unwrap_or(false)
    }

    fn get_race_results(&mut self) -> Vec<SlotResult> {
        let mut results: Vec<SlotResult> = self.ranked().values().cloned().collect();
        results.sort_by_key(|r| (r.position, r.slot_num));
        results
    }

    fn get_slot_result(&mut self, slot: usize) -> Option<SlotResult> {
        self.ranked().get(&slot).cloned()
    }

    fn get_laps(&self) -> Vec<LapRecord> {
        self.slots
            .values()
            .flat_map(|data| data.laps.iter_laps().cloned())
            .collect()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

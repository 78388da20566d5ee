//! Fastest-consecutive-laps ruleset.
//!
//! Ranks slots by their best window of consecutive primary laps: a
//! complete window always beats a partial one, partial windows compare
//! by lap count, and equal coverage compares by window time. Used for
//! qualifying heats where total laps matter less than raw pace.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::debug;

use pylon_common::format::RaceSchedule;
use pylon_common::record::LapRecord;

use crate::error::RaceError;
use crate::laps::LapsManager;
use crate::processor::{RaceProcessor, SlotResult};

/// Registry uid of this ruleset.
pub const UID: &str = "fastest_consecutive";

/// Number of consecutive laps scored by this ruleset.
pub const WINDOW: usize = 3;

/// Slot score under the fastest-consecutive ruleset. Greater compares
/// better.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowScore {
    /// True once the slot has a full window of laps.
    complete: bool,
    /// Laps covered by the best window.
    laps: usize,
    /// Total time of the best window. Smaller is better.
    time: f64,
}

impl Eq for WindowScore {}

impl Ord for WindowScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.complete
            .cmp(&other.complete)
            .then(self.laps.cmp(&other.laps))
            // Inverted: the smaller window time ranks higher.
            .then(other.time.total_cmp(&self.time))
    }
}

impl PartialOrd for WindowScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Processor enforcing the fastest-consecutive ruleset.
pub struct FastestConsecutiveProcessor {
    schedule: RaceSchedule,
    slots: BTreeMap<usize, LapsManager>,
    results: Option<BTreeMap<usize, SlotResult>>,
    next_key: u32,
}

impl FastestConsecutiveProcessor {
    /// Create a processor for the given schedule.
    pub fn new(schedule: RaceSchedule) -> Self {
        Self {
            schedule,
            slots: BTreeMap::new(),
            results: None,
            next_key: 0,
        }
    }

    fn scoring_window_closed(&self, timedelta: f64) -> bool {
        !self.schedule.unlimited_time
            && self.schedule.overtime_sec == 0
            && timedelta >= self.schedule.race_time_sec as f64
    }

    fn ranked(&mut self) -> &BTreeMap<usize, SlotResult> {
        if self.results.is_none() {
            let mut scored: Vec<(WindowScore, usize, serde_json::Value)> = self
                .slots
                .iter_mut()
                .map(|(slot, laps)| {
                    let window = laps.get_fastest_consecutive_time(WINDOW, false);
                    let fastest = laps.get_fastest_time(false);
                    let score = match window {
                        Some(w) => WindowScore {
                            complete: w.laps == WINDOW,
                            laps: w.laps,
                            time: w.time,
                        },
                        None => WindowScore {
                            complete: false,
                            laps: 0,
                            time: 0.0,
                        },
                    };
                    let data = json!({
                        "window_laps": score.laps,
                        "window_time": window.map(|w| w.time),
                        "fastest_lap": fastest,
                    });
                    (score, *slot, data)
                })
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

            let mut results = BTreeMap::new();
            let mut position = 0u32;
            let mut advance = 1u32;
            let mut last_score: Option<WindowScore> = None;

            for (score, slot, data) in scored {
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
                        data,
                    },
                );
                last_score = Some(score);
            }

            self.results = Some(results);
        }

        self.results.as_ref().expect("ranking cache just built")
    }
}

impl RaceProcessor for FastestConsecutiveProcessor {
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
        self.slots.entry(slot).or_default().add_lap(key, record);
        self.results = None;
        Some(key)
    }

    fn remove_lap_record(&mut self, slot: usize, key: u32) -> Result<(), RaceError> {
        let laps = self
            .slots
            .get_mut(&slot)
            .ok_or(RaceError::InvalidLapKey { slot, key })?;
        if !laps.remove_lap(key) {
            return Err(RaceError::InvalidLapKey { slot, key });
        }
        self.results = None;
        Ok(())
    }

    fn is_slot_done(&self, slot: usize) -> bool {
        self.slots
            .get(&slot)
            .and_then(|laps| laps.get_last_primary_lap())
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
            .flat_map(|laps| laps.iter_laps().cloned())
            .collect()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> RaceSchedule {
        RaceSchedule {
            stage_time_sec: 3,
            random_stage_delay_ms: 0,
            unlimited_time: false,
            race_time_sec: 120,
            overtime_sec: -1,
            processor_id: UID.to_string(),
        }
    }

    fn lap(slot: usize, timedelta: f64) -> LapRecord {
        LapRecord {
            timedelta,
            node_index: slot,
            timer_identifier: "test".to_string(),
            timer_index: 0,
        }
    }

    fn fill(processor: &mut FastestConsecutiveProcessor, slot: usize, times: &[f64]) {
        for &t in times {
            processor.add_lap_record(slot, lap(slot, t)).unwrap();
        }
    }

    #[test]
    fn full_window_beats_partial() {
        let mut processor = FastestConsecutiveProcessor::new(schedule());
        // Slot 0: three laps, best 3-window is 0..30 = 30s.
        fill(&mut processor, 0, &[10.0, 20.0, 30.0]);
        // Slot 1: two blazing laps but no full window.
        fill(&mut processor, 1, &[2.0, 4.0]);

        let results = processor.get_race_results();
        assert_eq!(results[0].slot_num, 0);
        assert_eq!(results[0].position, 1);
        assert_eq!(results[0].data["window_laps"], 3);
        assert_eq!(results[1].slot_num, 1);
    }

    #[test]
    fn complete_windows_rank_by_time() {
        let mut processor = FastestConsecutiveProcessor::new(schedule());
        fill(&mut processor, 0, &[10.0, 20.0, 30.0, 40.0]);
        fill(&mut processor, 1, &[12.0, 20.0, 28.0, 50.0]);

        // Slot 1's best window (0..28) beats slot 0's (10..40 = 30).
        let results = processor.get_race_results();
        assert_eq!(results[0].slot_num, 1);
        assert_eq!(results[0].data["window_time"], 28.0);
        assert_eq!(results[1].data["window_time"], 30.0);
    }

    #[test]
    fn lapless_slot_ranks_last() {
        let mut processor = FastestConsecutiveProcessor::new(schedule());
        fill(&mut processor, 0, &[10.0]);
        processor.slots.entry(1).or_default();

        let results = processor.get_race_results();
        assert_eq!(results[0].slot_num, 0);
        assert_eq!(results[1].slot_num, 1);
        assert_eq!(results[1].data["window_time"], serde_json::Value::Null);
    }

    #[test]
    fn fastest_lap_is_reported() {
        let mut processor = FastestConsecutiveProcessor::new(schedule());
        fill(&mut processor, 0, &[8.0, 10.0, 13.0]);
        let result = processor.get_slot_result(0).unwrap();
        assert_eq!(result.data["fastest_lap"], 2.0);
    }

    #[test]
    fn removal_reopens_the_window() {
        let mut processor = FastestConsecutiveProcessor::new(schedule());
        fill(&mut processor, 0, &[10.0, 20.0]);
        let key = processor.add_lap_record(0, lap(0, 30.0)).unwrap();
        assert_eq!(processor.get_slot_result(0).unwrap().data["window_laps"], 3);

        processor.remove_lap_record(0, key).unwrap();
        assert_eq!(processor.get_slot_result(0).unwrap().data["window_laps"], 2);
    }
}

//! Scoring processor contract and registry.
//!
//! A race processor consumes lap records and answers "who is winning"
//! under a particular ruleset. Processors are pluggable: concrete
//! implementations register a factory under a string uid, and the race
//! manager constructs one per race from the scheduled format.

use std::collections::HashMap;

use serde::Serialize;

use pylon_common::format::RaceSchedule;
use pylon_common::record::LapRecord;

use crate::error::RaceError;

/// The ranked outcome for one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotResult {
    /// The slot this result belongs to.
    pub slot_num: usize,
    /// 1-based position; ties share a position under standard
    /// competition ranking.
    pub position: u32,
    /// Processor-specific result extras.
    pub data: serde_json::Value,
}

/// Contract for a scoring ruleset.
///
/// One instance lives per race, constructed from the race schedule at
/// `schedule_race` and torn down at `reset`. Implementations cache
/// their ranking and must invalidate it on every mutation.
pub trait RaceProcessor: Send {
    /// Processor unique identifier.
    fn uid(&self) -> &'static str;

    /// Add a lap record for a slot.
    ///
    /// Returns the key the record was stored under, or `None` when the
    /// record falls outside the ruleset's scoring window.
    fn add_lap_record(&mut self, slot: usize, record: LapRecord) -> Option<u32>;

    /// Remove the lap record stored under `key`.
    fn remove_lap_record(&mut self, slot: usize, key: u32) -> Result<(), RaceError>;

    /// True once the slot has finished its race.
    fn is_slot_done(&self, slot: usize) -> bool;

    /// The ranked results for all slots.
    fn get_race_results(&mut self) -> Vec<SlotResult>;

    /// The result for a single slot.
    fn get_slot_result(&mut self, slot: usize) -> Option<SlotResult>;

    /// Every lap record held by the processor, for persistence.
    fn get_laps(&self) -> Vec<LapRecord>;
}

/// Factory function constructing a processor for a race.
pub type ProcessorFactory = fn(RaceSchedule) -> Box<dyn RaceProcessor>;

/// Registry of available scoring processors.
///
/// Constructed at startup, populated via `register()`, and handed to
/// the race manager by value. No global state.
pub struct ProcessorRegistry {
    factories: HashMap<&'static str, ProcessorFactory>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry pre-loaded with the bundled processors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::processors::register_defaults(&mut registry);
        registry
    }

    /// Register a processor factory.
    ///
    /// # Panics
    /// Panics if a processor with the same uid is already registered.
    pub fn register(&mut self, uid: &'static str, factory: ProcessorFactory) {
        if self.factories.contains_key(uid) {
            panic!("Processor '{uid}' is already registered");
        }
        self.factories.insert(uid, factory);
    }

    /// Get a processor factory by uid.
    pub fn get(&self, uid: &str) -> Option<ProcessorFactory> {
        self.factories.get(uid).copied()
    }

    /// Construct a processor for the given schedule.
    ///
    /// # Errors
    /// Returns `RaceError::UnknownProcessor` when no factory is
    /// registered under `schedule.processor_id`.
    pub fn create(&self, schedule: RaceSchedule) -> Result<Box<dyn RaceProcessor>, RaceError> {
        let factory = self
            .get(&schedule.processor_id)
            .ok_or_else(|| RaceError::UnknownProcessor(schedule.processor_id.clone()))?;
        Ok(factory(schedule))
    }

    /// List all registered processor uids.
    pub fn list(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

//! The race manager.
//!
//! Binds the state machine to the active scoring processor and the
//! signal capture buffer, and exposes the operator command surface.
//! Lap and signal ingestion from timers goes through the status-aware
//! variants, which only accept data while the race is underway.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info};

use pylon_common::consts::{LAP_BATCH_SIZE, SIGNAL_BATCH_SIZE};
use pylon_common::format::RaceSchedule;
use pylon_common::record::{LapRecord, SignalRecord};
use pylon_events::{Event, EventBroker, EventPayload};

use crate::error::RaceError;
use crate::processor::{ProcessorRegistry, RaceProcessor, SlotResult};
use crate::state::RaceStateMachine;
use crate::status::RaceStatus;
use crate::store::{RaceDataStore, SavedLap, SignalHistory, StoreError};

/// Signal samples per `(timer_index, timer_identifier)` key per slot.
type SignalBuffer = HashMap<usize, HashMap<(usize, String), Vec<(f64, f64)>>>;

/// Links race state/timing with race data.
pub struct RaceManager {
    state: RaceStateMachine,
    broker: EventBroker,
    registry: ProcessorRegistry,
    /// The processor for the committed race, if any.
    processor: Mutex<Option<Box<dyn RaceProcessor>>>,
    /// Raw signal capture; sorted on persistence, not on insert.
    signal_data: Mutex<SignalBuffer>,
    /// Held across save and reset so a reset cannot race a save.
    save_lock: tokio::sync::Mutex<()>,
    store: Arc<dyn RaceDataStore>,
}

impl RaceManager {
    /// Create a manager around an existing state machine.
    pub fn new(
        state: RaceStateMachine,
        broker: EventBroker,
        registry: ProcessorRegistry,
        store: Arc<dyn RaceDataStore>,
    ) -> Self {
        Self {
            state,
            broker,
            registry,
            processor: Mutex::new(None),
            signal_data: Mutex::new(HashMap::new()),
            save_lock: tokio::sync::Mutex::new(()),
            store,
        }
    }

    /// The current status of the race.
    pub fn status(&self) -> RaceStatus {
        self.state.status()
    }

    /// The current race time.
    pub fn race_time(&self) -> f64 {
        self.state.race_time()
    }

    /// Timestamp at which the race entered RACING.
    pub fn get_race_start_time(&self) -> Option<f64> {
        self.state.get_race_start_time()
    }

    /// Timestamp at which the race clock first expired.
    pub fn get_race_finish_time(&self) -> Option<f64> {
        self.state.get_race_finish_time()
    }

    /// Timestamp at which the race entered STOPPED.
    pub fn get_race_stop_time(&self) -> Option<f64> {
        self.state.get_race_stop_time()
    }

    /// Schedule a race: construct the processor named by the schedule
    /// and commit the sequence to the state machine.
    ///
    /// # Errors
    /// `RaceError::UnknownProcessor` when the schedule names an
    /// unregistered processor; `BadTime`/`BadState` from the state
    /// machine.
    pub fn schedule_race(
        &self,
        schedule: RaceSchedule,
        assigned_start: f64,
    ) -> Result<(), RaceError> {
        let processor = self.registry.create(schedule.clone())?;
        self.state.schedule_race(schedule, assigned_start)?;
        *self.processor.lock() = Some(processor);

        let mut payload = EventPayload::new();
        payload.insert("assigned_start".to_string(), json!(assigned_start));
        self.broker.trigger(Event::RACE_SCHEDULE, payload, None);
        Ok(())
    }

    /// Stop the race.
    pub fn stop_race(&self) {
        self.state.stop_race();
    }

    /// Pause the race.
    pub fn pause_race(&self) {
        self.state.pause_race();
    }

    /// Resume the race.
    pub fn resume_race(&self) {
        self.state.resume_race();
    }

    /// Reset for the next race. Only possible once the race has been
    /// stopped; all unsaved race data is cleared.
    pub async fn reset(&self) {
        if self.state.status() != RaceStatus::Stopped {
            debug!(status = ?self.state.status(), "reset ignored");
            return;
        }

        let _guard = self.save_lock.lock().await;
        self.state.reset();
        *self.processor.lock() = None;
        self.signal_data.lock().clear();
        info!("race manager reset");
    }

    /// Add a lap record to the active processor.
    ///
    /// Returns the processor's key for the record, or `None` when the
    /// ruleset rejected it.
    pub fn add_lap_record(
        &self,
        slot: usize,
        record: LapRecord,
    ) -> Result<Option<u32>, RaceError> {
        let mut processor = self.processor.lock();
        let processor = processor.as_mut().ok_or(RaceError::ProcessorNotSet)?;
        Ok(processor.add_lap_record(slot, record))
    }

    /// Add a lap record only while the race is underway.
    ///
    /// Laps are scored iff the status is underway at the moment of
    /// delivery; anything arriving outside that window is discarded.
    pub fn status_aware_lap_record(&self, slot: usize, record: LapRecord) {
        if self.status().is_underway() {
            if let Err(e) = self.add_lap_record(slot, record) {
                debug!(slot, "lap record dropped: {e}");
            }
        } else {
            debug!(slot, timedelta = record.timedelta, "lap outside race discarded");
        }
    }

    /// Remove a lap record from the active processor.
    pub fn remove_lap_record(&self, slot: usize, key: u32) -> Result<(), RaceError> {
        let mut processor = self.processor.lock();
        let processor = processor.as_mut().ok_or(RaceError::ProcessorNotSet)?;
        processor.remove_lap_record(slot, key)
    }

    /// Buffer a signal sample.
    pub fn add_signal_record(&self, record: SignalRecord) {
        let mut signals = self.signal_data.lock();
        signals
            .entry(record.node_index)
            .or_default()
            .entry((record.timer_index, record.timer_identifier))
            .or_default()
            .push((record.timedelta, record.value));
    }

    /// Buffer a signal sample only while the race is underway.
    pub fn status_aware_signal_record(&self, record: SignalRecord) {
        if self.status().is_underway() {
            self.add_signal_record(record);
        }
    }

    /// Ranked results from the active processor; empty when no race is
    /// committed.
    pub fn get_race_results(&self) -> Vec<SlotResult> {
        match self.processor.lock().as_mut() {
            Some(processor) => processor.get_race_results(),
            None => Vec::new(),
        }
    }

    /// Result for a single slot.
    pub fn get_slot_result(&self, slot: usize) -> Option<SlotResult> {
        self.processor.lock().as_mut()?.get_slot_result(slot)
    }

    /// True once the slot has finished its race.
    pub fn is_slot_done(&self, slot: usize) -> bool {
        self.processor
            .lock()
            .as_ref()
            .is_some_and(|p| p.is_slot_done(slot))
    }

    /// Persist all laps and signal histories of the stopped race.
    ///
    /// Appends run concurrently under the save lock: laps in batches of
    /// [`LAP_BATCH_SIZE`], histories in batches of [`SIGNAL_BATCH_SIZE`]
    /// with each history sorted by time.
    ///
    /// # Errors
    /// `RaceError::BadState` unless the race is stopped; otherwise any
    /// error from the backing store.
    pub async fn save_race_data(&self) -> Result<(), SaveError> {
        if self.state.status() != RaceStatus::Stopped {
            return Err(SaveError::Race(RaceError::BadState {
                status: self.state.status(),
            }));
        }

        let _guard = self.save_lock.lock().await;

        let laps: Vec<SavedLap> = match self.processor.lock().as_ref() {
            Some(processor) => processor
                .get_laps()
                .into_iter()
                .map(|lap| SavedLap {
                    slot_id: lap.node_index,
                    time_delta_sec: lap.timedelta,
                    timer_index: lap.timer_index,
                    timer_identifier: lap.timer_identifier,
                })
                .collect(),
            None => return Err(SaveError::Race(RaceError::ProcessorNotSet)),
        };

        let histories: Vec<SignalHistory> = {
            let signals = self.signal_data.lock();
            signals
                .iter()
                .flat_map(|(slot, keyed)| {
                    keyed.iter().map(|((timer_index, identifier), samples)| {
                        let mut history = samples.clone();
                        history.sort_by(|a, b| a.0.total_cmp(&b.0));
                        SignalHistory {
                            slot_id: *slot,
                            timer_index: *timer_index,
                            timer_identifier: identifier.clone(),
                            history,
                        }
                    })
                })
                .collect()
        };

        let save_laps = async {
            for batch in laps.chunks(LAP_BATCH_SIZE) {
                self.store.append_laps(batch).await?;
            }
            Ok::<(), StoreError>(())
        };
        let save_histories = async {
            for batch in histories.chunks(SIGNAL_BATCH_SIZE) {
                self.store.append_signal_histories(batch).await?;
            }
            Ok::<(), StoreError>(())
        };

        tokio::try_join!(save_laps, save_histories)?;
        info!(laps = laps.len(), histories = histories.len(), "race data saved");
        Ok(())
    }
}

/// Error type for [`RaceManager::save_race_data`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SaveError {
    /// The race is not in a saveable state.
    #[error(transparent)]
    Race(#[from] RaceError),
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ─── Tests ──────────────────────────────────────────────────────────

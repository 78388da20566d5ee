//! Persistence seam for post-race bulk appends.
//!
//! The core never persists live race progress; once a race is stopped
//! the race manager copies laps and signal histories out through this
//! trait in fixed-size batches. The bundled [`MemoryStore`] backs tests
//! and demo mode.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// Error type for storage appends.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing store rejected or failed the append.
    #[error("storage append failed: {0}")]
    AppendFailed(String),
}

/// One lap row as persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedLap {
    pub slot_id: usize,
    pub time_delta_sec: f64,
    pub timer_index: usize,
    pub timer_identifier: String,
}

/// One signal history as persisted: all samples of a
/// `(slot, timer_index, timer_identifier)` key, sorted by time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalHistory {
    pub slot_id: usize,
    pub timer_index: usize,
    pub timer_identifier: String,
    /// Sorted `(timedelta, value)` samples.
    pub history: Vec<(f64, f64)>,
}

/// Bulk-append surface implemented by the out-of-core storage
/// collaborator.
#[async_trait]
pub trait RaceDataStore: Send + Sync {
    /// Append a batch of lap rows.
    async fn append_laps(&self, laps: &[SavedLap]) -> Result<(), StoreError>;

    /// Append a batch of signal histories.
    async fn append_signal_histories(
        &self,
        histories: &[SignalHistory],
    ) -> Result<(), StoreError>;
}

/// In-memory store for tests and demo mode. Records the batches it
/// receives so callers can assert on batching behavior.
#[derive(Default)]
pub struct MemoryStore {
    lap_batches: Mutex<Vec<Vec<SavedLap>>>,
    history_batches: Mutex<Vec<Vec<SignalHistory>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All lap rows appended so far, flattened.
    pub fn laps(&self) -> Vec<SavedLap> {
        self.lap_batches.lock().iter().flatten().cloned().collect()
    }

    /// All signal histories appended so far, flattened.
    pub fn signal_histories(&self) -> Vec<SignalHistory> {
        self.history_batches
            .lock()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Sizes of the lap batches received.
    pub fn lap_batch_sizes(&self) -> Vec<usize> {
        self.lap_batches.lock().iter().map(Vec::len).collect()
    }

    /// Sizes of the history batches received.
    pub fn history_batch_sizes(&self) -> Vec<usize> {
        self.history_batches.lock().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl RaceDataStore for MemoryStore {
    async fn append_laps(&self, laps: &[SavedLap]) -> Result<(), StoreError> {
        self.lap_batches.lock().push(laps.to_vec());
        Ok(())
    }

    async fn append_signal_histories(
        &self,
        histories: &[SignalHistory],
    ) -> Result<(), StoreError> {
        self.history_batches.lock().push(histories.to_vec());
        Ok(())
    }
}

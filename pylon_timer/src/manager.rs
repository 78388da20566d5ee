//! Timer interface manager.
//!
//! Registers timer driver factories, instantiates interfaces in an
//! operational mode, and runs the consumer tasks that drain the lap
//! and signal queues into the race manager. Ingestion is status-aware:
//! data arriving while the race is not underway is discarded at the
//! race manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pylon_common::config::TimerModeConfig;
use pylon_common::record::{LapRecord, SignalRecord};
use pylon_race::RaceManager;

use crate::interface::{TimerData, TimerDriver, TimerInterface};

/// The operational mode a timer instance is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// The primary timer used for scoring.
    Primary,
    /// A timer supporting split laps.
    Split,
    /// A failover in the event the primary fails.
    Failover,
}

impl From<TimerModeConfig> for TimerMode {
    fn from(mode: TimerModeConfig) -> Self {
        match mode {
            TimerModeConfig::Primary => Self::Primary,
            TimerModeConfig::Split => Self::Split,
            TimerModeConfig::Failover => Self::Failover,
        }
    }
}

/// Error type for timer interface management.
#[derive(Debug, Clone, Error)]
pub enum InterfaceError {
    /// A driver with the same identifier is already registered.
    #[error("timer driver '{0}' is already registered")]
    DuplicateDriver(String),

    /// No driver registered under the identifier.
    #[error("no timer driver registered with identifier '{0}'")]
    UnknownDriver(String),

    /// An instance with the same uuid already exists.
    #[error("timer instance {0} already exists")]
    DuplicateInstance(Uuid),

    /// No instance exists under the uuid.
    #[error("no timer instance {0}")]
    UnknownInstance(Uuid),

    /// The manager has been shut down.
    #[error("timer interface manager is shut down")]
    ShutDown,
}

/// A timer interface with an active connection.
struct ActiveTimer {
    interface: Box<dyn TimerInterface>,
    mode: TimerMode,
    /// Orders split timers along the course; the primary timer is 0.
    index: usize,
}

/// Snapshot of an active timer instance, for diagnostics.
#[derive(Debug, Clone)]
pub struct ActiveTimerInfo {
    pub uuid: Uuid,
    pub identifier: &'static str,
    pub mode: TimerMode,
    pub index: usize,
    pub connected: bool,
}

/// Manages the abstract and active timer interfaces.
pub struct TimerInterfaceManager {
    drivers: Mutex<HashMap<&'static str, TimerDriver>>,
    active: Arc<Mutex<HashMap<Uuid, ActiveTimer>>>,
    senders: Mutex<Option<(UnboundedSender<TimerData>, UnboundedSender<TimerData>)>>,
    receivers: Mutex<Option<(UnboundedReceiver<TimerData>, UnboundedReceiver<TimerData>)>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    race: Arc<RaceManager>,
}

impl TimerInterfaceManager {
    /// Create a manager routing into the given race manager.
    pub fn new(race: Arc<RaceManager>) -> Self {
        let (lap_tx, lap_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            drivers: Mutex::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            senders: Mutex::new(Some((lap_tx, signal_tx))),
            receivers: Mutex::new(Some((lap_rx, signal_rx))),
            consumers: Mutex::new(Vec::new()),
            race,
        }
    }

    /// Register a driver to be used by the system.
    ///
    /// # Errors
    /// `InterfaceError::DuplicateDriver` when the identifier is taken.
    pub fn register(&self, driver: TimerDriver) -> Result<(), InterfaceError> {
        let mut drivers = self.drivers.lock();
        if drivers.contains_key(driver.identifier) {
            return Err(InterfaceError::DuplicateDriver(
                driver.identifier.to_string(),
            ));
        }
        info!(identifier = driver.identifier, "timer driver registered");
        drivers.insert(driver.identifier, driver);
        Ok(())
    }

    /// Unregister a driver.
    ///
    /// # Errors
    /// `InterfaceError::UnknownDriver` when the identifier is unknown.
    pub fn unregister(&self, identifier: &str) -> Result<(), InterfaceError> {
        self.drivers
            .lock()
            .remove(identifier)
            .map(|_| ())
            .ok_or_else(|| InterfaceError::UnknownDriver(identifier.to_string()))
    }

    /// Create an instance of a registered driver.
    ///
    /// The instance immediately subscribes to the manager's queues.
    /// Primary-mode timers are pinned to index 0. Returns the instance
    /// uuid (generated when `uuid` is `None`).
    pub fn instantiate_interface(
        &self,
        identifier: &str,
        mode: TimerMode,
        index: usize,
        uuid: Option<Uuid>,
    ) -> Result<Uuid, InterfaceError> {
        let driver = *self
            .drivers
            .lock()
            .get(identifier)
            .ok_or_else(|| InterfaceError::UnknownDriver(identifier.to_string()))?;

        let uuid = uuid.unwrap_or_else(Uuid::new_v4);
        let (lap_tx, signal_tx) = self
            .senders
            .lock()
            .as_ref()
            .cloned()
            .ok_or(InterfaceError::ShutDown)?;

        let mut active = self.active.lock();
        if active.contains_key(&uuid) {
            return Err(InterfaceError::DuplicateInstance(uuid));
        }

        let mut interface = (driver.factory)();
        interface.subscribe(lap_tx, signal_tx);

        let index = if mode == TimerMode::Primary { 0 } else { index };
        active.insert(
            uuid,
            ActiveTimer {
                interface,
                mode,
                index,
            },
        );
        info!(identifier, ?mode, index, %uuid, "timer interface instantiated");
        Ok(uuid)
    }

    /// Shut down and drop an interface instance.
    ///
    /// # Errors
    /// `InterfaceError::UnknownInstance` when the uuid is unknown.
    pub fn decommission_interface(&self, uuid: Uuid) -> Result<(), InterfaceError> {
        let mut active = self.active.lock();
        let mut timer = active
            .remove(&uuid)
            .ok_or(InterfaceError::UnknownInstance(uuid))?;
        timer.interface.shutdown();
        info!(%uuid, "timer interface decommissioned");
        Ok(())
    }

    /// Snapshots of all active instances.
    pub fn active_interfaces(&self) -> Vec<ActiveTimerInfo> {
        self.active
            .lock()
            .iter()
            .map(|(uuid, timer)| ActiveTimerInfo {
                uuid: *uuid,
                identifier: timer.interface.identifier(),
                mode: timer.mode,
                index: timer.index,
                connected: timer.interface.connected(),
            })
            .collect()
    }

    /// Spawn the consumer tasks that drain timer data into the race
    /// manager. A second call is a no-op.
    pub fn start(&self) {
        let Some((mut lap_rx, mut signal_rx)) = self.receivers.lock().take() else {
            debug!("timer consumers already started");
            return;
        };

        let active = Arc::clone(&self.active);
        let race = Arc::clone(&self.race);
        let lap_task = tokio::spawn(async move {
            while let Some(data) = lap_rx.recv().await {
                let timer_index = registered_index(&active, &data.timer_identifier);
                let record = LapRecord {
                    timedelta: data.value,
                    node_index: data.node_index,
                    timer_identifier: data.timer_identifier,
                    timer_index,
                };
                race.status_aware_lap_record(record.node_index, record);
            }
            debug!("lap consumer drained");
        });

        let active = Arc::clone(&self.active);
        let race = Arc::clone(&self.race);
        let signal_task = tokio::spawn(async move {
            while let Some(data) = signal_rx.recv().await {
                // Signal samples carry a raw value; their position on the
                // race clock comes from the delivery timestamp.
                let Some(start) = race.get_race_start_time() else {
                    continue;
                };
                let timer_index = registered_index(&active, &data.timer_identifier);
                race.status_aware_signal_record(SignalRecord {
                    timedelta: data.timestamp - start,
                    value: data.value,
                    node_index: data.node_index,
                    timer_index,
                    timer_identifier: data.timer_identifier,
                });
            }
            debug!("signal consumer drained");
        });

        let mut consumers = self.consumers.lock();
        consumers.push(lap_task);
        consumers.push(signal_task);
        info!("timer consumers started");
    }

    /// Decommission every active interface and drain the consumer
    /// tasks, waiting up to `timeout` before cancelling them.
    pub async fn shutdown(&self, timeout: Duration) {
        let uuids: Vec<Uuid> = self.active.lock().keys().copied().collect();
        for uuid in uuids {
            let _ = self.decommission_interface(uuid);
        }

        // Dropping the manager's senders lets the consumers observe
        // end-of-stream once the drivers' clones are gone too.
        *self.senders.lock() = None;

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.consumers.lock());
        let deadline = tokio::time::Instant::now() + timeout;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("timer consumer did not drain in time; cancelling");
                handle.abort();
                let _ = handle.await;
            }
        }
        info!("timer interface manager shut down");
    }
}

/// Resolve the registered index of the active timer with the given
/// interface identifier. When an identifier has several instances the
/// lowest index wins; unknown identifiers fall back to the primary
/// index.
fn registered_index(
    active: &Mutex<HashMap<Uuid, ActiveTimer>>,
    identifier: &str,
) -> usize {
    active
        .lock()
        .values()
        .filter(|timer| timer.interface.identifier() == identifier)
        .map(|timer| timer.index)
        .min()
        .unwrap_or(0)
}

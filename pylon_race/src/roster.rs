//! Live pilot roster.
//!
//! In-memory roster of the pilots known to the server. Mutations fan
//! out as PILOT_ADD / PILOT_ALTER / PILOT_DELETE events so connected
//! clients keep their rosters current. Durable pilot storage belongs to
//! the database layer outside the core.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use pylon_events::{Event, EventBroker, EventPayload};

/// Error type for roster operations.
#[derive(Debug, Clone, Error)]
pub enum RosterError {
    /// No pilot registered under the id.
    #[error("no pilot with id {0}")]
    UnknownPilot(u32),
}

/// A pilot as known to the live server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pilot {
    /// Roster-assigned identifier.
    pub id: u32,
    /// Callsign shown on overlays and results.
    pub callsign: String,
    /// Phonetic spelling for voice announcements.
    pub phonetic: String,
    /// Full name.
    pub name: String,
}

/// The fields of a pilot that operators may change.
#[derive(Debug, Clone, Default)]
pub struct PilotUpdate {
    pub callsign: Option<String>,
    pub phonetic: Option<String>,
    pub name: Option<String>,
}

/// Roster of pilots, shared by handle via the owning context.
pub struct PilotRoster {
    broker: EventBroker,
    pilots: Mutex<BTreeMap<u32, Pilot>>,
    next_id: Mutex<u32>,
}

impl PilotRoster {
    /// Create an empty roster.
    pub fn new(broker: EventBroker) -> Self {
        Self {
            broker,
            pilots: Mutex::new(BTreeMap::new()),
            next_id: Mutex::new(1),
        }
    }

    fn payload(pilot: &Pilot) -> EventPayload {
        let mut payload = EventPayload::new();
        payload.insert("pilot_id".to_string(), json!(pilot.id));
        payload.insert("callsign".to_string(), json!(pilot.callsign));
        payload
    }

    /// Add a pilot and announce it.
    pub fn add_pilot(&self, callsign: &str, phonetic: &str, name: &str) -> Pilot {
        let id = {
            let mut next_id = self.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let pilot = Pilot {
            id,
            callsign: callsign.to_string(),
            phonetic: phonetic.to_string(),
            name: name.to_string(),
        };
        self.pilots.lock().insert(id, pilot.clone());

        info!(id, callsign, "pilot added");
        self.broker
            .trigger(Event::PILOT_ADD, Self::payload(&pilot), None);
        pilot
    }

    /// Apply an update to a pilot and announce it.
    pub fn alter_pilot(&self, id: u32, update: PilotUpdate) -> Result<Pilot, RosterError> {
        let mut pilots = self.pilots.lock();
        let pilot = pilots.get_mut(&id).ok_or(RosterError::UnknownPilot(id))?;

        if let Some(callsign) = update.callsign {
            pilot.callsign = callsign;
        }
        if let Some(phonetic) = update.phonetic {
            pilot.phonetic = phonetic;
        }
        if let Some(name) = update.name {
            pilot.name = name;
        }

        let updated = pilot.clone();
        drop(pilots);

        info!(id, callsign = updated.callsign, "pilot altered");
        self.broker
            .trigger(Event::PILOT_ALTER, Self::payload(&updated), None);
        Ok(updated)
    }

    /// Remove a pilot and announce it.
    pub fn remove_pilot(&self, id: u32) -> Result<(), RosterError> {
        let pilot = self
            .pilots
            .lock()
            .remove(&id)
            .ok_or(RosterError::UnknownPilot(id))?;

        info!(id, callsign = pilot.callsign, "pilot deleted");
        self.broker
            .trigger(Event::PILOT_DELETE, Self::payload(&pilot), None);
        Ok(())
    }

    /// Look up a pilot by id.
    pub fn get_pilot(&self, id: u32) -> Option<Pilot> {
        self.pilots.lock().get(&id).cloned()
    }

    /// All pilots, ordered by id.
    pub fn list_pilots(&self) -> Vec<Pilot> {
        self.pilots.lock().values().cloned().collect()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

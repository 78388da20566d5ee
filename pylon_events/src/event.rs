//! Event descriptors.
//!
//! An [`Event`] is a type descriptor, not a value: a stable numeric id,
//! a queueing priority, and the permission a client needs before the
//! event is forwarded to it. The standard set is defined as constants.
//! External code may declare additional descriptors with its own ids;
//! the broker keys purely on the numeric id.

use serde::Serialize;

/// Queueing priority of an event relative to other queued events.
/// Smaller is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvtPriority {
    Highest,
    Higher,
    High,
    Medium,
    Low,
    Lower,
    Lowest,
}

/// Stable numeric event discriminator. Ids never change across
/// releases; transports may wrap them in any envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventId(pub u16);

/// Permission keys gating event delivery.
pub mod permission {
    /// Receive the general server event stream.
    pub const EVENT_STREAM: &str = "event_stream";
    /// Issue race control commands and observe race sequence events.
    pub const RACE_CONTROL: &str = "race_control";
    /// Read pilot roster data.
    pub const READ_PILOTS: &str = "read_pilots";
    /// Control server lifecycle.
    pub const SYSTEM_CONTROL: &str = "system_control";
}

/// An event type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Stable numeric discriminator.
    pub id: EventId,
    /// Queueing priority.
    pub priority: EvtPriority,
    /// Permission a subscriber needs for this event to be forwarded.
    pub required_permission: &'static str,
}

impl Event {
    /// Define an event descriptor.
    pub const fn new(id: u16, priority: EvtPriority, required_permission: &'static str) -> Self {
        Self {
            id: EventId(id),
            priority,
            required_permission,
        }
    }

    // ── Special events ──
    pub const STARTUP: Event = Event::new(1, EvtPriority::Highest, permission::EVENT_STREAM);
    pub const SHUTDOWN: Event = Event::new(2, EvtPriority::Highest, permission::EVENT_STREAM);
    pub const RESTART: Event = Event::new(3, EvtPriority::Low, permission::SYSTEM_CONTROL);
    pub const HEARTBEAT: Event = Event::new(4, EvtPriority::Low, permission::EVENT_STREAM);
    pub const PERMISSIONS_UPDATE: Event =
        Event::new(5, EvtPriority::High, permission::EVENT_STREAM);

    // ── Roster events ──
    pub const PILOT_ADD: Event = Event::new(10, EvtPriority::Medium, permission::READ_PILOTS);
    pub const PILOT_ALTER: Event = Event::new(11, EvtPriority::Medium, permission::READ_PILOTS);
    pub const PILOT_DELETE: Event = Event::new(12, EvtPriority::Medium, permission::READ_PILOTS);

    // ── Race sequence events ──
    pub const RACE_SCHEDULE: Event =
        Event::new(20, EvtPriority::Highest, permission::RACE_CONTROL);
    pub const RACE_STAGE: Event = Event::new(21, EvtPriority::Highest, permission::RACE_CONTROL);
    pub const RACE_START: Event = Event::new(22, EvtPriority::Highest, permission::RACE_CONTROL);
    pub const RACE_FINISH: Event = Event::new(23, EvtPriority::Highest, permission::RACE_CONTROL);
    pub const RACE_STOP: Event = Event::new(24, EvtPriority::Highest, permission::RACE_CONTROL);
    pub const RACE_PAUSE: Event = Event::new(25, EvtPriority::Highest, permission::RACE_CONTROL);
    pub const RACE_RESUME: Event = Event::new(26, EvtPriority::Highest, permission::RACE_CONTROL);
}

// ─── Tests ──────────────────────────────────────────────────────────

//! Operator commands.
//!
//! The wire-agnostic command surface of the race core. A transport
//! (HTTP, WebSocket, console) deserializes an [`OperatorCommand`],
//! dispatches it against the race manager and format catalogue, and
//! serializes the [`CommandReply`] back; the core neither knows nor
//! cares which transport delivered it.

use serde::{Deserialize, Serialize};
use tracing::warn;

use pylon_common::format::RaceFormat;

use crate::error::RaceError;
use crate::manager::RaceManager;
use crate::status::RaceStatus;

/// A command issued by a race operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Commit a race under a named format, starting at a monotonic
    /// clock timestamp.
    ScheduleRace {
        format_id: String,
        assigned_start: f64,
    },
    /// Stop the race (or abandon one that has not started).
    StopRace,
    /// Pause the race.
    PauseRace,
    /// Resume a paused race.
    ResumeRace,
    /// Discard the stopped race and return to READY.
    ResetRace,
}

/// Outcome of an operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandReply {
    Ok,
    BadState,
    BadTime,
    UnknownFormat,
    UnknownProcessor,
}

/// Dispatch an operator command against the race manager.
///
/// `formats` is the configured format catalogue used to resolve
/// `format_id`. Commands that are silent no-ops at the state machine
/// (pause, resume) always reply `OK`; reset replies `BAD_STATE` when
/// the race is not stopped.
pub async fn dispatch(
    manager: &RaceManager,
    formats: &[RaceFormat],
    command: OperatorCommand,
) -> CommandReply {
    match command {
        OperatorCommand::ScheduleRace {
            format_id,
            assigned_start,
        } => {
            let Some(format) = formats.iter().find(|f| f.name == format_id) else {
                warn!(format_id, "schedule rejected: unknown format");
                return CommandReply::UnknownFormat;
            };
            match manager.schedule_race(format.schedule.clone(), assigned_start) {
                Ok(()) => CommandReply::Ok,
                Err(RaceError::BadTime { .. }) => CommandReply::BadTime,
                Err(RaceError::BadState { .. }) => CommandReply::BadState,
                Err(RaceError::UnknownProcessor(_)) => CommandReply::UnknownProcessor,
                Err(e) => {
                    warn!("schedule rejected: {e}");
                    CommandReply::BadState
                }
            }
        }
        OperatorCommand::StopRace => {
            manager.stop_race();
            CommandReply::Ok
        }
        OperatorCommand::PauseRace => {
            manager.pause_race();
            CommandReply::Ok
        }
        OperatorCommand::ResumeRace => {
            manager.resume_race();
            CommandReply::Ok
        }
        OperatorCommand::ResetRace => {
            if manager.status() != RaceStatus::Stopped {
                return CommandReply::BadState;
            }
            manager.reset().await;
            CommandReply::Ok
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ProcessorRegistry;
    use crate::state::RaceStateMachine;
    use crate::store::{MemoryStore, RaceDataStore};
    use pylon_common::background::BackgroundTasks;
    use pylon_common::clock::MonotonicClock;
    use pylon_common::format::RaceSchedule;
    use pylon_events::EventBroker;
    use std::sync::Arc;

    fn harness() -> (RaceManager, MonotonicClock, Vec<RaceFormat>) {
        let clock = MonotonicClock::new();
        let tasks = BackgroundTasks::new(clock);
        let broker = EventBroker::new(tasks.clone());
        let state = RaceStateMachine::new(clock, broker.clone(), tasks);
        let manager = RaceManager::new(
            state,
            broker,
            ProcessorRegistry::with_defaults(),
            Arc::new(MemoryStore::new()) as Arc<dyn RaceDataStore>,
        );

        let formats = vec![RaceFormat {
            name: "sprint".to_string(),
            schedule: RaceSchedule {
                stage_time_sec: 3,
                random_stage_delay_ms: 0,
                unlimited_time: false,
                race_time_sec: 120,
                overtime_sec: 10,
                processor_id: "most_laps".to_string(),
            },
        }];
        (manager, clock, formats)
    }

    fn schedule_cmd(format_id: &str, assigned_start: f64) -> OperatorCommand {
        OperatorCommand::ScheduleRace {
            format_id: format_id.to_string(),
            assigned_start,
        }
    }

    #[tokio::test]
    async fn schedule_replies_by_failure_kind() {
        let (manager, clock, formats) = harness();

        let reply = dispatch(&manager, &formats, schedule_cmd("gp", clock.now() + 5.0)).await;
        assert_eq!(reply, CommandReply::UnknownFormat);

        let reply = dispatch(&manager, &formats, schedule_cmd("sprint", clock.now() - 5.0)).await;
        assert_eq!(reply, CommandReply::BadTime);

        let reply = dispatch(&manager, &formats, schedule_cmd("sprint", clock.now() + 5.0)).await;
        assert_eq!(reply, CommandReply::Ok);

        // Already committed.
        let reply = dispatch(&manager, &formats, schedule_cmd("sprint", clock.now() + 5.0)).await;
        assert_eq!(reply, CommandReply::BadState);
    }

    #[tokio::test]
    async fn reset_requires_stopped() {
        let (manager, clock, formats) = harness();

        let reply = dispatch(&manager, &formats, OperatorCommand::ResetRace).await;
        assert_eq!(reply, CommandReply::BadState);

        dispatch(&manager, &formats, schedule_cmd("sprint", clock.now() + 5.0)).await;
        dispatch(&manager, &formats, OperatorCommand::StopRace).await;
        assert_eq!(manager.status(), RaceStatus::Ready);

        // Stop before start returns to READY, so reset still replies
        // BAD_STATE and changes nothing.
        let reply = dispatch(&manager, &formats, OperatorCommand::ResetRace).await;
        assert_eq!(reply, CommandReply::BadState);
    }

    #[tokio::test]
    async fn pause_resume_are_always_ok() {
        let (manager, _clock, formats) = harness();
        assert_eq!(
            dispatch(&manager, &formats, OperatorCommand::PauseRace).await,
            CommandReply::Ok
        );
        assert_eq!(
            dispatch(&manager, &formats, OperatorCommand::ResumeRace).await,
            CommandReply::Ok
        );
        assert_eq!(manager.status(), RaceStatus::Ready);
    }

    #[test]
    fn command_wire_round_trip() {
        let wire = r#"{"command":"schedule_race","format_id":"sprint","assigned_start":12.5}"#;
        let command: OperatorCommand = serde_json::from_str(wire).unwrap();
        assert_eq!(command, schedule_cmd("sprint", 12.5));

        let reply = serde_json::to_value(CommandReply::BadTime).unwrap();
        assert_eq!(reply, "BAD_TIME");
    }
}

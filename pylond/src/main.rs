//! # Pylon Race Timer Server
//!
//! Control-plane entry point: loads configuration, wires the event
//! broker, race manager, and timer interfaces together, and runs until
//! a shutdown signal arrives. The HTTP/WebSocket wire layer is a
//! separate concern; this binary exposes the race core and, in demo
//! mode, drives a complete race with the simulation timer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tokio::signal;
use tracing::{debug, error, info};

use pylon_common::background::BackgroundTasks;
use pylon_common::clock::MonotonicClock;
use pylon_common::config::{ConfigLoader, PylonConfig};
use pylon_common::consts::SHUTDOWN_TIMEOUT_SEC;
use pylon_common::format::{RaceFormat, RaceSchedule};
use pylon_events::{Event, EventBroker, EventPayload};
use pylon_race::command::{dispatch, CommandReply, OperatorCommand};
use pylon_race::{
    MemoryStore, PilotRoster, ProcessorRegistry, RaceDataStore, RaceManager, RaceStateMachine,
    RaceStatus,
};
use pylon_timer::{drivers, TimerInterfaceManager};

#[derive(Parser, Debug)]
#[command(name = "pylond", about = "Pylon race timer control plane")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a demonstration race on the simulation timer, then keep
    /// serving until interrupted.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let config = PylonConfig::load(path)?;
            config.validate()?;
            config
        }
        None => PylonConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(config.server.log_level.as_tracing())
        .init();

    info!(server = config.server.name, "starting pylon race timer server");

    // ── Core wiring ──
    let clock = MonotonicClock::new();
    let tasks = BackgroundTasks::new(clock);
    let broker = EventBroker::new(tasks.clone());
    let state = RaceStateMachine::new(clock, broker.clone(), tasks.clone());
    let store: Arc<dyn RaceDataStore> = Arc::new(MemoryStore::new());
    let race = Arc::new(RaceManager::new(
        state,
        broker.clone(),
        ProcessorRegistry::with_defaults(),
        store,
    ));

    let roster = PilotRoster::new(broker.clone());

    let timers = TimerInterfaceManager::new(Arc::clone(&race));
    drivers::register_defaults(&timers)?;
    for binding in &config.timers {
        timers.instantiate_interface(&binding.driver, binding.mode.into(), binding.index, None)?;
    }
    timers.start();

    // ── Event log tap ──
    let mut subscription = broker.subscribe();
    tasks.spawn(async move {
        loop {
            let event = subscription.next().await;
            debug!(
                event_id = event.event.id.0,
                uuid = %event.uuid,
                "event: {}",
                serde_json::to_string(&event).unwrap_or_default()
            );
        }
    });

    let mut payload = EventPayload::new();
    payload.insert("server".to_string(), json!(config.server.name));
    broker.trigger(Event::STARTUP, payload, None);

    // ── Heartbeat ──
    let heartbeat_broker = broker.clone();
    let heartbeat_interval = Duration::from_secs_f64(config.server.heartbeat_interval_sec);
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            let mut payload = EventPayload::new();
            payload.insert("time".to_string(), json!(clock.now()));
            heartbeat_broker.publish(Event::HEARTBEAT, payload, None);
        }
    });

    // ── Demo race ──
    if args.demo {
        for (callsign, phonetic, name) in [
            ("VOLT", "volt", "Ada Vogel"),
            ("MACH", "mock", "Jun Park"),
            ("WASP", "wasp", "Rivka Stein"),
            ("NOVA", "no vah", "Sam Okafor"),
        ] {
            roster.add_pilot(callsign, phonetic, name);
        }

        let formats = if config.formats.is_empty() {
            vec![default_demo_format()]
        } else {
            config.formats.clone()
        };
        let demo_race = Arc::clone(&race);
        tasks.spawn(async move {
            run_demo_race(demo_race, clock, formats).await;
        });
    }

    // ── Run until interrupted ──
    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!("unable to listen for shutdown signal: {e}"),
    }

    // ── Graceful shutdown ──
    broker.trigger(Event::SHUTDOWN, EventPayload::new(), None);
    race.stop_race();

    let timeout = Duration::from_secs_f64(SHUTDOWN_TIMEOUT_SEC);
    timers.shutdown(timeout).await;
    if let Err(e) = tasks.shutdown(timeout).await {
        error!("background task failure during shutdown: {e}");
    }

    info!("pylon server shutdown complete");
    Ok(())
}

fn default_demo_format() -> RaceFormat {
    RaceFormat {
        name: "demo".to_string(),
        schedule: RaceSchedule {
            stage_time_sec: 3,
            random_stage_delay_ms: 500,
            unlimited_time: false,
            race_time_sec: 30,
            overtime_sec: 5,
            processor_id: "most_laps".to_string(),
        },
    }
}

/// Schedule one race through the operator command surface, wait for it
/// to finish, and log the standings.
async fn run_demo_race(race: Arc<RaceManager>, clock: MonotonicClock, formats: Vec<RaceFormat>) {
    let command = OperatorCommand::ScheduleRace {
        format_id: formats[0].name.clone(),
        assigned_start: clock.now() + 1.0,
    };
    match dispatch(&race, &formats, command).await {
        CommandReply::Ok => info!("demo race scheduled"),
        reply => {
            error!(?reply, "demo race could not be scheduled");
            return;
        }
    }

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        match race.status() {
            RaceStatus::Stopped => break,
            RaceStatus::Ready => {
                info!("demo race was cancelled");
                return;
            }
            _ => {}
        }
    }

    info!(race_time = race.race_time(), "demo race finished");
    for result in race.get_race_results() {
        info!(
            position = result.position,
            slot = result.slot_num,
            "  {}",
            result.data
        );
    }

    if let Err(e) = race.save_race_data().await {
        error!("demo race data could not be saved: {e}");
    }
}

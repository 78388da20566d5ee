//! Simulation timer driver.
//!
//! Emits synthetic lap crossings and RSSI samples for development and
//! testing without physical hardware. Lap cadence has a small random
//! jitter per node so rankings evolve like a real heat.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pylon_common::clock::MonotonicClock;

use crate::interface::{TimerData, TimerDriver, TimerInterface, TimerNode, TimerSetting};

/// Driver identifier.
pub const IDENTIFIER: &str = "simulation";

const DEFAULT_NODES: usize = 4;
const DEFAULT_LAP_PERIOD_SEC: f64 = 3.0;
const SAMPLE_INTERVAL_MS: u64 = 100;

/// Registration descriptor for the simulation driver.
pub fn driver() -> TimerDriver {
    TimerDriver {
        identifier: IDENTIFIER,
        display_name: "Simulation Timer",
        factory: create_interface,
    }
}

fn create_interface() -> Box<dyn TimerInterface> {
    Box::new(SimulationTimer::new(DEFAULT_NODES))
}

/// Synthetic timer emitting laps and signal samples on a task.
pub struct SimulationTimer {
    nodes: Vec<TimerNode>,
    settings: Vec<TimerSetting>,
    /// Base lap period, stored as f64 bits so the emit task sees
    /// setting changes live.
    lap_period_bits: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
    connected: bool,
}

impl SimulationTimer {
    /// Create a simulation timer with the given node count.
    pub fn new(num_nodes: usize) -> Self {
        let lap_period_bits = Arc::new(AtomicU64::new(DEFAULT_LAP_PERIOD_SEC.to_bits()));

        let period = Arc::clone(&lap_period_bits);
        let settings = vec![TimerSetting {
            id: "lap_period_sec".to_string(),
            apply: Arc::new(move |_node, raw| match raw.parse::<f64>() {
                Ok(value) if value > 0.0 => {
                    period.store(value.to_bits(), Ordering::Relaxed);
                }
                _ => warn!(raw, "ignoring invalid lap_period_sec"),
            }),
        }];

        Self {
            nodes: (0..num_nodes)
                .map(|index| TimerNode {
                    index,
                    settings: Vec::new(),
                })
                .collect(),
            settings,
            lap_period_bits,
            task: None,
            connected: false,
        }
    }
}

impl TimerInterface for SimulationTimer {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn display_name(&self) -> &str {
        "Simulation Timer"
    }

    fn nodes(&self) -> &[TimerNode] {
        &self.nodes
    }

    fn settings(&self) -> &[TimerSetting] {
        &self.settings
    }

    fn actions(&self) -> &[crate::interface::TimerAction] {
        &[]
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn subscribe(
        &mut self,
        lap_queue: UnboundedSender<TimerData>,
        signal_queue: UnboundedSender<TimerData>,
    ) {
        let num_nodes = self.nodes.len();
        let period_bits = Arc::clone(&self.lap_period_bits);

        let task = tokio::spawn(async move {
            let clock = MonotonicClock::new();
            let start = clock.now();
            let mut rng = StdRng::from_entropy();

            // Stagger first crossings so nodes do not tie artificially.
            let base = f64::from_bits(period_bits.load(Ordering::Relaxed));
            let mut next_lap: Vec<f64> = (0..num_nodes)
                .map(|i| start + base * (1.0 + 0.07 * i as f64))
                .collect();

            let mut ticker =
                tokio::time::interval(Duration::from_millis(SAMPLE_INTERVAL_MS));
            loop {
                ticker.tick().await;
                let now = clock.now();
                let period = f64::from_bits(period_bits.load(Ordering::Relaxed));

                for node_index in 0..num_nodes {
                    let rssi = -60.0 + rng.gen_range(-6.0..6.0);
                    if signal_queue
                        .send(TimerData {
                            timestamp: now,
                            timer_identifier: IDENTIFIER.to_string(),
                            node_index,
                            value: rssi,
                        })
                        .is_err()
                    {
                        debug!("signal queue closed; simulation stopping");
                        return;
                    }

                    if now >= next_lap[node_index] {
                        if lap_queue
                            .send(TimerData {
                                timestamp: now,
                                timer_identifier: IDENTIFIER.to_string(),
                                node_index,
                                value: now - start,
                            })
                            .is_err()
                        {
                            debug!("lap queue closed; simulation stopping");
                            return;
                        }
                        next_lap[node_index] = now + period * rng.gen_range(0.9..1.1);
                    }
                }
            }
        });

        self.task = Some(task);
        self.connected = true;
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.connected = false;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

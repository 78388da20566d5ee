//! The timer driver contract.
//!
//! A timer driver wraps one physical (or simulated) timing device. The
//! manager hands it two unbounded queues at `subscribe`; from then on
//! the driver pushes [`TimerData`] records until `shutdown` is called.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

/// Incoming data from a timer device.
///
/// For lap crossings `value` is seconds since race start, computed by
/// the driver at delivery. For signal samples `value` is RSSI or
/// another scalar and `timestamp` locates the sample on the monotonic
/// clock.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerData {
    /// Monotonic clock time the value was processed.
    pub timestamp: f64,
    /// Identifier of the origin interface.
    pub timer_identifier: String,
    /// Index of the node that produced the value.
    pub node_index: usize,
    /// The data value.
    pub value: f64,
}

/// A device or node setting exposed by a driver.
#[derive(Clone)]
pub struct TimerSetting {
    /// Setting identifier.
    pub id: String,
    /// Applies the setting: `(node_index, raw value)`. Device-wide
    /// settings ignore the node index.
    pub apply: Arc<dyn Fn(usize, &str) + Send + Sync>,
}

/// A named operator-invocable action on a driver.
#[derive(Clone)]
pub struct TimerAction {
    /// Action identifier.
    pub id: String,
    /// The callback to invoke.
    pub run: Arc<dyn Fn() + Send + Sync>,
}

/// One receiver node on a timing interface.
#[derive(Clone, Default)]
pub struct TimerNode {
    /// Index of the node.
    pub index: usize,
    /// Individual node settings.
    pub settings: Vec<TimerSetting>,
}

/// Contract for timer drivers.
///
/// # Lifecycle
///
/// 1. The factory constructs the driver.
/// 2. `subscribe()` hands the driver its outbound queues.
/// 3. `shutdown()` stops it from enqueuing and releases resources.
pub trait TimerInterface: Send {
    /// Unique driver identifier (e.g. "simulation").
    fn identifier(&self) -> &'static str;

    /// Human readable identifier.
    fn display_name(&self) -> &str;

    /// Nodes available on the interface.
    fn nodes(&self) -> &[TimerNode];

    /// Number of nodes on the interface.
    fn num_nodes(&self) -> usize {
        self.nodes().len()
    }

    /// Device-wide settings.
    fn settings(&self) -> &[TimerSetting];

    /// Operator-invocable actions.
    fn actions(&self) -> &[TimerAction];

    /// Connection status.
    fn connected(&self) -> bool;

    /// Subscribe to receive lap and signal data from the interface.
    ///
    /// The driver keeps the senders and enqueues [`TimerData`] records
    /// until shut down.
    fn subscribe(
        &mut self,
        lap_queue: UnboundedSender<TimerData>,
        signal_queue: UnboundedSender<TimerData>,
    );

    /// Shut down the interface connection. After this returns the
    /// driver no longer enqueues data.
    fn shutdown(&mut self);
}

/// Factory function constructing a driver instance.
pub type InterfaceFactory = fn() -> Box<dyn TimerInterface>;

/// Registration descriptor for a timer driver.
#[derive(Clone, Copy)]
pub struct TimerDriver {
    /// Unique driver identifier.
    pub identifier: &'static str,
    /// Human readable name.
    pub display_name: &'static str,
    /// Instance factory.
    pub factory: InterfaceFactory,
}

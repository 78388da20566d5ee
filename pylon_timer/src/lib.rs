//! Pylon Timer Integration
//!
//! The integration surface between physical timing hardware and the
//! race core: an abstract driver contract, a registry of driver
//! factories, and the manager that instantiates interfaces and routes
//! their lap and signal data into the race manager.
//!
//! # Module Structure
//!
//! - [`interface`] - The timer driver contract and descriptor types
//! - [`manager`] - Driver registry, active instances, consumer routing
//! - [`drivers`] - Bundled driver implementations

pub mod drivers;
pub mod interface;
pub mod manager;

pub use interface::{
    InterfaceFactory, TimerAction, TimerData, TimerDriver, TimerInterface, TimerNode,
    TimerSetting,
};
pub use manager::{ActiveTimerInfo, InterfaceError, TimerInterfaceManager, TimerMode};

//! Timer driver implementations.
//!
//! - [`simulation`] - Synthetic timer for development and testing
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement the `TimerInterface` trait
//! 3. Export a `driver()` descriptor and add it below

pub mod simulation;

use crate::manager::{InterfaceError, TimerInterfaceManager};

/// Register all built-in drivers with the manager.
pub fn register_defaults(manager: &TimerInterfaceManager) -> Result<(), InterfaceError> {
    manager.register(simulation::driver())
}

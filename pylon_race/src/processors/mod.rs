//! Bundled scoring processors.

pub mod fastest_consecutive;
pub mod most_laps;

use crate::processor::ProcessorRegistry;

/// Register every bundled processor.
pub fn register_defaults(registry: &mut ProcessorRegistry) {
    registry.register(most_laps::UID, |schedule| {
        Box::new(most_laps::MostLapsProcessor::new(schedule))
    });
    registry.register(fastest_consecutive::UID, |schedule| {
        Box::new(fastest_consecutive::FastestConsecutiveProcessor::new(
            schedule,
        ))
    });
}

//! Content modules shipped with the binary.

use super::registry::PluginRegistry;

pub mod clock;
pub mod hello;

pub use clock::{ClockFactory, ClockModule};
pub use hello::{HelloWorldFactory, HelloWorldModule};

/// Registers every built-in factory.
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register(HelloWorldFactory);
    registry.register(ClockFactory);
}

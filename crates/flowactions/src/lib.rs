//! Standard action library
//!
//! Built-in collaborator actions that scenarios can reference by type.

mod debug;
mod time;

pub use debug::{FailAction, FailActionFactory, LogAction, LogActionFactory};
pub use time::{delay, Delay, DelayFactory};
use flowmachine::ActionRegistry;

use std::sync::Arc;

/// Register all standard actions with a registry
pub fn register_all(registry: &mut ActionRegistry) {
    registry.register(Arc::new(debug::LogActionFactory));
    registry.register(Arc::new(debug::FailActionFactory));
    registry.register(Arc::new(time::DelayFactory));
}

/// A registry holding every standard action
pub fn standard_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    register_all(&mut registry);
    registry
}

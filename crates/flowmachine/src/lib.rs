//! Flow state machine
//!
//! This crate provides the machine that keeps exactly one flow active, the
//! action registry used to build flows from declarative scenarios, and the
//! transition logger hook.

mod catalog;
mod logger;
mod machine;
mod registry;

pub use catalog::FlowCatalog;
pub use logger::{FlowLogger, TracingLogger};
pub use machine::{Machine, MachineConfig};
pub use registry::{ActionFactory, ActionMetadata, ActionRegistry, OptionDefinition};

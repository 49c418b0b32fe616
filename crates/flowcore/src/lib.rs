//! Core primitives for the flow machine
//!
//! This crate provides the signal token, the action abstraction, the flow
//! execution engine and the declarative scenario types. It knows nothing
//! about which flow is active; that is the machine's job.

mod action;
mod definition;
mod error;
mod events;
mod flow;
mod token;

pub use action::{in_parallel, in_sequence, Action, ActionFn, ActionRef, Actions, Sequence};
pub use definition::{ActionSpec, ActionsSpec, FlowSpec, HookSpec, ScenarioDefinition, ScenarioId};
pub use error::{ActionError, DefinitionError, FlowError};
pub use events::{EventBus, FlowEvent, FlowId, FlowOutcome};
pub use flow::{Flow, FlowBuilder, FlowHandle, Hook, SignalHandler};
pub use token::{SignalToken, TokenStatus};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

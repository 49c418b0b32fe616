//! # Transition logger sink.
//!
//! [`FlowLogger`] is the hook point the machine calls on every control
//! operation. Every method defaults to a no-op, so a sink only overrides what
//! it cares about. Callbacks run synchronously on the caller's thread and must
//! not call back into the machine.
//!
//! [`TracingLogger`] forwards each callback as a structured `tracing` event:
//! ```text
//! INFO flowmachine: switch flow="flow2"
//! INFO flowmachine: suspend flow="flow2"
//! INFO flowmachine: signal flow="flow2" signal="stop"
//! ```

/// Observer of machine-level transitions, keyed by flow name.
pub trait FlowLogger: Send + Sync + 'static {
    fn on_cancel(&self, _name: &str) {}

    fn on_suspend(&self, _name: &str) {}

    fn on_resume(&self, _name: &str) {}

    fn on_signal(&self, _name: &str, _signal: &str) {}

    fn on_switch(&self, _name: &str) {}
}

/// Logger that writes transitions through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl FlowLogger for TracingLogger {
    fn on_cancel(&self, name: &str) {
        tracing::info!(target: "flowmachine", flow = name, "cancel");
    }

    fn on_suspend(&self, name: &str) {
        tracing::info!(target: "flowmachine", flow = name, "suspend");
    }

    fn on_resume(&self, name: &str) {
        tracing::info!(target: "flowmachine", flow = name, "resume");
    }

    fn on_signal(&self, name: &str, signal: &str) {
        tracing::info!(target: "flowmachine", flow = name, signal, "signal");
    }

    fn on_switch(&self, name: &str) {
        tracing::info!(target: "flowmachine", flow = name, "switch");
    }
}

//! Flow: a named unit of work made of an entry hook, an action phase and an
//! exit hook, all governed by one [`SignalToken`].
//!
//! ## Launch protocol
//! ```text
//! launch ──► before hook ──► action phase ──► after hook ──► completed
//!               │  successor      │  cancel        │  successor
//!               ▼                 ▼                ▼
//!           transitioned      cancelled       transitioned
//! ```
//!
//! - The action phase runs every sequence concurrently. Each sequence pops one
//!   action at a time, hands it a fresh child token and waits for it to settle.
//! - While the flow token is suspended, sequences stop popping; resume picks up
//!   at the next queued action, so nothing is skipped or run twice.
//! - An action that leaves its own token suspended halts its sequence the same
//!   way, until the flow token's next resume edge.
//! - Cancel cascades to every outstanding child token. A cancelled action that
//!   ignores its token is detached and left to finish in the background.
//! - A rejected action is logged, reported as [`FlowEvent::ActionFailed`] and
//!   otherwise treated as settled.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::action::{ActionRef, Actions, Sequence};
use crate::error::ActionError;
use crate::events::{EventBus, FlowEvent, FlowId, FlowOutcome};
use crate::token::{SignalToken, TokenStatus};

/// Entry or exit hook. Returning `Some(flow)` requests a switch to that flow.
pub type Hook = Arc<dyn Fn(&FlowHandle) -> Option<Flow> + Send + Sync>;

/// Reaction to a named signal. Returning `Some(flow)` requests a switch to that flow.
pub type SignalHandler = Arc<dyn Fn() -> Option<Flow> + Send + Sync>;

struct Template {
    name: String,
    before: Option<Hook>,
    sequences: Vec<Sequence>,
    after: Option<Hook>,
    signals: HashMap<String, SignalHandler>,
}

struct FlowInner {
    id: FlowId,
    template: Arc<Template>,
    token: SignalToken,
    listeners: Mutex<HashMap<String, SignalHandler>>,
}

/// A flow instance. Cloning yields another handle to the same instance.
///
/// An instance launches at most once; use [`Flow::fresh`] to run the same
/// definition again with a new token.
#[derive(Clone)]
pub struct Flow {
    inner: Arc<FlowInner>,
}

impl Flow {
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(name)
    }

    fn from_template(template: Arc<Template>) -> Self {
        let listeners = template.signals.clone();
        Self {
            inner: Arc::new(FlowInner {
                id: Uuid::new_v4(),
                template,
                token: SignalToken::new(),
                listeners: Mutex::new(listeners),
            }),
        }
    }

    /// New, never-launched instance of the same definition.
    pub fn fresh(&self) -> Flow {
        Self::from_template(self.inner.template.clone())
    }

    pub fn id(&self) -> FlowId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.template.name
    }

    pub fn status(&self) -> TokenStatus {
        self.inner.token.status()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.token.is_suspended()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.token.is_completed()
    }

    pub fn handle(&self) -> FlowHandle {
        FlowHandle { flow: self.clone() }
    }

    /// Cancel the flow: the token fires (cascading to outstanding actions) and
    /// every signal handler is dropped.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        self.inner.listeners.lock().clear();
    }

    pub fn suspend(&self) {
        self.inner.token.suspend();
    }

    pub fn resume(&self) {
        self.inner.token.resume();
    }

    /// Register (or replace) the handler for `signal`. Ignored once cancelled.
    pub fn on_signal<F>(&self, signal: impl Into<String>, handler: F)
    where
        F: Fn() -> Option<Flow> + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        if self.inner.token.is_cancelled() {
            return;
        }
        listeners.insert(signal.into(), Arc::new(handler));
    }

    /// Deliver `signal`. Returns the successor the handler asked for, if any.
    ///
    /// Unknown signals and signals delivered after cancellation are no-ops.
    pub fn emit(&self, signal: &str) -> Option<Flow> {
        if self.inner.token.is_cancelled() {
            return None;
        }
        let handler = self.inner.listeners.lock().get(signal).cloned();
        match handler {
            Some(handler) => handler(),
            None => {
                tracing::debug!(flow = %self.name(), signal, "no handler for signal");
                None
            }
        }
    }

    /// Run the flow's phases to the end.
    ///
    /// Returns the successor requested by a hook, if any. The flow is already
    /// cancelled by the time a successor is returned.
    pub async fn launch(&self, events: &EventBus) -> Option<Flow> {
        let token = &self.inner.token;
        if token.is_completed() {
            tracing::debug!(flow = %self.name(), "flow already completed, not launching");
            return None;
        }

        let started = Instant::now();
        tracing::info!(flow = %self.name(), flow_id = %self.id(), "flow launched");
        events.emit(FlowEvent::FlowLaunched {
            flow_id: self.id(),
            flow: self.name().to_string(),
            timestamp: Utc::now(),
        });

        let template = self.inner.template.clone();
        let handle = self.handle();

        if let Some(before) = &template.before {
            if let Some(next) = before(&handle) {
                return Some(self.transition(next, events, started));
            }
        }

        if !token.is_completed() && !template.sequences.is_empty() {
            join_all(
                template
                    .sequences
                    .iter()
                    .map(|sequence| self.drain(sequence, events)),
            )
            .await;
        }

        if !token.is_completed() {
            if let Some(after) = &template.after {
                if let Some(next) = after(&handle) {
                    return Some(self.transition(next, events, started));
                }
            }
        }

        let outcome = if token.is_cancelled() {
            FlowOutcome::Cancelled
        } else {
            FlowOutcome::Completed
        };
        token.complete();
        self.finish(outcome, events, started);
        None
    }

    fn transition(&self, next: Flow, events: &EventBus, started: Instant) -> Flow {
        tracing::debug!(flow = %self.name(), next = %next.name(), "successor requested");
        self.cancel();
        self.finish(FlowOutcome::Transitioned, events, started);
        next
    }

    fn finish(&self, outcome: FlowOutcome, events: &EventBus, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(flow = %self.name(), ?outcome, duration_ms, "flow finished");
        events.emit(FlowEvent::FlowFinished {
            flow_id: self.id(),
            flow: self.name().to_string(),
            outcome,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    async fn drain(&self, sequence: &Sequence, events: &EventBus) {
        let token = &self.inner.token;
        let mut queue: VecDeque<ActionRef> = sequence.actions().iter().cloned().collect();

        loop {
            if token.is_suspended() {
                tracing::debug!(flow = %self.name(), pending = queue.len(), "sequence halted until resume");
                token.wait_resumed().await;
            }
            if token.is_cancelled() {
                break;
            }
            let Some(action) = queue.pop_front() else {
                break;
            };
            let resumes = token.status().resumes;
            let child = token.child();
            self.settle(action, child.clone(), events).await;

            let left = child.status();
            if left.suspended && !left.cancelled && !token.is_cancelled() {
                tracing::debug!(flow = %self.name(), pending = queue.len(), "action left its token suspended, sequence halted until resume");
                token.resumed_after(resumes).await;
            }
        }
    }

    async fn settle(&self, action: ActionRef, token: SignalToken, events: &EventBus) {
        let name = action.name().to_string();
        let flow_id = self.id();
        events.emit(FlowEvent::ActionStarted {
            flow_id,
            action: name.clone(),
            timestamp: Utc::now(),
        });
        tracing::debug!(flow = %self.name(), action = %name, "action started");

        let started = Instant::now();
        let mut task = tokio::spawn({
            let token = token.clone();
            async move { action.run(token).await }
        });

        tokio::select! {
            joined = &mut task => {
                let failure = match joined {
                    Ok(Ok(())) => None,
                    Ok(Err(ActionError::Cancelled)) => {
                        tracing::debug!(flow = %self.name(), action = %name, "action cancelled");
                        None
                    }
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(e) => Some(format!("action task aborted: {}", e)),
                };
                match failure {
                    Some(error) => {
                        tracing::warn!(flow = %self.name(), action = %name, %error, "action failed, continuing");
                        events.emit(FlowEvent::ActionFailed {
                            flow_id,
                            action: name,
                            error,
                            timestamp: Utc::now(),
                        });
                    }
                    None => {
                        events.emit(FlowEvent::ActionSettled {
                            flow_id,
                            action: name,
                            duration_ms: started.elapsed().as_millis() as u64,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
            _ = token.cancelled() => {
                tracing::debug!(flow = %self.name(), action = %name, "action detached after cancel");
                events.emit(FlowEvent::ActionDetached {
                    flow_id,
                    action: name,
                    timestamp: Utc::now(),
                });
            }
        }
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

/// What a hook gets to steer its own flow.
#[derive(Clone, Debug)]
pub struct FlowHandle {
    flow: Flow,
}

impl FlowHandle {
    pub fn name(&self) -> &str {
        self.flow.name()
    }

    pub fn is_cancelled(&self) -> bool {
        self.flow.is_cancelled()
    }

    pub fn is_suspended(&self) -> bool {
        self.flow.is_suspended()
    }

    pub fn is_completed(&self) -> bool {
        self.flow.is_completed()
    }

    pub fn cancel(&self) {
        self.flow.cancel();
    }

    pub fn suspend(&self) {
        self.flow.suspend();
    }

    pub fn resume(&self) {
        self.flow.resume();
    }

    pub fn on_signal<F>(&self, signal: impl Into<String>, handler: F)
    where
        F: Fn() -> Option<Flow> + Send + Sync + 'static,
    {
        self.flow.on_signal(signal, handler);
    }
}

/// Builder for [`Flow`].
pub struct FlowBuilder {
    name: String,
    before: Option<Hook>,
    actions: Option<Actions>,
    after: Option<Hook>,
    signals: HashMap<String, SignalHandler>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before: None,
            actions: None,
            after: None,
            signals: HashMap::new(),
        }
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FlowHandle) -> Option<Flow> + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(hook));
        self
    }

    pub fn actions(mut self, actions: impl Into<Actions>) -> Self {
        self.actions = Some(actions.into());
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FlowHandle) -> Option<Flow> + Send + Sync + 'static,
    {
        self.after = Some(Arc::new(hook));
        self
    }

    /// Handler installed on every instance built from this definition.
    pub fn on_signal<F>(mut self, signal: impl Into<String>, handler: F) -> Self
    where
        F: Fn() -> Option<Flow> + Send + Sync + 'static,
    {
        self.signals.insert(signal.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> Flow {
        let sequences = self
            .actions
            .map(|actions| actions.sequences())
            .unwrap_or_default();
        Flow::from_template(Arc::new(Template {
            name: self.name,
            before: self.before,
            sequences,
            after: self.after,
            signals: self.signals,
        }))
    }
}

use crate::logger::{FlowLogger, TracingLogger};
use chrono::Utc;
use flowcore::{EventBus, Flow, FlowEvent};
use parking_lot::{Mutex, RwLock};
use std::mem;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Configuration for the machine
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub event_buffer_size: usize,
    /// Install [`TracingLogger`] as the transition logger.
    pub trace_transitions: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            trace_transitions: true,
        }
    }
}

#[derive(Default)]
struct Slots {
    current: Option<Flow>,
    /// Picked up by the driver as soon as the current launch returns.
    next: Option<Flow>,
    /// Parked by a switch that happened while the current flow was suspended.
    deferred: Option<Flow>,
    /// `next` was released by `resume`, not by a switch.
    resumed: bool,
    driving: bool,
}

struct MachineInner {
    slots: Mutex<Slots>,
    logger: RwLock<Option<Arc<dyn FlowLogger>>>,
    events: EventBus,
    idle: watch::Sender<bool>,
}

/// Coordinator holding at most one active flow.
///
/// All launches happen on a single driver task; a flow is always cancelled
/// before its successor is launched, so at most one action tree is live.
/// Callers are expected to serialise control calls (switch, suspend, resume,
/// emit, cancel) the way a single thread of control would.
///
/// Cloning yields another handle to the same machine.
#[derive(Clone)]
pub struct Machine {
    inner: Arc<MachineInner>,
}

impl Machine {
    pub fn new() -> Self {
        Self::with_config(MachineConfig::default())
    }

    pub fn with_config(config: MachineConfig) -> Self {
        let logger: Option<Arc<dyn FlowLogger>> = if config.trace_transitions {
            Some(Arc::new(TracingLogger))
        } else {
            None
        };
        let (idle, _) = watch::channel(true);

        Self {
            inner: Arc::new(MachineInner {
                slots: Mutex::new(Slots::default()),
                logger: RwLock::new(logger),
                events: EventBus::new(config.event_buffer_size),
                idle,
            }),
        }
    }

    /// Replace the transition logger.
    pub fn set_logger(&self, logger: Arc<dyn FlowLogger>) {
        *self.inner.logger.write() = Some(logger);
    }

    pub fn clear_logger(&self) {
        *self.inner.logger.write() = None;
    }

    /// Subscribe to flow and machine events
    pub fn subscribe_events(&self) -> broadcast::Receiver<FlowEvent> {
        self.inner.events.subscribe()
    }

    pub fn current(&self) -> Option<Flow> {
        self.inner.slots.lock().current.clone()
    }

    /// Name of the current flow, empty when there is none.
    pub fn current_state_name(&self) -> String {
        self.current()
            .map(|f| f.name().to_string())
            .unwrap_or_default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.current().is_some_and(|f| f.is_cancelled())
    }

    pub fn is_suspended(&self) -> bool {
        self.current().is_some_and(|f| f.is_suspended())
    }

    pub fn is_completed(&self) -> bool {
        self.current().is_some_and(|f| f.is_completed())
    }

    /// A switch is parked until the next `resume`.
    pub fn has_deferred(&self) -> bool {
        self.inner.slots.lock().deferred.is_some()
    }

    /// Switch to `flow`.
    ///
    /// The current flow is cancelled first. If it was suspended (and not
    /// already cancelled), `flow` is parked and only launched by
    /// [`resume`](Self::resume); otherwise it is launched as soon as the
    /// current flow has torn down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn switch_to(&self, flow: Flow) {
        let previous = self.current();
        // A flow cancelled while suspended is torn down, not paused.
        let suspended = previous
            .as_ref()
            .is_some_and(|f| f.is_suspended() && !f.is_cancelled());
        if let Some(previous) = &previous {
            previous.cancel();
        }

        let mut slots = self.inner.slots.lock();
        slots.next = None;
        slots.deferred = None;

        if suspended {
            tracing::debug!(flow = %flow.name(), "current flow suspended, switch deferred until resume");
            self.inner.events.emit(FlowEvent::Deferred {
                flow: flow.name().to_string(),
                timestamp: Utc::now(),
            });
            slots.deferred = Some(flow);
            return;
        }

        // The driver picks up `next` once the cancelled flow's launch returns,
        // or right away when nothing is running.
        tracing::debug!(flow = %flow.name(), "switch requested");
        slots.next = Some(flow);
        slots.resumed = false;
        self.drive(&mut slots);
    }

    pub fn cancel(&self) {
        let current = self.current();
        self.notify(current.as_ref(), |logger, name| logger.on_cancel(name));
        self.inner.events.emit(FlowEvent::Cancelled {
            flow: flow_name(current.as_ref()),
            timestamp: Utc::now(),
        });
        if let Some(flow) = current {
            flow.cancel();
        }
    }

    pub fn suspend(&self) {
        let current = self.current();
        self.notify(current.as_ref(), |logger, name| logger.on_suspend(name));
        self.inner.events.emit(FlowEvent::Suspended {
            flow: flow_name(current.as_ref()),
            timestamp: Utc::now(),
        });
        if let Some(flow) = current {
            flow.suspend();
        }
    }

    /// Resume execution.
    ///
    /// With a parked switch, the parked flow is launched and the suspended flow
    /// is discarded. Otherwise the current flow resumes in place.
    pub fn resume(&self) {
        let mut slots = self.inner.slots.lock();
        if let Some(flow) = slots.deferred.take() {
            slots.next = Some(flow.clone());
            slots.resumed = true;
            self.drive(&mut slots);
            drop(slots);

            self.notify(Some(&flow), |logger, name| logger.on_resume(name));
            self.inner.events.emit(FlowEvent::Resumed {
                flow: flow.name().to_string(),
                timestamp: Utc::now(),
            });
            return;
        }
        let current = slots.current.clone();
        drop(slots);

        self.notify(current.as_ref(), |logger, name| logger.on_resume(name));
        self.inner.events.emit(FlowEvent::Resumed {
            flow: flow_name(current.as_ref()),
            timestamp: Utc::now(),
        });
        if let Some(flow) = current {
            flow.resume();
        }
    }

    /// Deliver `signal` to the current flow, switching if its handler asks to.
    pub fn emit(&self, signal: &str) {
        let current = self.current();
        self.notify(current.as_ref(), |logger, name| logger.on_signal(name, signal));
        self.inner.events.emit(FlowEvent::Signalled {
            flow: flow_name(current.as_ref()),
            signal: signal.to_string(),
            timestamp: Utc::now(),
        });
        if let Some(next) = current.and_then(|flow| flow.emit(signal)) {
            self.switch_to(next);
        }
    }

    /// Register a signal handler on the current flow.
    pub fn on_signal<F>(&self, signal: impl Into<String>, handler: F)
    where
        F: Fn() -> Option<Flow> + Send + Sync + 'static,
    {
        if let Some(flow) = self.current() {
            flow.on_signal(signal, handler);
        }
    }

    /// Resolves once no flow is being driven: the last flow finished, or the
    /// pending switch is parked behind a suspension.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }

    fn drive(&self, slots: &mut Slots) {
        if slots.driving {
            return;
        }
        slots.driving = true;
        self.inner.idle.send_replace(false);
        tokio::spawn(self.clone().run());
    }

    async fn run(self) {
        loop {
            let (flow, resumed) = {
                let mut slots = self.inner.slots.lock();
                match slots.next.take() {
                    Some(flow) => {
                        slots.current = Some(flow.clone());
                        (flow, mem::take(&mut slots.resumed))
                    }
                    None => {
                        slots.driving = false;
                        self.inner.idle.send_replace(true);
                        return;
                    }
                }
            };

            if !resumed {
                self.notify(Some(&flow), |logger, name| logger.on_switch(name));
                self.inner.events.emit(FlowEvent::Switched {
                    flow: flow.name().to_string(),
                    timestamp: Utc::now(),
                });
            }

            if let Some(successor) = flow.launch(&self.inner.events).await {
                self.switch_to(successor);
            }
        }
    }

    fn notify(&self, flow: Option<&Flow>, f: impl FnOnce(&dyn FlowLogger, &str)) {
        let logger = self.inner.logger.read().clone();
        if let Some(logger) = logger {
            f(logger.as_ref(), flow.map(Flow::name).unwrap_or_default());
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

fn flow_name(flow: Option<&Flow>) -> String {
    flow.map(|f| f.name().to_string()).unwrap_or_default()
}

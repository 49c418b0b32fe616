use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Identity of one flow instance (one launch).
pub type FlowId = Uuid;

/// How a launched flow stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowOutcome {
    /// All phases ran to the end.
    Completed,
    /// Cancelled before the end.
    Cancelled,
    /// A hook requested a successor flow.
    Transitioned,
}

/// Events emitted by flows and the machine that drives them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    FlowLaunched {
        flow_id: FlowId,
        flow: String,
        timestamp: DateTime<Utc>,
    },
    FlowFinished {
        flow_id: FlowId,
        flow: String,
        outcome: FlowOutcome,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ActionStarted {
        flow_id: FlowId,
        action: String,
        timestamp: DateTime<Utc>,
    },
    ActionSettled {
        flow_id: FlowId,
        action: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The action rejected. The sequence carried on regardless.
    ActionFailed {
        flow_id: FlowId,
        action: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The flow was cancelled while the action was still running; the action
    /// was left to finish in the background.
    ActionDetached {
        flow_id: FlowId,
        action: String,
        timestamp: DateTime<Utc>,
    },
    Switched {
        flow: String,
        timestamp: DateTime<Utc>,
    },
    Deferred {
        flow: String,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        flow: String,
        timestamp: DateTime<Utc>,
    },
    Suspended {
        flow: String,
        timestamp: DateTime<Utc>,
    },
    Resumed {
        flow: String,
        timestamp: DateTime<Utc>,
    },
    Signalled {
        flow: String,
        signal: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`FlowEvent`]s.
///
/// Publishing never blocks and never fails; events sent while nobody is
/// subscribed are dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

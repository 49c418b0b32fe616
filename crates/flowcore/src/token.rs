//! Signal token: the cancel / suspend / resume broadcaster handed to every
//! execution unit.
//!
//! ## Rules
//! - Every signal is edge-triggered. Firing a signal the token is already in is a no-op.
//! - Cancel is one-shot. Its callbacks run exactly once, in registration order, and
//!   a callback registered after the edge (including from inside another cancel
//!   callback) is dropped without ever running.
//! - Cancel clears the suspend and resume callbacks too, so nothing registered on a
//!   cancelled token can fire.
//! - Suspend and resume callbacks stay registered across cycles: a flow token can be
//!   suspended and resumed many times and its propagation handlers must survive.
//! - Tokens form an ownership tree. [`SignalToken::child`] registers a weak child;
//!   every signal the parent fires cascades synchronously to its live children.
//!   Nothing ever propagates upward.
//!
//! ```text
//! flow token ──► child (action 1 of sequence A)
//!            └─► child (action 1 of sequence B)
//! ```

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

type CancelCallback = Box<dyn FnOnce() + Send>;
type EdgeCallback = Arc<dyn Fn() + Send + Sync>;

/// Snapshot of a token's flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenStatus {
    pub cancelled: bool,
    pub suspended: bool,
    pub completed: bool,
    /// Resume edges fired so far.
    pub resumes: u64,
}

enum Edge {
    NotFired(Vec<CancelCallback>),
    Fired,
}

struct Listeners {
    cancel: Edge,
    suspend: Vec<EdgeCallback>,
    resume: Vec<EdgeCallback>,
    children: Vec<Weak<TokenInner>>,
}

struct TokenInner {
    // Written only while `listeners` is locked.
    status: watch::Sender<TokenStatus>,
    listeners: Mutex<Listeners>,
}

/// Cancellation / suspend / resume signal shared between an execution unit and
/// whoever governs it.
///
/// Cloning is cheap and yields a handle to the same token.
#[derive(Clone)]
pub struct SignalToken {
    inner: Arc<TokenInner>,
}

impl SignalToken {
    pub fn new() -> Self {
        Self::with_status(TokenStatus::default())
    }

    fn with_status(initial: TokenStatus) -> Self {
        let cancel = if initial.cancelled {
            Edge::Fired
        } else {
            Edge::NotFired(Vec::new())
        };
        let (status, _) = watch::channel(initial);
        Self {
            inner: Arc::new(TokenInner {
                status,
                listeners: Mutex::new(Listeners {
                    cancel,
                    suspend: Vec::new(),
                    resume: Vec::new(),
                    children: Vec::new(),
                }),
            }),
        }
    }

    /// Create a token governed by this one.
    ///
    /// The child inherits the parent's current state: a child of a cancelled
    /// token is born cancelled, a child of a suspended token is born suspended.
    pub fn child(&self) -> SignalToken {
        let mut listeners = self.inner.listeners.lock();
        let parent = *self.inner.status.borrow();
        let child = Self::with_status(TokenStatus {
            cancelled: parent.cancelled,
            suspended: parent.suspended && !parent.cancelled,
            completed: parent.cancelled,
            resumes: 0,
        });
        if !parent.cancelled {
            listeners.children.retain(|c| c.strong_count() > 0);
            listeners.children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    pub fn status(&self) -> TokenStatus {
        *self.inner.status.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status().cancelled
    }

    pub fn is_suspended(&self) -> bool {
        self.status().suspended
    }

    pub fn is_completed(&self) -> bool {
        self.status().completed
    }

    /// Fire the cancel edge.
    ///
    /// Marks the token cancelled and completed, cascades to live children, then
    /// runs the cancel callbacks registered so far. Suspend and resume callbacks
    /// are discarded.
    pub fn cancel(&self) {
        let (callbacks, children) = {
            let mut listeners = self.inner.listeners.lock();
            let callbacks = match mem::replace(&mut listeners.cancel, Edge::Fired) {
                Edge::NotFired(callbacks) => callbacks,
                Edge::Fired => return,
            };
            self.inner.status.send_modify(|s| {
                s.cancelled = true;
                s.completed = true;
            });
            listeners.suspend.clear();
            listeners.resume.clear();
            (callbacks, mem::take(&mut listeners.children))
        };

        tracing::trace!(
            callbacks = callbacks.len(),
            children = children.len(),
            "token cancelled"
        );
        for child in upgrade(&children) {
            child.cancel();
        }
        for callback in callbacks {
            callback();
        }
    }

    /// Fire the suspend edge. No-op when cancelled or already suspended.
    pub fn suspend(&self) {
        let (callbacks, children) = {
            let listeners = self.inner.listeners.lock();
            let fired = self.inner.status.send_if_modified(|s| {
                if s.cancelled || s.suspended {
                    return false;
                }
                s.suspended = true;
                true
            });
            if !fired {
                return;
            }
            (listeners.suspend.clone(), upgrade(&listeners.children))
        };

        for child in children {
            child.suspend();
        }
        for callback in callbacks {
            callback();
        }
    }

    /// Fire the resume edge. No-op unless the token is currently suspended.
    pub fn resume(&self) {
        let (callbacks, children) = {
            let listeners = self.inner.listeners.lock();
            let fired = self.inner.status.send_if_modified(|s| {
                if s.cancelled || !s.suspended {
                    return false;
                }
                s.suspended = false;
                s.resumes += 1;
                true
            });
            if !fired {
                return;
            }
            (listeners.resume.clone(), upgrade(&listeners.children))
        };

        for child in children {
            child.resume();
        }
        for callback in callbacks {
            callback();
        }
    }

    /// Mark the terminal `completed` flag without firing any signal.
    pub fn complete(&self) {
        let _listeners = self.inner.listeners.lock();
        self.inner.status.send_if_modified(|s| {
            let changed = !s.completed;
            s.completed = true;
            changed
        });
    }

    /// Register a cancel callback.
    ///
    /// Dropped silently if the token is already cancelled; check
    /// [`is_cancelled`](Self::is_cancelled) first when invocation must be guaranteed.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        match &mut listeners.cancel {
            Edge::NotFired(callbacks) => callbacks.push(Box::new(callback)),
            Edge::Fired => tracing::trace!("cancel callback dropped: already cancelled"),
        }
    }

    /// Register a callback for every future suspend edge.
    ///
    /// Dropped if the token is cancelled or already suspended.
    pub fn on_suspend<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let status = *self.inner.status.borrow();
        if status.cancelled || status.suspended {
            tracing::trace!("suspend callback dropped");
            return;
        }
        listeners.suspend.push(Arc::new(callback));
    }

    /// Register a callback for every future resume edge.
    ///
    /// Accepted while the token is running or suspended, dropped once cancelled.
    pub fn on_resume<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        if self.inner.status.borrow().cancelled {
            tracing::trace!("resume callback dropped: already cancelled");
            return;
        }
        listeners.resume.push(Arc::new(callback));
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.status.subscribe();
        let _ = rx.wait_for(|s| s.cancelled).await;
    }

    /// Resolves once the token is no longer suspended, or has been cancelled.
    ///
    /// Returns immediately for a running token.
    pub async fn wait_resumed(&self) {
        let mut rx = self.inner.status.subscribe();
        let _ = rx.wait_for(|s| s.cancelled || !s.suspended).await;
    }

    /// Resolves once more than `since` resume edges have fired, or the token
    /// has been cancelled. Read `status().resumes` before the condition being
    /// waited out, so an edge in between is not missed.
    pub async fn resumed_after(&self, since: u64) {
        let mut rx = self.inner.status.subscribe();
        let _ = rx.wait_for(|s| s.cancelled || s.resumes > since).await;
    }
}

impl Default for SignalToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SignalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalToken")
            .field("status", &self.status())
            .finish()
    }
}

fn upgrade(children: &[Weak<TokenInner>]) -> Vec<SignalToken> {
    children
        .iter()
        .filter_map(Weak::upgrade)
        .map(|inner| SignalToken { inner })
        .collect()
}

//! Actions and how they are composed into a flow's action phase.
//!
//! An action is any collaborator-supplied async operation that accepts a
//! [`SignalToken`] and eventually settles. The core never inspects what an
//! action does; it only sequences invocations and hands each one a fresh child
//! token.
//!
//! Three shapes exist, fixed when the flow is built:
//! - a single action,
//! - an ordered sequence ([`in_sequence`]),
//! - several sequences drained concurrently ([`in_parallel`]).

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ActionError;
use crate::token::SignalToken;

/// Asynchronous unit of work driven by a flow.
///
/// Implementations should watch the token and settle promptly once it is
/// cancelled. A rejection is logged and otherwise ignored by the flow.
#[async_trait]
pub trait Action: Send + Sync + 'static {
    /// Human-readable name used in logs and events.
    fn name(&self) -> &str;

    async fn run(&self, token: SignalToken) -> Result<(), ActionError>;
}

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self.name())
    }
}

/// Shared handle to an action.
pub type ActionRef = Arc<dyn Action>;

/// Closure-backed action: every invocation builds a fresh future.
pub struct ActionFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> ActionFn<F>
where
    F: Fn(SignalToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Build the action and return it as an [`ActionRef`].
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> ActionRef {
        Arc::new(Self::new(name, f))
    }
}

impl<F> fmt::Debug for ActionFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionFn").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> Action for ActionFn<F>
where
    F: Fn(SignalToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, token: SignalToken) -> Result<(), ActionError> {
        (self.f)(token).await
    }
}

/// Ordered queue of actions drained one at a time.
#[derive(Clone, Default)]
pub struct Sequence(Vec<ActionRef>);

impl Sequence {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn actions(&self) -> &[ActionRef] {
        &self.0
    }
}

impl From<ActionRef> for Sequence {
    fn from(action: ActionRef) -> Self {
        Sequence(vec![action])
    }
}

impl From<Vec<ActionRef>> for Sequence {
    fn from(actions: Vec<ActionRef>) -> Self {
        Sequence(actions)
    }
}

impl FromIterator<ActionRef> for Sequence {
    fn from_iter<I: IntoIterator<Item = ActionRef>>(iter: I) -> Self {
        Sequence(iter.into_iter().collect())
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|a| a.name()))
            .finish()
    }
}

/// The action phase of a flow.
#[derive(Clone, Debug)]
pub enum Actions {
    Single(ActionRef),
    Sequence(Sequence),
    Parallel(Vec<Sequence>),
}

impl Actions {
    /// Normalise into the list of sequences that run concurrently.
    ///
    /// A single action becomes one sequence of length one; a sequence stays a
    /// single sequence. Empty sequences are dropped.
    pub fn sequences(&self) -> Vec<Sequence> {
        let sequences = match self {
            Actions::Single(action) => vec![Sequence::from(action.clone())],
            Actions::Sequence(sequence) => vec![sequence.clone()],
            Actions::Parallel(sequences) => sequences.clone(),
        };
        sequences.into_iter().filter(|s| !s.is_empty()).collect()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Actions::Single(_) => false,
            Actions::Sequence(sequence) => sequence.is_empty(),
            Actions::Parallel(sequences) => sequences.iter().all(Sequence::is_empty),
        }
    }
}

impl From<ActionRef> for Actions {
    fn from(action: ActionRef) -> Self {
        Actions::Single(action)
    }
}

impl From<Sequence> for Actions {
    fn from(sequence: Sequence) -> Self {
        Actions::Sequence(sequence)
    }
}

/// Actions run strictly one after another.
pub fn in_sequence(actions: impl IntoIterator<Item = ActionRef>) -> Actions {
    Actions::Sequence(actions.into_iter().collect())
}

/// Branches drained concurrently. A branch is either a single action or a
/// [`Sequence`].
pub fn in_parallel<B>(branches: impl IntoIterator<Item = B>) -> Actions
where
    B: Into<Sequence>,
{
    Actions::Parallel(branches.into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &'static str) -> ActionRef {
        ActionFn::arc(name, |_token: SignalToken| async { Ok(()) })
    }

    fn names(sequence: &Sequence) -> Vec<&str> {
        sequence.actions().iter().map(|a| a.name()).collect()
    }

    #[test]
    fn test_single_action_normalises_to_one_sequence() {
        let sequences = Actions::from(noop("a")).sequences();
        assert_eq!(sequences.len(), 1);
        assert_eq!(names(&sequences[0]), vec!["a"]);
    }

    #[test]
    fn test_parallel_mixes_single_actions_and_sequences() {
        let actions = in_parallel(vec![
            Sequence::from(noop("solo")),
            Sequence::from(vec![noop("first"), noop("second")]),
        ]);

        let sequences = actions.sequences();
        assert_eq!(sequences.len(), 2);
        assert_eq!(names(&sequences[0]), vec!["solo"]);
        assert_eq!(names(&sequences[1]), vec!["first", "second"]);
    }

    #[test]
    fn test_empty_sequences_are_dropped() {
        let actions = in_parallel(vec![Sequence::default(), Sequence::from(noop("a"))]);
        assert_eq!(actions.sequences().len(), 1);
        assert!(!actions.is_empty());
        assert!(in_sequence(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn test_action_fn_passes_token_through() {
        let action = ActionFn::arc("check", |token: SignalToken| async move {
            if token.is_cancelled() {
                Err(ActionError::Cancelled)
            } else {
                Ok(())
            }
        });

        let token = SignalToken::new();
        assert_eq!(action.run(token.clone()).await, Ok(()));
        token.cancel();
        assert_eq!(action.run(token).await, Err(ActionError::Cancelled));
        assert_eq!(action.name(), "check");
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure reported by a collaborator action.
///
/// Flows swallow these: a rejected action counts as settled and the sequence
/// moves on. They surface only through logs and `FlowEvent::ActionFailed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Cancelled")]
    Cancelled,

    #[error("Action failed: {0}")]
    Failed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Duplicate flow name: {0}")]
    DuplicateFlow(String),

    #[error("Unknown action type: {0}")]
    UnknownActionType(String),

    #[error("Invalid action '{action_type}' in flow '{flow}': {reason}")]
    InvalidAction {
        flow: String,
        action_type: String,
        reason: String,
    },

    #[error("Invalid scenario: {0}")]
    Invalid(String),
}

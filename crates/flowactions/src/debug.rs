use async_trait::async_trait;
use flowcore::{Action, ActionError, ActionRef, SignalToken};
use flowmachine::{ActionFactory, ActionMetadata, OptionDefinition};
use std::collections::HashMap;
use std::sync::Arc;

fn message_option(config: &HashMap<String, serde_json::Value>) -> Result<Option<String>, ActionError> {
    match config.get("message") {
        None => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ActionError::Configuration(format!(
            "message must be a string, got {}",
            other
        ))),
    }
}

fn message_metadata(description: &str) -> OptionDefinition {
    OptionDefinition {
        name: "message".to_string(),
        description: description.to_string(),
        required: false,
    }
}

/// Logs a message and settles immediately
pub struct LogAction {
    name: String,
    message: String,
}

impl LogAction {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Action for LogAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _token: SignalToken) -> Result<(), ActionError> {
        tracing::info!(action = %self.name, "DEBUG: {}", self.message);
        Ok(())
    }
}

pub struct LogActionFactory;

impl ActionFactory for LogActionFactory {
    fn create(
        &self,
        name: &str,
        config: &HashMap<String, serde_json::Value>,
    ) -> Result<ActionRef, ActionError> {
        let message = message_option(config)?.unwrap_or_else(|| "(no message)".to_string());
        Ok(Arc::new(LogAction::new(name, message)))
    }

    fn action_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Logs a message".to_string(),
            category: "debug".to_string(),
            options: vec![message_metadata("Text to log")],
        }
    }
}

/// Always rejects. Useful to see how a flow carries on past a failed action.
pub struct FailAction {
    name: String,
    message: String,
}

impl FailAction {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Action for FailAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _token: SignalToken) -> Result<(), ActionError> {
        Err(ActionError::Failed(self.message.clone()))
    }
}

pub struct FailActionFactory;

impl ActionFactory for FailActionFactory {
    fn create(
        &self,
        name: &str,
        config: &HashMap<String, serde_json::Value>,
    ) -> Result<ActionRef, ActionError> {
        let message = message_option(config)?.unwrap_or_else(|| "deliberate failure".to_string());
        Ok(Arc::new(FailAction::new(name, message)))
    }

    fn action_type(&self) -> &str {
        "debug.fail"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Fails with the given message".to_string(),
            category: "debug".to_string(),
            options: vec![message_metadata("Failure reason")],
        }
    }
}

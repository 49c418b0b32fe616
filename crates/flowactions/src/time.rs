use async_trait::async_trait;
use flowcore::{Action, ActionError, ActionRef, SignalToken};
use flowmachine::{ActionFactory, ActionMetadata, OptionDefinition};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Wait for a fixed duration, or until the token is cancelled.
pub struct Delay {
    name: Cow<'static, str>,
    delay_ms: u64,
}

impl Delay {
    pub fn new(name: impl Into<Cow<'static, str>>, delay_ms: u64) -> Self {
        Self {
            name: name.into(),
            delay_ms,
        }
    }
}

/// Shorthand for a `time.delay` action named after its duration.
pub fn delay(ms: u64) -> ActionRef {
    Arc::new(Delay::new(format!("delay {}ms", ms), ms))
}

#[async_trait]
impl Action for Delay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, token: SignalToken) -> Result<(), ActionError> {
        tracing::info!(action = %self.name, delay_ms = self.delay_ms, "delay started");

        tokio::select! {
            _ = sleep(Duration::from_millis(self.delay_ms)) => {
                tracing::info!(action = %self.name, delay_ms = self.delay_ms, "delay complete");
                Ok(())
            }
            _ = token.cancelled() => {
                tracing::info!(action = %self.name, "delay cancelled");
                Err(ActionError::Cancelled)
            }
        }
    }
}

pub struct DelayFactory;

impl ActionFactory for DelayFactory {
    fn create(
        &self,
        name: &str,
        config: &HashMap<String, serde_json::Value>,
    ) -> Result<ActionRef, ActionError> {
        let delay_ms = match config.get("delay_ms") {
            None => DEFAULT_DELAY_MS,
            Some(value) => value.as_u64().ok_or_else(|| {
                ActionError::Configuration(format!(
                    "delay_ms must be a non-negative integer, got {}",
                    value
                ))
            })?,
        };
        Ok(Arc::new(Delay::new(name.to_string(), delay_ms)))
    }

    fn action_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Wait for the given number of milliseconds".to_string(),
            category: "time".to_string(),
            options: vec![OptionDefinition {
                name: "delay_ms".to_string(),
                description: format!("Duration in milliseconds (default {})", DEFAULT_DELAY_MS),
                required: false,
            }],
        }
    }
}

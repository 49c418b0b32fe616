use flowcore::{ActionError, ActionRef, DefinitionError};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating actions from declarative config
pub trait ActionFactory: Send + Sync {
    /// Create a new action with the given configuration
    fn create(
        &self,
        name: &str,
        config: &HashMap<String, serde_json::Value>,
    ) -> Result<ActionRef, ActionError>;

    /// Action type identifier (e.g. "time.delay")
    fn action_type(&self) -> &str;

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata::default()
    }
}

/// Metadata about an action type
#[derive(Debug, Clone)]
pub struct ActionMetadata {
    pub description: String,
    pub category: String,
    pub options: Vec<OptionDefinition>,
}

impl Default for ActionMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptionDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// Registry of available action types
pub struct ActionRegistry {
    factories: HashMap<String, Arc<dyn ActionFactory>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register an action factory
    pub fn register(&mut self, factory: Arc<dyn ActionFactory>) {
        let action_type = factory.action_type().to_string();
        tracing::debug!("Registering action type: {}", action_type);
        self.factories.insert(action_type, factory);
    }

    /// Create an action instance from an action type and config
    pub fn create_action(
        &self,
        action_type: &str,
        name: &str,
        config: &HashMap<String, serde_json::Value>,
    ) -> Result<ActionRef, DefinitionError> {
        let factory = self
            .factories
            .get(action_type)
            .ok_or_else(|| DefinitionError::UnknownActionType(action_type.to_string()))?;

        factory
            .create(name, config)
            .map_err(|e| DefinitionError::Invalid(format!("Failed to create action: {}", e)))
    }

    /// All registered action types, sorted
    pub fn list_action_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, action_type: &str) -> Option<ActionMetadata> {
        self.factories.get(action_type).map(|f| f.metadata())
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

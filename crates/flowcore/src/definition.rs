use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

pub type ScenarioId = Uuid;

/// Declarative description of a set of flows and the transitions between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub id: ScenarioId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Flow launched first.
    pub entry: String,
    pub flows: Vec<FlowSpec>,
}

impl ScenarioDefinition {
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            entry: entry.into(),
            flows: Vec::new(),
        }
    }

    pub fn add_flow(&mut self, flow: FlowSpec) -> &mut Self {
        self.flows.push(flow);
        self
    }

    pub fn find_flow(&self, name: &str) -> Option<&FlowSpec> {
        self.flows.iter().find(|f| f.name == name)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a scenario from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write the scenario as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// One flow of a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<HookSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<ActionsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<HookSpec>,
    /// Signal name to the flow it switches to.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub signals: HashMap<String, String>,
}

impl FlowSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before: None,
            actions: None,
            after: None,
            signals: HashMap::new(),
        }
    }

    pub fn with_before(mut self, hook: HookSpec) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn with_actions(mut self, actions: ActionsSpec) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_after(mut self, hook: HookSpec) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn with_signal(mut self, signal: impl Into<String>, target: impl Into<String>) -> Self {
        self.signals.insert(signal.into(), target.into());
        self
    }

    /// Every flow name this flow can switch to.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.before
            .iter()
            .chain(self.after.iter())
            .filter_map(|h| h.next.as_deref())
            .chain(self.signals.values().map(String::as_str))
    }
}

/// Entry or exit hook: log a message, optionally switch to another flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl HookSpec {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            next: None,
        }
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionsSpec {
    Single(ActionSpec),
    Sequence(Vec<ActionSpec>),
    Parallel(Vec<Vec<ActionSpec>>),
}

impl ActionsSpec {
    pub fn iter(&self) -> Box<dyn Iterator<Item = &ActionSpec> + '_> {
        match self {
            ActionsSpec::Single(action) => Box::new(std::iter::once(action)),
            ActionsSpec::Sequence(actions) => Box::new(actions.iter()),
            ActionsSpec::Parallel(branches) => Box::new(branches.iter().flatten()),
        }
    }
}

/// Action instance in a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,
}

impl ActionSpec {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            name: None,
            config: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

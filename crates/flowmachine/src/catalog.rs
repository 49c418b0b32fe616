//! Builds runnable flows from a [`ScenarioDefinition`].
//!
//! Validation happens once, in [`FlowCatalog::new`]: every flow name is
//! unique, the entry and every transition target exist, and every action type
//! is registered and accepts its config. Successors are instantiated lazily,
//! when a hook or signal handler fires, so cyclic scenarios are fine.

use crate::registry::ActionRegistry;
use flowcore::{
    in_parallel, in_sequence, ActionRef, ActionSpec, Actions, ActionsSpec, DefinitionError, Flow,
    FlowHandle, HookSpec, ScenarioDefinition, Sequence,
};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct FlowCatalog {
    scenario: Arc<ScenarioDefinition>,
    registry: Arc<ActionRegistry>,
}

impl FlowCatalog {
    pub fn new(
        scenario: ScenarioDefinition,
        registry: Arc<ActionRegistry>,
    ) -> Result<Self, DefinitionError> {
        check_structure(&scenario)?;
        let catalog = Self {
            scenario: Arc::new(scenario),
            registry,
        };
        for flow in &catalog.scenario.flows {
            catalog.instantiate(&flow.name)?;
        }
        Ok(catalog)
    }

    /// Read a scenario file and validate it against `registry`.
    pub fn load(path: impl AsRef<Path>, registry: Arc<ActionRegistry>) -> flowcore::Result<Self> {
        let scenario = ScenarioDefinition::load(path)?;
        Ok(Self::new(scenario, registry)?)
    }

    pub fn scenario(&self) -> &ScenarioDefinition {
        &self.scenario
    }

    /// Fresh instance of the entry flow.
    pub fn entry(&self) -> Result<Flow, DefinitionError> {
        self.instantiate(&self.scenario.entry)
    }

    /// Fresh instance of the named flow.
    pub fn instantiate(&self, name: &str) -> Result<Flow, DefinitionError> {
        let spec = self
            .scenario
            .find_flow(name)
            .ok_or_else(|| DefinitionError::FlowNotFound(name.to_string()))?;

        let mut builder = Flow::builder(&spec.name);
        if let Some(hook) = &spec.before {
            builder = builder.before(self.hook(&spec.name, "before", hook.clone()));
        }
        if let Some(actions) = &spec.actions {
            builder = builder.actions(self.build_actions(&spec.name, actions)?);
        }
        if let Some(hook) = &spec.after {
            builder = builder.after(self.hook(&spec.name, "after", hook.clone()));
        }
        for (signal, target) in &spec.signals {
            let catalog = self.clone();
            let target = target.clone();
            builder = builder.on_signal(signal.clone(), move || catalog.successor(&target));
        }
        Ok(builder.build())
    }

    /// Flows that no chain of transitions from the entry can reach.
    pub fn unreachable_flows(&self) -> Vec<String> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let index: HashMap<&str, NodeIndex> = self
            .scenario
            .flows
            .iter()
            .map(|f| (f.name.as_str(), graph.add_node(f.name.as_str())))
            .collect();

        for flow in &self.scenario.flows {
            for target in flow.targets() {
                if let (Some(from), Some(to)) = (index.get(flow.name.as_str()), index.get(target)) {
                    graph.add_edge(*from, *to, ());
                }
            }
        }

        let mut reachable = HashSet::new();
        if let Some(entry) = index.get(self.scenario.entry.as_str()) {
            let mut dfs = Dfs::new(&graph, *entry);
            while let Some(node) = dfs.next(&graph) {
                reachable.insert(graph[node]);
            }
        }

        self.scenario
            .flows
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| !reachable.contains(name))
            .map(str::to_string)
            .collect()
    }

    fn hook(
        &self,
        flow: &str,
        phase: &'static str,
        spec: HookSpec,
    ) -> impl Fn(&FlowHandle) -> Option<Flow> + Send + Sync + 'static {
        let catalog = self.clone();
        let flow = flow.to_string();
        move |_handle: &FlowHandle| {
            if let Some(message) = &spec.message {
                tracing::info!(flow = %flow, phase, "{}", message);
            }
            spec.next.as_deref().and_then(|next| catalog.successor(next))
        }
    }

    fn successor(&self, name: &str) -> Option<Flow> {
        match self.instantiate(name) {
            Ok(flow) => Some(flow),
            Err(e) => {
                tracing::error!(flow = name, error = %e, "cannot instantiate successor");
                None
            }
        }
    }

    fn build_actions(&self, flow: &str, spec: &ActionsSpec) -> Result<Actions, DefinitionError> {
        let actions = match spec {
            ActionsSpec::Single(action) => Actions::Single(self.build_action(flow, action)?),
            ActionsSpec::Sequence(actions) => in_sequence(
                actions
                    .iter()
                    .map(|a| self.build_action(flow, a))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            ActionsSpec::Parallel(branches) => in_parallel(
                branches
                    .iter()
                    .map(|branch| {
                        branch
                            .iter()
                            .map(|a| self.build_action(flow, a))
                            .collect::<Result<Sequence, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        Ok(actions)
    }

    fn build_action(&self, flow: &str, spec: &ActionSpec) -> Result<ActionRef, DefinitionError> {
        let name = spec.name.as_deref().unwrap_or(&spec.action_type);
        self.registry
            .create_action(&spec.action_type, name, &spec.config)
            .map_err(|e| match e {
                DefinitionError::UnknownActionType(_) => e,
                other => DefinitionError::InvalidAction {
                    flow: flow.to_string(),
                    action_type: spec.action_type.clone(),
                    reason: other.to_string(),
                },
            })
    }
}

fn check_structure(scenario: &ScenarioDefinition) -> Result<(), DefinitionError> {
    if scenario.flows.is_empty() {
        return Err(DefinitionError::Invalid(format!(
            "scenario '{}' has no flows",
            scenario.name
        )));
    }

    let mut names = HashSet::new();
    for flow in &scenario.flows {
        if !names.insert(flow.name.as_str()) {
            return Err(DefinitionError::DuplicateFlow(flow.name.clone()));
        }
    }

    if !names.contains(scenario.entry.as_str()) {
        return Err(DefinitionError::FlowNotFound(scenario.entry.clone()));
    }

    for flow in &scenario.flows {
        if let Some(target) = flow.targets().find(|t| !names.contains(t)) {
            return Err(DefinitionError::FlowNotFound(target.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ActionFactory;
    use flowcore::{ActionError, ActionFn, FlowError, FlowSpec, SignalToken};

    struct NoopFactory;

    impl ActionFactory for NoopFactory {
        fn create(
            &self,
            name: &str,
            config: &HashMap<String, serde_json::Value>,
        ) -> Result<ActionRef, ActionError> {
            if config.contains_key("invalid") {
                return Err(ActionError::Configuration("invalid option".to_string()));
            }
            Ok(ActionFn::arc(name.to_string(), |_token: SignalToken| async { Ok(()) }))
        }

        fn action_type(&self) -> &str {
            "test.noop"
        }
    }

    fn registry() -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(NoopFactory));
        Arc::new(registry)
    }

    fn noop() -> ActionSpec {
        ActionSpec::new("test.noop")
    }

    fn scenario() -> ScenarioDefinition {
        let mut scenario = ScenarioDefinition::new("test", "start");
        scenario
            .add_flow(
                FlowSpec::new("start")
                    .with_actions(ActionsSpec::Sequence(vec![noop(), noop()]))
                    .with_after(HookSpec::message("done").with_next("end")),
            )
            .add_flow(
                FlowSpec::new("end")
                    .with_actions(ActionsSpec::Parallel(vec![vec![noop()], vec![noop(), noop()]]))
                    .with_signal("again", "start"),
            );
        scenario
    }

    #[test]
    fn test_valid_scenario_instantiates_named_flows() {
        let catalog = FlowCatalog::new(scenario(), registry()).unwrap();

        assert_eq!(catalog.entry().unwrap().name(), "start");
        let end = catalog.instantiate("end").unwrap();
        assert_eq!(end.emit("again").map(|f| f.name().to_string()), Some("start".to_string()));
        assert!(catalog.unreachable_flows().is_empty());
    }

    #[test]
    fn test_each_instantiation_is_a_fresh_flow() {
        let catalog = FlowCatalog::new(scenario(), registry()).unwrap();
        assert_ne!(catalog.entry().unwrap().id(), catalog.entry().unwrap().id());
    }

    #[test]
    fn test_missing_transition_target_is_rejected() {
        let mut bad = scenario();
        bad.add_flow(FlowSpec::new("dangling").with_signal("go", "nowhere"));

        let err = FlowCatalog::new(bad, registry()).err().unwrap();
        assert_eq!(err, DefinitionError::FlowNotFound("nowhere".to_string()));
    }

    #[test]
    fn test_missing_entry_and_duplicates_are_rejected() {
        let mut bad = scenario();
        bad.entry = "ghost".to_string();
        assert_eq!(
            FlowCatalog::new(bad, registry()).err().unwrap(),
            DefinitionError::FlowNotFound("ghost".to_string())
        );

        let mut bad = scenario();
        bad.add_flow(FlowSpec::new("end"));
        assert_eq!(
            FlowCatalog::new(bad, registry()).err().unwrap(),
            DefinitionError::DuplicateFlow("end".to_string())
        );

        let empty = ScenarioDefinition::new("empty", "start");
        assert!(matches!(
            FlowCatalog::new(empty, registry()),
            Err(DefinitionError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_or_misconfigured_actions_are_rejected() {
        let mut bad = scenario();
        bad.add_flow(
            FlowSpec::new("mystery").with_actions(ActionsSpec::Single(ActionSpec::new("test.missing"))),
        );
        assert_eq!(
            FlowCatalog::new(bad, registry()).err().unwrap(),
            DefinitionError::UnknownActionType("test.missing".to_string())
        );

        let mut bad = scenario();
        bad.add_flow(FlowSpec::new("misconfigured").with_actions(ActionsSpec::Single(
            noop().with_config("invalid", true),
        )));
        assert!(matches!(
            FlowCatalog::new(bad, registry()),
            Err(DefinitionError::InvalidAction { flow, .. }) if flow == "misconfigured"
        ));
    }

    #[test]
    fn test_load_validates_scenario_file() {
        let good = scenario();
        let path = std::env::temp_dir().join(format!("catalog-{}.json", good.id));
        good.save(&path).unwrap();
        let catalog = FlowCatalog::load(&path, registry()).unwrap();
        assert_eq!(catalog.scenario().entry, "start");

        let mut bad = scenario();
        bad.entry = "ghost".to_string();
        bad.save(&path).unwrap();
        let err = FlowCatalog::load(&path, registry()).err().unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            err,
            FlowError::Definition(DefinitionError::FlowNotFound(name)) if name == "ghost"
        ));

        assert!(matches!(
            FlowCatalog::load(&path, registry()),
            Err(FlowError::Io(_))
        ));
    }

    #[test]
    fn test_unreachable_flows_are_reported() {
        let mut scenario = scenario();
        scenario.add_flow(FlowSpec::new("island").with_after(HookSpec::default().with_next("start")));

        let catalog = FlowCatalog::new(scenario, registry()).unwrap();
        assert_eq!(catalog.unreachable_flows(), vec!["island".to_string()]);
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use wirecell_core::{
    Binding, BuildReport, ConfigIssue, Error, GraphConfig, Result, RuntimeSettings,
    ENTRY_CAPABILITIES, EXTERNAL_CALLER, RESPONSE_HANDLER_TYPE,
};

use crate::agent::Agent;
use crate::bus::EventBus;
use crate::instantiator::Instantiator;
use crate::module::{Dependencies, Module, ModuleTypes};
use crate::proxy::{ModuleProxy, TargetCell};
use crate::registry::CapabilityRegistry;
use crate::resolver::ExchangeResolver;

/// Pre-built instances standing in for every provider of a capability.
pub type Overrides = BTreeMap<String, Arc<dyn Module>>;

/// Type name reported in events for override instances.
pub const OVERRIDE_TYPE: &str = "Override";

#[derive(Clone)]
pub struct BuildOptions {
    pub bus: Arc<EventBus>,
    pub entry_capabilities: Vec<String>,
    /// Add a `__response__` module when the graph declares none.
    pub implicit_response: bool,
    pub overrides: Overrides,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            entry_capabilities: ENTRY_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            implicit_response: true,
            overrides: Overrides::new(),
        }
    }
}

impl BuildOptions {
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            entry_capabilities: settings.entry_capabilities.clone(),
            implicit_response: settings.implicit_response,
            ..Self::default()
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_override(mut self, capability: &str, instance: Arc<dyn Module>) -> Self {
        self.overrides.insert(capability.to_string(), instance);
        self
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides.extend(overrides);
        self
    }

    pub fn without_implicit_response(mut self) -> Self {
        self.implicit_response = false;
        self
    }
}

struct Node {
    cell: TargetCell,
    type_name: String,
}

/// Build and wire one agent's module graph.
///
/// Every module is constructed first, then each receives proxies for its
/// bound providers, then the instances are published into the shared
/// cells. Nothing is callable until all three steps succeed.
pub fn build_graph(
    config: &GraphConfig,
    types: &ModuleTypes,
    options: &BuildOptions,
) -> Result<Agent> {
    config.validate()?;
    let config = if options.implicit_response && types.contains(RESPONSE_HANDLER_TYPE) {
        config.clone().with_implicit_response()
    } else {
        config.clone()
    };
    let agent_id = config.id.as_str();

    let instantiator = Instantiator::new(types);
    let (modules, mut report) = instantiator.instantiate_all(&config.modules);
    let mut registry = CapabilityRegistry::new();
    for module in &modules {
        let manifest = module.manifest.clone();
        if let Err(issue) = registry.register(&module.id, &module.type_name, manifest) {
            report.push(issue);
        }
    }
    if !report.is_empty() {
        warn!(agent_id = %agent_id, issues = report.len(), "Graph instantiation failed");
        return Err(Error::Build(report));
    }

    let override_ids: BTreeMap<String, String> = options
        .overrides
        .keys()
        .enumerate()
        .map(|(i, capability)| (capability.clone(), format!("__override_{}__", i)))
        .collect();

    let bindings = ExchangeResolver::new(&registry)
        .with_entry_capabilities(options.entry_capabilities.clone())
        .with_overrides(override_ids.clone())
        .resolve(&config.exchange)
        .map_err(|e| {
            warn!(agent_id = %agent_id, issues = e.issues().len(), "Graph resolution failed");
            e
        })?;

    let mut nodes: HashMap<String, Node> = HashMap::new();
    for module in &modules {
        nodes.insert(
            module.id.clone(),
            Node {
                cell: Arc::new(OnceLock::new()),
                type_name: module.type_name.clone(),
            },
        );
    }
    for (capability, instance) in &options.overrides {
        let cell: TargetCell = Arc::new(OnceLock::new());
        let _ = cell.set(instance.clone());
        if let Some(id) = override_ids.get(capability) {
            nodes.insert(
                id.clone(),
                Node {
                    cell,
                    type_name: OVERRIDE_TYPE.to_string(),
                },
            );
        }
    }

    let bus = options.bus.clone();
    let proxy = |provider: &str, caller: &str| -> Result<ModuleProxy> {
        let node = nodes
            .get(provider)
            .ok_or_else(|| Error::NotFound(format!("module '{}'", provider)))?;
        Ok(ModuleProxy::injected(
            &node.cell,
            agent_id,
            provider,
            &node.type_name,
            caller,
            bus.clone(),
        ))
    };
    let external = |id: &str| -> Result<ModuleProxy> {
        let node = nodes
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("module '{}'", id)))?;
        Ok(ModuleProxy::unbound(
            node.cell.clone(),
            agent_id,
            id,
            &node.type_name,
            EXTERNAL_CALLER,
            bus.clone(),
        ))
    };

    let mut instances = Vec::with_capacity(modules.len());
    for mut module in modules {
        let mut deps = Dependencies::new(&module.id);
        for (parameter, resolved) in bindings.for_consumer(&module.id) {
            match &resolved.binding {
                Binding::Single(provider) => {
                    deps.insert_one(parameter, proxy(provider, &module.id)?)
                }
                Binding::List(providers) => {
                    let proxies = providers
                        .iter()
                        .map(|p| proxy(p, &module.id))
                        .collect::<Result<Vec<_>>>()?;
                    deps.insert_many(parameter, proxies);
                }
                Binding::Absent => deps.insert_absent(parameter),
            }
        }

        if let Err(e) = module.instance.wire(&mut deps) {
            report.push(ConfigIssue::Instantiation {
                module_id: module.id.clone(),
                reason: e.to_string(),
            });
            continue;
        }
        if !deps.is_empty() {
            debug!(
                module_id = %module.id,
                unused = ?deps.remaining(),
                "Module left bound providers unused"
            );
        }
        instances.push((module.id, Arc::<dyn Module>::from(module.instance)));
    }
    if !report.is_empty() {
        warn!(agent_id = %agent_id, issues = report.len(), "Graph wiring failed");
        return Err(Error::Build(report));
    }

    for (id, instance) in instances {
        if let Some(node) = nodes.get(&id) {
            let _ = node.cell.set(instance);
        }
    }

    let mut proxies = BTreeMap::new();
    for id in config.modules.iter().map(|m| m.id.as_str()) {
        proxies.insert(id.to_string(), external(id)?);
    }
    let entry_id = bindings
        .entry()
        .ok_or_else(|| Error::Build(BuildReport { issues: vec![ConfigIssue::MissingEntry] }))?
        .to_string();
    let entry = external(&entry_id)?;
    let cells = nodes.values().map(|n| n.cell.clone()).collect();

    info!(
        agent_id = %agent_id,
        modules = proxies.len(),
        bindings = bindings.len(),
        entry = %entry_id,
        "Agent graph built"
    );
    Ok(Agent::new(agent_id, entry, proxies, cells, bindings, bus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wirecell_core::{ExchangeConfig, Manifest, ModuleConfig, Requirement};

    /// Answers `run` by calling its `next` dependency, if any.
    struct Relay {
        next: Option<ModuleProxy>,
        name: String,
    }

    #[async_trait]
    impl Module for Relay {
        fn wire(&mut self, deps: &mut Dependencies) -> Result<()> {
            self.next = deps.take_optional("next");
            Ok(())
        }

        async fn call(&self, _method: &str, args: Value) -> Result<Value> {
            match &self.next {
                Some(next) => {
                    let inner = next.call("run", args).await?;
                    Ok(json!(format!("{}>{}", self.name, inner.as_str().unwrap_or_default())))
                }
                None => Ok(json!(self.name)),
            }
        }
    }

    fn types() -> ModuleTypes {
        let mut types = ModuleTypes::new();
        types.register_fn(
            "Front",
            Manifest::new()
                .provides("TextMessageHandlerProtocol")
                .requires(Requirement::one("next", "Hop").optional()),
            |_| Ok(Box::new(Relay { next: None, name: "front".to_string() })),
        );
        types.register_fn(
            "Back",
            Manifest::new().provides("Hop"),
            |_| Ok(Box::new(Relay { next: None, name: "back".to_string() })),
        );
        types.register_fn(
            "Picky",
            Manifest::new().provides("Hop").requires(Requirement::one("must", "Missing")),
            |_| Ok(Box::new(Relay { next: None, name: "picky".to_string() })),
        );
        types
    }

    #[tokio::test]
    async fn test_build_wires_entry_through_proxy() {
        let config = GraphConfig::new("relay")
            .with_module(ModuleConfig::new("front", "Front"))
            .with_module(ModuleConfig::new("back", "Back"));
        let agent = build_graph(&config, &types(), &BuildOptions::default()).unwrap();

        assert_eq!(agent.entry_module_id(), "front");
        assert_eq!(agent.invoke_entry("run", json!({})).await.unwrap(), json!("front>back"));
    }

    #[test]
    fn test_instantiation_failures_stop_before_resolution() {
        let config = GraphConfig::new("broken")
            .with_module(ModuleConfig::new("front", "Front"))
            .with_module(ModuleConfig::new("ghost", "NoSuchType"))
            .with_module(ModuleConfig::new("picky", "Picky"))
            .with_rule(ExchangeConfig::new("front", "Hop", "ghost"));
        let err = build_graph(&config, &types(), &BuildOptions::default()).unwrap_err();

        assert_eq!(err.issues().len(), 1);
        assert!(matches!(&err.issues()[0],
            ConfigIssue::Instantiation { module_id, .. } if module_id == "ghost"));
    }

    #[test]
    fn test_resolution_issues_reported_together() {
        let config = GraphConfig::new("broken")
            .with_module(ModuleConfig::new("front", "Front"))
            .with_module(ModuleConfig::new("picky", "Picky"))
            .with_rule(ExchangeConfig::new("front", "Hop", "ghost"));
        let err = build_graph(&config, &types(), &BuildOptions::default()).unwrap_err();
        let issues = err.issues();

        assert!(issues.iter().any(|i| matches!(i,
            ConfigIssue::UnknownModule { module_id, .. } if module_id == "ghost")));
        assert!(issues.iter().any(|i| matches!(i,
            ConfigIssue::UnresolvedDependency { module_id, capability, .. }
                if module_id == "picky" && capability == "Missing")));
    }

    #[tokio::test]
    async fn test_override_replaces_provider() {
        let config = GraphConfig::new("relay")
            .with_module(ModuleConfig::new("front", "Front"))
            .with_module(ModuleConfig::new("back", "Back"));
        let stand_in: Arc<dyn Module> = Arc::new(Relay { next: None, name: "double".to_string() });
        let options = BuildOptions::default().with_override("Hop", stand_in);
        let agent = build_graph(&config, &types(), &options).unwrap();

        assert_eq!(agent.invoke_entry("run", json!({})).await.unwrap(), json!("front>double"));
        assert_eq!(
            agent.bindings().get("front", "next").unwrap().binding,
            Binding::Single("__override_0__".to_string())
        );
    }

    /// Holds one dependency and counts its own drop.
    struct Tracked {
        parameter: &'static str,
        dependency: Option<ModuleProxy>,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Module for Tracked {
        fn wire(&mut self, deps: &mut Dependencies) -> Result<()> {
            self.dependency = Some(deps.take(self.parameter)?);
            Ok(())
        }

        async fn call(&self, method: &str, args: Value) -> Result<Value> {
            match (method, &self.dependency) {
                ("ping", Some(dependency)) => dependency.call("pong", args).await,
                _ => Ok(json!(self.parameter)),
            }
        }
    }

    #[tokio::test]
    async fn test_cross_capability_cycle_is_freed_with_agent() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut types = ModuleTypes::new();
        let counter = drops.clone();
        types.register_fn(
            "A",
            Manifest::new()
                .provides("TextMessageHandlerProtocol")
                .provides("X")
                .requires(Requirement::one("y", "Y")),
            move |_| {
                Ok(Box::new(Tracked { parameter: "y", dependency: None, drops: counter.clone() })
                    as Box<dyn Module>)
            },
        );
        let counter = drops.clone();
        types.register_fn(
            "B",
            Manifest::new().provides("Y").requires(Requirement::one("x", "X")),
            move |_| {
                Ok(Box::new(Tracked { parameter: "x", dependency: None, drops: counter.clone() })
                    as Box<dyn Module>)
            },
        );
        let config = GraphConfig::new("cycle")
            .with_module(ModuleConfig::new("a", "A"))
            .with_module(ModuleConfig::new("b", "B"));
        let options = BuildOptions::default().without_implicit_response();

        let agent = build_graph(&config, &types, &options).unwrap();
        assert_eq!(agent.invoke_entry("ping", json!({})).await.unwrap(), json!("x"));
        let held = agent.module("b").unwrap().clone();
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(agent);
        // The external handle keeps `b` alive; `a` goes with the agent.
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(held.call("ping", json!({})).await.is_err());
        drop(held);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config = GraphConfig::new("dup")
            .with_module(ModuleConfig::new("front", "Front"))
            .with_module(ModuleConfig::new("front", "Back"));
        let err = build_graph(&config, &types(), &BuildOptions::default()).unwrap_err();
        assert!(err
            .issues()
            .contains(&ConfigIssue::DuplicateModule { module_id: "front".to_string() }));
    }
}

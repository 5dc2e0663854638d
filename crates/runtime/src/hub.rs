//! Registry of agent configurations sharing one module catalog and one bus.
//!
//! Configs are kept, not agents: every `get_agent` builds a fresh graph, so
//! concurrent requests never share module state unless a module does so
//! itself.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use wirecell_core::{Error, GraphConfig, Result, RuntimeSettings};

use crate::agent::Agent;
use crate::bus::{EventBus, EventListener, SubscriptionId};
use crate::graph::{build_graph, BuildOptions, Overrides};
use crate::module::ModuleTypes;

pub struct Hub {
    types: ModuleTypes,
    configs: BTreeMap<String, GraphConfig>,
    options: BuildOptions,
}

impl Hub {
    pub fn new(types: ModuleTypes) -> Self {
        Self::with_settings(types, &RuntimeSettings::default())
    }

    pub fn with_settings(types: ModuleTypes, settings: &RuntimeSettings) -> Self {
        Self {
            types,
            configs: BTreeMap::new(),
            options: BuildOptions::from_settings(settings),
        }
    }

    /// Register (or replace) an agent configuration.
    pub fn register_agent(&mut self, config: GraphConfig) -> Result<()> {
        config.validate()?;
        let id = config.id.clone();
        if self.configs.insert(id.clone(), config).is_some() {
            warn!(agent_id = %id, "Agent config replaced");
        } else {
            info!(agent_id = %id, "Agent config registered");
        }
        Ok(())
    }

    pub fn unregister_agent(&mut self, id: &str) -> bool {
        let removed = self.configs.remove(id).is_some();
        if removed {
            info!(agent_id = %id, "Agent config unregistered");
        }
        removed
    }

    /// Register every agent config found below `dir`. Returns how many were loaded.
    pub fn load_directory(&mut self, dir: &Path) -> Result<usize> {
        let configs = GraphConfig::load_directory(dir)?;
        let count = configs.len();
        for (_, config) in configs {
            self.register_agent(config)?;
        }
        Ok(count)
    }

    /// Registered agent ids, sorted.
    pub fn list_agents(&self) -> Vec<&str> {
        self.configs.keys().map(|k| k.as_str()).collect()
    }

    pub fn config(&self, id: &str) -> Option<&GraphConfig> {
        self.configs.get(id)
    }

    /// Listen to events of every agent built by this hub, or of one agent
    /// when `agent_id` is given.
    pub fn register_event_listener(
        &self,
        prefix: &str,
        listener: Arc<dyn EventListener>,
        agent_id: Option<&str>,
    ) -> SubscriptionId {
        self.options.bus.subscribe_agent(prefix, agent_id, listener)
    }

    pub fn unregister_event_listener(&self, id: SubscriptionId) -> bool {
        self.options.bus.unsubscribe(id)
    }

    pub fn get_agent(&self, id: &str) -> Result<Agent> {
        self.get_agent_with(id, Overrides::new())
    }

    /// Build an agent with some capabilities served by the given instances
    /// instead of the configured providers.
    pub fn get_agent_with(&self, id: &str, overrides: Overrides) -> Result<Agent> {
        let config = self
            .configs
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("agent '{}'", id)))?;
        let options = self.options.clone().with_overrides(overrides);
        build_graph(config, &self.types, &options)
    }

    pub fn types(&self) -> &ModuleTypes {
        &self.types
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.options.bus
    }
}

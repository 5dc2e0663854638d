//! Build-scoped capability catalog.
//!
//! Maps every capability name to the modules of one graph that provide it.
//! A fresh registry is created for each graph build, so independent agents
//! in the same process never see each other's modules.

use std::collections::HashMap;
use tracing::debug;

use wirecell_core::{ConfigIssue, Manifest};

/// A module as the resolver sees it: identity plus effective manifest.
#[derive(Debug, Clone)]
pub struct RegisteredModule {
    pub id: String,
    pub type_name: String,
    pub manifest: Manifest,
}

#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    /// Declaration order.
    modules: Vec<RegisteredModule>,
    index: HashMap<String, usize>,
    providers: HashMap<String, Vec<String>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module and index its provided capabilities.
    pub fn register(
        &mut self,
        id: &str,
        type_name: &str,
        manifest: Manifest,
    ) -> std::result::Result<(), ConfigIssue> {
        if self.index.contains_key(id) {
            return Err(ConfigIssue::DuplicateModule { module_id: id.to_string() });
        }
        debug!(
            module_id = %id,
            type_name = %type_name,
            provides = ?manifest.provides,
            "Registering module capabilities"
        );
        for capability in &manifest.provides {
            self.providers
                .entry(capability.clone())
                .or_default()
                .push(id.to_string());
        }
        self.index.insert(id.to_string(), self.modules.len());
        self.modules.push(RegisteredModule {
            id: id.to_string(),
            type_name: type_name.to_string(),
            manifest,
        });
        Ok(())
    }

    /// Providers of `capability`, in declaration order.
    pub fn providers_of(&self, capability: &str) -> &[String] {
        self.providers
            .get(capability)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn module(&self, id: &str) -> Option<&RegisteredModule> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn modules(&self) -> impl Iterator<Item = &RegisteredModule> {
        self.modules.iter()
    }

    /// Every provided capability name, sorted.
    pub fn capabilities(&self) -> Vec<&str> {
        let mut caps: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        caps.sort_unstable();
        caps
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use wirecell_core::{Error, Manifest, ModuleSettings, Result};

use crate::proxy::ModuleProxy;

/// Incremental results of a streaming call.
pub type ValueStream = BoxStream<'static, Result<Value>>;

/// A pluggable unit of functionality.
///
/// Methods are addressed by name and take a JSON object of named arguments;
/// typed protocol clients layer explicit signatures on top of this surface.
#[async_trait]
pub trait Module: Send + Sync {
    /// Receive proxies for the module's dependency slots.
    ///
    /// Called exactly once, after every module of the graph has been
    /// constructed and before any call reaches this module.
    fn wire(&mut self, deps: &mut Dependencies) -> Result<()> {
        let _ = deps;
        Ok(())
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value>;

    /// Streaming variant of [`Module::call`]. Modules without incremental
    /// output yield their single result.
    async fn call_stream(&self, method: &str, args: Value) -> Result<ValueStream> {
        let value = self.call(method, args).await?;
        Ok(futures::stream::once(async move { Ok(value) }).boxed())
    }
}

/// Read a named argument out of a call's argument object.
pub fn arg<T: DeserializeOwned>(args: &Value, name: &str) -> Result<T> {
    let value = args
        .get(name)
        .cloned()
        .ok_or_else(|| Error::Validation(format!("missing argument '{}'", name)))?;
    serde_json::from_value(value)
        .map_err(|e| Error::Validation(format!("invalid argument '{}': {}", name, e)))
}

/// Like [`arg`] but `None` when the argument is absent or null.
pub fn opt_arg<T: DeserializeOwned>(args: &Value, name: &str) -> Result<Option<T>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg(args, name).map(Some),
    }
}

/// Module type as seen by the runtime: a name, a capability manifest and a
/// constructor taking static settings.
pub trait ModuleFactory: Send + Sync {
    fn type_name(&self) -> &str;
    fn manifest(&self) -> Manifest;
    fn create(&self, settings: &ModuleSettings) -> Result<Box<dyn Module>>;
}

type Constructor = dyn Fn(&ModuleSettings) -> Result<Box<dyn Module>> + Send + Sync;

/// [`ModuleFactory`] backed by a closure.
pub struct FnFactory {
    type_name: String,
    manifest: Manifest,
    constructor: Box<Constructor>,
}

impl FnFactory {
    pub fn new<F>(type_name: &str, manifest: Manifest, constructor: F) -> Self
    where
        F: Fn(&ModuleSettings) -> Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.to_string(),
            manifest,
            constructor: Box::new(constructor),
        }
    }
}

impl ModuleFactory for FnFactory {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn manifest(&self) -> Manifest {
        self.manifest.clone()
    }

    fn create(&self, settings: &ModuleSettings) -> Result<Box<dyn Module>> {
        (self.constructor)(settings)
    }
}

/// Type catalog supplied by the embedding application.
#[derive(Clone, Default)]
pub struct ModuleTypes {
    factories: HashMap<String, Arc<dyn ModuleFactory>>,
}

impl ModuleTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type; a later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, factory: Arc<dyn ModuleFactory>) {
        let name = factory.type_name().to_string();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::debug!(type_name = %name, "Module type replaced");
        }
    }

    pub fn register_fn<F>(&mut self, type_name: &str, manifest: Manifest, constructor: F)
    where
        F: Fn(&ModuleSettings) -> Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnFactory::new(type_name, manifest, constructor)));
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn ModuleFactory>> {
        self.factories.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

enum Slot {
    One(ModuleProxy),
    Many(Vec<ModuleProxy>),
    Absent,
}

/// Proxies for one module's dependency slots, keyed by parameter name.
pub struct Dependencies {
    module_id: String,
    slots: BTreeMap<String, Slot>,
}

impl Dependencies {
    pub fn new(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            slots: BTreeMap::new(),
        }
    }

    pub fn insert_one(&mut self, parameter: &str, proxy: ModuleProxy) {
        self.slots.insert(parameter.to_string(), Slot::One(proxy));
    }

    pub fn insert_many(&mut self, parameter: &str, proxies: Vec<ModuleProxy>) {
        self.slots.insert(parameter.to_string(), Slot::Many(proxies));
    }

    pub fn insert_absent(&mut self, parameter: &str) {
        self.slots.insert(parameter.to_string(), Slot::Absent);
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Take the single provider bound to `parameter`.
    pub fn take(&mut self, parameter: &str) -> Result<ModuleProxy> {
        match self.slots.remove(parameter) {
            Some(Slot::One(proxy)) => Ok(proxy),
            Some(Slot::Many(mut proxies)) if proxies.len() == 1 => Ok(proxies.remove(0)),
            Some(Slot::Many(proxies)) => Err(Error::Validation(format!(
                "module '{}' parameter '{}' takes one provider but {} are bound",
                self.module_id,
                parameter,
                proxies.len()
            ))),
            Some(Slot::Absent) | None => Err(Error::NotFound(format!(
                "module '{}' has no provider bound to '{}'",
                self.module_id, parameter
            ))),
        }
    }

    pub fn take_optional(&mut self, parameter: &str) -> Option<ModuleProxy> {
        match self.slots.remove(parameter) {
            Some(Slot::One(proxy)) => Some(proxy),
            Some(Slot::Many(mut proxies)) if !proxies.is_empty() => Some(proxies.remove(0)),
            _ => None,
        }
    }

    /// Take the ordered providers bound to a list parameter.
    pub fn take_list(&mut self, parameter: &str) -> Vec<ModuleProxy> {
        match self.slots.remove(parameter) {
            Some(Slot::One(proxy)) => vec![proxy],
            Some(Slot::Many(proxies)) => proxies,
            Some(Slot::Absent) | None => Vec::new(),
        }
    }

    /// Parameters nobody has taken yet.
    pub fn remaining(&self) -> Vec<&str> {
        self.slots.keys().map(|k| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

use std::sync::Arc;
use tracing::{debug, warn};

use wirecell_core::{BuildReport, ConfigIssue, Error, Manifest, ModuleConfig, Result};

use crate::module::{Module, ModuleFactory, ModuleTypes};

/// A constructed module whose dependency slots are still empty.
pub struct BareModule {
    pub id: String,
    pub type_name: String,
    /// Type manifest merged with what the declaration states.
    pub manifest: Manifest,
    pub instance: Box<dyn Module>,
}

impl std::fmt::Debug for BareModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BareModule")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

/// Builds bare module instances from declarations. Never touches other
/// modules: dependency wiring happens later, once bindings are known.
pub struct Instantiator<'a> {
    types: &'a ModuleTypes,
}

impl<'a> Instantiator<'a> {
    pub fn new(types: &'a ModuleTypes) -> Self {
        Self { types }
    }

    /// Effective manifest of a declaration, without constructing anything.
    pub fn manifest_for(&self, declaration: &ModuleConfig) -> Result<Manifest> {
        let factory = self.factory(declaration)?;
        Ok(factory.manifest().with_declared(
            declaration.provides.as_deref(),
            declaration.uses.as_deref(),
        ))
    }

    fn factory(&self, declaration: &ModuleConfig) -> Result<&Arc<dyn ModuleFactory>> {
        self.types.get(&declaration.module).ok_or_else(|| Error::Instantiation {
            module_id: declaration.id.clone(),
            reason: format!("unknown module type '{}'", declaration.module),
        })
    }

    pub fn instantiate(&self, declaration: &ModuleConfig) -> Result<BareModule> {
        let factory = self.factory(declaration)?;
        let manifest = factory.manifest().with_declared(
            declaration.provides.as_deref(),
            declaration.uses.as_deref(),
        );
        let instance = factory
            .create(&declaration.settings())
            .map_err(|e| Error::Instantiation {
                module_id: declaration.id.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            module_id = %declaration.id,
            type_name = %declaration.module,
            "Module instantiated"
        );
        Ok(BareModule {
            id: declaration.id.clone(),
            type_name: declaration.module.clone(),
            manifest,
            instance,
        })
    }

    /// Instantiate every declaration, collecting all failures into one report.
    pub fn instantiate_all(&self, declarations: &[ModuleConfig]) -> (Vec<BareModule>, BuildReport) {
        let mut modules = Vec::with_capacity(declarations.len());
        let mut report = BuildReport::new();

        for declaration in declarations {
            match self.instantiate(declaration) {
                Ok(module) => modules.push(module),
                Err(Error::Instantiation { module_id, reason }) => {
                    warn!(module_id = %module_id, reason = %reason, "Module instantiation failed");
                    report.push(ConfigIssue::Instantiation { module_id, reason });
                }
                Err(e) => report.push(ConfigIssue::Instantiation {
                    module_id: declaration.id.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        (modules, report)
    }
}

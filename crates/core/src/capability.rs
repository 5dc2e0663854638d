use serde::{Deserialize, Serialize};

/// Whether a requirement takes one provider or an ordered list of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Arity {
    #[default]
    One,
    Many,
}

/// A dependency slot a module type exposes: parameter name plus the capability
/// it must be filled with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub parameter: String,
    pub capability: String,
    #[serde(default)]
    pub arity: Arity,
    #[serde(default)]
    pub optional: bool,
}

impl Requirement {
    pub fn one(parameter: &str, capability: &str) -> Self {
        Self {
            parameter: parameter.to_string(),
            capability: capability.to_string(),
            arity: Arity::One,
            optional: false,
        }
    }

    pub fn many(parameter: &str, capability: &str) -> Self {
        Self {
            arity: Arity::Many,
            ..Self::one(parameter, capability)
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_list(&self) -> bool {
        self.arity == Arity::Many
    }
}

/// Capability manifest published by a module type: what it provides and what
/// it needs. This is the only thing the resolver ever looks at.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub requires: Vec<Requirement>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provides(mut self, capability: &str) -> Self {
        if !self.provides.iter().any(|c| c == capability) {
            self.provides.push(capability.to_string());
        }
        self
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requires.push(requirement);
        self
    }

    pub fn provides_capability(&self, capability: &str) -> bool {
        self.provides.iter().any(|c| c == capability)
    }

    pub fn requirement(&self, parameter: &str) -> Option<&Requirement> {
        self.requires.iter().find(|r| r.parameter == parameter)
    }

    /// Merge what a declaration states on top of the type's own manifest.
    ///
    /// Declared provides come first, then the type's. A declared `uses`
    /// capability that no type requirement covers becomes a required
    /// single-provider slot named after the capability.
    pub fn with_declared(
        &self,
        declared_provides: Option<&[String]>,
        declared_uses: Option<&[String]>,
    ) -> Manifest {
        let mut merged = Manifest::new();
        for cap in declared_provides.unwrap_or_default() {
            merged = merged.provides(cap);
        }
        for cap in &self.provides {
            merged = merged.provides(cap);
        }
        merged.requires = self.requires.clone();
        for cap in declared_uses.unwrap_or_default() {
            if !merged.requires.iter().any(|r| &r.capability == cap) {
                merged.requires.push(Requirement::one(cap, cap));
            }
        }
        merged
    }
}

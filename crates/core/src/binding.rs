use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provider(s) bound to one dependency slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "providers", rename_all = "snake_case")]
pub enum Binding {
    Single(String),
    List(Vec<String>),
    /// Optional requirement left empty.
    Absent,
}

impl Binding {
    pub fn provider_ids(&self) -> Vec<&str> {
        match self {
            Binding::Single(id) => vec![id.as_str()],
            Binding::List(ids) => ids.iter().map(|s| s.as_str()).collect(),
            Binding::Absent => Vec::new(),
        }
    }
}

/// A bound dependency slot of one consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub capability: String,
    pub binding: Binding,
    /// Whether an exchange rule (or override) chose the provider.
    pub explicit: bool,
}

/// Complete wiring of one graph, keyed by `(consumer id, parameter)`.
///
/// Ordered maps keep iteration, and therefore wiring order, deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bindings {
    slots: BTreeMap<String, BTreeMap<String, ResolvedBinding>>,
    entry: Option<String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, consumer: &str, parameter: &str, resolved: ResolvedBinding) {
        self.slots
            .entry(consumer.to_string())
            .or_default()
            .insert(parameter.to_string(), resolved);
    }

    pub fn get(&self, consumer: &str, parameter: &str) -> Option<&ResolvedBinding> {
        self.slots.get(consumer).and_then(|p| p.get(parameter))
    }

    /// Slots of one consumer, ordered by parameter name.
    pub fn for_consumer(&self, consumer: &str) -> impl Iterator<Item = (&String, &ResolvedBinding)> {
        self.slots.get(consumer).into_iter().flat_map(|p| p.iter())
    }

    pub fn consumers(&self) -> impl Iterator<Item = &String> {
        self.slots.keys()
    }

    pub fn set_entry(&mut self, provider: &str) {
        self.entry = Some(provider.to_string());
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn len(&self) -> usize {
        self.slots.values().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

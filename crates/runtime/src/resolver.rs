//! Exchange resolution: turns declared requirements plus explicit exchange
//! rules into a concrete binding for every dependency slot.
//!
//! Order of precedence for each `(consumer, parameter)` slot:
//!
//! 1. override bindings supplied by the caller of the build,
//! 2. exchange rules naming the slot's `field_name`,
//! 3. exchange rules for the slot's capability without a `field_name`,
//! 4. implicit inference, which only binds when exactly one other module
//!    provides the capability (list slots take all of them).
//!
//! Every problem is collected into one [`BuildReport`] instead of stopping at
//! the first.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use wirecell_core::{
    Binding, Bindings, BuildReport, ConfigIssue, Error, ExchangeConfig, Requirement,
    ResolvedBinding, Result, ENTRY_CAPABILITIES, ENTRY_ID,
};

use crate::registry::CapabilityRegistry;

fn default_entry_capabilities() -> Vec<String> {
    ENTRY_CAPABILITIES.iter().map(|c| c.to_string()).collect()
}

struct Slot<'r> {
    consumer: &'r str,
    requirement: &'r Requirement,
    bound: Option<ResolvedBinding>,
    overridden: bool,
    /// A matching rule was rejected; the slot stays unbound and skips inference.
    blocked: bool,
}

pub struct ExchangeResolver<'a> {
    registry: &'a CapabilityRegistry,
    entry_capabilities: Vec<String>,
    /// capability -> id of the pre-built module standing in for it
    overrides: BTreeMap<String, String>,
}

impl<'a> ExchangeResolver<'a> {
    pub fn new(registry: &'a CapabilityRegistry) -> Self {
        Self {
            registry,
            entry_capabilities: default_entry_capabilities(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_entry_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.entry_capabilities = capabilities;
        self
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Resolve every requirement of every registered module.
    pub fn resolve(&self, rules: &[ExchangeConfig]) -> Result<Bindings> {
        let mut report = BuildReport::new();
        let valid = self.validate_rules(rules, &mut report);
        let mut consumed = vec![false; rules.len()];

        let mut slots: Vec<Slot<'_>> = self
            .registry
            .modules()
            .flat_map(|m| {
                m.manifest.requires.iter().map(move |requirement| Slot {
                    consumer: m.id.as_str(),
                    requirement,
                    bound: None,
                    overridden: false,
                    blocked: false,
                })
            })
            .collect();

        for slot in slots.iter_mut() {
            if let Some(override_id) = self.overrides.get(&slot.requirement.capability) {
                slot.bound = Some(ResolvedBinding {
                    capability: slot.requirement.capability.clone(),
                    binding: shape(slot.requirement, vec![override_id.clone()]),
                    explicit: true,
                });
                slot.overridden = true;
            }
        }

        // Rules naming the parameter win over rules that only name the capability.
        for named_pass in [true, false] {
            for slot in slots.iter_mut() {
                if (slot.bound.is_some() && !slot.overridden) || slot.blocked {
                    continue;
                }
                let found = rules.iter().enumerate().find(|(i, rule)| {
                    !consumed[*i]
                        && rule.module == slot.consumer
                        && rule.protocol == slot.requirement.capability
                        && match &rule.field_name {
                            Some(field) => named_pass && field == &slot.requirement.parameter,
                            None => !named_pass,
                        }
                });
                let Some((index, rule)) = found else { continue };
                consumed[index] = true;
                if !valid[index] {
                    // Already reported; the user wired this slot, so no guessing.
                    slot.blocked = true;
                    continue;
                }
                if slot.overridden {
                    debug!(
                        module_id = %slot.consumer,
                        parameter = %slot.requirement.parameter,
                        "Exchange rule superseded by override"
                    );
                    continue;
                }
                match self.apply_rule(slot, rule) {
                    Ok(resolved) => slot.bound = Some(resolved),
                    Err(issue) => {
                        slot.blocked = true;
                        report.push(issue);
                    }
                }
            }
        }

        for (index, rule) in rules.iter().enumerate() {
            if valid[index] && !consumed[index] && rule.module != ENTRY_ID {
                report.push(ConfigIssue::UnmatchedRule {
                    module_id: rule.module.clone(),
                    capability: rule.protocol.clone(),
                    field_name: rule.field_name.clone(),
                });
            }
        }

        for slot in slots.iter_mut() {
            if slot.bound.is_some() || slot.blocked {
                continue;
            }
            match self.infer(slot.consumer, slot.requirement) {
                Ok(resolved) => slot.bound = Some(resolved),
                Err(issue) => report.push(issue),
            }
        }

        let mut bindings = Bindings::new();
        for slot in &slots {
            if let Some(resolved) = &slot.bound {
                bindings.insert(slot.consumer, &slot.requirement.parameter, resolved.clone());
            }
        }

        self.check_direct_cycles(&bindings, &mut report);
        self.resolve_entry(rules, &valid, &mut bindings, &mut report);

        if !report.is_empty() {
            info!(issues = report.len(), "Exchange resolution failed");
            return Err(Error::Build(report));
        }
        debug!(slots = bindings.len(), entry = ?bindings.entry(), "Exchange resolved");
        Ok(bindings)
    }

    fn is_known(&self, id: &str) -> bool {
        self.registry.contains(id) || self.overrides.values().any(|o| o == id)
    }

    /// Report rules that reference undeclared modules; returns which rules are usable.
    fn validate_rules(&self, rules: &[ExchangeConfig], report: &mut BuildReport) -> Vec<bool> {
        rules
            .iter()
            .map(|rule| {
                let mut ok = true;
                if rule.provider.ids().is_empty() {
                    report.push(ConfigIssue::EmptyRule {
                        module_id: rule.module.clone(),
                        capability: rule.protocol.clone(),
                    });
                    ok = false;
                }
                if rule.module != ENTRY_ID && !self.registry.contains(&rule.module) {
                    report.push(ConfigIssue::UnknownModule {
                        module_id: rule.module.clone(),
                        referenced_by: format!("exchange rule for {}", rule.protocol),
                    });
                    ok = false;
                }
                for provider in rule.provider.ids() {
                    if !self.is_known(&provider) {
                        report.push(ConfigIssue::UnknownModule {
                            module_id: provider,
                            referenced_by: format!(
                                "exchange rule '{}' {}",
                                rule.module, rule.protocol
                            ),
                        });
                        ok = false;
                    }
                }
                ok
            })
            .collect()
    }

    fn apply_rule(
        &self,
        slot: &Slot<'_>,
        rule: &ExchangeConfig,
    ) -> std::result::Result<ResolvedBinding, ConfigIssue> {
        let requirement = slot.requirement;
        let providers = rule.provider.ids();

        if providers.iter().any(|p| p == slot.consumer) {
            return Err(ConfigIssue::SelfDependency {
                module_id: slot.consumer.to_string(),
                parameter: requirement.parameter.clone(),
                capability: requirement.capability.clone(),
            });
        }
        if !requirement.is_list() && providers.len() > 1 {
            return Err(ConfigIssue::ArityMismatch {
                module_id: slot.consumer.to_string(),
                parameter: requirement.parameter.clone(),
                capability: requirement.capability.clone(),
                providers,
            });
        }

        debug!(
            module_id = %slot.consumer,
            parameter = %requirement.parameter,
            providers = ?providers,
            "Bound by exchange rule"
        );
        Ok(ResolvedBinding {
            capability: requirement.capability.clone(),
            binding: shape(requirement, providers),
            explicit: true,
        })
    }

    fn infer(
        &self,
        consumer: &str,
        requirement: &Requirement,
    ) -> std::result::Result<ResolvedBinding, ConfigIssue> {
        let all = self.registry.providers_of(&requirement.capability);
        let provides_itself = all.iter().any(|p| p == consumer);
        let candidates: Vec<String> = all.iter().filter(|p| *p != consumer).cloned().collect();

        let missing = || {
            if provides_itself {
                ConfigIssue::SelfDependency {
                    module_id: consumer.to_string(),
                    parameter: requirement.parameter.clone(),
                    capability: requirement.capability.clone(),
                }
            } else {
                ConfigIssue::UnresolvedDependency {
                    module_id: consumer.to_string(),
                    parameter: requirement.parameter.clone(),
                    capability: requirement.capability.clone(),
                }
            }
        };

        let binding = match (requirement.is_list(), candidates.len()) {
            (_, 0) if requirement.optional => Binding::Absent,
            (_, 0) => return Err(missing()),
            (true, _) => Binding::List(candidates),
            (false, 1) => Binding::Single(candidates[0].clone()),
            (false, _) => {
                return Err(ConfigIssue::AmbiguousDependency {
                    module_id: consumer.to_string(),
                    parameter: requirement.parameter.clone(),
                    capability: requirement.capability.clone(),
                    candidates,
                })
            }
        };

        debug!(
            module_id = %consumer,
            parameter = %requirement.parameter,
            binding = ?binding,
            "Bound by inference"
        );
        Ok(ResolvedBinding {
            capability: requirement.capability.clone(),
            binding,
            explicit: false,
        })
    }

    /// Two modules must not provide the same capability to each other.
    fn check_direct_cycles(&self, bindings: &Bindings, report: &mut BuildReport) {
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        for consumer in bindings.consumers() {
            for (_, resolved) in bindings.for_consumer(consumer) {
                for provider in resolved.binding.provider_ids() {
                    let back_edge = bindings.for_consumer(provider).any(|(_, back)| {
                        back.capability == resolved.capability
                            && back.binding.provider_ids().contains(&consumer.as_str())
                    });
                    if !back_edge {
                        continue;
                    }
                    let (first, second) = if consumer.as_str() < provider {
                        (consumer.clone(), provider.to_string())
                    } else {
                        (provider.to_string(), consumer.clone())
                    };
                    if seen.insert((first.clone(), second.clone(), resolved.capability.clone())) {
                        report.push(ConfigIssue::DirectCycle {
                            first,
                            second,
                            capability: resolved.capability.clone(),
                        });
                    }
                }
            }
        }
    }

    fn resolve_entry(
        &self,
        rules: &[ExchangeConfig],
        valid: &[bool],
        bindings: &mut Bindings,
        report: &mut BuildReport,
    ) {
        let mut candidates: Vec<String> = Vec::new();
        let mut push = |id: &str| {
            if !candidates.iter().any(|c| c == id) {
                candidates.push(id.to_string());
            }
        };

        let entry_rules: Vec<&ExchangeConfig> = rules
            .iter()
            .enumerate()
            .filter(|(i, rule)| rule.module == ENTRY_ID && valid[*i])
            .map(|(_, rule)| rule)
            .collect();
        let has_invalid_entry_rule = rules
            .iter()
            .enumerate()
            .any(|(i, rule)| rule.module == ENTRY_ID && !valid[i]);

        if !entry_rules.is_empty() {
            for rule in entry_rules {
                for provider in rule.provider.ids() {
                    push(&provider);
                }
            }
        } else if has_invalid_entry_rule {
            // Already reported as an unknown module.
            return;
        } else {
            for module in self.registry.modules() {
                if self
                    .entry_capabilities
                    .iter()
                    .any(|cap| module.manifest.provides_capability(cap))
                {
                    push(&module.id);
                }
            }
        }

        match candidates.len() {
            0 => report.push(ConfigIssue::MissingEntry),
            1 => {
                info!(entry = %candidates[0], "Entry module resolved");
                bindings.set_entry(&candidates[0]);
            }
            _ => report.push(ConfigIssue::MultipleEntries { candidates }),
        }
    }
}

fn shape(requirement: &Requirement, providers: Vec<String>) -> Binding {
    if requirement.is_list() {
        return Binding::List(providers);
    }
    match providers.into_iter().next() {
        Some(provider) => Binding::Single(provider),
        None => Binding::Absent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirecell_core::Manifest;

    fn registry(modules: &[(&str, Manifest)]) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        for (id, manifest) in modules {
            registry.register(id, "Test", manifest.clone()).unwrap();
        }
        registry
    }

    fn entry() -> Manifest {
        Manifest::new().provides("TextMessageHandlerProtocol")
    }

    #[test]
    fn test_named_rule_beats_unnamed_rule() {
        let registry = registry(&[
            ("a", Manifest::new().provides("X")),
            ("b", Manifest::new().provides("X")),
            (
                "c",
                entry()
                    .requires(Requirement::one("first", "X"))
                    .requires(Requirement::one("second", "X")),
            ),
        ]);
        let rules = vec![
            ExchangeConfig::new("c", "X", "a"),
            ExchangeConfig::new("c", "X", "b").with_field("first"),
        ];
        let bindings = ExchangeResolver::new(&registry).resolve(&rules).unwrap();

        assert_eq!(bindings.get("c", "first").unwrap().binding, Binding::Single("b".into()));
        assert_eq!(bindings.get("c", "second").unwrap().binding, Binding::Single("a".into()));
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let registry = registry(&[(
            "loop",
            entry().provides("X").requires(Requirement::one("x", "X")),
        )]);
        let err = ExchangeResolver::new(&registry).resolve(&[]).unwrap_err();
        assert!(matches!(err.issues(), [ConfigIssue::SelfDependency { .. }]));
    }

    #[test]
    fn test_inference_skips_self_among_other_providers() {
        let registry = registry(&[
            ("outer", Manifest::new().provides("X")),
            ("inner", entry().provides("X").requires(Requirement::one("next", "X"))),
        ]);
        let bindings = ExchangeResolver::new(&registry).resolve(&[]).unwrap();
        assert_eq!(
            bindings.get("inner", "next").unwrap().binding,
            Binding::Single("outer".into())
        );
    }

    #[test]
    fn test_direct_cycle_on_same_capability() {
        let registry = registry(&[
            ("a", entry().provides("X").requires(Requirement::one("x", "X"))),
            ("b", Manifest::new().provides("X").requires(Requirement::one("x", "X"))),
        ]);
        let err = ExchangeResolver::new(&registry).resolve(&[]).unwrap_err();
        assert_eq!(
            err.issues(),
            [ConfigIssue::DirectCycle {
                first: "a".into(),
                second: "b".into(),
                capability: "X".into(),
            }]
        );
    }

    #[test]
    fn test_cross_capability_cycle_allowed() {
        let registry = registry(&[
            ("a", entry().provides("X").requires(Requirement::one("y", "Y"))),
            ("b", Manifest::new().provides("Y").requires(Requirement::one("x", "X"))),
        ]);
        let bindings = ExchangeResolver::new(&registry).resolve(&[]).unwrap();
        assert_eq!(bindings.get("a", "y").unwrap().binding, Binding::Single("b".into()));
        assert_eq!(bindings.get("b", "x").unwrap().binding, Binding::Single("a".into()));
    }

    #[test]
    fn test_optional_requirement_left_absent() {
        let registry = registry(&[(
            "a",
            entry()
                .requires(Requirement::one("memory", "MemoryProtocol").optional())
                .requires(Requirement::many("tools", "ToolProviderProtocol").optional()),
        )]);
        let bindings = ExchangeResolver::new(&registry).resolve(&[]).unwrap();
        assert_eq!(bindings.get("a", "memory").unwrap().binding, Binding::Absent);
        assert_eq!(bindings.get("a", "tools").unwrap().binding, Binding::Absent);
    }

    #[test]
    fn test_list_rule_on_single_slot_is_arity_mismatch() {
        let registry = registry(&[
            ("a", Manifest::new().provides("X")),
            ("b", Manifest::new().provides("X")),
            ("c", entry().requires(Requirement::one("x", "X"))),
        ]);
        let rules = vec![ExchangeConfig::list("c", "X", &["a", "b"])];
        let err = ExchangeResolver::new(&registry).resolve(&rules).unwrap_err();
        // The failed explicit rule must not fall through to an ambiguity report.
        assert!(matches!(err.issues(), [ConfigIssue::ArityMismatch { .. }]));
    }

    #[test]
    fn test_unknown_and_unmatched_rules_reported() {
        let registry = registry(&[
            ("a", Manifest::new().provides("X")),
            ("c", entry().requires(Requirement::one("x", "X"))),
        ]);
        let rules = vec![
            ExchangeConfig::new("c", "X", "ghost"),
            ExchangeConfig::new("nobody", "X", "a"),
            ExchangeConfig::new("c", "Y", "a"),
        ];
        let err = ExchangeResolver::new(&registry).resolve(&rules).unwrap_err();
        let issues = err.issues();
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().any(|i| matches!(i,
            ConfigIssue::UnknownModule { module_id, .. } if module_id == "ghost")));
        assert!(issues.iter().any(|i| matches!(i,
            ConfigIssue::UnknownModule { module_id, .. } if module_id == "nobody")));
        assert!(issues.iter().any(|i| matches!(i,
            ConfigIssue::UnmatchedRule { capability, .. } if capability == "Y")));
    }

    #[test]
    fn test_empty_provider_list_is_reported() {
        let registry = registry(&[
            ("a", Manifest::new().provides("X")),
            (
                "c",
                entry()
                    .requires(Requirement::one("x", "X"))
                    .requires(Requirement::many("xs", "X")),
            ),
        ]);
        let rules = vec![
            ExchangeConfig::list("c", "X", &[]).with_field("x"),
            ExchangeConfig::list("c", "X", &[]).with_field("xs"),
        ];
        let err = ExchangeResolver::new(&registry).resolve(&rules).unwrap_err();
        assert_eq!(
            err.issues(),
            [
                ConfigIssue::EmptyRule { module_id: "c".into(), capability: "X".into() },
                ConfigIssue::EmptyRule { module_id: "c".into(), capability: "X".into() },
            ]
        );
    }

    #[test]
    fn test_rule_with_unknown_provider_skips_inference() {
        let registry = registry(&[
            ("l1", Manifest::new().provides("X")),
            ("l2", Manifest::new().provides("X")),
            ("c", entry().requires(Requirement::one("x", "X"))),
        ]);
        let rules = vec![ExchangeConfig::new("c", "X", "typo")];
        let err = ExchangeResolver::new(&registry).resolve(&rules).unwrap_err();
        assert!(matches!(err.issues(),
            [ConfigIssue::UnknownModule { module_id, .. }] if module_id == "typo"));
    }

    #[test]
    fn test_entry_rules() {
        let registry = registry(&[("a", entry()), ("b", entry())]);

        let err = ExchangeResolver::new(&registry).resolve(&[]).unwrap_err();
        assert_eq!(
            err.issues(),
            [ConfigIssue::MultipleEntries { candidates: vec!["a".into(), "b".into()] }]
        );

        let rules = vec![
            ExchangeConfig::entry("TextMessageHandlerProtocol", "b"),
            ExchangeConfig::entry("ImageMessageHandlerProtocol", "b"),
        ];
        let bindings = ExchangeResolver::new(&registry).resolve(&rules).unwrap();
        assert_eq!(bindings.entry(), Some("b"));

        let rules = vec![ExchangeConfig::entry("TextMessageHandlerProtocol", "a"),
                         ExchangeConfig::entry("TextMessageHandlerProtocol", "b")];
        assert!(ExchangeResolver::new(&registry).resolve(&rules).is_err());
    }

    #[test]
    fn test_missing_entry() {
        let registry = registry(&[("a", Manifest::new().provides("X"))]);
        let err = ExchangeResolver::new(&registry).resolve(&[]).unwrap_err();
        assert_eq!(err.issues(), [ConfigIssue::MissingEntry]);
    }

    #[test]
    fn test_override_replaces_rule_and_inference() {
        let registry = registry(&[
            ("real", Manifest::new().provides("ResponseProtocol")),
            ("echo", entry().requires(Requirement::one("response", "ResponseProtocol"))),
        ]);
        let overrides =
            BTreeMap::from([("ResponseProtocol".to_string(), "override_0".to_string())]);
        let rules = vec![ExchangeConfig::new("echo", "ResponseProtocol", "real")];
        let bindings = ExchangeResolver::new(&registry)
            .with_overrides(overrides)
            .resolve(&rules)
            .unwrap();

        let resolved = bindings.get("echo", "response").unwrap();
        assert_eq!(resolved.binding, Binding::Single("override_0".into()));
        assert!(resolved.explicit);
    }
}

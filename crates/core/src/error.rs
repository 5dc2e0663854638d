use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Graph build failed:\n{0}")]
    Build(BuildReport),

    #[error("Module '{module_id}' failed to instantiate: {reason}")]
    Instantiation { module_id: String, reason: String },

    #[error("Module '{module_id}' failed in '{method}': {message}")]
    Invocation {
        module_id: String,
        method: String,
        message: String,
    },

    #[error("Module '{module_id}' has no method '{method}'")]
    UnknownMethod { module_id: String, method: String },

    #[error("Call cancelled")]
    Cancelled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn invocation(module_id: &str, method: &str, message: impl fmt::Display) -> Self {
        Error::Invocation {
            module_id: module_id.to_string(),
            method: method.to_string(),
            message: message.to_string(),
        }
    }

    pub fn unknown_method(module_id: &str, method: &str) -> Self {
        Error::UnknownMethod {
            module_id: module_id.to_string(),
            method: method.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Configuration issues carried by a failed graph build, if any.
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            Error::Build(report) => &report.issues,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One problem found while building a module graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigIssue {
    /// The module's type is unknown, its config was rejected, or construction failed.
    Instantiation { module_id: String, reason: String },
    /// No module provides a required capability.
    UnresolvedDependency {
        module_id: String,
        parameter: String,
        capability: String,
    },
    /// Several modules provide the capability and no rule picks one.
    AmbiguousDependency {
        module_id: String,
        parameter: String,
        capability: String,
        candidates: Vec<String>,
    },
    /// A module would be bound as its own provider.
    SelfDependency {
        module_id: String,
        parameter: String,
        capability: String,
    },
    /// Two modules provide the same capability to each other.
    DirectCycle {
        first: String,
        second: String,
        capability: String,
    },
    /// Several providers bound to a requirement that accepts one.
    ArityMismatch {
        module_id: String,
        parameter: String,
        capability: String,
        providers: Vec<String>,
    },
    MissingEntry,
    MultipleEntries { candidates: Vec<String> },
    /// An exchange rule names a module that is not declared.
    UnknownModule { module_id: String, referenced_by: String },
    /// An exchange rule matched no requirement of its consumer.
    UnmatchedRule {
        module_id: String,
        capability: String,
        field_name: Option<String>,
    },
    /// An exchange rule lists no providers at all.
    EmptyRule { module_id: String, capability: String },
    DuplicateModule { module_id: String },
}

impl ConfigIssue {
    /// Module the issue is reported against, when there is one.
    pub fn module_id(&self) -> Option<&str> {
        match self {
            ConfigIssue::Instantiation { module_id, .. }
            | ConfigIssue::UnresolvedDependency { module_id, .. }
            | ConfigIssue::AmbiguousDependency { module_id, .. }
            | ConfigIssue::SelfDependency { module_id, .. }
            | ConfigIssue::ArityMismatch { module_id, .. }
            | ConfigIssue::UnknownModule { module_id, .. }
            | ConfigIssue::UnmatchedRule { module_id, .. }
            | ConfigIssue::EmptyRule { module_id, .. }
            | ConfigIssue::DuplicateModule { module_id } => Some(module_id),
            ConfigIssue::DirectCycle { first, .. } => Some(first),
            ConfigIssue::MissingEntry | ConfigIssue::MultipleEntries { .. } => None,
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::Instantiation { module_id, reason } => {
                write!(f, "module '{}' could not be instantiated: {}", module_id, reason)
            }
            ConfigIssue::UnresolvedDependency { module_id, parameter, capability } => write!(
                f,
                "module '{}' parameter '{}' requires {} but no module provides it",
                module_id, parameter, capability
            ),
            ConfigIssue::AmbiguousDependency { module_id, parameter, capability, candidates } => write!(
                f,
                "module '{}' parameter '{}' requires {} which is provided by several modules: [{}]",
                module_id,
                parameter,
                capability,
                candidates.join(", ")
            ),
            ConfigIssue::SelfDependency { module_id, parameter, capability } => write!(
                f,
                "module '{}' parameter '{}' cannot use itself as its {} provider",
                module_id, parameter, capability
            ),
            ConfigIssue::DirectCycle { first, second, capability } => write!(
                f,
                "modules '{}' and '{}' provide {} to each other",
                first, second, capability
            ),
            ConfigIssue::ArityMismatch { module_id, parameter, capability, providers } => write!(
                f,
                "module '{}' parameter '{}' accepts a single {} but was given [{}]",
                module_id,
                parameter,
                capability,
                providers.join(", ")
            ),
            ConfigIssue::MissingEntry => write!(f, "no entry module is bound to __entry__"),
            ConfigIssue::MultipleEntries { candidates } => write!(
                f,
                "several entry modules found: [{}]",
                candidates.join(", ")
            ),
            ConfigIssue::UnknownModule { module_id, referenced_by } => write!(
                f,
                "module '{}' referenced by {} is not declared",
                module_id, referenced_by
            ),
            ConfigIssue::UnmatchedRule { module_id, capability, field_name } => match field_name {
                Some(field) => write!(
                    f,
                    "exchange rule for '{}' {} (field '{}') matches no requirement",
                    module_id, capability, field
                ),
                None => write!(
                    f,
                    "exchange rule for '{}' {} matches no requirement",
                    module_id, capability
                ),
            },
            ConfigIssue::EmptyRule { module_id, capability } => write!(
                f,
                "exchange rule for '{}' {} names no provider",
                module_id, capability
            ),
            ConfigIssue::DuplicateModule { module_id } => {
                write!(f, "module id '{}' is declared more than once", module_id)
            }
        }
    }
}

/// Every configuration issue found by one build attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub issues: Vec<ConfigIssue>,
}

impl BuildReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: ConfigIssue) {
        self.issues.push(issue);
    }

    pub fn extend(&mut self, other: BuildReport) {
        self.issues.extend(other.issues);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// `Ok(())` when nothing was reported, otherwise the whole report as an error.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Build(self))
        }
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {}", issue)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lists_every_issue() {
        let mut report = BuildReport::new();
        report.push(ConfigIssue::UnresolvedDependency {
            module_id: "orch".to_string(),
            parameter: "llm".to_string(),
            capability: "LLMProtocol".to_string(),
        });
        report.push(ConfigIssue::AmbiguousDependency {
            module_id: "orch".to_string(),
            parameter: "tools".to_string(),
            capability: "ToolProviderProtocol".to_string(),
            candidates: vec!["a".to_string(), "b".to_string()],
        });

        let err = report.into_result().unwrap_err();
        assert_eq!(err.issues().len(), 2);
        let text = err.to_string();
        assert!(text.contains("LLMProtocol"));
        assert!(text.contains("[a, b]"));
    }

    #[test]
    fn test_empty_report_is_ok() {
        assert!(BuildReport::new().into_result().is_ok());
    }
}

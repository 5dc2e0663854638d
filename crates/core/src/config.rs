use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Consumer id of the rule that designates the externally invoked module.
pub const ENTRY_ID: &str = "__entry__";
/// Id of the module that collects the agent's outbound response.
pub const RESPONSE_ID: &str = "__response__";
/// Caller id recorded for calls that originate outside the graph.
pub const EXTERNAL_CALLER: &str = "__external__";
/// Type name of the built-in response collector.
pub const RESPONSE_HANDLER_TYPE: &str = "ResponseHandler";

/// Capabilities that make a module eligible as the implicit entry point.
pub const ENTRY_CAPABILITIES: [&str; 4] = [
    "TextMessageHandlerProtocol",
    "ImageMessageHandlerProtocol",
    "AudioMessageHandlerProtocol",
    "VideoMessageHandlerProtocol",
];

/// Opaque static configuration handed to a module type.
pub type ModuleSettings = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleConfig {
    /// Type reference looked up in the module type catalog.
    pub module: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provides: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ModuleSettings>,
}

impl ModuleConfig {
    pub fn new(id: &str, module: &str) -> Self {
        Self {
            module: module.to_string(),
            id: id.to_string(),
            provides: None,
            uses: None,
            config: None,
        }
    }

    pub fn with_provides(mut self, caps: &[&str]) -> Self {
        self.provides = Some(caps.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_uses(mut self, caps: &[&str]) -> Self {
        self.uses = Some(caps.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_setting(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config
            .get_or_insert_with(ModuleSettings::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn settings(&self) -> ModuleSettings {
        self.config.clone().unwrap_or_default()
    }
}

/// One provider id, or an ordered list of them for list dependencies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ProviderRef {
    One(String),
    Many(Vec<String>),
}

impl ProviderRef {
    pub fn ids(&self) -> Vec<String> {
        match self {
            ProviderRef::One(id) => vec![id.clone()],
            ProviderRef::Many(ids) => ids.clone(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ProviderRef::Many(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Consuming module id, or `__entry__`.
    pub module: String,
    pub protocol: String,
    pub provider: ProviderRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
}

impl ExchangeConfig {
    pub fn new(module: &str, protocol: &str, provider: &str) -> Self {
        Self {
            module: module.to_string(),
            protocol: protocol.to_string(),
            provider: ProviderRef::One(provider.to_string()),
            field_name: None,
        }
    }

    pub fn list(module: &str, protocol: &str, providers: &[&str]) -> Self {
        Self {
            module: module.to_string(),
            protocol: protocol.to_string(),
            provider: ProviderRef::Many(providers.iter().map(|p| p.to_string()).collect()),
            field_name: None,
        }
    }

    pub fn entry(protocol: &str, provider: &str) -> Self {
        Self::new(ENTRY_ID, protocol, provider)
    }

    pub fn with_field(mut self, field_name: &str) -> Self {
        self.field_name = Some(field_name.to_string());
        self
    }
}

/// Declaration of one agent's module graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphConfig {
    pub id: String,
    pub modules: Vec<ModuleConfig>,
    #[serde(default)]
    pub exchange: Vec<ExchangeConfig>,
}

impl GraphConfig {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            modules: Vec::new(),
            exchange: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: ModuleConfig) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_rule(mut self, rule: ExchangeConfig) -> Self {
        self.exchange.push(rule);
        self
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: GraphConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: GraphConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Load a graph from a `.json`, `.yml` or `.yaml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Load every YAML graph below `dir`, recursively, sorted by path.
    pub fn load_directory(dir: &Path) -> Result<Vec<(std::path::PathBuf, GraphConfig)>> {
        let mut files = Vec::new();
        collect_yaml_files(dir, &mut files)?;
        files.sort();

        let mut configs = Vec::with_capacity(files.len());
        for path in files {
            let config = Self::load(&path).map_err(|e| {
                Error::Config(format!("Invalid agent config in {}: {}", path.display(), e))
            })?;
            debug!(path = %path.display(), agent_id = %config.id, "Loaded agent config");
            configs.push((path, config));
        }
        Ok(configs)
    }

    pub fn module(&self, id: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn has_module(&self, id: &str) -> bool {
        self.module(id).is_some()
    }

    /// Append the built-in `__response__` module unless one is declared.
    pub fn with_implicit_response(mut self) -> Self {
        if !self.has_module(RESPONSE_ID) {
            self.modules.push(
                ModuleConfig::new(RESPONSE_ID, RESPONSE_HANDLER_TYPE)
                    .with_provides(&["ResponseProtocol"]),
            );
        }
        self
    }

    /// Shape checks that need no type information.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("agent id must not be empty".to_string()));
        }
        for module in &self.modules {
            if module.id.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "module of type '{}' has an empty id",
                    module.module
                )));
            }
            if module.id == ENTRY_ID || module.id == EXTERNAL_CALLER {
                return Err(Error::Validation(format!(
                    "'{}' is reserved and cannot be used as a module id",
                    module.id
                )));
            }
        }
        for rule in &self.exchange {
            if let ProviderRef::Many(ids) = &rule.provider {
                if ids.is_empty() {
                    return Err(Error::Validation(format!(
                        "exchange rule for '{}' {} has an empty provider list",
                        rule.module, rule.protocol
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Process-wide runtime knobs, read from an optional settings file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    /// Capabilities that make a module eligible as the implicit entry point.
    #[serde(default = "default_entry_capabilities")]
    pub entry_capabilities: Vec<String>,
    #[serde(default = "default_implicit_response")]
    pub implicit_response: bool,
    /// Buffer size of channel-backed event subscriptions.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_entry_capabilities() -> Vec<String> {
    ENTRY_CAPABILITIES.iter().map(|c| c.to_string()).collect()
}

fn default_implicit_response() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            entry_capabilities: default_entry_capabilities(),
            implicit_response: default_implicit_response(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl RuntimeSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(settings)
    }

    /// Load from `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_yaml_files(&path, out)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        ) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO_YAML: &str = r#"
id: echo-agent
modules:
  - module: Echo
    id: echo
    config:
      prefix: "You said: "
exchange:
  - module: __entry__
    protocol: TextMessageHandlerProtocol
    provider: echo
  - module: collector
    protocol: ToolProviderProtocol
    provider: [a, b]
    field_name: providers
"#;

    #[test]
    fn test_from_yaml_reads_declaration_fields() {
        let cfg = GraphConfig::from_yaml(ECHO_YAML).unwrap();
        assert_eq!(cfg.id, "echo-agent");
        assert_eq!(cfg.modules[0].module, "Echo");
        assert_eq!(
            cfg.modules[0].settings()["prefix"],
            serde_json::json!("You said: ")
        );
        assert_eq!(cfg.exchange[0].provider, ProviderRef::One("echo".to_string()));
        assert_eq!(
            cfg.exchange[1].provider,
            ProviderRef::Many(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(cfg.exchange[1].field_name.as_deref(), Some("providers"));
    }

    #[test]
    fn test_implicit_response_added_once() {
        let cfg = GraphConfig::from_yaml(ECHO_YAML).unwrap().with_implicit_response();
        assert!(cfg.has_module(RESPONSE_ID));
        let again = cfg.clone().with_implicit_response();
        assert_eq!(again.modules.len(), cfg.modules.len());
    }

    #[test]
    fn test_reserved_ids_rejected() {
        let cfg = GraphConfig::new("a").with_module(ModuleConfig::new(ENTRY_ID, "Echo"));
        assert!(matches!(cfg.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_runtime_settings_defaults_fill_gaps() {
        let settings: RuntimeSettings = serde_yaml::from_str("implicitResponse: false").unwrap();
        assert!(!settings.implicit_response);
        assert_eq!(settings.event_channel_capacity, 1024);
        assert_eq!(settings.entry_capabilities.len(), 4);

        let missing = RuntimeSettings::load_or_default(Path::new("/nonexistent/wirecell.yaml"));
        assert_eq!(missing.unwrap(), RuntimeSettings::default());
    }

    #[test]
    fn test_load_directory_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("echo.yaml"), ECHO_YAML).unwrap();
        std::fs::write(nested.join("other.yml"), ECHO_YAML.replace("echo-agent", "other")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let configs = GraphConfig::load_directory(dir.path()).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].1.id, "echo-agent");
        assert_eq!(configs[1].1.id, "other");
    }
}

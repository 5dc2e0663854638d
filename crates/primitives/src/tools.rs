use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use wirecell_core::{Error, Manifest, ModuleSettings, Requirement, Result};
use wirecell_runtime::{arg, opt_arg, Dependencies, Module, ModuleProxy};

use crate::models::{Tool, ToolResult};
use crate::protocols::{ToolProvider, TOOL_PROVIDER};

pub const COLLECTOR_TYPE: &str = "ToolCollector";
pub const STATIC_TYPE: &str = "StaticTools";

pub fn collector_manifest() -> Manifest {
    Manifest::new()
        .provides(TOOL_PROVIDER)
        .requires(Requirement::many("tool_providers", TOOL_PROVIDER))
}

pub fn static_manifest() -> Manifest {
    Manifest::new().provides(TOOL_PROVIDER)
}

/// Presents several tool providers as one. Execution goes to the first
/// provider, in binding order, that lists the requested tool.
#[derive(Default)]
pub struct ToolCollector {
    providers: Vec<ModuleProxy>,
}

impl ToolCollector {
    pub fn new() -> Self {
        Self::default()
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        for provider in &self.providers {
            tools.extend(provider.list_tools().await?);
        }
        Ok(tools)
    }

    async fn execute_tool(&self, tool_name: &str, parameters: &Value) -> Result<ToolResult> {
        for provider in &self.providers {
            let tools = provider.list_tools().await?;
            if tools.iter().any(|t| t.name == tool_name) {
                debug!(tool = %tool_name, provider = %provider.module_id(), "Dispatching tool");
                return provider.execute_tool(tool_name, parameters).await;
            }
        }
        Ok(ToolResult::failed(format!("Could not find {}", tool_name)))
    }
}

#[async_trait]
impl Module for ToolCollector {
    fn wire(&mut self, deps: &mut Dependencies) -> Result<()> {
        self.providers = deps.take_list("tool_providers");
        Ok(())
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            "list_tools" => Ok(serde_json::to_value(self.list_tools().await?)?),
            "execute_tool" => {
                let tool_name: String = arg(&args, "tool_name")?;
                let parameters: Value = opt_arg(&args, "parameters")?.unwrap_or_else(|| json!({}));
                Ok(serde_json::to_value(self.execute_tool(&tool_name, &parameters).await?)?)
            }
            _ => Err(Error::unknown_method(COLLECTOR_TYPE, method)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StaticTool {
    #[serde(flatten)]
    tool: Tool,
    /// Returned verbatim by every execution.
    #[serde(default)]
    result: Value,
}

/// Tool provider with canned results, configured inline:
///
/// ```yaml
/// config:
///   tools:
///     - name: clock
///       description: Current time
///       result: "12:00"
/// ```
pub struct StaticTools {
    tools: Vec<StaticTool>,
}

impl StaticTools {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        let tools: Vec<StaticTool> = match settings.get("tools") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::Validation(format!("invalid 'tools': {}", e)))?,
            None => Vec::new(),
        };
        Ok(Self { tools })
    }
}

#[async_trait]
impl Module for StaticTools {
    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            "list_tools" => {
                let tools: Vec<&Tool> = self.tools.iter().map(|t| &t.tool).collect();
                Ok(serde_json::to_value(tools)?)
            }
            "execute_tool" => {
                let tool_name: String = arg(&args, "tool_name")?;
                let result = match self.tools.iter().find(|t| t.tool.name == tool_name) {
                    Some(tool) => ToolResult::ok(tool.result.clone()),
                    None => ToolResult::failed(format!("Could not find {}", tool_name)),
                };
                Ok(serde_json::to_value(result)?)
            }
            _ => Err(Error::unknown_method(STATIC_TYPE, method)),
        }
    }
}

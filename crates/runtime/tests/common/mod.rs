#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use wirecell_core::{
    Error, ExchangeConfig, GraphConfig, Manifest, ModuleConfig, Requirement, Result,
};
use wirecell_runtime::{arg, Dependencies, Module, ModuleProxy, ModuleTypes, ValueStream};

/// LLM stand-in that tags every completion with its configured name.
pub struct MockLlm {
    name: String,
}

#[async_trait]
impl Module for MockLlm {
    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            "generate" => {
                let prompt: String = arg(&args, "prompt")?;
                Ok(json!({ "content": format!("{}:{}", self.name, prompt) }))
            }
            "hang" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }
            "fail" => Err(Error::invocation(&self.name, method, "model unavailable")),
            _ => Err(Error::unknown_method(&self.name, method)),
        }
    }

    async fn call_stream(&self, method: &str, args: Value) -> Result<ValueStream> {
        if method != "generate" {
            return Err(Error::unknown_method(&self.name, method));
        }
        let prompt: String = arg(&args, "prompt")?;
        let words: Vec<Result<Value>> = prompt
            .split_whitespace()
            .map(|w| Ok(json!(w.to_string())))
            .collect();
        Ok(futures::stream::iter(words).boxed())
    }
}

/// Tool provider answering `list_tools` with its configured tool names.
pub struct MockTools {
    tools: Vec<String>,
}

#[async_trait]
impl Module for MockTools {
    async fn call(&self, method: &str, _args: Value) -> Result<Value> {
        match method {
            "list_tools" => Ok(json!(self.tools)),
            _ => Err(Error::unknown_method("tools", method)),
        }
    }
}

/// Entry module: asks the LLM, then lists tools of every provider in order.
#[derive(Default)]
pub struct Orchestrator {
    llm: Option<ModuleProxy>,
    tools: Vec<ModuleProxy>,
}

#[async_trait]
impl Module for Orchestrator {
    fn wire(&mut self, deps: &mut Dependencies) -> Result<()> {
        self.llm = Some(deps.take("llm")?);
        self.tools = deps.take_list("tools");
        Ok(())
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| Error::Other("llm not wired".to_string()))?;
        match method {
            "handle_text" => {
                let text: String = arg(&args, "text")?;
                let answer = llm.call("generate", json!({ "prompt": text })).await?;
                let mut tools = Vec::new();
                for provider in &self.tools {
                    let listed = provider.call("list_tools", json!({})).await?;
                    tools.extend(serde_json::from_value::<Vec<String>>(listed)?);
                }
                Ok(json!({ "answer": answer["content"], "tools": tools }))
            }
            "hang" | "fail" => llm.call(method, json!({})).await,
            _ => Err(Error::unknown_method("orchestrator", method)),
        }
    }

    async fn call_stream(&self, method: &str, args: Value) -> Result<ValueStream> {
        let llm = self
            .llm
            .as_ref()
            .ok_or_else(|| Error::Other("llm not wired".to_string()))?;
        match method {
            "handle_text" => {
                let text: String = arg(&args, "text")?;
                llm.call_stream("generate", json!({ "prompt": text })).await
            }
            _ => Err(Error::unknown_method("orchestrator", method)),
        }
    }
}

pub fn types() -> ModuleTypes {
    let mut types = ModuleTypes::new();
    types.register_fn("MockLLM", Manifest::new().provides("LLMProtocol"), |settings| {
        let name = settings
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("llm")
            .to_string();
        Ok(Box::new(MockLlm { name }))
    });
    types.register_fn(
        "MockTools",
        Manifest::new().provides("ToolProviderProtocol"),
        |settings| {
            let tools = settings
                .get("tools")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            Ok(Box::new(MockTools { tools }))
        },
    );
    types.register_fn(
        "Orchestrator",
        Manifest::new()
            .provides("TextMessageHandlerProtocol")
            .requires(Requirement::one("llm", "LLMProtocol"))
            .requires(Requirement::many("tools", "ToolProviderProtocol").optional()),
        |_| Ok(Box::new(Orchestrator::default())),
    );
    types
}

pub fn llm(id: &str) -> ModuleConfig {
    ModuleConfig::new(id, "MockLLM").with_setting("name", json!(id))
}

pub fn tools(id: &str, names: &[&str]) -> ModuleConfig {
    ModuleConfig::new(id, "MockTools").with_setting("tools", json!(names))
}

pub fn orchestrator() -> ModuleConfig {
    ModuleConfig::new("orchestrator", "Orchestrator")
}

/// `orchestrator` wired to one LLM and two tool providers.
pub fn standard_graph(agent_id: &str) -> GraphConfig {
    GraphConfig::new(agent_id)
        .with_module(orchestrator())
        .with_module(llm("llm"))
        .with_module(tools("search", &["web_search"]))
        .with_module(tools("files", &["read_file", "write_file"]))
}

pub fn rule(module: &str, protocol: &str, provider: &str) -> ExchangeConfig {
    ExchangeConfig::new(module, protocol, provider)
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use wirecell_core::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl LlmMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: LlmRole::System,
            content: content.to_string(),
            name: None,
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: LlmRole::User,
            content: content.to_string(),
            name: None,
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.to_string(),
            name: None,
        }
    }
}

/// Common request options; vendor-specific knobs ride along untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmOptions {
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    #[serde(default = "default_top_p")]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub functions: Option<Vec<Tool>>,
    #[serde(default)]
    pub vendor_specific: serde_json::Map<String, Value>,
}

fn default_temperature() -> Option<f64> {
    Some(1.0)
}

fn default_top_p() -> Option<f64> {
    Some(1.0)
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: None,
            stop_sequences: None,
            functions: None,
            vendor_specific: serde_json::Map::new(),
        }
    }
}

impl LlmOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Validation(
                    "temperature must be between 0 and 2".to_string(),
                ));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::Validation("top_p must be between 0 and 1".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmFunctionCall {
    pub name: String,
    pub arguments: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<LlmFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
    #[serde(default)]
    pub vendor_specific: serde_json::Map<String, Value>,
}

impl LlmResponse {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            function_call: None,
            usage: None,
            vendor_specific: serde_json::Map::new(),
        }
    }
}

/// Tool description; `parameters` is a JSON schema object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
}

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

//! Capability names and typed clients for them.
//!
//! Each client trait is implemented for [`ModuleProxy`], so a module holding a
//! proxy can call its provider with real types instead of raw JSON. Every
//! method forwards to the provider method of the same name.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use wirecell_core::{FileAttachment, Response, Result};
use wirecell_runtime::{Module, ModuleProxy};

use crate::models::{LlmMessage, LlmOptions, LlmResponse, Tool, ToolResult};

pub const TEXT_MESSAGE_HANDLER: &str = "TextMessageHandlerProtocol";
pub const IMAGE_MESSAGE_HANDLER: &str = "ImageMessageHandlerProtocol";
pub const AUDIO_MESSAGE_HANDLER: &str = "AudioMessageHandlerProtocol";
pub const VIDEO_MESSAGE_HANDLER: &str = "VideoMessageHandlerProtocol";
pub const RESPONSE: &str = "ResponseProtocol";
pub const LLM: &str = "LLMProtocol";
pub const TOOL_PROVIDER: &str = "ToolProviderProtocol";

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
pub trait TextMessageHandler: Send + Sync {
    async fn handle_text(&self, text: &str) -> Result<()>;
}

#[async_trait]
impl TextMessageHandler for ModuleProxy {
    async fn handle_text(&self, text: &str) -> Result<()> {
        self.call("handle_text", json!({ "text": text })).await?;
        Ok(())
    }
}

#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn respond_text(&self, response: &str) -> Result<()>;
    async fn respond(&self, response: &Response) -> Result<()>;
    async fn respond_attachment(&self, attachment: &FileAttachment) -> Result<()>;
}

#[async_trait]
impl ResponseSink for ModuleProxy {
    async fn respond_text(&self, response: &str) -> Result<()> {
        self.call("respond_text", json!({ "response": response })).await?;
        Ok(())
    }

    async fn respond(&self, response: &Response) -> Result<()> {
        self.call("respond", json!({ "response": response })).await?;
        Ok(())
    }

    async fn respond_attachment(&self, attachment: &FileAttachment) -> Result<()> {
        let method = match attachment.file_type {
            wirecell_core::FileType::Image => "respond_image",
            wirecell_core::FileType::Audio => "respond_audio",
            wirecell_core::FileType::File => "respond_file",
        };
        self.call(method, json!({ "content": attachment.content })).await?;
        Ok(())
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        options: Option<&LlmOptions>,
    ) -> Result<LlmResponse>;

    /// Text deltas of one completion.
    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        options: Option<&LlmOptions>,
    ) -> Result<BoxStream<'static, Result<String>>>;
}

#[async_trait]
impl LlmClient for ModuleProxy {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        options: Option<&LlmOptions>,
    ) -> Result<LlmResponse> {
        let value = self
            .call("generate", json!({ "messages": messages, "options": options }))
            .await?;
        decode(value)
    }

    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        options: Option<&LlmOptions>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let stream = self
            .call_stream("generate_stream", json!({ "messages": messages, "options": options }))
            .await?;
        Ok(stream.map(|item| item.and_then(decode::<String>)).boxed())
    }
}

#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<Tool>>;
    async fn execute_tool(&self, tool_name: &str, parameters: &Value) -> Result<ToolResult>;
}

#[async_trait]
impl ToolProvider for ModuleProxy {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        decode(self.call("list_tools", json!({})).await?)
    }

    async fn execute_tool(&self, tool_name: &str, parameters: &Value) -> Result<ToolResult> {
        let value = self
            .call(
                "execute_tool",
                json!({ "tool_name": tool_name, "parameters": parameters }),
            )
            .await?;
        decode(value)
    }
}

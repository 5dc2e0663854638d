use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::{json, Value};

use wirecell_core::{Error, Manifest, ModuleSettings, Requirement, Result};
use wirecell_runtime::{arg, opt_arg, Dependencies, Module, ModuleProxy, ValueStream};

use crate::models::{LlmMessage, LlmOptions, LlmResponse, LlmUsage};
use crate::protocols::{LlmClient, ResponseSink, LLM, RESPONSE, TEXT_MESSAGE_HANDLER};

pub const MOCK_TYPE: &str = "MockLLM";
pub const CHAT_TYPE: &str = "LlmChat";

pub fn mock_manifest() -> Manifest {
    Manifest::new().provides(LLM)
}

pub fn chat_manifest() -> Manifest {
    Manifest::new()
        .provides(TEXT_MESSAGE_HANDLER)
        .requires(Requirement::one("llm", LLM))
        .requires(Requirement::one("response", RESPONSE))
}

fn default_chunk_size() -> usize {
    8
}

/// Scripted LLM: answers with the configured responses in turn.
pub struct MockLlm {
    responses: Vec<String>,
    chunk_size: usize,
    next: AtomicUsize,
}

impl MockLlm {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            chunk_size: default_chunk_size(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        let responses: Vec<String> = match settings.get("responses") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::Validation(format!("invalid 'responses': {}", e)))?,
            None => Vec::new(),
        };
        if responses.is_empty() {
            return Err(Error::Validation(
                "'responses' must list at least one response".to_string(),
            ));
        }
        let chunk_size = match settings.get("chunk_size").and_then(|v| v.as_u64()) {
            Some(0) => return Err(Error::Validation("'chunk_size' must be positive".to_string())),
            Some(n) => n as usize,
            None => default_chunk_size(),
        };
        Ok(Self {
            chunk_size,
            ..Self::new(responses)
        })
    }

    fn complete(&self, args: &Value) -> Result<LlmResponse> {
        let messages: Vec<LlmMessage> = arg(args, "messages")?;
        if messages.is_empty() {
            return Err(Error::Validation("at least one message is required".to_string()));
        }
        if let Some(options) = opt_arg::<LlmOptions>(args, "options")? {
            options.validate()?;
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        let content = self.responses[index].clone();
        let prompt_tokens = messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u32)
            .sum::<u32>();
        let completion_tokens = content.split_whitespace().count() as u32;
        Ok(LlmResponse {
            usage: Some(LlmUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
            ..LlmResponse::text(&content)
        })
    }
}

#[async_trait]
impl Module for MockLlm {
    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            "generate" => Ok(serde_json::to_value(self.complete(&args)?)?),
            _ => Err(Error::unknown_method(MOCK_TYPE, method)),
        }
    }

    async fn call_stream(&self, method: &str, args: Value) -> Result<ValueStream> {
        match method {
            "generate_stream" => {
                let content = self.complete(&args)?.content;
                let chars: Vec<char> = content.chars().collect();
                let chunks: Vec<Result<Value>> = chars
                    .chunks(self.chunk_size)
                    .map(|c| Ok(json!(c.iter().collect::<String>())))
                    .collect();
                Ok(futures::stream::iter(chunks).boxed())
            }
            _ => self.call(method, args).await.map(|value| {
                futures::stream::once(async move { Ok(value) }).boxed()
            }),
        }
    }
}

/// Conversational text handler: keeps the dialogue, asks the LLM, and sends
/// the answer to the response sink.
pub struct LlmChat {
    system_prompt: Option<String>,
    history: Mutex<Vec<LlmMessage>>,
    llm: Option<ModuleProxy>,
    response: Option<ModuleProxy>,
}

impl LlmChat {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        let system_prompt = settings
            .get("system_prompt")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(Self {
            system_prompt,
            history: Mutex::new(Vec::new()),
            llm: None,
            response: None,
        })
    }

    fn conversation(&self, text: &str) -> Vec<LlmMessage> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = &self.system_prompt {
            messages.push(LlmMessage::system(prompt));
        }
        messages.extend(history.iter().cloned());
        messages.push(LlmMessage::user(text));
        messages
    }
}

#[async_trait]
impl Module for LlmChat {
    fn wire(&mut self, deps: &mut Dependencies) -> Result<()> {
        self.llm = Some(deps.take("llm")?);
        self.response = Some(deps.take("response")?);
        Ok(())
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        if method != "handle_text" {
            return Err(Error::unknown_method(CHAT_TYPE, method));
        }
        let (Some(llm), Some(response)) = (&self.llm, &self.response) else {
            return Err(Error::Other("chat is not wired".to_string()));
        };

        let text: String = arg(&args, "text")?;
        let answer = llm.generate(&self.conversation(&text), None).await?;
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.push(LlmMessage::user(&text));
            history.push(LlmMessage::assistant(&answer.content));
        }
        response.respond_text(&answer.content).await?;
        Ok(Value::Null)
    }
}

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use wirecell_core::{Error, FileAttachment, FileType, Manifest, Response, Result};
use wirecell_runtime::{arg, Module};

use crate::protocols::RESPONSE;

pub const TYPE_NAME: &str = "ResponseHandler";

pub fn manifest() -> Manifest {
    Manifest::new().provides(RESPONSE)
}

/// Collects everything the agent sends back until it is drained with
/// `get_response`.
#[derive(Default)]
pub struct ResponseHandler {
    pending: Mutex<Response>,
}

impl ResponseHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, response: Response) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .merge(response);
    }

    fn attach(&self, file_type: FileType, args: &Value) -> Result<()> {
        let content: String = arg(args, "content")?;
        self.push(Response {
            text: None,
            attachments: vec![FileAttachment { content, file_type }],
        });
        Ok(())
    }

    /// Take the collected response, leaving an empty one behind.
    pub fn take(&self) -> Response {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl Module for ResponseHandler {
    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            "respond_text" => {
                let text: String = arg(&args, "response")?;
                debug!(chars = text.len(), "Response text collected");
                self.push(Response::text(&text));
            }
            "respond" => self.push(arg(&args, "response")?),
            "respond_image" => self.attach(FileType::Image, &args)?,
            "respond_audio" => self.attach(FileType::Audio, &args)?,
            "respond_file" => self.attach(FileType::File, &args)?,
            "get_response" => return Ok(serde_json::to_value(self.take())?),
            _ => return Err(Error::unknown_method(TYPE_NAME, method)),
        }
        Ok(Value::Null)
    }
}

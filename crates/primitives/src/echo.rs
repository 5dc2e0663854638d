use async_trait::async_trait;
use serde_json::Value;

use wirecell_core::{Error, Manifest, ModuleSettings, Requirement, Result};
use wirecell_runtime::{arg, Dependencies, Module, ModuleProxy};

use crate::protocols::{ResponseSink, RESPONSE, TEXT_MESSAGE_HANDLER};

pub const TYPE_NAME: &str = "Echo";

pub fn manifest() -> Manifest {
    Manifest::new()
        .provides(TEXT_MESSAGE_HANDLER)
        .requires(Requirement::one("response", RESPONSE))
}

/// Repeats every text message back through the response sink, prefixed.
pub struct Echo {
    prefix: String,
    response: Option<ModuleProxy>,
}

impl Echo {
    pub fn from_settings(settings: &ModuleSettings) -> Result<Self> {
        let prefix = match settings.get("prefix") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(prefix)) => prefix.clone(),
            Some(other) => {
                return Err(Error::Validation(format!(
                    "'prefix' must be a string, got {}",
                    other
                )))
            }
        };
        Ok(Self {
            prefix,
            response: None,
        })
    }
}

#[async_trait]
impl Module for Echo {
    fn wire(&mut self, deps: &mut Dependencies) -> Result<()> {
        self.response = Some(deps.take("response")?);
        Ok(())
    }

    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        match method {
            "handle_text" => {
                let text: String = arg(&args, "text")?;
                let response = self
                    .response
                    .as_ref()
                    .ok_or_else(|| Error::Other("echo has no response sink".to_string()))?;
                response.respond_text(&format!("{}{}", self.prefix, text)).await?;
                Ok(Value::Null)
            }
            _ => Err(Error::unknown_method(TYPE_NAME, method)),
        }
    }
}

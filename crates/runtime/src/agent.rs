use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use wirecell_core::{Bindings, Error, Response, Result, RESPONSE_ID};

use crate::bus::{EventBus, EventListener, SubscriptionId};
use crate::module::{Module, ValueStream};
use crate::proxy::{ModuleProxy, TargetCell};

/// A fully wired module graph, reachable through its entry module.
pub struct Agent {
    id: String,
    entry: ModuleProxy,
    /// External handles to every declared module.
    modules: BTreeMap<String, ModuleProxy>,
    /// Owns every instance, overrides included. Proxies held by modules are weak.
    cells: Vec<TargetCell>,
    bindings: Bindings,
    bus: Arc<EventBus>,
    subscriptions: std::sync::Mutex<Vec<SubscriptionId>>,
}

impl Agent {
    pub(crate) fn new(
        id: &str,
        entry: ModuleProxy,
        modules: BTreeMap<String, ModuleProxy>,
        cells: Vec<TargetCell>,
        bindings: Bindings,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            id: id.to_string(),
            entry,
            modules,
            cells,
            bindings,
            bus,
            subscriptions: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn invoke_entry(&self, method: &str, payload: Value) -> Result<Value> {
        debug!(agent_id = %self.id, method = %method, "Invoking entry module");
        self.entry.call(method, payload).await
    }

    pub async fn invoke_entry_stream(&self, method: &str, payload: Value) -> Result<ValueStream> {
        self.entry.call_stream(method, payload).await
    }

    /// Like [`Agent::invoke_entry`], abandoning the whole call chain once
    /// `token` is cancelled.
    pub async fn invoke_entry_cancellable(
        &self,
        method: &str,
        payload: Value,
        token: CancellationToken,
    ) -> Result<Value> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(agent_id = %self.id, method = %method, "Entry call cancelled");
                Err(Error::Cancelled)
            }
            outcome = self.entry.call(method, payload) => outcome,
        }
    }

    /// Send a text message to the entry module and collect what it answered
    /// through `__response__`.
    pub async fn handle_text(&self, text: &str) -> Result<Response> {
        self.handle_text_cancellable(text, CancellationToken::new()).await
    }

    /// [`Agent::handle_text`] that can be abandoned. Whatever a failed or
    /// cancelled request already sent to `__response__` is discarded, so it
    /// never leaks into the next answer.
    pub async fn handle_text_cancellable(
        &self,
        text: &str,
        token: CancellationToken,
    ) -> Result<Response> {
        let outcome = self
            .invoke_entry_cancellable("handle_text", json!({ "text": text }), token)
            .await;
        let response = self.take_response().await;
        match outcome {
            Ok(_) => response,
            Err(e) => {
                if let Ok(partial) = response {
                    if !partial.is_empty() {
                        debug!(agent_id = %self.id, "Discarded partial response");
                    }
                }
                Err(e)
            }
        }
    }

    async fn take_response(&self) -> Result<Response> {
        let value = self.response_handler()?.call("get_response", json!({})).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn response_handler(&self) -> Result<&ModuleProxy> {
        self.modules.get(RESPONSE_ID).ok_or_else(|| {
            Error::NotFound(format!("agent '{}' has no {} module", self.id, RESPONSE_ID))
        })
    }

    /// Listen to this agent's events only.
    pub fn subscribe(&self, prefix: &str, listener: Arc<dyn EventListener>) -> SubscriptionId {
        let id = self.bus.subscribe_agent(prefix, Some(self.id.as_str()), listener);
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| *s != id);
        self.bus.unsubscribe(id)
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// External handle to a declared module; calls through it are observed
    /// with caller `__external__`.
    pub fn module(&self, id: &str) -> Option<&ModuleProxy> {
        self.modules.get(id)
    }

    pub fn module_ids(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(|k| k.as_str())
    }

    pub fn entry_module_id(&self) -> &str {
        self.entry.module_id()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        let subscriptions = self.subscriptions.get_mut().unwrap_or_else(|e| e.into_inner());
        for id in subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent '{}' with modules:", self.id)?;
        for id in self.modules.keys() {
            write!(f, "\n  - {}", id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("entry", &self.entry.module_id())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("instances", &self.cells.len())
            .finish_non_exhaustive()
    }
}

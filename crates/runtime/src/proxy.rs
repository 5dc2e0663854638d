//! Call interception.
//!
//! A [`ModuleProxy`] is what a consumer holds in place of its provider. Every
//! call through it publishes a `call` event, then exactly one `result` or
//! `exception` event (streaming calls publish `chunk` events in between).
//! Outcomes pass through untouched: the proxy observes, it never rewrites.

use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::trace;
use uuid::Uuid;

use wirecell_core::{Error, Event, EventError, EventType, Result};

use crate::bus::EventBus;
use crate::module::{Module, ValueStream};

/// Shared slot holding one module instance. Filled once, after wiring.
pub(crate) type TargetCell = Arc<OnceLock<Arc<dyn Module>>>;

/// Handles injected into modules are weak so wiring cycles never keep a
/// graph alive; the agent owns the cells.
#[derive(Clone)]
enum Target {
    Owned(TargetCell),
    Injected(Weak<OnceLock<Arc<dyn Module>>>),
}

/// Intercepting handle to one module, as seen by one caller.
///
/// Each injection edge gets its own handle so events carry the caller's id;
/// all handles to a module share the same instance.
#[derive(Clone)]
pub struct ModuleProxy {
    target: Target,
    module_id: String,
    module_type: String,
    caller_id: String,
    agent_id: String,
    bus: Arc<EventBus>,
}

impl ModuleProxy {
    pub(crate) fn unbound(
        target: TargetCell,
        agent_id: &str,
        module_id: &str,
        module_type: &str,
        caller_id: &str,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            target: Target::Owned(target),
            module_id: module_id.to_string(),
            module_type: module_type.to_string(),
            caller_id: caller_id.to_string(),
            agent_id: agent_id.to_string(),
            bus,
        }
    }

    /// Handle given to a consuming module. It does not keep the target alive.
    pub(crate) fn injected(
        target: &TargetCell,
        agent_id: &str,
        module_id: &str,
        module_type: &str,
        caller_id: &str,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            target: Target::Injected(Arc::downgrade(target)),
            ..Self::unbound(target.clone(), agent_id, module_id, module_type, caller_id, bus)
        }
    }

    /// Proxy around an already built module, outside of any graph.
    pub fn bound(
        agent_id: &str,
        module_id: &str,
        module_type: &str,
        instance: Arc<dyn Module>,
        bus: Arc<EventBus>,
    ) -> Self {
        let cell: TargetCell = Arc::new(OnceLock::new());
        let _ = cell.set(instance);
        Self::unbound(cell, agent_id, module_id, module_type, wirecell_core::EXTERNAL_CALLER, bus)
    }

    /// Same target, different caller.
    pub fn for_caller(&self, caller_id: &str) -> Self {
        Self {
            caller_id: caller_id.to_string(),
            ..self.clone()
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn module_type(&self) -> &str {
        &self.module_type
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_bound(&self) -> bool {
        match &self.target {
            Target::Owned(cell) => cell.get().is_some(),
            Target::Injected(weak) => weak.upgrade().is_some_and(|cell| cell.get().is_some()),
        }
    }

    fn target(&self) -> Result<Arc<dyn Module>> {
        let cell = match &self.target {
            Target::Owned(cell) => cell.clone(),
            Target::Injected(weak) => weak.upgrade().ok_or_else(|| {
                Error::Other(format!(
                    "module '{}' was called after its agent was dropped",
                    self.module_id
                ))
            })?,
        };
        cell.get().cloned().ok_or_else(|| {
            Error::Other(format!(
                "module '{}' was called before its graph finished wiring",
                self.module_id
            ))
        })
    }
}

impl std::fmt::Debug for ModuleProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleProxy")
            .field("module_id", &self.module_id)
            .field("module_type", &self.module_type)
            .field("caller_id", &self.caller_id)
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

#[async_trait]
impl Module for ModuleProxy {
    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        let guard = CallGuard::start(self, method, &args);
        let target = match self.target() {
            Ok(target) => target,
            Err(e) => {
                guard.fail(&e);
                return Err(e);
            }
        };

        let outcome = target.call(method, args).await;
        match &outcome {
            Ok(value) => guard.succeed(value.clone()),
            Err(e) => guard.fail(e),
        }
        outcome
    }

    async fn call_stream(&self, method: &str, args: Value) -> Result<ValueStream> {
        let guard = CallGuard::start(self, method, &args);
        let target = match self.target() {
            Ok(target) => target,
            Err(e) => {
                guard.fail(&e);
                return Err(e);
            }
        };

        match target.call_stream(method, args).await {
            Ok(inner) => Ok(InterceptedStream {
                inner,
                guard: Some(guard),
                chunks: 0,
            }
            .boxed()),
            Err(e) => {
                guard.fail(&e);
                Err(e)
            }
        }
    }
}

/// Tracks one in-flight call. Dropping it before the call finished means the
/// caller abandoned the call, which is reported as a cancelled exception.
struct CallGuard {
    bus: Arc<EventBus>,
    agent_id: String,
    caller_id: String,
    module_id: String,
    module_type: String,
    method: String,
    call_id: Uuid,
    started: Instant,
    /// Listeners existed when the call began; otherwise nothing is published.
    observed: bool,
    finished: bool,
}

impl CallGuard {
    fn start(proxy: &ModuleProxy, method: &str, args: &Value) -> Self {
        let guard = Self {
            bus: proxy.bus.clone(),
            agent_id: proxy.agent_id.clone(),
            caller_id: proxy.caller_id.clone(),
            module_id: proxy.module_id.clone(),
            module_type: proxy.module_type.clone(),
            method: method.to_string(),
            call_id: Uuid::new_v4(),
            started: Instant::now(),
            observed: proxy.bus.has_listeners_for(&proxy.agent_id, &proxy.module_id),
            finished: false,
        };
        trace!(
            call_id = %guard.call_id,
            caller_id = %guard.caller_id,
            module_id = %guard.module_id,
            method = %method,
            "Intercepted call"
        );
        guard.emit(EventType::Call, Some(args.clone()), None, None);
        guard
    }

    fn emit(
        &self,
        event_type: EventType,
        arguments: Option<Value>,
        result: Option<Value>,
        error: Option<EventError>,
    ) {
        if !self.observed {
            return;
        }
        let duration_ms = event_type
            .is_terminal()
            .then(|| self.started.elapsed().as_millis() as u64);
        let event = Event {
            agent_id: self.agent_id.clone(),
            event_name: Event::event_name_for(&self.module_type, &self.method, event_type),
            event_type,
            call_id: self.call_id,
            caller_id: self.caller_id.clone(),
            module_id: self.module_id.clone(),
            module_type: self.module_type.clone(),
            method: self.method.clone(),
            time: Utc::now(),
            arguments,
            result,
            error,
            duration_ms,
        };
        self.bus.publish(&event);
    }

    fn chunk(&self, value: &Value) {
        self.emit(EventType::Chunk, None, Some(value.clone()), None);
    }

    fn succeed(mut self, value: Value) {
        self.finished = true;
        self.emit(EventType::Result, None, Some(value), None);
    }

    fn fail(mut self, error: &Error) {
        self.finished = true;
        self.emit(
            EventType::Exception,
            None,
            None,
            Some(EventError {
                message: error.to_string(),
                cancelled: error.is_cancelled(),
            }),
        );
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        trace!(call_id = %self.call_id, module_id = %self.module_id, "Call abandoned");
        self.emit(
            EventType::Exception,
            None,
            None,
            Some(EventError {
                message: Error::Cancelled.to_string(),
                cancelled: true,
            }),
        );
    }
}

/// Publishes a `chunk` event per item. The first error, or the end of the
/// stream, closes the call.
struct InterceptedStream {
    inner: ValueStream,
    guard: Option<CallGuard>,
    chunks: u64,
}

impl Stream for InterceptedStream {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.guard.is_none() {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(value))) => {
                this.chunks += 1;
                if let Some(guard) = &this.guard {
                    guard.chunk(&value);
                }
                Poll::Ready(Some(Ok(value)))
            }
            Poll::Ready(Some(Err(e))) => {
                if let Some(guard) = this.guard.take() {
                    guard.fail(&e);
                }
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if let Some(guard) = this.guard.take() {
                    guard.succeed(json!({ "chunks": this.chunks }));
                }
                Poll::Ready(None)
            }
        }
    }
}

//! Synchronous event fan-out.
//!
//! Events are delivered to every matching listener, in registration order,
//! before the publishing call continues. A listener that errors or panics is
//! logged and skipped; the call being observed never sees the failure.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use wirecell_core::{Error, Event, Result};

/// Observer of intercepted calls.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event) -> Result<()>;
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<()> {
        self(event);
        Ok(())
    }
}

pub type SubscriptionId = u64;

/// Record of a listener that failed while handling an event.
#[derive(Debug, Clone)]
pub struct ListenerFault {
    pub subscription: SubscriptionId,
    pub event_name: String,
    pub call_id: Uuid,
    pub message: String,
}

struct Subscription {
    id: SubscriptionId,
    prefix: String,
    agent_id: Option<String>,
    listener: Arc<dyn EventListener>,
}

impl Subscription {
    fn matches(&self, event: &Event) -> bool {
        event.module_id.starts_with(&self.prefix)
            && self
                .agent_id
                .as_deref()
                .map_or(true, |agent| agent == event.agent_id)
    }
}

#[derive(Default)]
pub struct EventBus {
    /// Replaced wholesale on (un)subscribe so publishing never holds the lock
    /// while listeners run.
    subscriptions: RwLock<Arc<Vec<Arc<Subscription>>>>,
    next_id: AtomicU64,
    faults: AtomicU64,
    fault_tx: Mutex<Option<mpsc::UnboundedSender<ListenerFault>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver events whose `module_id` starts with `prefix`. An empty
    /// prefix matches everything.
    pub fn subscribe(&self, prefix: &str, listener: Arc<dyn EventListener>) -> SubscriptionId {
        self.subscribe_agent(prefix, None, listener)
    }

    /// Like [`EventBus::subscribe`], additionally restricted to one agent.
    pub fn subscribe_agent(
        &self,
        prefix: &str,
        agent_id: Option<&str>,
        listener: Arc<dyn EventListener>,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let subscription = Arc::new(Subscription {
            id,
            prefix: prefix.to_string(),
            agent_id: agent_id.map(|a| a.to_string()),
            listener,
        });

        let mut guard = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(subscription);
        *guard = Arc::new(next);

        debug!(subscription = id, prefix = %prefix, agent_id = ?agent_id, "Event listener subscribed");
        id
    }

    /// Bounded channel subscription for consumers that must not block
    /// publishers. Events that do not fit are dropped and counted as faults.
    pub fn subscribe_channel(
        &self,
        prefix: &str,
        capacity: usize,
    ) -> (SubscriptionId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.subscribe(prefix, Arc::new(ChannelListener { tx }));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        if !guard.iter().any(|s| s.id == id) {
            return false;
        }
        let next: Vec<Arc<Subscription>> =
            guard.iter().filter(|s| s.id != id).cloned().collect();
        *guard = Arc::new(next);
        debug!(subscription = id, "Event listener unsubscribed");
        true
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Subscription>>> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn has_listeners(&self) -> bool {
        !self.snapshot().is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether any listener would receive events for `module_id` of `agent_id`.
    pub fn has_listeners_for(&self, agent_id: &str, module_id: &str) -> bool {
        self.snapshot().iter().any(|s| {
            module_id.starts_with(&s.prefix)
                && s.agent_id.as_deref().map_or(true, |a| a == agent_id)
        })
    }

    pub fn publish(&self, event: &Event) {
        for subscription in self.snapshot().iter() {
            if !subscription.matches(event) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| subscription.listener.on_event(event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            self.report_fault(subscription.id, event, message);
        }
    }

    fn report_fault(&self, subscription: SubscriptionId, event: &Event, message: String) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        warn!(
            subscription,
            event_name = %event.event_name,
            call_id = %event.call_id,
            error = %message,
            "Event listener failed"
        );
        let mut guard = self.fault_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            let fault = ListenerFault {
                subscription,
                event_name: event.event_name.clone(),
                call_id: event.call_id,
                message,
            };
            if tx.send(fault).is_err() {
                *guard = None;
            }
        }
    }

    /// Receive a copy of every listener failure from now on. Replaces any
    /// previously opened fault channel.
    pub fn fault_channel(&self) -> mpsc::UnboundedReceiver<ListenerFault> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.fault_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("listener panicked: {}", s)
    } else {
        "listener panicked".to_string()
    }
}

struct ChannelListener {
    tx: mpsc::Sender<Event>,
}

impl EventListener for ChannelListener {
    fn on_event(&self, event: &Event) -> Result<()> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(Error::Other("event channel full, event dropped".to_string()))
            }
            // Receiver gone; nothing left to deliver to.
            Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
        }
    }
}

/// Listener that keeps every event it sees, for tests and traces.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Events of one call, in publication order.
    pub fn by_call(&self, call_id: Uuid) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.call_id == call_id)
            .collect()
    }

    pub fn for_module(&self, module_id: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.module_id == module_id)
            .collect()
    }
}

impl EventListener for EventRecorder {
    fn on_event(&self, event: &Event) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

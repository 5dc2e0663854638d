use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle phase of an intercepted call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The call was entered.
    Call,
    /// An intermediate item of a streaming call.
    Chunk,
    /// The call returned successfully.
    Result,
    /// The call failed or was cancelled.
    Exception,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Call => "call",
            EventType::Chunk => "chunk",
            EventType::Result => "result",
            EventType::Exception => "exception",
        }
    }

    /// `Result` and `Exception` close a call; every call gets exactly one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Result | EventType::Exception)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventError {
    pub message: String,
    #[serde(default)]
    pub cancelled: bool,
}

/// Immutable record of one phase of one call crossing a module boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub agent_id: String,
    /// `{module_type}.{method}.{event_type}`
    pub event_name: String,
    pub event_type: EventType,
    pub call_id: Uuid,
    /// Module whose proxy made the call, or `__external__`.
    pub caller_id: String,
    pub module_id: String,
    pub module_type: String,
    pub method: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EventError>,
    /// Wall-clock time since the call event, set on terminal events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Event {
    pub fn event_name_for(module_type: &str, method: &str, event_type: EventType) -> String {
        format!("{}.{}.{}", module_type, method, event_type.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.cancelled)
    }
}

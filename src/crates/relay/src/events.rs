//! Stream events carried over the push channel
//!
//! Every event is a `(type, payload)` pair. On the wire the type becomes the
//! SSE `event:` field and the payload the JSON `data:` field.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::{RelayError, Result};

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Work has started
    Thinking,
    /// Intermediate progress (attempt counters, partial status)
    Progress,
    /// Final result; terminal
    Complete,
    /// Final failure; terminal
    Error,
}

impl EventKind {
    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Thinking => "thinking",
            EventKind::Progress => "progress",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
        }
    }

    /// `complete` and `error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Complete | EventKind::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "thinking" => Ok(EventKind::Thinking),
            "progress" => Ok(EventKind::Progress),
            "complete" => Ok(EventKind::Complete),
            "error" => Ok(EventKind::Error),
            other => Err(RelayError::Decode(format!("unknown event type '{}'", other))),
        }
    }
}

/// A single event on a push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
}

impl StreamEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    pub fn thinking(message: impl Into<String>) -> Self {
        Self::new(EventKind::Thinking, json!({ "message": message.into() }))
    }

    pub fn progress(attempt: u32, max_attempts: u32) -> Self {
        Self::new(
            EventKind::Progress,
            json!({ "attempt": attempt, "max_attempts": max_attempts }),
        )
    }

    pub fn complete(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            EventKind::Complete,
            json!({ "content": content.into(), "model": model.into() }),
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, json!({ "message": message.into() }))
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// `payload.content` of a `complete` event
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(Value::as_str)
    }

    /// Human-readable message of an event, falling back to the raw payload.
    pub fn message(&self) -> String {
        match self.payload.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => self.payload.to_string(),
        }
    }

    /// Decode an event from its SSE `event:` and `data:` fields.
    ///
    /// A missing type, an unknown type or a non-JSON payload is a decode
    /// error. An empty data field decodes to a `null` payload.
    pub fn decode(event_type: Option<&str>, data: &str) -> Result<Self> {
        let kind: EventKind = event_type
            .ok_or_else(|| RelayError::Decode("event without a type".to_string()))?
            .parse()?;

        let payload = if data.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(data)
                .map_err(|e| RelayError::Decode(format!("invalid {} payload: {}", kind, e)))?
        };

        Ok(Self { kind, payload })
    }

    /// Encode as an SSE record: `event: <type>\ndata: <json>\n\n`
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.kind, self.payload)
    }
}

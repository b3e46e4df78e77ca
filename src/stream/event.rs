//! Events emitted by the agent server

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::decoder::DecodeError;

/// Placeholder the server writes when a tool call or response has no id
const MISSING_ID: &str = "unknown";

/// Discriminant of a [`StreamingEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Content,
    ToolCall,
    ToolResponse,
    ToolResult,
    Thinking,
    Error,
    Complete,
    Metadata,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Start,
        EventKind::Content,
        EventKind::ToolCall,
        EventKind::ToolResponse,
        EventKind::ToolResult,
        EventKind::Thinking,
        EventKind::Error,
        EventKind::Complete,
        EventKind::Metadata,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Content => "content",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResponse => "tool_response",
            EventKind::ToolResult => "tool_result",
            EventKind::Thinking => "thinking",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
            EventKind::Metadata => "metadata",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownKind(s.to_string()))
    }
}

/// One decoded frame of the agent stream. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Seconds since epoch as reported by the server
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Payload shape on the wire; every field except `type` is optional
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
}

impl StreamingEvent {
    pub fn new(kind: EventKind, content: impl Into<String>, timestamp: f64) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: Map::new(),
            timestamp,
            session_id: None,
            agent_id: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Decode one frame payload
    pub fn from_json(payload: &str) -> Result<Self, DecodeError> {
        let wire: WireEvent = serde_json::from_str(payload)?;
        let kind = wire.kind.parse()?;
        Ok(Self {
            kind,
            content: wire.content.unwrap_or_default(),
            metadata: wire.metadata.unwrap_or_default(),
            timestamp: wire.timestamp.unwrap_or_default(),
            session_id: wire.session_id,
            agent_id: wire.agent_id,
        })
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key).filter(|v| !v.is_null())
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.metadata_str("tool_name").filter(|name| !name.is_empty())
    }

    /// `metadata.tool_args`, or an empty map when absent or not an object
    pub fn tool_args(&self) -> Map<String, Value> {
        match self.metadata.get("tool_args") {
            Some(Value::Object(args)) => args.clone(),
            _ => Map::new(),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.metadata_str("call_id").filter(|id| is_real_id(id))
    }

    pub fn response_id(&self) -> Option<&str> {
        self.metadata_str("response_id").filter(|id| is_real_id(id))
    }

    /// `raw_response` when present, otherwise `tool_result`
    pub fn tool_result(&self) -> Option<&Value> {
        self.metadata_value("raw_response")
            .or_else(|| self.metadata_value("tool_result"))
    }

    pub fn error_type(&self) -> Option<&str> {
        self.metadata_str("error_type")
    }

    pub fn sub_agent_name(&self) -> Option<&str> {
        self.metadata_str("sub_agent_name")
    }

    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }

    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }
}

fn is_real_id(id: &str) -> bool {
    !id.is_empty() && id != MISSING_ID
}

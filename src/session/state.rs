//! Conversation state types

use crate::stream::StreamingEvent;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::correlator::ToolCorrelator;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Totals attached to an assistant message when its stream completes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSummary {
    /// Events recorded on the message, including the `complete` event itself
    pub event_count: usize,
    /// Tool executions started during the turn
    pub tool_count: usize,
    /// `total_events` as counted by the server
    pub upstream_events: Option<u64>,
    /// `duration_seconds` as measured by the server
    pub upstream_duration_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    /// Only grows while `streaming` is true
    pub content: String,
    pub streaming: bool,
    /// Every event of the turn in arrival order
    pub events: Vec<StreamingEvent>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<MessageSummary>,
}

impl ConversationMessage {
    pub fn user(id: impl Into<String>, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: text.into(),
            streaming: false,
            events: Vec::new(),
            created_at,
            summary: None,
        }
    }

    pub fn assistant(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: String::new(),
            streaming: true,
            events: Vec::new(),
            created_at,
            summary: None,
        }
    }
}

/// Lifecycle of one tool execution. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Error)
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_advance_to(self, next: ToolStatus) -> bool {
        !self.is_finished() && next > self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecution {
    /// Correlation id: the upstream `call_id`, or `<name>@<timestamp>`
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
    pub status: ToolStatus,
    pub started_at: f64,
    pub finished_at: Option<f64>,
    /// `finished_at - started_at`, clamped to zero. Both ends are on the
    /// server's clock, including executions failed by a cancel or a dropped
    /// connection.
    pub duration_ms: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Sub-agent that issued the call, if any
    pub sub_agent: Option<String>,
    /// The call/response events that produced this record
    pub events: Vec<StreamingEvent>,
}

impl ToolExecution {
    pub fn is_running(&self) -> bool {
        self.status == ToolStatus::Running
    }

    pub(crate) fn finish(&mut self, status: ToolStatus, at: f64) -> bool {
        if !self.status.can_advance_to(status) {
            return false;
        }
        self.status = status;
        self.finished_at = Some(at);
        self.duration_ms = Some(duration_ms(self.started_at, at));
        true
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped to >= 0
fn duration_ms(started_at: f64, finished_at: f64) -> u64 {
    ((finished_at - started_at) * 1000.0).max(0.0).round() as u64
}

/// Where the conversation is in its send cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    /// Request sent, no frame received yet
    Sending,
    /// At least one frame applied; the turn's assistant message exists
    Streaming,
}

/// Everything the UI renders for one conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationState {
    pub messages: Vec<ConversationMessage>,
    pub tools: ToolCorrelator,
    pub phase: SessionPhase,
    pub error: Option<String>,
    /// Index into `messages` of the current turn's assistant message
    #[serde(skip)]
    pub(crate) active: Option<usize>,
    /// Number of tool executions that existed when the current turn began
    #[serde(skip)]
    pub(crate) turn_tools_base: usize,
    /// Source of message ids; survives `clear`
    #[serde(skip)]
    pub(crate) next_message_seq: u64,
    /// Timestamp of the last applied frame
    #[serde(skip)]
    pub(crate) last_event_at: Option<f64>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request is in flight (sending or streaming)
    pub fn is_loading(&self) -> bool {
        self.phase != SessionPhase::Idle
    }

    /// The current turn's assistant message is still receiving content
    pub fn is_streaming(&self) -> bool {
        self.active_message().is_some_and(|m| m.streaming)
    }

    pub fn active_message(&self) -> Option<&ConversationMessage> {
        self.active.and_then(|i| self.messages.get(i))
    }

    pub(crate) fn active_message_mut(&mut self) -> Option<&mut ConversationMessage> {
        self.active.and_then(|i| self.messages.get_mut(i))
    }

    pub fn tool(&self, id: &str) -> Option<&ToolExecution> {
        self.tools.get(id)
    }

    pub(crate) fn next_message_id(&mut self) -> String {
        self.next_message_seq += 1;
        format!("msg-{}", self.next_message_seq)
    }
}

/// Server timestamps are float seconds; fall back to the epoch when out of range
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn timestamp_to_datetime(seconds: f64) -> DateTime<Utc> {
    let millis = (seconds * 1000.0).round();
    if millis.is_finite() {
        if let chrono::LocalResult::Single(at) = Utc.timestamp_millis_opt(millis as i64) {
            return at;
        }
    }
    DateTime::<Utc>::UNIX_EPOCH
}

//! Session state transitions
//!
//! All conversation mutation goes through [`transition`]. A rejected
//! transition leaves the state untouched, so callers can apply inputs under a
//! lock and publish the result without rollback.

use super::state::{
    timestamp_to_datetime, ConversationMessage, ConversationState, MessageSummary, SessionPhase,
};
use crate::stream::{EventKind, StreamingEvent};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Tool error recorded when the user stops a stream
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

const UPSTREAM_ERROR_FALLBACK: &str = "Agent reported an error";

/// Inputs that drive a conversation
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// User submitted text; opens a turn
    UserMessage { text: String, at: DateTime<Utc> },
    /// One decoded frame of the turn's stream
    Frame(StreamingEvent),
    /// Whole reply of a non-streaming request
    Reply { content: String, at: DateTime<Utc> },
    /// Connection failed or timed out
    TransportFailed { message: String, at: DateTime<Utc> },
    /// Body ended, by `[DONE]` or by closure
    StreamClosed,
    UserCancel { at: DateTime<Utc> },
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A response is already in flight for this conversation")]
    Busy,
    #[error("No request is in flight")]
    NoActiveTurn,
    #[error("Cannot clear the conversation while a response is in flight")]
    ClearWhileBusy,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Apply one input to the conversation.
///
/// On `Err` the state is unchanged.
pub fn transition(state: &mut ConversationState, event: SessionEvent) -> Result<(), TransitionError> {
    match (state.phase, event) {
        // ============================================================
        // Turn start
        // ============================================================
        (SessionPhase::Idle, SessionEvent::UserMessage { text, at }) => {
            let id = state.next_message_id();
            state.messages.push(ConversationMessage::user(id, text, at));
            state.error = None;
            state.active = None;
            state.turn_tools_base = state.tools.len();
            state.phase = SessionPhase::Sending;
            Ok(())
        }
        (_, SessionEvent::UserMessage { .. }) => Err(TransitionError::Busy),

        // ============================================================
        // Frames
        // ============================================================
        (SessionPhase::Sending, SessionEvent::Frame(event)) => {
            let id = state.next_message_id();
            let created_at = timestamp_to_datetime(event.timestamp);
            state.messages.push(ConversationMessage::assistant(id, created_at));
            state.active = Some(state.messages.len() - 1);
            state.phase = SessionPhase::Streaming;
            apply_frame(state, event);
            Ok(())
        }
        (SessionPhase::Streaming, SessionEvent::Frame(event)) => {
            apply_frame(state, event);
            Ok(())
        }

        // ============================================================
        // Non-streaming reply
        // ============================================================
        (SessionPhase::Sending, SessionEvent::Reply { content, at }) => {
            let id = state.next_message_id();
            let mut message = ConversationMessage::assistant(id, at);
            message.content = content;
            message.streaming = false;
            state.messages.push(message);
            end_turn(state);
            Ok(())
        }
        (SessionPhase::Streaming, SessionEvent::Reply { .. }) => Err(
            TransitionError::InvalidTransition("reply received while streaming".to_string()),
        ),

        // ============================================================
        // Turn end
        // ============================================================
        (SessionPhase::Sending | SessionPhase::Streaming, SessionEvent::StreamClosed) => {
            if let Some(message) = state.active_message_mut() {
                if message.streaming {
                    tracing::debug!(message_id = %message.id, "Stream closed before complete");
                    message.streaming = false;
                }
            }
            end_turn(state);
            Ok(())
        }

        (SessionPhase::Sending | SessionPhase::Streaming, SessionEvent::TransportFailed { message, at }) => {
            stop_active_message(state);
            let at = server_time(state, at);
            state.tools.fail_running(&message, at);
            state.error = Some(message);
            end_turn(state);
            Ok(())
        }

        (SessionPhase::Sending | SessionPhase::Streaming, SessionEvent::UserCancel { at }) => {
            stop_active_message(state);
            let at = server_time(state, at);
            state.tools.fail_running(CANCELLED_BY_USER, at);
            end_turn(state);
            Ok(())
        }
        // Stopping an idle conversation is a no-op
        (SessionPhase::Idle, SessionEvent::UserCancel { .. }) => Ok(()),

        (
            SessionPhase::Idle,
            SessionEvent::Frame(_)
            | SessionEvent::Reply { .. }
            | SessionEvent::StreamClosed
            | SessionEvent::TransportFailed { .. },
        ) => Err(TransitionError::NoActiveTurn),

        // ============================================================
        // Clear
        // ============================================================
        (SessionPhase::Idle, SessionEvent::Clear) => {
            state.messages.clear();
            state.tools.clear();
            state.error = None;
            state.active = None;
            state.turn_tools_base = 0;
            state.last_event_at = None;
            Ok(())
        }
        (_, SessionEvent::Clear) => Err(TransitionError::ClearWhileBusy),
    }
}

/// Apply one frame to a conversation that has a turn open.
///
/// Frames arriving with no turn open are ignored.
#[must_use]
pub fn apply(mut state: ConversationState, event: StreamingEvent) -> ConversationState {
    if let Err(e) = transition(&mut state, SessionEvent::Frame(event)) {
        tracing::debug!(error = %e, "Frame ignored");
    }
    state
}

fn apply_frame(state: &mut ConversationState, event: StreamingEvent) {
    let Some(index) = state.active else {
        return;
    };
    tracing::trace!(kind = %event.kind, "Applying frame");
    state.last_event_at = Some(event.timestamp);

    match event.kind {
        EventKind::Start | EventKind::Thinking | EventKind::Metadata => {}
        EventKind::Content => {
            let message = &mut state.messages[index];
            if message.streaming {
                message.content.push_str(&event.content);
            } else {
                tracing::debug!(message_id = %message.id, "Content after stream end not appended");
            }
        }
        EventKind::ToolCall => {
            state.tools.record_invocation(&event);
        }
        EventKind::ToolResponse | EventKind::ToolResult => {
            state.tools.record_completion(&event);
        }
        EventKind::Error => {
            let message = if event.content.is_empty() {
                UPSTREAM_ERROR_FALLBACK.to_string()
            } else {
                event.content.clone()
            };
            tracing::warn!(
                error = %message,
                error_type = ?event.error_type(),
                "Agent reported an error"
            );
            state.tools.fail_running(&message, event.timestamp);
            state.messages[index].streaming = false;
            state.error = Some(message);
        }
        EventKind::Complete => {
            let tool_count = state.tools.len() - state.turn_tools_base;
            let message = &mut state.messages[index];
            message.streaming = false;
            message.summary = Some(MessageSummary {
                event_count: message.events.len() + 1,
                tool_count,
                upstream_events: event.metadata_u64("total_events"),
                upstream_duration_secs: event.metadata_f64("duration_seconds"),
            });
        }
    }

    state.messages[index].events.push(event);
}

fn stop_active_message(state: &mut ConversationState) {
    if let Some(message) = state.active_message_mut() {
        message.streaming = false;
    }
}

fn end_turn(state: &mut ConversationState) {
    state.phase = SessionPhase::Idle;
    state.active = None;
}

/// Tool timestamps come from the server. Client-side inputs use the last
/// frame's timestamp so durations never mix the two clocks; the local clock
/// is only used before any frame has arrived.
#[allow(clippy::cast_precision_loss)]
fn server_time(state: &ConversationState, at: DateTime<Utc>) -> f64 {
    state
        .last_event_at
        .unwrap_or_else(|| at.timestamp_millis() as f64 / 1000.0)
}

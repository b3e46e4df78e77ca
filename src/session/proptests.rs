//! Property-based tests for session transitions
//!
//! These tests verify key invariants hold across arbitrary event sequences.

use super::state::*;
use super::transition::*;
use crate::stream::{EventKind, StreamingEvent};
use chrono::{DateTime, Utc};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn open_turn() -> ConversationState {
    let mut state = ConversationState::new();
    transition(
        &mut state,
        SessionEvent::UserMessage {
            text: "go".to_string(),
            at: epoch(),
        },
    )
    .unwrap();
    state
}

fn call(name: &str, id: &str, ts: f64) -> StreamingEvent {
    StreamingEvent::new(EventKind::ToolCall, "", ts)
        .with_metadata("tool_name", name)
        .with_metadata("call_id", id)
}

fn response(name: &str, id: &str, ts: f64) -> StreamingEvent {
    StreamingEvent::new(EventKind::ToolResponse, "", ts)
        .with_metadata("tool_name", name)
        .with_metadata("response_id", id)
        .with_metadata("raw_response", "ok")
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_ts() -> impl Strategy<Value = f64> {
    (0u32..10_000).prop_map(|t| f64::from(t) / 4.0)
}

fn arb_tool_name() -> impl Strategy<Value = String> {
    proptest::sample::select(vec!["calc", "search", "fetch"]).prop_map(str::to_string)
}

fn arb_call_id() -> impl Strategy<Value = Option<String>> {
    proptest::option::of(proptest::sample::select(vec!["a", "b", "c", "d"]).prop_map(str::to_string))
}

fn arb_frame() -> impl Strategy<Value = StreamingEvent> {
    prop_oneof![
        ("[a-z ]{0,8}", arb_ts()).prop_map(|(text, ts)| StreamingEvent::new(EventKind::Content, text, ts)),
        (arb_tool_name(), arb_call_id(), arb_ts()).prop_map(|(name, id, ts)| {
            let event = StreamingEvent::new(EventKind::ToolCall, "", ts).with_metadata("tool_name", name);
            match id {
                Some(id) => event.with_metadata("call_id", id),
                None => event,
            }
        }),
        (arb_tool_name(), arb_call_id(), arb_ts()).prop_map(|(name, id, ts)| {
            let event = StreamingEvent::new(EventKind::ToolResult, "", ts)
                .with_metadata("tool_name", name)
                .with_metadata("tool_result", "done");
            match id {
                Some(id) => event.with_metadata("response_id", id),
                None => event,
            }
        }),
        ("[a-z ]{0,8}", arb_ts()).prop_map(|(text, ts)| StreamingEvent::new(EventKind::Error, text, ts)),
        arb_ts().prop_map(|ts| StreamingEvent::new(EventKind::Complete, "", ts)),
        arb_ts().prop_map(|ts| StreamingEvent::new(EventKind::Thinking, "", ts)),
    ]
}

fn arb_session_event() -> impl Strategy<Value = SessionEvent> {
    prop_oneof![
        4 => arb_frame().prop_map(SessionEvent::Frame),
        1 => "[a-z]{1,8}".prop_map(|text| SessionEvent::UserMessage { text, at: epoch() }),
        1 => Just(SessionEvent::StreamClosed),
        1 => Just(SessionEvent::UserCancel { at: epoch() }),
        1 => Just(SessionEvent::Clear),
        1 => "[a-z]{1,8}".prop_map(|message| SessionEvent::TransportFailed { message, at: epoch() }),
        1 => "[a-z]{1,8}".prop_map(|content| SessionEvent::Reply { content, at: epoch() }),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Streamed content is the concatenation of content events in order
    #[test]
    fn prop_content_concatenates(chunks in proptest::collection::vec("[a-zA-Z0-9 ]{0,10}", 1..20)) {
        let mut state = open_turn();
        for (i, chunk) in chunks.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let ts = i as f64;
            state = apply(state, StreamingEvent::new(EventKind::Content, chunk.clone(), ts));
        }
        prop_assert_eq!(&state.messages[1].content, &chunks.concat());
        prop_assert_eq!(state.messages[1].events.len(), chunks.len());
        prop_assert!(state.is_streaming());
    }

    // Every call answered by a matching response completes with a duration
    #[test]
    fn prop_matched_calls_complete(
        pairs in proptest::collection::vec((arb_tool_name(), arb_ts(), arb_ts()), 1..8),
    ) {
        let mut state = open_turn();
        for (i, (name, called, _)) in pairs.iter().enumerate() {
            state = apply(state, call(name, &format!("id-{i}"), *called));
        }
        for (i, (name, _, answered)) in pairs.iter().enumerate() {
            state = apply(state, response(name, &format!("id-{i}"), *answered));
        }
        prop_assert_eq!(state.tools.len(), pairs.len());
        for (i, (_, called, answered)) in pairs.iter().enumerate() {
            let exec = state.tool(&format!("id-{i}")).unwrap();
            prop_assert_eq!(exec.status, ToolStatus::Completed);
            prop_assert_eq!(exec.started_at, *called);
            prop_assert_eq!(exec.finished_at, Some(*answered));
            // Timestamps are quarter seconds, so the difference is exact
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let expected = if answered >= called {
                ((answered - called) * 1000.0).round() as u64
            } else {
                0
            };
            prop_assert_eq!(exec.duration_ms, Some(expected));
        }
    }

    // A response whose id matches nothing creates no execution
    #[test]
    fn prop_unmatched_response_is_orphaned(name in arb_tool_name(), ts in arb_ts()) {
        let mut state = open_turn();
        state = apply(state, call(&name, "known", ts));
        state = apply(state, response(&name, "stranger", ts + 1.0));
        prop_assert_eq!(state.tools.len(), 1);
        prop_assert_eq!(state.tool("known").map(|e| e.status), Some(ToolStatus::Running));
        prop_assert_eq!(state.tools.orphans().len(), 1);
    }

    // Replaying the same inputs yields the same conversation
    #[test]
    fn prop_replay_is_deterministic(events in proptest::collection::vec(arb_session_event(), 0..40)) {
        let mut first = ConversationState::new();
        let mut second = ConversationState::new();
        for event in &events {
            let a = transition(&mut first, event.clone());
            let b = transition(&mut second, event.clone());
            prop_assert_eq!(a, b);
        }
        prop_assert_eq!(first, second);
    }

    // Rejected inputs never modify the state
    #[test]
    fn prop_rejection_leaves_state_unchanged(events in proptest::collection::vec(arb_session_event(), 0..40)) {
        let mut state = ConversationState::new();
        for event in events {
            let before = state.clone();
            if transition(&mut state, event).is_err() {
                prop_assert_eq!(&state, &before);
            }
        }
    }

    // Tool status never moves backwards and durations are set once finished
    #[test]
    fn prop_tool_status_is_monotonic(events in proptest::collection::vec(arb_session_event(), 0..40)) {
        let mut state = ConversationState::new();
        for event in events {
            let before = state.clone();
            let _ = transition(&mut state, event);
            for exec in state.tools.iter() {
                if let Some(prev) = before.tool(&exec.id) {
                    prop_assert!(exec.status >= prev.status);
                }
                if exec.status.is_finished() {
                    prop_assert!(exec.duration_ms.is_some());
                }
            }
        }
    }

    // Loading and streaming flags agree with the phase
    #[test]
    fn prop_streaming_implies_loading(events in proptest::collection::vec(arb_session_event(), 0..40)) {
        let mut state = ConversationState::new();
        for event in events {
            let _ = transition(&mut state, event);
            if state.is_streaming() {
                prop_assert!(state.is_loading());
            }
            if !state.is_loading() {
                prop_assert!(state.active_message().is_none());
            }
        }
    }
}

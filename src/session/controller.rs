//! Session controller
//!
//! Owns one conversation: accepts user sends, drives the transport through
//! the frame decoder into [`transition`], and publishes a snapshot to
//! observers after every accepted input. At most one turn is in flight.

use super::state::ConversationState;
use super::transition::{transition, SessionEvent, TransitionError};
use crate::stream::FrameStream;
use crate::transport::{AgentRequest, AgentTransport, TransportError, TransportErrorKind};
use chrono::Utc;
use futures::StreamExt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// Stopped by the user; partial content kept
    Cancelled,
    /// Transport failure or upstream `error` event
    Failed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    /// The server call behind a local operation failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Default)]
struct Turns {
    seq: u64,
    current: Option<(u64, CancellationToken)>,
    /// The server session is being ended; no turn may start
    clearing: bool,
}

/// Resets `Turns::clearing` when the server call finishes or is dropped
struct ClearingGuard<'a>(&'a Mutex<Turns>);

impl Drop for ClearingGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clearing = false;
    }
}

pub struct SessionController<T> {
    transport: T,
    conversation_id: String,
    user_id: String,
    state: watch::Sender<ConversationState>,
    /// Guards turn bookkeeping; taken before any state transition that must
    /// not race with `stop`
    turns: Mutex<Turns>,
}

impl<T: AgentTransport> SessionController<T> {
    pub fn new(transport: T, user_id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConversationState::new());
        Self {
            transport,
            conversation_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            state,
            turns: Mutex::new(Turns::default()),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Observe the conversation; a new snapshot is published after every change
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    /// Send a message and drive its reply to completion.
    ///
    /// Rejected with [`TransitionError::Busy`] while another turn is in
    /// flight; the conversation is left untouched in that case.
    pub async fn send(&self, text: &str, streaming: bool) -> Result<TurnOutcome, SessionError> {
        let (turn, cancel) = {
            let mut turns = self.lock_turns();
            if turns.clearing {
                tracing::info!(conversation_id = %self.conversation_id, "Send rejected while clearing");
                return Err(TransitionError::Busy.into());
            }
            if let Err(e) = self.apply(SessionEvent::UserMessage {
                text: text.to_string(),
                at: Utc::now(),
            }) {
                tracing::info!(conversation_id = %self.conversation_id, error = %e, "Send rejected");
                return Err(e.into());
            }
            turns.seq += 1;
            let cancel = CancellationToken::new();
            turns.current = Some((turns.seq, cancel.clone()));
            (turns.seq, cancel)
        };

        tracing::info!(
            conversation_id = %self.conversation_id,
            turn,
            streaming,
            "Sending message"
        );

        let request = AgentRequest::new(text)
            .with_context("user_id", self.user_id.as_str())
            .with_context("conversation_id", self.conversation_id.as_str());

        let outcome = if streaming {
            self.drive_stream(&request, &cancel).await
        } else {
            self.drive_reply(&request, &cancel).await
        };

        let mut turns = self.lock_turns();
        if turns.current.as_ref().is_some_and(|(current, _)| *current == turn) {
            turns.current = None;
        }
        drop(turns);

        tracing::info!(conversation_id = %self.conversation_id, turn, ?outcome, "Turn finished");
        Ok(outcome)
    }

    /// Cancel the in-flight turn. A no-op when nothing is in flight.
    pub fn stop(&self) {
        let mut turns = self.lock_turns();
        let Some((turn, cancel)) = turns.current.take() else {
            tracing::debug!(conversation_id = %self.conversation_id, "Nothing to stop");
            return;
        };
        cancel.cancel();
        if let Err(e) = self.apply(SessionEvent::UserCancel { at: Utc::now() }) {
            tracing::debug!(error = %e, "Cancel found no open turn");
        }
        tracing::info!(conversation_id = %self.conversation_id, turn, "Stream stopped by user");
    }

    /// Discard all messages and tool executions, then end the server's
    /// session so the agent forgets the conversation too.
    ///
    /// Rejected while a turn is in flight. The local conversation stays
    /// cleared even if ending the server session fails; a missing server
    /// session is not an error. Sends are rejected until the server answers.
    pub async fn clear(&self) -> Result<(), SessionError> {
        {
            let mut turns = self.lock_turns();
            if turns.clearing {
                return Err(TransitionError::ClearWhileBusy.into());
            }
            self.apply(SessionEvent::Clear)?;
            turns.clearing = true;
        }
        let _clearing = ClearingGuard(&self.turns);
        tracing::info!(conversation_id = %self.conversation_id, "Conversation cleared");

        match self.transport.end_session(&self.user_id).await {
            Ok(ended) => {
                tracing::info!(session_id = %ended.session_id, "Server session ended");
                Ok(())
            }
            Err(e) if e.kind == TransportErrorKind::NotFound => {
                tracing::debug!("No server session to end");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e.message, "Failed to end server session");
                Err(e.into())
            }
        }
    }

    async fn drive_stream(&self, request: &AgentRequest, cancel: &CancellationToken) -> TurnOutcome {
        let body = match self.transport.open_stream(request, cancel.clone()).await {
            Ok(body) => body,
            Err(e) if e.kind == TransportErrorKind::Cancelled => return TurnOutcome::Cancelled,
            Err(e) => return self.fail(cancel, e.message),
        };

        let mut frames = FrameStream::new(body);
        loop {
            let next = tokio::select! {
                biased;

                () = cancel.cancelled() => return TurnOutcome::Cancelled,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if !self.apply_for_turn(cancel, SessionEvent::Frame(event)) {
                        return TurnOutcome::Cancelled;
                    }
                }
                Some(Err(e)) => return self.fail(cancel, e.message),
                None => break,
            }
        }

        tracing::debug!(
            conversation_id = %self.conversation_id,
            saw_done = frames.saw_done(),
            dropped_frames = frames.dropped_frames(),
            "Stream ended"
        );
        if !self.apply_for_turn(cancel, SessionEvent::StreamClosed) {
            return TurnOutcome::Cancelled;
        }
        if self.state.borrow().error.is_some() {
            TurnOutcome::Failed
        } else {
            TurnOutcome::Completed
        }
    }

    async fn drive_reply(&self, request: &AgentRequest, cancel: &CancellationToken) -> TurnOutcome {
        match self.transport.send(request, cancel.clone()).await {
            Ok(reply) => {
                let event = SessionEvent::Reply {
                    content: reply.response,
                    at: Utc::now(),
                };
                if self.apply_for_turn(cancel, event) {
                    TurnOutcome::Completed
                } else {
                    TurnOutcome::Cancelled
                }
            }
            Err(e) if e.kind == TransportErrorKind::Cancelled => TurnOutcome::Cancelled,
            Err(e) => self.fail(cancel, e.message),
        }
    }

    fn fail(&self, cancel: &CancellationToken, message: String) -> TurnOutcome {
        tracing::warn!(conversation_id = %self.conversation_id, error = %message, "Turn failed");
        let event = SessionEvent::TransportFailed {
            message,
            at: Utc::now(),
        };
        if self.apply_for_turn(cancel, event) {
            TurnOutcome::Failed
        } else {
            TurnOutcome::Cancelled
        }
    }

    /// Apply an input produced by the turn owning `cancel`, unless that turn
    /// has been stopped. Returns false if the turn was stopped.
    fn apply_for_turn(&self, cancel: &CancellationToken, event: SessionEvent) -> bool {
        let _turns = self.lock_turns();
        if cancel.is_cancelled() {
            return false;
        }
        if let Err(e) = self.apply(event) {
            tracing::debug!(conversation_id = %self.conversation_id, error = %e, "Input ignored");
        }
        true
    }

    fn apply(&self, event: SessionEvent) -> Result<(), TransitionError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| match transition(state, event) {
            Ok(()) => true,
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    fn lock_turns(&self) -> MutexGuard<'_, Turns> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

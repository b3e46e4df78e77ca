//! Conversation session engine
//!
//! State is only changed by [`transition`]; the [`SessionController`] owns
//! the I/O and feeds transport output through it.

mod controller;
mod correlator;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use controller::{SessionController, SessionError, TurnOutcome};
pub use correlator::{ToolCorrelator, UNKNOWN_TOOL};
pub use state::{
    ConversationMessage, ConversationState, MessageSummary, Role, SessionPhase, ToolExecution,
    ToolStatus,
};
pub use transition::{apply, transition, SessionEvent, TransitionError, CANCELLED_BY_USER};

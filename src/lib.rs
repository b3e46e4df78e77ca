//! Client-side session engine for streaming agent conversations
//!
//! Decodes the agent server's `data: ` event stream, correlates tool calls
//! with their results, and folds everything into a conversation state that
//! observers can render.

pub mod config;
pub mod session;
pub mod stream;
pub mod transport;

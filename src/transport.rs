//! Agent server transport
//!
//! The boundary between the session engine and the network. Implementations
//! open the streaming endpoint or make the one-shot call; the session layer
//! never touches HTTP directly.

mod error;
mod http;

#[cfg(test)]
pub mod testing;

pub use error::{TransportError, TransportErrorKind};
pub use http::HttpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Raw response body of a streaming call
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Body of both agent endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRequest {
    pub message: String,
    pub context: Map<String, Value>,
}

impl AgentRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: Map::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Response of the non-streaming endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentReply {
    pub response: String,
    pub agent_id: String,
    #[serde(default)]
    pub status: String,
}

/// The server dropped its session for a user and agent
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionEnded {
    pub message: String,
    pub session_id: String,
}

/// Agents registered on the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentList {
    pub agents: Vec<String>,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentDetails {
    pub agent_id: String,
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Health {
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Client side of the agent server
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Open the event stream for one message.
    ///
    /// Resolves once response headers arrive; dropping the returned stream
    /// closes the connection.
    async fn open_stream(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError>;

    /// Make a non-streaming call and wait for the whole reply
    async fn send(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentReply, TransportError>;

    /// End the server's session for `user_id` with this agent.
    ///
    /// The server keeps conversation history per user and agent, so this is
    /// what makes a cleared conversation start fresh upstream. Fails with
    /// [`TransportErrorKind::NotFound`] when no session exists.
    async fn end_session(&self, user_id: &str) -> Result<SessionEnded, TransportError>;

    async fn list_agents(&self) -> Result<AgentList, TransportError>;

    async fn agent_details(&self, agent_id: &str) -> Result<AgentDetails, TransportError>;

    async fn health(&self) -> Result<Health, TransportError>;
}

#[async_trait]
impl<T: AgentTransport + ?Sized> AgentTransport for Arc<T> {
    async fn open_stream(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        (**self).open_stream(request, cancel).await
    }

    async fn send(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentReply, TransportError> {
        (**self).send(request, cancel).await
    }

    async fn end_session(&self, user_id: &str) -> Result<SessionEnded, TransportError> {
        (**self).end_session(user_id).await
    }

    async fn list_agents(&self) -> Result<AgentList, TransportError> {
        (**self).list_agents().await
    }

    async fn agent_details(&self, agent_id: &str) -> Result<AgentDetails, TransportError> {
        (**self).agent_details(agent_id).await
    }

    async fn health(&self) -> Result<Health, TransportError> {
        (**self).health().await
    }
}

/// Logging wrapper for transports
pub struct LoggingTransport<T> {
    inner: T,
}

impl<T> LoggingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: AgentTransport> AgentTransport for LoggingTransport<T> {
    async fn open_stream(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let start = std::time::Instant::now();
        let result = self.inner.open_stream(request, cancel).await;
        log_outcome("open_stream", start.elapsed(), result.as_ref().err());
        result
    }

    async fn send(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentReply, TransportError> {
        let start = std::time::Instant::now();
        let result = self.inner.send(request, cancel).await;
        log_outcome("send", start.elapsed(), result.as_ref().err());
        result
    }

    async fn end_session(&self, user_id: &str) -> Result<SessionEnded, TransportError> {
        let start = std::time::Instant::now();
        let result = self.inner.end_session(user_id).await;
        log_outcome("end_session", start.elapsed(), result.as_ref().err());
        result
    }

    async fn list_agents(&self) -> Result<AgentList, TransportError> {
        let start = std::time::Instant::now();
        let result = self.inner.list_agents().await;
        log_outcome("list_agents", start.elapsed(), result.as_ref().err());
        result
    }

    async fn agent_details(&self, agent_id: &str) -> Result<AgentDetails, TransportError> {
        let start = std::time::Instant::now();
        let result = self.inner.agent_details(agent_id).await;
        log_outcome("agent_details", start.elapsed(), result.as_ref().err());
        result
    }

    async fn health(&self) -> Result<Health, TransportError> {
        let start = std::time::Instant::now();
        let result = self.inner.health().await;
        log_outcome("health", start.elapsed(), result.as_ref().err());
        result
    }
}

fn log_outcome(call: &str, elapsed: std::time::Duration, error: Option<&TransportError>) {
    match error {
        None => tracing::info!(call, duration_ms = %elapsed.as_millis(), "Agent request accepted"),
        Some(e) if e.kind == TransportErrorKind::Cancelled => {
            tracing::info!(call, duration_ms = %elapsed.as_millis(), "Agent request cancelled");
        }
        Some(e) => tracing::error!(
            call,
            duration_ms = %elapsed.as_millis(),
            error = %e.message,
            retryable = e.kind.is_retryable(),
            "Agent request failed"
        ),
    }
}

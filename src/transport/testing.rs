//! Mock transport for testing
//!
//! Serves scripted bodies without any network I/O.

use super::{
    AgentDetails, AgentList, AgentReply, AgentRequest, AgentTransport, ByteStream, Health,
    SessionEnded, TransportError, TransportErrorKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// What the body does after its scripted chunks run out
#[derive(Debug, Clone)]
pub enum Tail {
    /// Close the body
    Close,
    /// Never yield again
    Hang,
    /// Wait for the notify, then yield one more chunk and close
    Gated { gate: Arc<Notify>, chunk: Bytes },
}

/// One scripted response
#[derive(Debug, Clone)]
pub enum MockResponse {
    Stream {
        chunks: Vec<Result<Bytes, TransportError>>,
        tail: Tail,
    },
    Reply(AgentReply),
    Fail(TransportError),
}

impl MockResponse {
    /// A body made of the given chunks that then closes
    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::Stream {
            chunks: chunks.into_iter().map(|c| Ok(c.into())).collect(),
            tail: Tail::Close,
        }
    }

    #[must_use]
    pub fn then(self, tail: Tail) -> Self {
        match self {
            Self::Stream { chunks, .. } => Self::Stream { chunks, tail },
            other => other,
        }
    }
}

/// Format events as the server writes them
pub fn sse_body(payloads: &[&str]) -> String {
    let mut body = String::new();
    for payload in payloads {
        body.push_str("data: ");
        body.push_str(payload);
        body.push_str("\n\n");
    }
    body
}

/// Transport that returns queued responses
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<AgentRequest>>,
    /// Agents the server claims to host
    agents: Vec<String>,
    /// Users with a live server session
    sessions: Mutex<Vec<String>>,
    /// Users whose session was ended, in call order
    pub ended_sessions: Mutex<Vec<String>>,
    /// Failure to return from the next `end_session`
    end_session_error: Mutex<Option<TransportError>>,
    /// When set, `end_session` waits for a notification before answering
    end_session_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_agents(mut self, agents: &[&str]) -> Self {
        self.agents = agents.iter().map(|a| (*a).to_string()).collect();
        self
    }

    pub fn queue(&self, response: MockResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn fail_next_end_session(&self, error: TransportError) {
        *self.end_session_error.lock().unwrap() = Some(error);
    }

    pub fn gate_end_session(&self, gate: Arc<Notify>) {
        *self.end_session_gate.lock().unwrap() = Some(gate);
    }

    pub fn ended_sessions(&self) -> Vec<String> {
        self.ended_sessions.lock().unwrap().clone()
    }

    pub fn recorded_requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &AgentRequest) -> MockResponse {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(user_id) = request.context.get("user_id").and_then(|v| v.as_str()) {
            let mut sessions = self.sessions.lock().unwrap();
            if !sessions.iter().any(|s| s == user_id) {
                sessions.push(user_id.to_string());
            }
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockResponse::Fail(TransportError::network("No mock response queued")))
    }
}

#[async_trait]
impl AgentTransport for MockTransport {
    async fn open_stream(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let response = self.next(request);
        if cancel.is_cancelled() {
            return Err(TransportError::cancelled());
        }
        match response {
            MockResponse::Stream { chunks, tail } => {
                let head = futures::stream::iter(chunks);
                let body: ByteStream = match tail {
                    Tail::Close => Box::pin(head),
                    Tail::Hang => Box::pin(head.chain(futures::stream::pending())),
                    Tail::Gated { gate, chunk } => Box::pin(head.chain(futures::stream::once(
                        async move {
                            gate.notified().await;
                            Ok(chunk)
                        },
                    ))),
                };
                Ok(body)
            }
            MockResponse::Reply(_) => Err(TransportError::unknown("Mock reply queued for a stream")),
            MockResponse::Fail(e) => Err(e),
        }
    }

    async fn send(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentReply, TransportError> {
        let response = self.next(request);
        if cancel.is_cancelled() {
            return Err(TransportError::cancelled());
        }
        match response {
            MockResponse::Reply(reply) => Ok(reply),
            MockResponse::Stream { .. } => {
                Err(TransportError::unknown("Mock stream queued for a reply"))
            }
            MockResponse::Fail(e) => Err(e),
        }
    }

    async fn end_session(&self, user_id: &str) -> Result<SessionEnded, TransportError> {
        self.ended_sessions.lock().unwrap().push(user_id.to_string());
        let gate = self.end_session_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(e) = self.end_session_error.lock().unwrap().take() {
            return Err(e);
        }
        let mut sessions = self.sessions.lock().unwrap();
        let Some(index) = sessions.iter().position(|s| s == user_id) else {
            return Err(TransportError::from_status(404, r#"{"detail":"Session not found"}"#));
        };
        sessions.remove(index);
        Ok(SessionEnded {
            message: "Session ended".to_string(),
            session_id: format!("session-{user_id}"),
        })
    }

    async fn list_agents(&self) -> Result<AgentList, TransportError> {
        Ok(AgentList {
            agents: self.agents.clone(),
            count: self.agents.len(),
        })
    }

    async fn agent_details(&self, agent_id: &str) -> Result<AgentDetails, TransportError> {
        if !self.agents.iter().any(|a| a == agent_id) {
            return Err(TransportError::new(
                TransportErrorKind::NotFound,
                format!("Not found: Agent '{agent_id}' not found"),
            ));
        }
        Ok(AgentDetails {
            agent_id: agent_id.to_string(),
            name: agent_id.to_string(),
            model: "mock".to_string(),
            description: String::new(),
            instruction: String::new(),
            tools: Vec::new(),
            capabilities: Vec::new(),
            status: "active".to_string(),
        })
    }

    async fn health(&self) -> Result<Health, TransportError> {
        Ok(Health {
            message: "Agent API Server is running".to_string(),
            status: "healthy".to_string(),
            timestamp: String::new(),
        })
    }
}

//! Transport error types

use thiserror::Error;

/// Failure talking to the agent server
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "Request cancelled")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = error_detail(body);
        match status {
            404 => Self::new(TransportErrorKind::NotFound, format!("Not found: {detail}")),
            401 | 403 => Self::new(
                TransportErrorKind::Auth,
                format!("Authentication failed: {detail}"),
            ),
            429 => Self::new(TransportErrorKind::RateLimit, format!("Rate limited: {detail}")),
            500..=599 => Self::new(
                TransportErrorKind::ServerError,
                format!("Server error ({status}): {detail}"),
            ),
            400..=499 => Self::new(
                TransportErrorKind::InvalidRequest,
                format!("Invalid request ({status}): {detail}"),
            ),
            _ => Self::unknown(format!("Unexpected status {status}: {detail}")),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {e}"))
        } else if e.is_decode() {
            Self::unknown(format!("Invalid response body: {e}"))
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), &e.to_string())
        } else {
            Self::network(format!("Network error: {e}"))
        }
    }
}

/// The server reports failures as `{"detail": "..."}`
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection refused, reset or dropped mid-body
    Network,
    Timeout,
    /// Unknown agent or no session (404)
    NotFound,
    /// 401, 403
    Auth,
    /// 429
    RateLimit,
    /// 5xx
    ServerError,
    /// Other 4xx
    InvalidRequest,
    /// The caller cancelled before a response arrived
    Cancelled,
    Unknown,
}

impl TransportErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimit | Self::ServerError
        )
    }
}

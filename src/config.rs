//! Client configuration

use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_AGENT_ID: &str = "expert_web_searcher";
pub const DEFAULT_USER_ID: &str = "default_user";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Where and how to reach the agent server
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// API prefix, e.g. `http://localhost:8000/api/v1`
    pub server_url: String,
    pub agent_id: String,
    /// Sent as `context.user_id`; the server keys its sessions on it
    pub user_id: String,
    /// Use the streaming endpoint
    pub streaming: bool,
    /// Whole-request timeout for one-shot calls. Streams are bounded by it
    /// while waiting for headers and between two body chunks.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            agent_id: DEFAULT_AGENT_ID.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            streaming: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            server_url: lookup("AGENT_SERVER_URL").unwrap_or(defaults.server_url),
            agent_id: lookup("AGENT_ID").unwrap_or(defaults.agent_id),
            user_id: lookup("AGENT_USER_ID").unwrap_or(defaults.user_id),
            streaming: parse_or(&lookup, "AGENT_STREAMING", defaults.streaming),
            timeout: Duration::from_secs(parse_or(
                &lookup,
                "AGENT_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
        default
    })
}

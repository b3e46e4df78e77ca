//! HTTP transport for the agent server

use super::{
    AgentDetails, AgentList, AgentReply, AgentRequest, AgentTransport, ByteStream, Health,
    SessionEnded, TransportError,
};
use crate::config::ClientConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// reqwest-backed [`AgentTransport`] for one agent
pub struct HttpTransport {
    client: Client,
    /// API prefix without a trailing slash
    base_url: String,
    agent_id: String,
    /// Whole-request timeout for one-shot calls; for streams, the longest
    /// wait for response headers and between two body chunks
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            agent_id: config.agent_id.clone(),
            timeout: config.timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn stream_url(&self) -> String {
        self.url(&format!("agent/{}/stream", self.agent_id))
    }

    fn call_url(&self) -> String {
        self.url(&format!("agent/{}", self.agent_id))
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        let response = tokio::select! {
            biased;

            () = cancel.cancelled() => return Err(TransportError::cancelled()),
            result = builder.send() => result?,
        };
        check_status(response).await
    }

    /// One-shot request with a JSON response, bounded by the request timeout
    async fn fetch_json<R: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<R, TransportError> {
        let response = builder.timeout(self.timeout).send().await?;
        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::from_status(status.as_u16(), &body))
}

/// Fail the body with a timeout once no chunk has arrived for `idle`
fn idle_timeout<S>(body: S, idle: Duration) -> ByteStream
where
    S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
{
    let body = tokio_stream::StreamExt::timeout(body, idle);
    Box::pin(body.map(move |chunk| {
        chunk.unwrap_or_else(|_| {
            Err(TransportError::timeout(format!(
                "No data from agent for {idle:?}"
            )))
        })
    }))
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn open_stream(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let url = self.stream_url();
        tracing::debug!(url = %url, "Opening agent stream");
        // No whole-request timeout: a healthy stream may run for minutes, so
        // only the wait for headers and the gaps between chunks are bounded
        let builder = self.client.post(url).json(request);
        let response = tokio::time::timeout(self.timeout, self.execute(builder, &cancel))
            .await
            .map_err(|_| {
                TransportError::timeout(format!("Agent did not respond within {:?}", self.timeout))
            })??;
        Ok(idle_timeout(
            response.bytes_stream().map_err(TransportError::from),
            self.timeout,
        ))
    }

    async fn send(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentReply, TransportError> {
        let url = self.call_url();
        tracing::debug!(url = %url, "Calling agent");
        let builder = self.client.post(url).json(request).timeout(self.timeout);
        let response = self.execute(builder, &cancel).await?;

        tokio::select! {
            biased;

            () = cancel.cancelled() => Err(TransportError::cancelled()),
            reply = response.json::<AgentReply>() => Ok(reply?),
        }
    }

    async fn end_session(&self, user_id: &str) -> Result<SessionEnded, TransportError> {
        let url = self.url(&format!("sessions/{}", self.agent_id));
        self.fetch_json(self.client.delete(url).query(&[("user_id", user_id)]))
            .await
    }

    async fn list_agents(&self) -> Result<AgentList, TransportError> {
        self.fetch_json(self.client.get(self.url("agents"))).await
    }

    async fn agent_details(&self, agent_id: &str) -> Result<AgentDetails, TransportError> {
        let url = self.url(&format!("agent/{agent_id}/details"));
        self.fetch_json(self.client.get(url)).await
    }

    async fn health(&self) -> Result<Health, TransportError> {
        self.fetch_json(self.client.get(self.url("health"))).await
    }
}

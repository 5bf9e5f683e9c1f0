//! Streamable HTTP transport for remote MCP servers.

use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::mcp::config::HttpEndpoint;
use crate::mcp::transports::{is_response_to, McpTransport, TransportType};

const SESSION_HEADER: &str = "mcp-session-id";

/// One POST per JSON-RPC message.
///
/// The server answers either with a JSON body or with an SSE stream whose
/// `data:` frames carry JSON-RPC messages. A session id handed out by the
/// server is echoed on every later request.
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
}

impl HttpTransport {
    /// Build the transport. Header values and the bearer token are validated
    /// here so that a broken endpoint fails at load time.
    pub fn new(endpoint: &HttpEndpoint, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (key, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("invalid header name '{}': {}", key, e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("invalid value for header '{}': {}", key, e))?;
            headers.insert(name, value);
        }

        if let Some(var) = &endpoint.auth_token_env {
            match std::env::var(var) {
                Ok(token) if !token.is_empty() => {
                    let value = HeaderValue::from_str(&format!("Bearer {}", token))
                        .map_err(|e| anyhow!("token in {} is not a valid header value: {}", var, e))?;
                    headers.insert(AUTHORIZATION, value);
                }
                _ => log::warn!(
                    "Auth token variable {} is not set; connecting to {} without it",
                    var,
                    endpoint.url
                ),
            }
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: endpoint.url.clone(),
            client,
            headers,
            session_id: Mutex::new(None),
        })
    }

    async fn post(&self, message: &Value) -> anyhow::Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        let session = self.session_id.lock().clone();
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        if let Some(session) = response.headers().get(SESSION_HEADER) {
            if let Ok(session) = session.to_str() {
                *self.session_id.lock() = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} returned HTTP {}: {}", self.url, status.as_u16(), body);
        }
        Ok(response)
    }
}

/// Pull the JSON-RPC response for `id` out of an SSE body.
pub(crate) fn response_from_event_stream(body: &str, id: u64) -> Option<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
        .find(|message| is_response_to(message, id))
}

#[async_trait]
impl McpTransport for HttpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn server_identifier(&self) -> String {
        format!("http:{}", self.url)
    }

    async fn request(&self, id: u64, message: Value) -> anyhow::Result<Value> {
        let response = self.post(&message).await?;
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);
        let body = response.text().await?;

        if is_stream {
            return response_from_event_stream(&body, id)
                .ok_or_else(|| anyhow!("{} sent no response for request {}", self.url, id));
        }
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| anyhow!("{} returned a non-JSON body: {}", self.url, e))?;
        if !is_response_to(&parsed, id) {
            bail!("{} answered with an unexpected message for request {}", self.url, id);
        }
        Ok(parsed)
    }

    async fn notify(&self, message: Value) -> anyhow::Result<()> {
        self.post(&message).await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let session = self.session_id.lock().take();
        if let Some(session) = session {
            let _ = self
                .client
                .delete(&self.url)
                .headers(self.headers.clone())
                .header(SESSION_HEADER, session)
                .send()
                .await;
            log::info!("HTTP transport session closed: {}", self.url);
        }
        Ok(())
    }
}

//! MCP client: session handshake, tool discovery and tool calls.
//!
//! The client owns one transport and speaks JSON-RPC 2.0 over it. It is
//! shared by every capability handler of its endpoint, so all methods take
//! `&self`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use serde_json::{json, Value};

use crate::mcp::config::{EndpointConfig, EndpointTarget};
use crate::mcp::transports::{HttpTransport, McpTransport, StdioTransport};

/// Protocol revision sent in `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
/// Per-request timeout when the endpoint does not override it.
pub const MCP_REQUEST_TIMEOUT: u64 = 30;
/// Upper bound on `tools/list` pages followed.
const MAX_TOOL_PAGES: usize = 32;

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// The text payload of a `tools/call` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

/// An initialized session with one MCP server.
pub struct McpClient {
    endpoint_name: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("endpoint", &self.endpoint_name)
            .field("server", &self.transport.server_identifier())
            .finish()
    }
}

impl McpClient {
    /// Open the transport for `endpoint` and run the initialize handshake.
    pub async fn connect(endpoint: &EndpointConfig) -> anyhow::Result<Self> {
        let request_timeout = Duration::from_secs(endpoint.timeout_secs.unwrap_or(MCP_REQUEST_TIMEOUT));
        let transport: Box<dyn McpTransport> = match &endpoint.target {
            EndpointTarget::Stdio(stdio) => Box::new(StdioTransport::spawn(stdio)?),
            EndpointTarget::Http(http) => Box::new(HttpTransport::new(http, request_timeout)?),
            EndpointTarget::Sse(_) => bail!("SSE transport is not supported"),
        };
        let client = Self::with_transport(&endpoint.name, transport, request_timeout);

        let started_at = Instant::now();
        log::info!(
            "MCP connection started: endpoint='{}', server='{}'",
            client.endpoint_name,
            client.transport.server_identifier()
        );
        if let Err(e) = client.initialize().await {
            let _ = client.transport.close().await;
            return Err(e);
        }
        log::info!(
            "MCP connection established: endpoint='{}' ({}ms)",
            client.endpoint_name,
            started_at.elapsed().as_millis()
        );
        Ok(client)
    }

    /// Wrap an already-open transport. The handshake is not run.
    pub fn with_transport(
        endpoint_name: &str,
        transport: Box<dyn McpTransport>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            endpoint_name: endpoint_name.to_string(),
            transport,
            next_id: AtomicU64::new(1),
            request_timeout,
        }
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.rpc(
            "initialize",
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }
            }),
        )
        .await?;
        self.transport
            .notify(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
    }

    /// Send one request and return its `result`, mapping JSON-RPC errors.
    async fn rpc(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        let response = tokio::time::timeout(self.request_timeout, self.transport.request(id, message))
            .await
            .map_err(|_| {
                anyhow!(
                    "{} on '{}' timed out after {}s",
                    method,
                    self.endpoint_name,
                    self.request_timeout.as_secs()
                )
            })??;

        if let Some(err) = response.get("error") {
            let msg = err.get("message").and_then(Value::as_str).unwrap_or("unknown");
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            bail!("{} on '{}' failed with error {}: {}", method, self.endpoint_name, code, msg);
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("{} on '{}': response missing 'result'", method, self.endpoint_name))
    }

    /// Discover every tool the server exports, following pagination.
    pub async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.rpc("tools/list", params).await?;
            let page = result
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("tools/list on '{}' returned no tools array", self.endpoint_name))?;
            tools.extend(page.iter().filter_map(parse_tool_spec));

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        log::debug!("'{}' exports {} tools", self.endpoint_name, tools.len());
        Ok(tools)
    }

    /// Call a tool by its server-side name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<ToolOutput> {
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let result = self
            .rpc("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(tool_output(&result))
    }

    pub async fn close(&self) {
        if let Err(e) = self.transport.close().await {
            log::warn!("Error closing MCP endpoint '{}': {}", self.endpoint_name, e);
        }
    }
}

fn parse_tool_spec(tool: &Value) -> Option<ToolSpec> {
    let name = tool.get("name").and_then(Value::as_str)?.to_string();
    Some(ToolSpec {
        name,
        description: tool
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        input_schema: tool
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    })
}

/// Join the text items of a `tools/call` result.
fn tool_output(result: &Value) -> ToolOutput {
    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
    let parts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let text = if parts.is_empty() {
        serde_json::to_string(result).unwrap_or_default()
    } else {
        parts.join("\n")
    };
    ToolOutput { text, is_error }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

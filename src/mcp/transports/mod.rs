//! Transport layer for MCP connections.
//!
//! - **Stdio** ([`StdioTransport`]): local child process, newline-delimited
//!   JSON-RPC over stdin/stdout.
//! - **HTTP** ([`HttpTransport`]): streamable HTTP, one POST per message. The
//!   response is either a JSON body or an SSE stream of `data:` frames.
//!
//! Legacy SSE-only servers have a [`TransportType`] so that configs naming
//! them parse, but no transport implementation.

pub mod http;
pub mod stdio;

use async_trait::async_trait;
use serde_json::Value;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

// ---------------------------------------------------------------------------
// TransportType
// ---------------------------------------------------------------------------

/// MCP transport types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    Stdio,
    Http,
    StreamableHttp,
    Sse,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

impl TransportType {
    pub fn value(&self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Http => "http",
            TransportType::StreamableHttp => "streamable-http",
            TransportType::Sse => "sse",
        }
    }

    /// Parse a transport name, case-insensitively.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stdio" => Some(TransportType::Stdio),
            "http" => Some(TransportType::Http),
            "streamable-http" | "streamable_http" | "streamablehttp" => {
                Some(TransportType::StreamableHttp)
            }
            "sse" => Some(TransportType::Sse),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// McpTransport
// ---------------------------------------------------------------------------

/// A connected JSON-RPC channel to one MCP server.
///
/// Implementations are connected on construction and shared behind an `Arc`,
/// so every method takes `&self`. Requests on one transport are serialized.
#[async_trait]
pub trait McpTransport: Send + Sync {
    fn transport_type(&self) -> TransportType;

    /// Identifier used in log lines, e.g. `stdio:server:--flag`.
    fn server_identifier(&self) -> String;

    /// Send a request and wait for the response carrying the same `id`.
    ///
    /// Notifications and responses for other ids that arrive in between are
    /// skipped.
    async fn request(&self, id: u64, message: Value) -> anyhow::Result<Value>;

    /// Send a notification; no response is expected.
    async fn notify(&self, message: Value) -> anyhow::Result<()>;

    /// Release the underlying process or session.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Whether a JSON-RPC message is the response to request `id`.
pub(crate) fn is_response_to(message: &Value, id: u64) -> bool {
    message.get("id").and_then(Value::as_u64) == Some(id)
        && (message.get("result").is_some() || message.get("error").is_some())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Model Context Protocol integration.
//!
//! Providers declare MCP endpoints in their connection config. Loading a
//! provider connects to each endpoint, runs the handshake, lists its tools
//! and wraps every tool as a capability handler.

pub mod client;
pub mod config;
pub mod connector;
pub mod transports;

pub use client::{McpClient, ToolOutput, ToolSpec};
pub use config::{ConnectionConfig, EndpointConfig, EndpointTarget, HttpEndpoint, StdioEndpoint};
pub use connector::{McpConnector, McpToolHandler};
pub use transports::{McpTransport, TransportType};

//! Endpoint configuration for capability providers.
//!
//! A provider directory may carry an `mcp_config.json` next to its
//! descriptor. The file lists one or more named endpoints under an
//! `mcpServers` object:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "weather": { "command": "weather-mcp", "args": ["--stdio"] },
//!     "forecast": { "url": "https://forecast.example.com/mcp",
//!                   "auth_token_env": "FORECAST_TOKEN" }
//!   }
//! }
//! ```
//!
//! Endpoint order is the declaration order of the file. The resolver's
//! endpoint-name strategy walks endpoints in that order.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::mcp::transports::TransportType;
use crate::utilities::errors::ConfigParseError;

/// File name of the connection config inside a provider directory.
pub const CONNECTION_CONFIG_FILE: &str = "mcp_config.json";

// ---------------------------------------------------------------------------
// Endpoint targets
// ---------------------------------------------------------------------------

/// A server launched as a local child process, spoken to over stdin/stdout.
#[derive(Clone, PartialEq, Eq)]
pub struct StdioEndpoint {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl std::fmt::Debug for StdioEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioEndpoint")
            .field("command", &self.command)
            .field("args", &self.args)
            .field(
                "env",
                &self.env.keys().map(|k| format!("{}=<masked>", k)).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// A remote server reached over HTTP.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpEndpoint {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Environment variable holding a bearer token, read at connect time.
    pub auth_token_env: Option<String>,
}

impl std::fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("url", &self.url)
            .field(
                "headers",
                &self.headers.keys().map(|k| format!("{}=<masked>", k)).collect::<Vec<_>>(),
            )
            .field("auth_token_env", &self.auth_token_env)
            .finish()
    }
}

/// Where an endpoint lives and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointTarget {
    Stdio(StdioEndpoint),
    Http(HttpEndpoint),
    /// Legacy SSE servers. Parsed so they can be reported, never connected.
    Sse(HttpEndpoint),
}

/// One named endpoint of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Key under `mcpServers`.
    pub name: String,
    pub target: EndpointTarget,
    /// Per-request timeout override for this endpoint.
    pub timeout_secs: Option<u64>,
}

impl EndpointConfig {
    pub fn transport_type(&self) -> TransportType {
        match &self.target {
            EndpointTarget::Stdio(_) => TransportType::Stdio,
            EndpointTarget::Http(_) => TransportType::StreamableHttp,
            EndpointTarget::Sse(_) => TransportType::Sse,
        }
    }

    /// Identifier used in log lines.
    pub fn server_identifier(&self) -> String {
        match &self.target {
            EndpointTarget::Stdio(s) if s.args.is_empty() => format!("stdio:{}", s.command),
            EndpointTarget::Stdio(s) => format!("stdio:{}:{}", s.command, s.args.join(":")),
            EndpointTarget::Http(h) => format!("http:{}", h.url),
            EndpointTarget::Sse(h) => format!("sse:{}", h.url),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// Parsed contents of a provider's connection-config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Deserialize)]
struct RawConnectionConfig {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct RawEndpoint {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "type")]
    transport: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    auth_token_env: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl ConnectionConfig {
    /// Read and parse a connection-config file.
    pub fn load(path: &Path) -> Result<Self, ConfigParseError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    /// Parse connection-config JSON. `path` is only used in errors.
    pub fn parse(raw: &str, path: &Path) -> Result<Self, ConfigParseError> {
        let to_err = |source| ConfigParseError::ConnectionConfig {
            path: path.to_path_buf(),
            source,
        };
        let parsed: RawConnectionConfig = serde_json::from_str(raw).map_err(to_err)?;

        let mut endpoints = Vec::with_capacity(parsed.mcp_servers.len());
        for (name, value) in parsed.mcp_servers {
            let raw_endpoint: RawEndpoint = serde_json::from_value(value).map_err(to_err)?;
            endpoints.push(raw_endpoint.into_endpoint(name, path)?);
        }
        Ok(Self { endpoints })
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoint names in declaration order.
    pub fn endpoint_names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|e| e.name.as_str())
    }
}

impl RawEndpoint {
    fn into_endpoint(self, name: String, path: &Path) -> Result<EndpointConfig, ConfigParseError> {
        let declared = self.transport.as_deref().and_then(TransportType::from_str_opt);
        let http = |url: String| HttpEndpoint {
            url,
            headers: self.headers.clone(),
            auth_token_env: self.auth_token_env.clone(),
        };

        let target = match (declared, self.command.clone(), self.url.clone()) {
            (Some(TransportType::Sse), _, Some(url)) => EndpointTarget::Sse(http(url)),
            (Some(TransportType::Http | TransportType::StreamableHttp), _, Some(url)) => {
                EndpointTarget::Http(http(url))
            }
            (_, Some(command), _) => EndpointTarget::Stdio(StdioEndpoint {
                command,
                args: self.args.clone(),
                env: self.env.clone(),
            }),
            (_, None, Some(url)) => EndpointTarget::Http(http(url)),
            (_, None, None) => {
                return Err(ConfigParseError::EndpointTarget {
                    path: path.to_path_buf(),
                    endpoint: name,
                })
            }
        };

        Ok(EndpointConfig {
            name,
            target,
            timeout_secs: self.timeout_secs,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<ConnectionConfig, ConfigParseError> {
        ConnectionConfig::parse(raw, Path::new("mcp_config.json"))
    }

    #[test]
    fn test_endpoints_keep_declaration_order() {
        let config = parse(
            r#"{"mcpServers": {
                "zeta": {"command": "zeta-server"},
                "alpha": {"url": "https://alpha.example.com/mcp"},
                "mid": {"command": "mid", "args": ["--stdio"]}
            }}"#,
        )
        .unwrap();
        let names: Vec<_> = config.endpoint_names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_transport_inference() {
        let config = parse(
            r#"{"mcpServers": {
                "local": {"command": "server", "args": ["a", "b"], "env": {"K": "v"}},
                "remote": {"url": "https://remote.example.com/mcp", "headers": {"X-Key": "secret"}},
                "legacy": {"url": "https://legacy.example.com/sse", "transport": "sse"}
            }}"#,
        )
        .unwrap();
        assert_eq!(config.endpoints[0].transport_type(), TransportType::Stdio);
        assert_eq!(config.endpoints[0].server_identifier(), "stdio:server:a:b");
        assert_eq!(config.endpoints[1].transport_type(), TransportType::StreamableHttp);
        assert_eq!(config.endpoints[2].transport_type(), TransportType::Sse);
    }

    #[test]
    fn test_type_alias_is_accepted() {
        let config = parse(r#"{"mcpServers": {"s": {"type": "sse", "url": "http://h/sse"}}}"#).unwrap();
        assert_eq!(config.endpoints[0].transport_type(), TransportType::Sse);
    }

    #[test]
    fn test_debug_masks_secrets() {
        let config = parse(
            r#"{"mcpServers": {"remote": {"url": "https://r/mcp", "headers": {"Authorization": "Bearer abc"}}}}"#,
        )
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("Authorization=<masked>"));
        assert!(!debug.contains("Bearer abc"));
    }

    #[test]
    fn test_missing_servers_key_is_empty() {
        assert!(parse("{}").unwrap().is_empty());
    }

    #[test]
    fn test_endpoint_without_target_is_rejected() {
        let err = parse(r#"{"mcpServers": {"broken": {"args": ["x"]}}}"#).unwrap_err();
        assert!(matches!(err, ConfigParseError::EndpointTarget { ref endpoint, .. } if endpoint == "broken"));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let err = parse("{not json").unwrap_err();
        assert!(matches!(err, ConfigParseError::ConnectionConfig { .. }));
    }
}

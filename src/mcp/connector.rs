//! Loads providers by connecting to the MCP endpoints in their manifests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::capabilities::{
    CapabilityDescriptor, CapabilityHandler, ProviderConnection, ProviderConnector, ProviderSession,
};
use crate::manifests::ProviderManifest;
use crate::mcp::client::McpClient;
use crate::mcp::config::EndpointTarget;
use crate::utilities::errors::{CapabilityExecutionError, ProviderLoadError};

/// One MCP tool exposed as a capability.
pub struct McpToolHandler {
    descriptor: CapabilityDescriptor,
    client: Arc<McpClient>,
}

impl std::fmt::Debug for McpToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolHandler")
            .field("name", &self.descriptor.name)
            .field("endpoint", &self.client.endpoint_name())
            .finish()
    }
}

#[async_trait]
impl CapabilityHandler for McpToolHandler {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn call(&self, arguments: Value) -> Result<String, CapabilityExecutionError> {
        let name = &self.descriptor.name;
        let output = self
            .client
            .call_tool(name, arguments)
            .await
            .map_err(|e| CapabilityExecutionError::Provider {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        if output.is_error {
            return Err(CapabilityExecutionError::Provider {
                name: name.clone(),
                reason: output.text,
            });
        }
        Ok(output.text)
    }
}

#[async_trait]
impl ProviderSession for McpClient {
    async fn close(&self) {
        McpClient::close(self).await;
    }
}

/// [`ProviderConnector`] that speaks MCP to every endpoint of a provider.
///
/// A provider without a connection config loads with no capabilities; its
/// guidance still reaches the model. If any endpoint fails, endpoints that
/// were already opened are closed and the whole load fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpConnector;

impl McpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderConnector for McpConnector {
    async fn connect(&self, manifest: &ProviderManifest) -> Result<ProviderConnection, ProviderLoadError> {
        let provider_id = &manifest.provider_id;
        let Some(config) = &manifest.connection else {
            log::debug!("Provider '{}' has no connection config", provider_id);
            return Ok(ProviderConnection::default());
        };

        let mut connection = ProviderConnection::default();
        for endpoint in &config.endpoints {
            if let EndpointTarget::Sse(_) = endpoint.target {
                close_all(&connection).await;
                return Err(ProviderLoadError::UnsupportedTransport {
                    provider_id: provider_id.clone(),
                    endpoint: endpoint.name.clone(),
                    transport: endpoint.transport_type().to_string(),
                });
            }

            let connection_error = |e: anyhow::Error| ProviderLoadError::Connection {
                provider_id: provider_id.clone(),
                endpoint: endpoint.name.clone(),
                reason: format!("{:#}", e),
            };

            let client = match McpClient::connect(endpoint).await {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    close_all(&connection).await;
                    return Err(connection_error(e));
                }
            };
            connection.sessions.push(client.clone());

            let tools = match client.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    close_all(&connection).await;
                    return Err(connection_error(e));
                }
            };
            for tool in tools {
                let descriptor = CapabilityDescriptor::new(tool.name, provider_id.clone(), tool.description)
                    .with_input_schema(tool.input_schema);
                connection.handlers.push(Arc::new(McpToolHandler {
                    descriptor,
                    client: client.clone(),
                }));
            }
        }

        Ok(connection)
    }
}

async fn close_all(connection: &ProviderConnection) {
    for session in &connection.sessions {
        session.close().await;
    }
}

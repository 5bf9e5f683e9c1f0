//! Capability and provider types shared by the registry, resolver and
//! executor.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::manifests::{ProviderManifest, ProviderMetadata};
use crate::utilities::errors::{CapabilityExecutionError, ProviderLoadError};

/// A named callable exported by a loaded provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Name the model uses to call it.
    pub name: String,
    pub provider_id: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the arguments.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl CapabilityDescriptor {
    pub fn new(
        name: impl Into<String>,
        provider_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider_id: provider_id.into(),
            description: description.into(),
            input_schema: empty_object_schema(),
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Load lifecycle of a provider.
///
/// `Unloaded -> Loading -> Loaded | Failed`. `Failed` is sticky until an
/// explicit retry; `Loaded` lasts for the life of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Unloaded => write!(f, "unloaded"),
            LoadState::Loading => write!(f, "loading"),
            LoadState::Loaded => write!(f, "loaded"),
            LoadState::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time view of one provider, as reported by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct Provider {
    pub provider_id: String,
    pub metadata: ProviderMetadata,
    pub load_state: LoadState,
    /// Empty unless `Loaded`.
    pub capabilities: Vec<CapabilityDescriptor>,
    pub loaded_at: Option<DateTime<Utc>>,
    /// Cached failure when `Failed`.
    pub failure: Option<String>,
}

/// Runs one capability. Implemented by provider connections and built-ins.
#[async_trait]
pub trait CapabilityHandler: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &CapabilityDescriptor;

    /// Invoke with the model's arguments and return the text result.
    async fn call(&self, arguments: Value) -> Result<String, CapabilityExecutionError>;
}

/// A live resource owned by a loaded provider, released on shutdown.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn close(&self);
}

/// What a successful connect hands back to the registry.
#[derive(Default)]
pub struct ProviderConnection {
    pub handlers: Vec<Arc<dyn CapabilityHandler>>,
    pub sessions: Vec<Arc<dyn ProviderSession>>,
}

impl fmt::Debug for ProviderConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConnection")
            .field(
                "capabilities",
                &self.handlers.iter().map(|h| h.descriptor().name.as_str()).collect::<Vec<_>>(),
            )
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// Turns a manifest into live capability handlers. This is the only place
/// provider I/O happens during a load.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(&self, manifest: &ProviderManifest) -> Result<ProviderConnection, ProviderLoadError>;
}

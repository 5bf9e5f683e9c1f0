//! Capabilities: the registry of loaded providers, the resolver that maps
//! unknown capability names to providers, and the handler traits providers
//! implement.

pub mod capability;
pub mod registry;
pub mod resolver;

pub use capability::{
    CapabilityDescriptor, CapabilityHandler, LoadState, Provider, ProviderConnection,
    ProviderConnector, ProviderSession,
};
pub use registry::{CapabilityCollision, CapabilityRegistry};
pub use resolver::{CapabilityResolver, MatchStrategy, Resolution};

/// In-memory providers for tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    use super::*;
    use crate::manifests::{ProviderManifest, ProviderMetadata};
    use crate::mcp::config::{ConnectionConfig, EndpointConfig, EndpointTarget, StdioEndpoint};
    use crate::utilities::errors::{CapabilityExecutionError, ProviderLoadError};

    /// A manifest with the given stdio endpoint names and no files on disk.
    pub fn manifest(provider_id: &str, endpoints: &[&str]) -> ProviderManifest {
        let connection = (!endpoints.is_empty()).then(|| ConnectionConfig {
            endpoints: endpoints
                .iter()
                .map(|name| EndpointConfig {
                    name: name.to_string(),
                    target: EndpointTarget::Stdio(StdioEndpoint {
                        command: format!("{}-server", name),
                        args: Vec::new(),
                        env: Default::default(),
                    }),
                    timeout_secs: None,
                })
                .collect(),
        });
        ProviderManifest {
            provider_id: provider_id.to_string(),
            path: PathBuf::from(provider_id),
            metadata: ProviderMetadata {
                name: provider_id.to_string(),
                description: format!("{} provider", provider_id),
                ..ProviderMetadata::default()
            },
            guidance: format!("How to use {}.", provider_id),
            connection,
        }
    }

    /// Echoes its arguments, or fails with a fixed reason.
    #[derive(Debug)]
    pub struct EchoHandler {
        descriptor: CapabilityDescriptor,
        failure: Option<String>,
        delay: Duration,
    }

    impl EchoHandler {
        pub fn new(name: &str, provider_id: &str) -> Self {
            Self {
                descriptor: CapabilityDescriptor::new(name, provider_id, format!("{} capability", name)),
                failure: None,
                delay: Duration::ZERO,
            }
        }

        pub fn failing(mut self, reason: &str) -> Self {
            self.failure = Some(reason.to_string());
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl CapabilityHandler for EchoHandler {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        async fn call(&self, arguments: Value) -> Result<String, CapabilityExecutionError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.failure {
                Some(reason) => Err(CapabilityExecutionError::Provider {
                    name: self.descriptor.name.clone(),
                    reason: reason.clone(),
                }),
                None => Ok(format!("{}({})", self.descriptor.name, arguments)),
            }
        }
    }

    /// Connector that serves [`EchoHandler`]s and counts connects.
    #[derive(Default)]
    pub struct StubConnector {
        exports: HashMap<String, Vec<String>>,
        failing_capabilities: HashMap<String, String>,
        failures_left: Mutex<HashMap<String, usize>>,
        connects: Mutex<HashMap<String, usize>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl StubConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn exports(mut self, provider_id: &str, names: &[&str]) -> Self {
            self.exports.insert(
                provider_id.to_string(),
                names.iter().map(|n| n.to_string()).collect(),
            );
            self
        }

        /// The next `times` connects to `provider_id` fail.
        pub fn failing(self, provider_id: &str, times: usize) -> Self {
            self.failures_left.lock().insert(provider_id.to_string(), times);
            self
        }

        /// Calls to capability `name` fail with `reason`.
        pub fn failing_capability(mut self, name: &str, reason: &str) -> Self {
            self.failing_capabilities.insert(name.to_string(), reason.to_string());
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn connects_for(&self, provider_id: &str) -> usize {
            self.connects.lock().get(provider_id).copied().unwrap_or(0)
        }

        pub fn total_connects(&self) -> usize {
            self.connects.lock().values().sum()
        }

        /// Highest number of connects observed running at once.
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderConnector for StubConnector {
        async fn connect(&self, manifest: &ProviderManifest) -> Result<ProviderConnection, ProviderLoadError> {
            let id = manifest.provider_id.clone();
            *self.connects.lock().entry(id.clone()).or_default() += 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let should_fail = {
                let mut left = self.failures_left.lock();
                match left.get_mut(&id) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if should_fail {
                return Err(ProviderLoadError::Connection {
                    provider_id: id,
                    endpoint: "stub".to_string(),
                    reason: "connection refused".to_string(),
                });
            }

            let handlers = self
                .exports
                .get(&id)
                .map(|names| {
                    names
                        .iter()
                        .map(|name| {
                            let handler = EchoHandler::new(name, &id);
                            let handler = match self.failing_capabilities.get(name) {
                                Some(reason) => handler.failing(reason),
                                None => handler,
                            };
                            std::sync::Arc::new(handler) as std::sync::Arc<dyn CapabilityHandler>
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(ProviderConnection {
                handlers,
                sessions: Vec::new(),
            })
        }
    }
}

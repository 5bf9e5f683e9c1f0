//! Capability Executor: runs invocations against loaded providers and turns
//! every outcome into a capability result.
//!
//! Execution never fails as a control-flow matter. A missing handler, bad
//! arguments, a provider error or a timeout all come back as an `Err`
//! outcome inside the result, so one bad call cannot abort a turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use crate::capabilities::CapabilityRegistry;
use crate::types::{CapabilityOutcome, Invocation, Message};
use crate::utilities::errors::CapabilityExecutionError;

/// An invocation paired with the provider that will serve it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledInvocation {
    pub invocation: Invocation,
    pub provider_id: String,
}

pub struct CapabilityExecutor {
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
    concurrency: usize,
}

impl CapabilityExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(60),
            concurrency: 4,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Upper bound on invocations running at once. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run one invocation and return its `CapabilityResult` message.
    pub async fn execute(&self, invocation: &Invocation, provider_id: &str) -> Message {
        let outcome: CapabilityOutcome = self.run(invocation, provider_id).await.into();
        Message::result(invocation, outcome)
    }

    async fn run(&self, invocation: &Invocation, provider_id: &str) -> Result<String, CapabilityExecutionError> {
        let name = &invocation.capability_name;
        let handler = self.registry.handler(provider_id, name).ok_or_else(|| {
            log::error!(
                "Index points '{}' at provider '{}' but it has no handler",
                name,
                provider_id
            );
            CapabilityExecutionError::NotRegistered {
                name: name.clone(),
                provider_id: provider_id.to_string(),
            }
        })?;

        let started_at = Instant::now();
        let result = match tokio::time::timeout(self.timeout, handler.call(invocation.arguments.clone())).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityExecutionError::Timeout {
                name: name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        };

        match &result {
            Ok(_) => log::info!(
                "Capability '{}' on '{}' succeeded ({}ms)",
                name,
                provider_id,
                started_at.elapsed().as_millis()
            ),
            Err(e) => log::warn!("Capability '{}' on '{}' failed: {}", name, provider_id, e),
        }
        result
    }

    /// Run a batch with bounded concurrency. Results come back in the order
    /// of `batch`, whatever order the calls finish in.
    pub async fn execute_all(&self, batch: &[ScheduledInvocation]) -> Vec<Message> {
        stream::iter(batch)
            .map(|scheduled| self.execute(&scheduled.invocation, &scheduled.provider_id))
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

impl std::fmt::Debug for CapabilityExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityExecutor")
            .field("timeout", &self.timeout)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::EchoHandler;
    use crate::capabilities::{CapabilityHandler, ProviderConnector};
    use crate::manifests::{ManifestCatalog, ProviderMetadata};
    use crate::types::CapabilityResult;
    use crate::capabilities::testing::StubConnector;
    use serde_json::json;

    fn registry_with(handlers: Vec<Arc<dyn CapabilityHandler>>) -> Arc<CapabilityRegistry> {
        let connector: Arc<dyn ProviderConnector> = Arc::new(StubConnector::new());
        let registry = CapabilityRegistry::new(Arc::new(ManifestCatalog::default()), connector);
        registry.register_static_provider("local", ProviderMetadata::default(), handlers);
        Arc::new(registry)
    }

    fn outcome(message: &Message) -> &CapabilityOutcome {
        match message {
            Message::CapabilityResult(CapabilityResult { outcome, .. }) => outcome,
            other => panic!("expected a capability result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_and_provider_error() {
        let registry = registry_with(vec![
            Arc::new(EchoHandler::new("ok_tool", "local")),
            Arc::new(EchoHandler::new("bad_tool", "local").failing("upstream exploded")),
        ]);
        let executor = CapabilityExecutor::new(registry);

        let ok = executor.execute(&Invocation::new("1", "ok_tool", json!({"a": 1})), "local").await;
        assert_eq!(outcome(&ok), &CapabilityOutcome::Ok("ok_tool({\"a\":1})".to_string()));

        let bad = executor.execute(&Invocation::new("2", "bad_tool", json!({})), "local").await;
        assert_eq!(
            outcome(&bad),
            &CapabilityOutcome::Err("capability 'bad_tool' failed: upstream exploded".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_handler_is_err_result() {
        let executor = CapabilityExecutor::new(registry_with(vec![]));
        let msg = executor.execute(&Invocation::new("1", "ghost", json!({})), "local").await;
        assert!(!outcome(&msg).is_ok());
        assert!(outcome(&msg).content().contains("not registered"));
    }

    #[tokio::test]
    async fn test_timeout_is_err_result() {
        let registry = registry_with(vec![Arc::new(
            EchoHandler::new("slow", "local").with_delay(Duration::from_millis(500)),
        )]);
        let executor = CapabilityExecutor::new(registry).with_timeout(Duration::from_millis(20));
        let msg = executor.execute(&Invocation::new("1", "slow", json!({})), "local").await;
        assert!(outcome(&msg).content().contains("timed out"));
    }

    #[tokio::test]
    async fn test_batch_preserves_invocation_order() {
        let registry = registry_with(vec![
            Arc::new(EchoHandler::new("a", "local").with_delay(Duration::from_millis(60))),
            Arc::new(EchoHandler::new("b", "local").with_delay(Duration::from_millis(5))),
            Arc::new(EchoHandler::new("c", "local").with_delay(Duration::from_millis(30))),
        ]);
        let executor = CapabilityExecutor::new(registry).with_concurrency(3);
        let batch: Vec<_> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, name)| ScheduledInvocation {
                invocation: Invocation::new(format!("call-{}", i), *name, json!({})),
                provider_id: "local".to_string(),
            })
            .collect();

        let results = executor.execute_all(&batch).await;
        let ids: Vec<_> = results
            .iter()
            .map(|m| match m {
                Message::CapabilityResult(r) => r.invocation_id.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(ids, vec!["call-0", "call-1", "call-2"]);
    }
}

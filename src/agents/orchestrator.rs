//! The capability-gated orchestration loop.
//!
//! ```text
//! INIT -> AWAIT_MODEL -> (DONE | RESOLVING | EXECUTING)
//! RESOLVING -> AWAIT_MODEL
//! EXECUTING -> AWAIT_MODEL
//! ```
//!
//! Each model turn is classified: invocations of indexed capabilities are
//! executed, invocations of unknown capabilities are resolved to providers
//! and loaded, and names no provider can supply are dropped with a notice.
//! Invocations blocked on a load are never replayed; the model is asked again
//! with the expanded capability set instead. A step bound and a per-name
//! unresolved bound guarantee termination.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};

use super::prompt::build_system_prompt;
use super::state::{ConversationState, Outcome, Phase, TaskReport};
use crate::capabilities::{CapabilityRegistry, CapabilityResolver, LoadState};
use crate::config::OrchestratorConfig;
use crate::llms::{ModelGateway, ModelRequest};
use crate::tools::{CapabilityExecutor, ScheduledInvocation};
use crate::types::{Invocation, Message};
use crate::utilities::errors::{FailureKind, ModelGatewayError, UnresolvableCapability};

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    gateway: Arc<dyn ModelGateway>,
    resolver: CapabilityResolver,
    executor: CapabilityExecutor,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("model", &self.gateway.model())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        gateway: Arc<dyn ModelGateway>,
        config: OrchestratorConfig,
    ) -> Self {
        let executor = CapabilityExecutor::new(registry.clone())
            .with_timeout(config.execution_timeout)
            .with_concurrency(config.execution_concurrency);
        Self {
            registry,
            gateway,
            resolver: CapabilityResolver::new(),
            executor,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `task` to completion.
    ///
    /// Always returns a report; failures are carried in its outcome. The
    /// task timeout drops whatever model call, load or execution is in
    /// flight.
    pub async fn run(&self, task: &str) -> TaskReport {
        let started = Instant::now();
        let mut state = ConversationState::new(self.registry.pinned_providers());

        let drive = self.drive(task, &mut state);
        let timed_out = tokio::time::timeout(self.config.task_timeout, drive).await.is_err();
        if timed_out {
            log::warn!(
                "Task timed out after {:?} in phase {}",
                self.config.task_timeout,
                state.phase
            );
            state.finish(Outcome::failure(
                FailureKind::TaskTimeout,
                format!("task did not finish within {}s", self.config.task_timeout.as_secs()),
            ));
        }

        let report = state.into_report();
        match report.failure() {
            None => log::info!(
                "Task answered after {} steps in {:?}",
                report.steps,
                started.elapsed()
            ),
            Some(failure) => log::warn!(
                "Task failed after {} steps in {:?}: {}",
                report.steps,
                started.elapsed(),
                failure
            ),
        }
        report
    }

    async fn drive(&self, task: &str, state: &mut ConversationState) {
        loop {
            match state.phase {
                Phase::Init => {
                    state.push(Message::user(task));
                    state.transition(Phase::AwaitModel);
                }
                Phase::AwaitModel => self.await_model(state).await,
                Phase::Resolving => self.load_required(state).await,
                Phase::Executing => self.execute_scheduled(state).await,
                Phase::Done => return,
            }
        }
    }

    // -----------------------------------------------------------------------
    // AWAIT_MODEL
    // -----------------------------------------------------------------------

    async fn await_model(&self, state: &mut ConversationState) {
        if state.steps >= self.config.max_steps {
            state.finish(Outcome::failure(
                FailureKind::StepLimit,
                format!("no answer after {} model calls", self.config.max_steps),
            ));
            return;
        }
        state.steps += 1;

        let capabilities = self
            .registry
            .descriptors_for(state.loaded_providers.iter().map(String::as_str));
        let system_prompt = build_system_prompt(&self.registry, &state.loaded_providers, &capabilities);
        let request = ModelRequest {
            system_prompt: &system_prompt,
            capabilities: &capabilities,
            history: &state.history,
        };

        log::debug!(
            "Step {}: calling model with {} capabilities and {} messages",
            state.steps,
            capabilities.len(),
            state.history.len()
        );
        let reply = tokio::time::timeout(self.config.model_timeout, self.gateway.complete(request)).await;
        let response = match reply {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                state.finish(Outcome::failure(FailureKind::ModelGateway, err.to_string()));
                return;
            }
            Err(_) => {
                let err = ModelGatewayError::Timeout(self.config.model_timeout.as_secs());
                state.finish(Outcome::failure(FailureKind::ModelGateway, err.to_string()));
                return;
            }
        };

        if response.invocations.is_empty() {
            match response.non_empty_text() {
                Some(text) => {
                    let text = text.to_string();
                    state.push(Message::model(Some(text.clone()), Vec::new()));
                    state.finish(Outcome::Answer { text });
                }
                None => {
                    log::warn!("Step {}: model returned neither text nor invocations", state.steps);
                    state.push(Message::notice(
                        "Your last reply was empty. Answer the task in plain text or call a capability.",
                    ));
                }
            }
            return;
        }

        let invocations = response.invocations.clone();
        state.push(Message::model(response.text, response.invocations));
        self.classify(state, invocations);
    }

    /// Sort one turn's invocations into ready, blocked on a load, or
    /// unresolvable, and pick the next phase.
    fn classify(&self, state: &mut ConversationState, invocations: Vec<Invocation>) {
        let mut ready = Vec::new();
        let mut blocked = Vec::new();
        let mut required = BTreeSet::new();
        let mut unresolved: Vec<UnresolvableCapability> = Vec::new();

        for invocation in invocations {
            let name = invocation.capability_name.as_str();

            if let Some(provider_id) = self.registry.provider_for(name) {
                if state.loaded_providers.insert(provider_id.clone()) {
                    log::debug!("Adopted already-loaded provider '{}' for '{}'", provider_id, name);
                }
                state.unresolved_counts.remove(name);
                ready.push(ScheduledInvocation {
                    invocation,
                    provider_id,
                });
                continue;
            }

            match self.provider_to_load(name) {
                Ok(provider_id) => {
                    state.unresolved_counts.remove(name);
                    required.insert(provider_id);
                    blocked.push(invocation);
                }
                Err(err) => {
                    if !unresolved.iter().any(|u| u.name == err.name) {
                        unresolved.push(err);
                    }
                }
            }
        }

        for err in &unresolved {
            log::info!("{}", err);
            state.push(Message::notice(format!(
                "{}. The call was dropped; do not request it again.",
                err
            )));
            let attempts = state.unresolved_counts.entry(err.name.clone()).or_insert(0);
            *attempts += 1;
            if *attempts >= self.config.max_unresolved_attempts {
                let reason = format!(
                    "capability '{}' stayed unresolvable for {} attempts",
                    err.name, attempts
                );
                state.finish(Outcome::failure(FailureKind::UnresolvableCapability, reason));
                return;
            }
        }

        if !required.is_empty() {
            let names: Vec<&str> = blocked.iter().map(|i| i.capability_name.as_str()).collect();
            let providers: Vec<&str> = required.iter().map(String::as_str).collect();
            state.push(Message::notice(format!(
                "Capabilities {} are not loaded yet; loading provider(s) {}. \
                 No calls from your last reply were executed.",
                names.join(", "),
                providers.join(", ")
            )));
            state.pending_invocations = blocked;
            state
                .pending_invocations
                .extend(ready.into_iter().map(|s| s.invocation));
            state.required_providers = required;
            state.transition(Phase::Resolving);
        } else if !ready.is_empty() {
            state.scheduled = ready;
            state.transition(Phase::Executing);
        }
    }

    /// The unloaded provider that should supply `name`.
    fn provider_to_load(&self, name: &str) -> Result<String, UnresolvableCapability> {
        let unresolvable = |reason: String| UnresolvableCapability {
            name: name.to_string(),
            reason,
        };

        let Some(resolution) = self.resolver.resolve(name, self.registry.catalog()) else {
            return Err(unresolvable("no provider matches this name".to_string()));
        };
        let provider_id = resolution.provider_id;

        match self.registry.load_state(&provider_id) {
            Some(LoadState::Unloaded) | Some(LoadState::Loading) => Ok(provider_id),
            Some(LoadState::Loaded) => Err(unresolvable(format!(
                "provider '{}' is loaded but does not export it",
                provider_id
            ))),
            Some(LoadState::Failed) => {
                let cause = self
                    .registry
                    .load_error(&provider_id)
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                Err(unresolvable(format!(
                    "provider '{}' failed to load ({})",
                    provider_id, cause
                )))
            }
            None => Err(unresolvable(format!("provider '{}' is not registered", provider_id))),
        }
    }

    // -----------------------------------------------------------------------
    // RESOLVING
    // -----------------------------------------------------------------------

    async fn load_required(&self, state: &mut ConversationState) {
        let targets: Vec<String> = state
            .required_providers
            .iter()
            .filter(|id| !state.loaded_providers.contains(*id))
            .cloned()
            .collect();

        let registry = &self.registry;
        let outcomes: Vec<_> = stream::iter(targets)
            .map(|provider_id| async move {
                let outcome = registry.ensure_loaded(&provider_id).await;
                (provider_id, outcome)
            })
            .buffered(self.config.load_concurrency.max(1))
            .collect()
            .await;

        let mut loaded = Vec::new();
        let mut failed = Vec::new();
        for (provider_id, outcome) in outcomes {
            match outcome {
                Ok(descriptors) => {
                    let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
                    if names.is_empty() {
                        loaded.push(format!("{} (guidance only)", provider_id));
                    } else {
                        loaded.push(format!("{} ({})", provider_id, names.join(", ")));
                    }
                    state.loaded_providers.insert(provider_id);
                }
                Err(err) => {
                    log::warn!("Provider '{}' failed to load: {}", provider_id, err);
                    failed.push(err.to_string());
                }
            }
        }

        let mut notice = String::new();
        if !loaded.is_empty() {
            notice.push_str(&format!("Loaded provider(s): {}.", loaded.join("; ")));
        }
        if !failed.is_empty() {
            if !notice.is_empty() {
                notice.push(' ');
            }
            notice.push_str(&format!("Failed to load: {}.", failed.join("; ")));
        }
        if !notice.is_empty() {
            notice.push_str(" Re-issue any calls you still need with the capabilities now available.");
            state.push(Message::notice(notice));
        }

        if !state.pending_invocations.is_empty() {
            log::debug!(
                "Discarding {} pending invocations after resolving",
                state.pending_invocations.len()
            );
        }
        state.pending_invocations.clear();
        state.required_providers.clear();
        state.transition(Phase::AwaitModel);
    }

    // -----------------------------------------------------------------------
    // EXECUTING
    // -----------------------------------------------------------------------

    async fn execute_scheduled(&self, state: &mut ConversationState) {
        let batch = std::mem::take(&mut state.scheduled);
        let results = self.executor.execute_all(&batch).await;
        for message in results {
            state.push(message);
        }
        state.transition(Phase::AwaitModel);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Capability Registry: lazy, single-flight provider loading and the
//! capability index.
//!
//! Every discovered provider gets a slot. The first `ensure_loaded` call for
//! a provider runs the connector; concurrent callers await the same load.
//! The outcome (success or failure) is cached in the slot, so a provider is
//! connected at most once per registry unless `retry` or `reset` is called.
//!
//! The capability index (`name -> provider id`) is an immutable map behind
//! an `Arc`. A load builds the next map and swaps it in under the write
//! lock, so readers see either the old index or the new one, and never a
//! name whose provider is not yet `Loaded`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::OnceCell;

use super::capability::{
    CapabilityDescriptor, CapabilityHandler, LoadState, Provider, ProviderConnection,
    ProviderConnector, ProviderSession,
};
use crate::manifests::{ManifestCatalog, ProviderMetadata};
use crate::utilities::errors::ProviderLoadError;

/// Default bound on a single provider load.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Two loaded providers export the same capability name. The provider that
/// was indexed first keeps the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityCollision {
    pub capability_name: String,
    pub kept_provider: String,
    pub ignored_provider: String,
}

struct LoadedProvider {
    descriptors: Vec<CapabilityDescriptor>,
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
    sessions: Vec<Arc<dyn ProviderSession>>,
    loaded_at: DateTime<Utc>,
}

impl LoadedProvider {
    fn new(provider_id: &str, connection: ProviderConnection) -> Self {
        let mut descriptors = Vec::with_capacity(connection.handlers.len());
        let mut handlers = HashMap::with_capacity(connection.handlers.len());
        for handler in connection.handlers {
            let mut descriptor = handler.descriptor().clone();
            if handlers.contains_key(&descriptor.name) {
                log::warn!(
                    "Provider '{}' exports '{}' twice; keeping the first",
                    provider_id,
                    descriptor.name
                );
                continue;
            }
            descriptor.provider_id = provider_id.to_string();
            handlers.insert(descriptor.name.clone(), handler);
            descriptors.push(descriptor);
        }
        Self {
            descriptors,
            handlers,
            sessions: connection.sessions,
            loaded_at: Utc::now(),
        }
    }

    async fn close(&self) {
        for session in &self.sessions {
            session.close().await;
        }
    }
}

type LoadOutcome = Result<Arc<LoadedProvider>, ProviderLoadError>;

/// Puts a slot back to `Unloaded` if its load future is dropped before it
/// finishes, e.g. when the caller's task times out. The `OnceCell` stays
/// empty in that case, so the next `ensure_loaded` starts a fresh load.
struct LoadingGuard<'a> {
    slot: &'a ProviderSlot,
    settled: bool,
}

impl LoadingGuard<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            log::debug!("Provider load cancelled before completion");
            self.slot.set_state(LoadState::Unloaded);
        }
    }
}

struct ProviderSlot {
    metadata: ProviderMetadata,
    state: Mutex<LoadState>,
    outcome: OnceCell<LoadOutcome>,
    /// Registered in-process; never evicted by `reset`.
    pinned: bool,
}

impl ProviderSlot {
    fn unloaded(metadata: ProviderMetadata) -> Self {
        Self {
            metadata,
            state: Mutex::new(LoadState::Unloaded),
            outcome: OnceCell::new(),
            pinned: false,
        }
    }

    fn state(&self) -> LoadState {
        *self.state.lock()
    }

    fn set_state(&self, state: LoadState) {
        *self.state.lock() = state;
    }

    fn loaded(&self) -> Option<&Arc<LoadedProvider>> {
        match self.outcome.get() {
            Some(Ok(loaded)) => Some(loaded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CapabilityIndex {
    owners: HashMap<String, String>,
    published: HashSet<String>,
}

/// Shared registry of providers and the capabilities they export.
pub struct CapabilityRegistry {
    catalog: Arc<ManifestCatalog>,
    connector: Arc<dyn ProviderConnector>,
    slots: DashMap<String, Arc<ProviderSlot>>,
    index: RwLock<Arc<CapabilityIndex>>,
    collisions: Mutex<Vec<CapabilityCollision>>,
    load_timeout: Duration,
}

impl CapabilityRegistry {
    /// Create a registry over `catalog`. Every provider starts `Unloaded`.
    pub fn new(catalog: Arc<ManifestCatalog>, connector: Arc<dyn ProviderConnector>) -> Self {
        let slots = DashMap::new();
        for manifest in catalog.providers() {
            slots.insert(
                manifest.provider_id.clone(),
                Arc::new(ProviderSlot::unloaded(manifest.metadata.clone())),
            );
        }
        Self {
            catalog,
            connector,
            slots,
            index: RwLock::new(Arc::new(CapabilityIndex::default())),
            collisions: Mutex::new(Vec::new()),
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &Arc<ManifestCatalog> {
        &self.catalog
    }

    /// Register an in-process provider that is `Loaded` from the start.
    ///
    /// Pinned providers survive `reset` and are part of every conversation's
    /// loaded set.
    pub fn register_static_provider(
        &self,
        provider_id: &str,
        metadata: ProviderMetadata,
        handlers: Vec<Arc<dyn CapabilityHandler>>,
    ) {
        if self.catalog.contains(provider_id) {
            log::warn!(
                "Static provider '{}' shadows a discovered provider with the same id",
                provider_id
            );
        }
        let loaded = Arc::new(LoadedProvider::new(
            provider_id,
            ProviderConnection {
                handlers,
                sessions: Vec::new(),
            },
        ));
        let slot = Arc::new(ProviderSlot {
            metadata,
            state: Mutex::new(LoadState::Loaded),
            outcome: OnceCell::new_with(Some(Ok(loaded.clone()))),
            pinned: true,
        });
        self.slots.insert(provider_id.to_string(), slot);
        self.publish(provider_id, &loaded);
        log::debug!(
            "Registered static provider '{}' with {} capabilities",
            provider_id,
            loaded.descriptors.len()
        );
    }

    /// Ids of pinned providers, sorted.
    pub fn pinned_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.value().pinned)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    fn slot(&self, provider_id: &str) -> Result<Arc<ProviderSlot>, ProviderLoadError> {
        self.slots
            .get(provider_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProviderLoadError::UnknownProvider(provider_id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Load a provider if needed and return its capabilities.
    ///
    /// Idempotent: a `Loaded` provider returns its cached set, a `Failed`
    /// one returns its cached error, and concurrent callers share one load.
    pub async fn ensure_loaded(
        &self,
        provider_id: &str,
    ) -> Result<Vec<CapabilityDescriptor>, ProviderLoadError> {
        let slot = self.slot(provider_id)?;
        let outcome = slot
            .outcome
            .get_or_init(|| self.load(provider_id, &slot))
            .await;
        match outcome {
            Ok(loaded) => {
                self.publish(provider_id, loaded);
                Ok(loaded.descriptors.clone())
            }
            Err(err) => Err(err.clone()),
        }
    }

    async fn load(&self, provider_id: &str, slot: &ProviderSlot) -> LoadOutcome {
        let Some(manifest) = self.catalog.get(provider_id) else {
            slot.set_state(LoadState::Failed);
            return Err(ProviderLoadError::UnknownProvider(provider_id.to_string()));
        };

        slot.set_state(LoadState::Loading);
        let guard = LoadingGuard { slot, settled: false };
        let started_at = Instant::now();
        log::info!("Loading provider '{}'", provider_id);

        let result = match tokio::time::timeout(self.load_timeout, self.connector.connect(manifest)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderLoadError::Timeout {
                provider_id: provider_id.to_string(),
                timeout_secs: self.load_timeout.as_secs(),
            }),
        };

        guard.settle();
        match result {
            Ok(connection) => {
                let loaded = LoadedProvider::new(provider_id, connection);
                slot.set_state(LoadState::Loaded);
                log::info!(
                    "Provider '{}' loaded with {} capabilities ({}ms)",
                    provider_id,
                    loaded.descriptors.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(Arc::new(loaded))
            }
            Err(err) => {
                slot.set_state(LoadState::Failed);
                log::warn!("Provider '{}' failed to load: {}", provider_id, err);
                Err(err)
            }
        }
    }

    /// Add a loaded provider's names to the index, once.
    fn publish(&self, provider_id: &str, loaded: &LoadedProvider) {
        let mut guard = self.index.write();
        if guard.published.contains(provider_id) {
            return;
        }

        let mut next = CapabilityIndex::clone(&guard);
        for descriptor in &loaded.descriptors {
            match next.owners.get(&descriptor.name) {
                Some(owner) if owner != provider_id => {
                    log::warn!(
                        "Capability '{}' from provider '{}' collides with provider '{}'; keeping '{}'",
                        descriptor.name,
                        provider_id,
                        owner,
                        owner
                    );
                    self.collisions.lock().push(CapabilityCollision {
                        capability_name: descriptor.name.clone(),
                        kept_provider: owner.clone(),
                        ignored_provider: provider_id.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    next.owners.insert(descriptor.name.clone(), provider_id.to_string());
                }
            }
        }
        next.published.insert(provider_id.to_string());
        *guard = Arc::new(next);
    }

    /// Clear a cached failure and load again. A provider that is not
    /// `Failed` is simply ensured loaded.
    pub async fn retry(&self, provider_id: &str) -> Result<Vec<CapabilityDescriptor>, ProviderLoadError> {
        let slot = self.slot(provider_id)?;
        if slot.state() == LoadState::Failed && !slot.pinned {
            log::info!("Retrying provider '{}'", provider_id);
            self.slots.insert(
                provider_id.to_string(),
                Arc::new(ProviderSlot::unloaded(slot.metadata.clone())),
            );
        }
        self.ensure_loaded(provider_id).await
    }

    /// Forget every discovered provider's load outcome and rebuild the index
    /// from pinned providers. Sessions of dropped providers are closed.
    pub async fn reset(&self) {
        let mut dropped = Vec::new();
        for manifest in self.catalog.providers() {
            let pinned = self
                .slots
                .get(&manifest.provider_id)
                .map(|e| e.value().pinned)
                .unwrap_or(false);
            if pinned {
                continue;
            }
            let fresh = Arc::new(ProviderSlot::unloaded(manifest.metadata.clone()));
            if let Some(old) = self.slots.insert(manifest.provider_id.clone(), fresh) {
                if let Some(loaded) = old.loaded() {
                    dropped.push(loaded.clone());
                }
            }
        }

        {
            let mut guard = self.index.write();
            let mut next = CapabilityIndex::default();
            for entry in self.slots.iter().filter(|e| e.value().pinned) {
                if let Some(loaded) = entry.value().loaded() {
                    for d in &loaded.descriptors {
                        next.owners.entry(d.name.clone()).or_insert_with(|| entry.key().clone());
                    }
                    next.published.insert(entry.key().clone());
                }
            }
            *guard = Arc::new(next);
        }
        self.collisions.lock().clear();

        for loaded in dropped {
            loaded.close().await;
        }
        log::info!("Capability registry reset");
    }

    /// Close every live provider session.
    pub async fn shutdown(&self) {
        let loaded: Vec<Arc<LoadedProvider>> = self
            .slots
            .iter()
            .filter_map(|entry| entry.value().loaded().cloned())
            .collect();
        for provider in loaded {
            provider.close().await;
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn load_state(&self, provider_id: &str) -> Option<LoadState> {
        self.slots.get(provider_id).map(|entry| entry.value().state())
    }

    /// The cached failure of a `Failed` provider.
    pub fn load_error(&self, provider_id: &str) -> Option<ProviderLoadError> {
        let slot = self.slot(provider_id).ok()?;
        match slot.outcome.get() {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Whether some loaded provider exports `name`.
    pub fn is_capability_available(&self, name: &str) -> bool {
        self.index.read().owners.contains_key(name)
    }

    /// The provider that owns `name` in the index.
    pub fn provider_for(&self, name: &str) -> Option<String> {
        self.index.read().owners.get(name).cloned()
    }

    /// Handler for `name` on a loaded provider.
    pub fn handler(&self, provider_id: &str, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        let slot = self.slot(provider_id).ok()?;
        slot.loaded()?.handlers.get(name).cloned()
    }

    /// Indexed capabilities of the given providers, in the given order.
    ///
    /// Names a provider lost in a collision are left out.
    pub fn descriptors_for<'a>(
        &self,
        provider_ids: impl IntoIterator<Item = &'a str>,
    ) -> Vec<CapabilityDescriptor> {
        let index = self.index.read().clone();
        let mut out = Vec::new();
        for provider_id in provider_ids {
            let Ok(slot) = self.slot(provider_id) else {
                continue;
            };
            let Some(loaded) = slot.loaded() else {
                continue;
            };
            out.extend(
                loaded
                    .descriptors
                    .iter()
                    .filter(|d| index.owners.get(&d.name).map(String::as_str) == Some(provider_id))
                    .cloned(),
            );
        }
        out
    }

    /// Guidance text of a discovered provider.
    pub fn guidance(&self, provider_id: &str) -> Option<&str> {
        self.catalog.get(provider_id).map(|m| m.guidance.as_str())
    }

    /// Snapshot of one provider.
    pub fn provider(&self, provider_id: &str) -> Option<Provider> {
        let slot = self.slot(provider_id).ok()?;
        let (capabilities, loaded_at, failure) = match slot.outcome.get() {
            Some(Ok(loaded)) => (loaded.descriptors.clone(), Some(loaded.loaded_at), None),
            Some(Err(err)) => (Vec::new(), None, Some(err.to_string())),
            None => (Vec::new(), None, None),
        };
        Some(Provider {
            provider_id: provider_id.to_string(),
            metadata: slot.metadata.clone(),
            load_state: slot.state(),
            capabilities,
            loaded_at,
            failure,
        })
    }

    /// Snapshots of every provider, sorted by id.
    pub fn providers(&self) -> Vec<Provider> {
        let mut ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids.iter().filter_map(|id| self.provider(id)).collect()
    }

    /// Name collisions recorded since creation or the last reset.
    pub fn collisions(&self) -> Vec<CapabilityCollision> {
        self.collisions.lock().clone()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("providers", &self.slots.len())
            .field("indexed_capabilities", &self.index.read().owners.len())
            .field("load_timeout", &self.load_timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

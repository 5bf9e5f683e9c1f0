//! Manifest discovery across one or more root directories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::manifest::{ProviderManifest, DESCRIPTOR_FILE};

/// A provider id found under more than one root. The first one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderIdCollision {
    pub provider_id: String,
    pub kept: PathBuf,
    pub ignored: PathBuf,
}

/// A provider directory that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedManifest {
    pub path: PathBuf,
    pub reason: String,
}

/// Immutable snapshot of every discovered provider.
///
/// Provider order is discovery order: roots in the order given, then
/// directory names sorted within each root. The resolver walks providers in
/// this order, so it decides which provider wins an ambiguous name.
#[derive(Debug, Clone, Default)]
pub struct ManifestCatalog {
    providers: Vec<ProviderManifest>,
    by_id: HashMap<String, usize>,
    collisions: Vec<ProviderIdCollision>,
    skipped: Vec<SkippedManifest>,
}

impl ManifestCatalog {
    /// Build a catalog from already-parsed manifests, keeping the first of
    /// any duplicated id.
    pub fn from_manifests(manifests: impl IntoIterator<Item = ProviderManifest>) -> Self {
        let mut catalog = Self::default();
        for manifest in manifests {
            catalog.insert(manifest);
        }
        catalog
    }

    fn insert(&mut self, manifest: ProviderManifest) {
        if let Some(&existing) = self.by_id.get(&manifest.provider_id) {
            let kept = self.providers[existing].path.clone();
            log::warn!(
                "Provider id '{}' at {} collides with {}; keeping the first",
                manifest.provider_id,
                manifest.path.display(),
                kept.display()
            );
            self.collisions.push(ProviderIdCollision {
                provider_id: manifest.provider_id,
                kept,
                ignored: manifest.path,
            });
            return;
        }
        self.by_id.insert(manifest.provider_id.clone(), self.providers.len());
        self.providers.push(manifest);
    }

    pub fn get(&self, provider_id: &str) -> Option<&ProviderManifest> {
        self.by_id.get(provider_id).map(|&i| &self.providers[i])
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.by_id.contains_key(provider_id)
    }

    /// Providers in discovery order.
    pub fn providers(&self) -> &[ProviderManifest] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn collisions(&self) -> &[ProviderIdCollision] {
        &self.collisions
    }

    pub fn skipped(&self) -> &[SkippedManifest] {
        &self.skipped
    }
}

/// Walks manifest roots and produces a [`ManifestCatalog`].
#[derive(Debug, Clone, Default)]
pub struct ManifestStore {
    roots: Vec<PathBuf>,
}

impl ManifestStore {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Walk every root and parse each provider directory found.
    ///
    /// A provider directory is any directory holding a descriptor file; its
    /// subdirectories are not searched further. Missing roots are skipped.
    /// Unparseable providers are logged, recorded as skipped, and left out.
    pub fn discover(&self) -> ManifestCatalog {
        let mut catalog = ManifestCatalog::default();
        for root in &self.roots {
            if !root.is_dir() {
                log::debug!("Manifest root {} does not exist; skipping", root.display());
                continue;
            }
            self.walk(root, &mut catalog);
        }
        log::info!(
            "Discovered {} providers across {} roots ({} skipped, {} id collisions)",
            catalog.len(),
            self.roots.len(),
            catalog.skipped.len(),
            catalog.collisions.len()
        );
        catalog
    }

    fn walk(&self, dir: &Path, catalog: &mut ManifestCatalog) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot read manifest directory {}: {}", dir.display(), e);
                return;
            }
        };

        // Symlinked directories are not followed.
        let mut subdirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| match entry.file_type() {
                Ok(kind) if kind.is_symlink() => {
                    log::debug!("Not following symlink {}", entry.path().display());
                    false
                }
                Ok(kind) => kind.is_dir(),
                Err(_) => false,
            })
            .map(|entry| entry.path())
            .collect();
        subdirs.sort();

        for path in subdirs {
            if !path.join(DESCRIPTOR_FILE).is_file() {
                self.walk(&path, catalog);
                continue;
            }
            match ProviderManifest::load(&path) {
                Ok(manifest) => {
                    log::debug!(
                        "Found provider '{}' at {} ({} endpoints)",
                        manifest.provider_id,
                        path.display(),
                        manifest.endpoint_names().len()
                    );
                    catalog.insert(manifest);
                }
                Err(e) => {
                    log::warn!("Skipping provider at {}: {}", path.display(), e);
                    catalog.skipped.push(SkippedManifest {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

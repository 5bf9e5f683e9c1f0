//! Provider manifests: discovery and parsing of provider directories.
//!
//! Discovery is cheap and performs no provider I/O. It produces an
//! immutable [`ManifestCatalog`] that the resolver and registry share.

pub mod manifest;
pub mod store;

pub use manifest::{ProviderManifest, ProviderMetadata, DESCRIPTOR_FILE};
pub use store::{ManifestCatalog, ManifestStore, ProviderIdCollision, SkippedManifest};

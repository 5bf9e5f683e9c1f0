//! # skillgate
//!
//! A capability-gated agent loop. A language model works on a task with the
//! capabilities (tools) currently loaded; when it asks for one that is not
//! loaded, the orchestrator pauses the task, resolves the name to a provider
//! manifest, loads that provider exactly once, and asks the model again with
//! the expanded capability set.
//!
//! - [`manifests`] - provider manifest discovery
//! - [`capabilities`] - registry with single-flight loading, and the resolver
//! - [`mcp`] - the default provider connector (MCP over stdio or HTTP)
//! - [`tools`] - capability executor and built-in capabilities
//! - [`llms`] - model gateway
//! - [`agents`] - orchestrator state machine

pub mod agents;
pub mod capabilities;
pub mod config;
pub mod llms;
pub mod manifests;
pub mod mcp;
pub mod tools;
pub mod types;
pub mod utilities;

pub use agents::{Orchestrator, TaskReport};
pub use capabilities::{CapabilityRegistry, CapabilityResolver};
pub use manifests::{ManifestCatalog, ManifestStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

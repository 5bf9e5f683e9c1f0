//! System prompt assembly.
//!
//! Rebuilt on every model call so it always reflects the current manifest
//! snapshot and the conversation's loaded providers.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::capabilities::{CapabilityDescriptor, CapabilityRegistry};

const PREAMBLE: &str = "You are an agent that completes the user's task by calling capabilities.\n\
Call a capability only if it is listed under \"Available capabilities\". \
If the task needs something no available capability provides, call the capability \
you need by the name you expect it to have (for example `web_search_query`); the runtime \
will try to load a provider for it and tell you what happened. \
When you have everything you need, answer with plain text and no capability calls.";

/// Build the system prompt for one model call.
pub fn build_system_prompt(
    registry: &CapabilityRegistry,
    loaded_providers: &BTreeSet<String>,
    capabilities: &[CapabilityDescriptor],
) -> String {
    let mut prompt = String::from(PREAMBLE);

    let catalog = registry.catalog();
    if !catalog.is_empty() {
        prompt.push_str("\n\n## Providers\n");
        for manifest in catalog.providers() {
            let status = if loaded_providers.contains(&manifest.provider_id) {
                "loaded"
            } else if manifest.connection.is_some() {
                "loadable, has endpoints"
            } else {
                "loadable, guidance only"
            };
            let _ = writeln!(prompt, "- {} ({}): {}", manifest.provider_id, status, manifest.summary());
        }
    }

    if capabilities.is_empty() {
        prompt.push_str("\n\n## Available capabilities\n(none)\n");
    } else {
        prompt.push_str("\n\n## Available capabilities\n");
        for descriptor in capabilities {
            let _ = writeln!(prompt, "- {} [{}]", descriptor.name, descriptor.provider_id);
        }
    }

    for provider_id in loaded_providers {
        let Some(guidance) = registry.guidance(provider_id).filter(|g| !g.trim().is_empty()) else {
            continue;
        };
        let _ = write!(prompt, "\n## Guidance: {}\n{}\n", provider_id, guidance.trim());
    }

    prompt
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capabilities::testing::{manifest, StubConnector};
    use crate::manifests::ManifestCatalog;

    #[test]
    fn test_prompt_lists_catalog_capabilities_and_guidance() {
        let mut guide_only = manifest("style-guide", &[]);
        guide_only.guidance = "Always answer in haiku.".to_string();
        let catalog = ManifestCatalog::from_manifests(vec![manifest("weather", &["weather"]), guide_only]);
        let registry = CapabilityRegistry::new(Arc::new(catalog), Arc::new(StubConnector::new()));

        let loaded: BTreeSet<String> = ["style-guide".to_string()].into_iter().collect();
        let capabilities = vec![CapabilityDescriptor::new("current_time", "builtin", "Clock")];
        let prompt = build_system_prompt(&registry, &loaded, &capabilities);

        assert!(prompt.contains("- weather (loadable, has endpoints): weather provider"));
        assert!(prompt.contains("- style-guide (loaded): style-guide provider"));
        assert!(prompt.contains("- current_time [builtin]"));
        assert!(prompt.contains("## Guidance: style-guide\nAlways answer in haiku."));
        assert!(!prompt.contains("## Guidance: weather"));
    }

    #[test]
    fn test_prompt_without_capabilities() {
        let registry = CapabilityRegistry::new(
            Arc::new(ManifestCatalog::default()),
            Arc::new(StubConnector::new()),
        );
        let prompt = build_system_prompt(&registry, &BTreeSet::new(), &[]);
        assert!(prompt.contains("(none)"));
        assert!(!prompt.contains("## Providers"));
    }
}

//! Maps a capability name that no loaded provider exports to the provider
//! that would most likely supply it.
//!
//! Three strategies run in order; the first one with any candidate wins and
//! its first candidate in manifest order is returned:
//!
//! 1. provider id and capability name contain one another;
//! 2. an endpoint name declared in the provider's connection config appears
//!    in the capability name;
//! 3. the leading token of the capability name (up to the first `_` or `-`)
//!    appears in the provider id.
//!
//! Matching is case-sensitive and a pure function of its inputs.

use std::fmt;

use crate::manifests::{ManifestCatalog, ProviderManifest};

/// Which strategy produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStrategy {
    ProviderId,
    EndpointName,
    LeadingToken,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStrategy::ProviderId => write!(f, "provider-id"),
            MatchStrategy::EndpointName => write!(f, "endpoint-name"),
            MatchStrategy::LeadingToken => write!(f, "leading-token"),
        }
    }
}

/// Result of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub provider_id: String,
    pub strategy: MatchStrategy,
}

/// Stateless resolver over a manifest snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityResolver;

impl CapabilityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Find the provider for `capability_name` among `catalog`'s providers.
    pub fn resolve(&self, capability_name: &str, catalog: &ManifestCatalog) -> Option<Resolution> {
        self.resolve_in(capability_name, catalog.providers())
    }

    /// Same as [`resolve`](Self::resolve) over an explicit manifest list.
    pub fn resolve_in(&self, capability_name: &str, manifests: &[ProviderManifest]) -> Option<Resolution> {
        if capability_name.is_empty() {
            return None;
        }

        let strategies: [(MatchStrategy, fn(&str, &ProviderManifest) -> bool); 3] = [
            (MatchStrategy::ProviderId, matches_provider_id),
            (MatchStrategy::EndpointName, matches_endpoint_name),
            (MatchStrategy::LeadingToken, matches_leading_token),
        ];

        for (strategy, matches) in strategies {
            if let Some(manifest) = manifests.iter().find(|m| matches(capability_name, m)) {
                log::debug!(
                    "Resolved '{}' to provider '{}' via {}",
                    capability_name,
                    manifest.provider_id,
                    strategy
                );
                return Some(Resolution {
                    provider_id: manifest.provider_id.clone(),
                    strategy,
                });
            }
        }

        log::debug!("No provider matches '{}'", capability_name);
        None
    }
}

fn matches_provider_id(name: &str, manifest: &ProviderManifest) -> bool {
    let id = manifest.provider_id.as_str();
    !id.is_empty() && (name.contains(id) || id.contains(name))
}

fn matches_endpoint_name(name: &str, manifest: &ProviderManifest) -> bool {
    manifest
        .endpoint_names()
        .into_iter()
        .any(|endpoint| !endpoint.is_empty() && name.contains(endpoint))
}

fn matches_leading_token(name: &str, manifest: &ProviderManifest) -> bool {
    leading_token(name).is_some_and(|token| manifest.provider_id.contains(token))
}

/// The part of `name` before the first `_` or `-`, if non-empty.
pub fn leading_token(name: &str) -> Option<&str> {
    name.split(['_', '-']).next().filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::manifest;

    fn resolve(name: &str, manifests: &[ProviderManifest]) -> Option<Resolution> {
        CapabilityResolver::new().resolve_in(name, manifests)
    }

    #[test]
    fn test_leading_token_resolves_web_search() {
        let manifests = vec![manifest("weather", &[]), manifest("web-search", &[])];
        let resolution = resolve("web_search_query", &manifests).unwrap();
        assert_eq!(resolution.provider_id, "web-search");
        assert_eq!(resolution.strategy, MatchStrategy::LeadingToken);
    }

    #[test]
    fn test_provider_id_substring_either_way() {
        let manifests = vec![manifest("calendar", &[])];
        assert_eq!(
            resolve("calendar_create_event", &manifests).unwrap().strategy,
            MatchStrategy::ProviderId
        );
        // Capability name contained in the provider id.
        assert_eq!(resolve("calend", &manifests).unwrap().provider_id, "calendar");
    }

    #[test]
    fn test_endpoint_name_beats_leading_token() {
        let manifests = vec![
            manifest("get-things", &[]),
            manifest("maps", &["geocoder"]),
        ];
        // "get" would match "get-things" by leading token, but strategy 2
        // finds the declared endpoint first.
        let resolution = resolve("get_geocoder_result", &manifests).unwrap();
        assert_eq!(resolution.provider_id, "maps");
        assert_eq!(resolution.strategy, MatchStrategy::EndpointName);
    }

    #[test]
    fn test_first_candidate_in_discovery_order_wins() {
        let manifests = vec![manifest("web-search", &[]), manifest("web-fetch", &[])];
        assert_eq!(resolve("web_anything", &manifests).unwrap().provider_id, "web-search");

        let reversed = vec![manifest("web-fetch", &[]), manifest("web-search", &[])];
        assert_eq!(resolve("web_anything", &reversed).unwrap().provider_id, "web-fetch");
    }

    #[test]
    fn test_no_match() {
        let manifests = vec![manifest("weather", &["forecast"]), manifest("web-search", &[])];
        assert_eq!(resolve("nonexistent_tool", &manifests), None);
    }

    #[test]
    fn test_empty_inputs_never_match() {
        let manifests = vec![manifest("weather", &[])];
        assert_eq!(resolve("", &manifests), None);
        assert_eq!(resolve("_leading_separator", &[manifest("x", &[])]), None);
        assert_eq!(resolve("anything", &[]), None);
    }

    #[test]
    fn test_resolution_is_case_sensitive() {
        let manifests = vec![manifest("weather", &[])];
        assert_eq!(resolve("WEATHER_now", &manifests), None);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let manifests = vec![manifest("alpha", &["a"]), manifest("beta", &["b"])];
        let first = resolve("b_tool", &manifests);
        for _ in 0..10 {
            assert_eq!(resolve("b_tool", &manifests), first);
        }
    }

    #[test]
    fn test_leading_token() {
        assert_eq!(leading_token("web_search_query"), Some("web"));
        assert_eq!(leading_token("web-search_query"), Some("web"));
        assert_eq!(leading_token("plain"), Some("plain"));
        assert_eq!(leading_token("-x"), None);
    }
}

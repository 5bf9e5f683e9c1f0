//! Provider manifest: one directory holding a `SKILL.md` descriptor and an
//! optional connection config.
//!
//! The descriptor is Markdown with an optional YAML front-matter block:
//!
//! ```text
//! ---
//! name: Web Search
//! description: Search the public web
//! tags: [search, web]
//! ---
//! Use `web_search_query` for fresh facts. Prefer short queries.
//! ```
//!
//! The front-matter becomes [`ProviderMetadata`]; the body becomes the
//! provider's guidance text, shown to the model once the provider is loaded.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::mcp::config::{ConnectionConfig, CONNECTION_CONFIG_FILE};
use crate::utilities::errors::ConfigParseError;

/// File name of the provider descriptor.
pub const DESCRIPTOR_FILE: &str = "SKILL.md";

/// Length of the catalog summary shown before a provider is loaded.
pub const SUMMARY_CHARS: usize = 200;

/// Front-matter fields. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Display name; defaults to the provider id.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: String,
    /// Accepts a YAML list or a comma-separated string.
    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub dependencies: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub priority: i64,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

impl Default for ProviderMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            version: default_version(),
            author: String::new(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            category: default_category(),
            priority: 0,
        }
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        StringOrList::Many(v) => v,
        StringOrList::Nothing(()) => Vec::new(),
    })
}

/// Everything known about a provider before it is loaded.
#[derive(Debug, Clone)]
pub struct ProviderManifest {
    /// Name of the provider's directory. Unique across all roots.
    pub provider_id: String,
    /// Directory that holds the descriptor.
    pub path: PathBuf,
    pub metadata: ProviderMetadata,
    /// Descriptor body after the front-matter, trimmed.
    pub guidance: String,
    /// `None` when the directory has no connection config.
    pub connection: Option<ConnectionConfig>,
}

impl ProviderManifest {
    /// Parse the provider rooted at `dir`. The directory must hold a
    /// descriptor; the connection config is optional.
    pub fn load(dir: &Path) -> Result<Self, ConfigParseError> {
        let provider_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let descriptor_path = dir.join(DESCRIPTOR_FILE);
        let raw = std::fs::read_to_string(&descriptor_path).map_err(|source| ConfigParseError::Io {
            path: descriptor_path.clone(),
            source,
        })?;
        let (mut metadata, guidance) = parse_descriptor(&raw, &descriptor_path)?;
        if metadata.name.trim().is_empty() {
            metadata.name = provider_id.clone();
        }

        let config_path = dir.join(CONNECTION_CONFIG_FILE);
        let connection = if config_path.is_file() {
            Some(ConnectionConfig::load(&config_path)?)
        } else {
            None
        };

        Ok(Self {
            provider_id,
            path: dir.to_path_buf(),
            metadata,
            guidance,
            connection,
        })
    }

    /// Endpoint names in declaration order; empty without a connection config.
    pub fn endpoint_names(&self) -> Vec<&str> {
        self.connection
            .as_ref()
            .map(|c| c.endpoint_names().collect())
            .unwrap_or_default()
    }

    /// Short single-line description for the provider catalog.
    pub fn summary(&self) -> String {
        let source = if self.metadata.description.trim().is_empty() {
            &self.guidance
        } else {
            &self.metadata.description
        };
        let flat = source.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() <= SUMMARY_CHARS {
            flat
        } else {
            let cut: String = flat.chars().take(SUMMARY_CHARS).collect();
            format!("{}...", cut.trim_end())
        }
    }
}

static FRONT_MATTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").unwrap()
});

/// Split a descriptor into metadata and guidance.
///
/// A descriptor without front-matter is accepted: metadata falls back to
/// defaults and the whole text is guidance.
pub fn parse_descriptor(raw: &str, path: &Path) -> Result<(ProviderMetadata, String), ConfigParseError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

    let Some(captures) = FRONT_MATTER.captures(raw) else {
        if raw.starts_with("---") {
            return Err(ConfigParseError::UnterminatedFrontMatter {
                path: path.to_path_buf(),
            });
        }
        return Ok((ProviderMetadata::default(), raw.trim().to_string()));
    };

    let block = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let body_start = captures.get(0).map(|m| m.end()).unwrap_or(0);

    let metadata = if block.trim().is_empty() {
        ProviderMetadata::default()
    } else {
        serde_yaml::from_str::<Option<ProviderMetadata>>(block)
            .map_err(|source| ConfigParseError::FrontMatter {
                path: path.to_path_buf(),
                source,
            })?
            .unwrap_or_default()
    };

    Ok((metadata, raw[body_start..].trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<(ProviderMetadata, String), ConfigParseError> {
        parse_descriptor(raw, Path::new("SKILL.md"))
    }

    #[test]
    fn test_front_matter_and_body() {
        let (meta, body) = parse(
            "---\nname: Weather\ndescription: Forecasts and alerts\ntags: [weather, geo]\npriority: 3\n---\n\n# Usage\nCall get_forecast.\n",
        )
        .unwrap();
        assert_eq!(meta.name, "Weather");
        assert_eq!(meta.tags, vec!["weather", "geo"]);
        assert_eq!(meta.priority, 3);
        assert_eq!(meta.version, "1.0.0");
        assert_eq!(meta.category, "general");
        assert_eq!(body, "# Usage\nCall get_forecast.");
    }

    #[test]
    fn test_tags_as_comma_separated_string() {
        let (meta, _) = parse("---\ntags: search, web ,\n---\nbody").unwrap();
        assert_eq!(meta.tags, vec!["search", "web"]);
    }

    #[test]
    fn test_missing_front_matter_uses_defaults() {
        let (meta, body) = parse("Just guidance text.\n").unwrap();
        assert_eq!(meta, ProviderMetadata::default());
        assert_eq!(body, "Just guidance text.");
    }

    #[test]
    fn test_empty_front_matter_block() {
        let (meta, body) = parse("---\n\n---\nbody").unwrap();
        assert_eq!(meta.category, "general");
        assert_eq!(body, "body");
    }

    #[test]
    fn test_unterminated_front_matter_is_an_error() {
        let err = parse("---\nname: x\nno closing fence\n").unwrap_err();
        assert!(matches!(err, ConfigParseError::UnterminatedFrontMatter { .. }));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let err = parse("---\nname: [unclosed\n---\nbody").unwrap_err();
        assert!(matches!(err, ConfigParseError::FrontMatter { .. }));
    }

    #[test]
    fn test_summary_is_truncated() {
        let manifest = ProviderManifest {
            provider_id: "long".to_string(),
            path: PathBuf::from("long"),
            metadata: ProviderMetadata {
                description: "word ".repeat(100),
                ..ProviderMetadata::default()
            },
            guidance: String::new(),
            connection: None,
        };
        let summary = manifest.summary();
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= SUMMARY_CHARS + 3);
    }

    #[test]
    fn test_summary_falls_back_to_guidance() {
        let manifest = ProviderManifest {
            provider_id: "g".to_string(),
            path: PathBuf::from("g"),
            metadata: ProviderMetadata::default(),
            guidance: "Use\nthis   well.".to_string(),
            connection: None,
        };
        assert_eq!(manifest.summary(), "Use this well.");
    }
}

//! KDL schema for config.kdl.
//!
//! This module provides:
//! - The `FluxoConfig` struct mirroring the file
//! - Conversion to and from `KdlDocument`
//! - Validation and merging
//! - String-keyed access for `fluxo config get/set`

use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Keys understood in config.kdl, in display order.
pub const CONFIG_KEYS: [&str; 5] = [
    "output-format",
    "items-per-page",
    "fetch-cap",
    "import-batch-size",
    "search-debounce-ms",
];

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// output-format "human"  // or "json"
/// items-per-page 25
/// fetch-cap 10000
/// import-batch-size 100
/// search-debounce-ms 500
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxoConfig {
    pub output_format: Option<OutputFormat>,
    /// Rows per page for `process list`
    pub items_per_page: Option<u32>,
    /// Most rows fetched for dashboard and current-state views
    pub fetch_cap: Option<u32>,
    /// Rows per import transaction
    pub import_batch_size: Option<u32>,
    /// Quiet period before a search fires
    pub search_debounce_ms: Option<u64>,
}

impl FluxoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (key, value) in [
            ("items-per-page", self.items_per_page),
            ("fetch-cap", self.fetch_cap),
            ("import-batch-size", self.import_batch_size),
        ] {
            if value == Some(0) {
                return Err(format!("{} must be at least 1", key));
            }
        }
        if let Some(per_page) = self.items_per_page {
            if per_page > 1000 {
                return Err(format!("items-per-page must be at most 1000, got {}", per_page));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown nodes and bad values are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(s) = first_string(doc, "output-format") {
            config.output_format = OutputFormat::parse(s);
        }
        config.items_per_page = first_positive(doc, "items-per-page");
        config.fetch_cap = first_positive(doc, "fetch-cap");
        config.import_batch_size = first_positive(doc, "import-batch-size");
        config.search_debounce_ms = first_integer(doc, "search-debounce-ms")
            .and_then(|i| u64::try_from(i).ok());

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(format) = self.output_format {
            let mut node = KdlNode::new("output-format");
            node.push(KdlEntry::new(KdlValue::String(format.as_str().to_string())));
            doc.nodes_mut().push(node);
        }

        for (key, value) in [
            ("items-per-page", self.items_per_page.map(i128::from)),
            ("fetch-cap", self.fetch_cap.map(i128::from)),
            ("import-batch-size", self.import_batch_size.map(i128::from)),
            ("search-debounce-ms", self.search_debounce_ms.map(i128::from)),
        ] {
            if let Some(value) = value {
                let mut node = KdlNode::new(key);
                node.push(KdlEntry::new(KdlValue::Integer(value)));
                doc.nodes_mut().push(node);
            }
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &FluxoConfig) {
        if other.output_format.is_some() {
            self.output_format = other.output_format;
        }
        if other.items_per_page.is_some() {
            self.items_per_page = other.items_per_page;
        }
        if other.fetch_cap.is_some() {
            self.fetch_cap = other.fetch_cap;
        }
        if other.import_batch_size.is_some() {
            self.import_batch_size = other.import_batch_size;
        }
        if other.search_debounce_ms.is_some() {
            self.search_debounce_ms = other.search_debounce_ms;
        }
    }

    /// Read one key as a string, if set.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(match key {
            "output-format" => self.output_format.map(|f| f.as_str().to_string()),
            "items-per-page" => self.items_per_page.map(|v| v.to_string()),
            "fetch-cap" => self.fetch_cap.map(|v| v.to_string()),
            "import-batch-size" => self.import_batch_size.map(|v| v.to_string()),
            "search-debounce-ms" => self.search_debounce_ms.map(|v| v.to_string()),
            _ => return Err(unknown_key(key)),
        })
    }

    /// Set one key from its string form, validating the result.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let number = || {
            value.parse::<u64>().map_err(|_| {
                Error::InvalidInput(format!("{} expects a positive integer, got '{}'", key, value))
            })
        };
        let small = |n: u64| {
            u32::try_from(n)
                .map_err(|_| Error::InvalidInput(format!("{} is too large: {}", key, n)))
        };

        let mut updated = self.clone();
        match key {
            "output-format" => {
                updated.output_format = Some(OutputFormat::parse(value).ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "output-format must be 'json' or 'human', got '{}'",
                        value
                    ))
                })?);
            }
            "items-per-page" => updated.items_per_page = Some(small(number()?)?),
            "fetch-cap" => updated.fetch_cap = Some(small(number()?)?),
            "import-batch-size" => updated.import_batch_size = Some(small(number()?)?),
            "search-debounce-ms" => updated.search_debounce_ms = Some(number()?),
            _ => return Err(unknown_key(key)),
        }
        updated.validate().map_err(Error::InvalidInput)?;
        *self = updated;
        Ok(())
    }

    /// Read config.kdl at `path`. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path)?;
        let doc = text.parse::<KdlDocument>().map_err(|e| {
            Error::InvalidInput(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Self::from_kdl(&doc))
    }

    /// Write config.kdl to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_kdl().to_string())?;
        Ok(())
    }
}

fn unknown_key(key: &str) -> Error {
    Error::InvalidInput(format!(
        "Unknown config key '{}'. Valid keys: {}",
        key,
        CONFIG_KEYS.join(", ")
    ))
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn first_string<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a str> {
    first_value(doc, name).and_then(|v| v.as_string())
}

fn first_integer(doc: &KdlDocument, name: &str) -> Option<i128> {
    first_value(doc, name).and_then(|v| v.as_integer())
}

fn first_positive(doc: &KdlDocument, name: &str) -> Option<u32> {
    first_integer(doc, name)
        .filter(|i| *i > 0)
        .and_then(|i| u32::try_from(i).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_kdl() {
        let doc: KdlDocument = r#"
            output-format "human"
            items-per-page 25
            fetch-cap 5000
            import-batch-size 50
            search-debounce-ms 300
            unknown-node "ignored"
        "#
        .parse()
        .unwrap();

        let config = FluxoConfig::from_kdl(&doc);
        assert_eq!(config.output_format, Some(OutputFormat::Human));
        assert_eq!(config.items_per_page, Some(25));
        assert_eq!(config.fetch_cap, Some(5000));
        assert_eq!(config.import_batch_size, Some(50));
        assert_eq!(config.search_debounce_ms, Some(300));
    }

    #[test]
    fn test_from_kdl_ignores_bad_values() {
        let doc: KdlDocument = r#"
            output-format "xml"
            items-per-page 0
            fetch-cap -3
        "#
        .parse()
        .unwrap();

        assert_eq!(FluxoConfig::from_kdl(&doc), FluxoConfig::default());
    }

    #[test]
    fn test_kdl_roundtrip() {
        let config = FluxoConfig {
            output_format: Some(OutputFormat::Json),
            items_per_page: Some(20),
            fetch_cap: None,
            import_batch_size: Some(250),
            search_debounce_ms: Some(800),
        };
        let text = config.to_kdl().to_string();
        let doc: KdlDocument = text.parse().unwrap();
        assert_eq!(FluxoConfig::from_kdl(&doc), config);
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = FluxoConfig {
            items_per_page: Some(10),
            fetch_cap: Some(100),
            ..Default::default()
        };
        base.merge(&FluxoConfig {
            items_per_page: Some(50),
            ..Default::default()
        });
        assert_eq!(base.items_per_page, Some(50));
        assert_eq!(base.fetch_cap, Some(100));
    }

    #[test]
    fn test_set_and_get() {
        let mut config = FluxoConfig::new();
        config.set("items-per-page", "30").unwrap();
        config.set("output-format", "HUMAN").unwrap();
        assert_eq!(config.get("items-per-page").unwrap().as_deref(), Some("30"));
        assert_eq!(config.get("output-format").unwrap().as_deref(), Some("human"));
        assert_eq!(config.get("fetch-cap").unwrap(), None);

        assert!(config.set("items-per-page", "0").is_err());
        assert!(config.set("items-per-page", "abc").is_err());
        assert!(config.set("nope", "1").is_err());
        assert!(config.get("nope").is_err());
        assert_eq!(config.items_per_page, Some(30));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = FluxoConfig::load(&dir.path().join("config.kdl")).unwrap();
        assert_eq!(config, FluxoConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.kdl");
        let config = FluxoConfig {
            fetch_cap: Some(2000),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(FluxoConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_invalid_kdl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.kdl");
        fs::write(&path, "items-per-page \"unterminated").unwrap();
        assert!(FluxoConfig::load(&path).is_err());
    }
}

//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Data-dir config.kdl (`<data dir>/config.kdl`)
//! 3. System config.kdl (`~/.config/fluxo/config.kdl`)
//! 4. Built-in defaults

use crate::Result;
use crate::config::{FluxoConfig, OutputFormat};
use crate::import::DEFAULT_BATCH_SIZE;
use crate::query::DEFAULT_ITEMS_PER_PAGE;
use crate::sequencer::{DEFAULT_DEBOUNCE, Debouncer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the system config directory.
pub const CONFIG_DIR_ENV: &str = "FLUXO_CONFIG_DIR";

/// Rows fetched for current-state views when nothing else is configured.
pub const DEFAULT_FETCH_CAP: u32 = 10_000;

const CONFIG_FILE: &str = "config.kdl";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from the data directory's config.kdl
    DataDir,
    /// Value from the system config.kdl
    System,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::DataDir => write!(f, "data-dir"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub output_format: Resolved<OutputFormat>,
    pub items_per_page: Resolved<u32>,
    pub fetch_cap: Resolved<u32>,
    pub import_batch_size: Resolved<u32>,
    pub search_debounce_ms: Resolved<u64>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
            items_per_page: Resolved::new(DEFAULT_ITEMS_PER_PAGE, ValueSource::Default),
            fetch_cap: Resolved::new(DEFAULT_FETCH_CAP, ValueSource::Default),
            import_batch_size: Resolved::new(DEFAULT_BATCH_SIZE as u32, ValueSource::Default),
            search_debounce_ms: Resolved::new(
                DEFAULT_DEBOUNCE.as_millis() as u64,
                ValueSource::Default,
            ),
        }
    }
}

impl ResolvedConfig {
    /// A search debouncer using the configured quiet period.
    pub fn debouncer(&self) -> Debouncer {
        Debouncer::new(Duration::from_millis(self.search_debounce_ms.value))
    }

    /// Every key as `(key, value, source)`, in display order.
    pub fn entries(&self) -> Vec<(&'static str, String, ValueSource)> {
        vec![
            (
                "output-format",
                self.output_format.value.as_str().to_string(),
                self.output_format.source,
            ),
            (
                "items-per-page",
                self.items_per_page.value.to_string(),
                self.items_per_page.source,
            ),
            (
                "fetch-cap",
                self.fetch_cap.value.to_string(),
                self.fetch_cap.source,
            ),
            (
                "import-batch-size",
                self.import_batch_size.value.to_string(),
                self.import_batch_size.source,
            ),
            (
                "search-debounce-ms",
                self.search_debounce_ms.value.to_string(),
                self.search_debounce_ms.source,
            ),
        ]
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_format: Option<OutputFormat>,
    pub items_per_page: Option<u32>,
    pub import_batch_size: Option<u32>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_items_per_page(mut self, per_page: u32) -> Self {
        self.items_per_page = Some(per_page);
        self
    }

    pub fn with_import_batch_size(mut self, batch_size: u32) -> Self {
        self.import_batch_size = Some(batch_size);
        self
    }
}

/// Path of the system-level config.kdl, if a config directory is known.
pub fn system_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }
    }
    dirs::config_dir().map(|dir| dir.join("fluxo").join(CONFIG_FILE))
}

/// Path of the data-dir config.kdl.
pub fn data_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Pick the highest-precedence value among the layers.
fn pick<T: Clone>(
    cli: Option<T>,
    data: Option<T>,
    system: Option<T>,
    default: Resolved<T>,
) -> Resolved<T> {
    if let Some(value) = cli {
        Resolved::new(value, ValueSource::CliFlag)
    } else if let Some(value) = data {
        Resolved::new(value, ValueSource::DataDir)
    } else if let Some(value) = system {
        Resolved::new(value, ValueSource::System)
    } else {
        default
    }
}

/// Resolve already-loaded layers.
pub fn resolve_layers(
    system: &FluxoConfig,
    data: &FluxoConfig,
    overrides: &ConfigOverrides,
) -> ResolvedConfig {
    let defaults = ResolvedConfig::default();
    ResolvedConfig {
        output_format: pick(
            overrides.output_format,
            data.output_format,
            system.output_format,
            defaults.output_format,
        ),
        items_per_page: pick(
            overrides.items_per_page,
            data.items_per_page,
            system.items_per_page,
            defaults.items_per_page,
        ),
        fetch_cap: pick(None, data.fetch_cap, system.fetch_cap, defaults.fetch_cap),
        import_batch_size: pick(
            overrides.import_batch_size,
            data.import_batch_size,
            system.import_batch_size,
            defaults.import_batch_size,
        ),
        search_debounce_ms: pick(
            None,
            data.search_debounce_ms,
            system.search_debounce_ms,
            defaults.search_debounce_ms,
        ),
    }
}

/// Resolve configuration with full precedence chain.
pub fn resolve_config(data_dir: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let system = match system_config_path() {
        Some(path) => FluxoConfig::load(&path)?,
        None => FluxoConfig::new(),
    };
    let data = FluxoConfig::load(&data_config_path(data_dir))?;
    Ok(resolve_layers(&system, &data, overrides))
}

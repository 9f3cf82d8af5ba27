//! Configuration for Fluxo.
//!
//! ## config.kdl - application settings
//!
//! Located at:
//! - System: `~/.config/fluxo/config.kdl` (or `$FLUXO_CONFIG_DIR/config.kdl`)
//! - Data dir: `<data dir>/config.kdl`
//!
//! Contains:
//! - `output-format` - "json" or "human"
//! - `items-per-page` - Default page size for listings
//! - `fetch-cap` - Most rows fetched for dashboard and current-state views
//! - `import-batch-size` - Rows per import transaction
//! - `search-debounce-ms` - Quiet period before a search fires. The CLI runs
//!   one query per invocation and never debounces; interactive front ends
//!   built on the library get it from [`ResolvedConfig::debouncer`].
//!
//! ## Precedence
//!
//! CLI flag > data-dir config > system config > defaults.
//! Use the [`resolver`] module for precedence resolution.
//!
//! Saved filter state lives in the store, not in config.kdl; see [`preferences`].

pub mod preferences;
pub mod resolver;
pub mod schema;

pub use preferences::{PREFERENCES_KEY, ViewPreferences};
pub use resolver::{
    ConfigOverrides, DEFAULT_FETCH_CAP, Resolved, ResolvedConfig, ValueSource, data_config_path,
    resolve_config, system_config_path,
};
pub use schema::{CONFIG_KEYS, FluxoConfig, OutputFormat};

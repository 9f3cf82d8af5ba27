//! CLI argument definitions for Fluxo.

use crate::import::parse_date;
use crate::models::{MovementFields, Origin};
use crate::query::{FilterState, SortField, SortOrder};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Fluxo - track administrative processes as they move between sectors.
///
/// Start with `fluxo system init`, then `fluxo process add` or `fluxo import`.
#[derive(Parser, Debug)]
#[command(name = "fluxo")]
#[command(author, version, about = "Track administrative processes across sectors", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Data directory holding the store and config.kdl.
    /// Can also be set via FLUXO_DATA_DIR environment variable.
    #[arg(short = 'D', long = "data-dir", global = true, env = "FLUXO_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// System administration commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },

    /// Account and session commands
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Process and movement commands
    Process {
        #[command(subcommand)]
        command: ProcessCommands,
    },

    /// Show totals, deadline buckets and grouped counts
    Dashboard {
        /// Reference date for deadline classification (default: today)
        #[arg(long, value_parser = parse_cli_date)]
        today: Option<NaiveDate>,
    },

    /// Saved filter commands
    Filters {
        #[command(subcommand)]
        command: FiltersCommands,
    },

    /// Import movements from a CSV spreadsheet export
    Import {
        /// CSV file to import
        file: PathBuf,

        /// Rows per transaction (default from config, else 100)
        #[arg(long)]
        batch_size: Option<u32>,
    },

    /// Export the current state of every process
    Export {
        /// Output format: csv or report
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Show the audit log, newest first
    Log {
        /// Maximum number of entries
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// System subcommands
#[derive(Subcommand, Debug)]
pub enum SystemCommands {
    /// Create the data directory and store
    Init,

    /// Show version and build information
    Version,
}

/// User subcommands
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// Register a new user
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
        /// Password confirmation; must match --password
        #[arg(long)]
        confirm: String,
    },

    /// Grant administrator rights to a registered user (only while no admin exists)
    BootstrapAdmin {
        #[arg(long)]
        email: String,
    },

    /// Start a session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// End the current session
    Logout,

    /// Show who commands act as
    Whoami,
}

/// Field values shared by add, move and edit.
#[derive(Args, Debug, Clone, Default)]
pub struct FieldArgs {
    /// Current sector
    #[arg(long)]
    pub sector: Option<String>,

    /// Origin (CGOF, Gabinete, Protocolo, Externo, Outros)
    #[arg(long)]
    pub origin: Option<String>,

    /// Interested party
    #[arg(long)]
    pub interested: Option<String>,

    #[arg(long)]
    pub subject: Option<String>,

    #[arg(long)]
    pub observations: Option<String>,

    /// Deadline (DD/MM/YYYY or YYYY-MM-DD)
    #[arg(long, value_parser = parse_cli_date)]
    pub deadline: Option<NaiveDate>,

    /// Exit date (DD/MM/YYYY or YYYY-MM-DD)
    #[arg(long, value_parser = parse_cli_date)]
    pub exit_date: Option<NaiveDate>,

    /// Mark as urgent (`--urgent false` to unmark)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub urgent: Option<bool>,
}

impl FieldArgs {
    pub fn into_fields(self) -> MovementFields {
        MovementFields {
            number: None,
            sector: self.sector,
            origin: self.origin,
            interested_party: self.interested,
            subject: self.subject,
            observations: self.observations,
            entry_date: None,
            exit_date: self.exit_date.map(Some),
            deadline: self.deadline.map(Some),
            urgent: self.urgent,
        }
    }
}

/// Filters shared by list, current and export.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Search number, interested party, subject, sector and observations
    #[arg(short, long)]
    pub search: Option<String>,

    /// Origin (CGOF, Gabinete, Protocolo, Externo, Outros)
    #[arg(long = "filter-origin", value_parser = parse_cli_origin)]
    pub origin: Option<String>,

    /// Sector substring
    #[arg(long = "filter-sector")]
    pub sector: Option<String>,

    /// Entry date from (inclusive)
    #[arg(long, value_parser = parse_cli_date)]
    pub from: Option<NaiveDate>,

    /// Entry date to (inclusive)
    #[arg(long, value_parser = parse_cli_date)]
    pub to: Option<NaiveDate>,

    /// Only urgent processes
    #[arg(long = "only-urgent")]
    pub urgent: bool,

    /// Only processes past their deadline
    #[arg(long)]
    pub overdue: bool,

    /// Only processes without a sector
    #[arg(long)]
    pub empty_sector: bool,

    /// Only movements without an exit date
    #[arg(long)]
    pub open: bool,
}

impl FilterArgs {
    /// Overlay these flags on a base state. Flags left unset keep the base value.
    pub fn apply_to(&self, state: &mut FilterState) {
        if let Some(ref search) = self.search {
            state.search_term = search.clone();
        }
        if let Some(ref origin) = self.origin {
            state.origin = origin.clone();
        }
        if let Some(ref sector) = self.sector {
            state.sector = sector.clone();
        }
        if self.from.is_some() {
            state.entry_date_start = self.from;
        }
        if self.to.is_some() {
            state.entry_date_end = self.to;
        }
        state.urgent |= self.urgent;
        state.overdue |= self.overdue;
        state.empty_sector |= self.empty_sector;
        state.empty_exit_date |= self.open;
    }

    pub fn to_state(&self) -> FilterState {
        let mut state = FilterState::default();
        self.apply_to(&mut state);
        state
    }
}

/// Process subcommands
#[derive(Subcommand, Debug)]
pub enum ProcessCommands {
    /// Register a new process
    Add {
        /// Process number
        #[arg(long)]
        number: String,

        /// Entry date (DD/MM/YYYY or YYYY-MM-DD)
        #[arg(long, value_parser = parse_cli_date)]
        entry_date: Option<NaiveDate>,

        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Record a new movement of an existing process
    Move {
        /// Process number
        number: String,

        /// Entry date of the new movement
        #[arg(long, value_parser = parse_cli_date)]
        entry_date: NaiveDate,

        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Edit one movement row in place
    Edit {
        /// Movement ID
        id: String,

        #[arg(long)]
        number: Option<String>,

        #[arg(long, value_parser = parse_cli_date)]
        entry_date: Option<NaiveDate>,

        #[command(flatten)]
        fields: FieldArgs,

        /// Remove the deadline
        #[arg(long, conflicts_with = "deadline")]
        clear_deadline: bool,

        /// Remove the exit date
        #[arg(long, conflicts_with = "exit_date")]
        clear_exit_date: bool,
    },

    /// Delete one movement row
    Delete {
        /// Movement ID
        id: String,
    },

    /// Show one movement row
    Show {
        /// Movement ID
        id: String,
    },

    /// Show every movement of a process, oldest first
    History {
        /// Process number
        number: String,
    },

    /// Query the movement history
    List {
        #[command(flatten)]
        filters: FilterArgs,

        /// Sort field (entry_date, number, sector, origin, deadline, interested_party, updated_at)
        #[arg(long)]
        sort: Option<String>,

        /// Sort order (asc, desc)
        #[arg(long)]
        order: Option<String>,

        #[arg(long)]
        page: Option<u32>,

        #[arg(long)]
        per_page: Option<u32>,

        /// Start from the saved filters
        #[arg(long)]
        saved: bool,

        /// Save the resulting filters
        #[arg(long)]
        save: bool,
    },

    /// Show the current movement of every process
    Current {
        #[command(flatten)]
        filters: FilterArgs,
    },
}

/// Saved filter subcommands
#[derive(Subcommand, Debug)]
pub enum FiltersCommands {
    /// Show the saved filters
    Show,

    /// Reset the saved filters
    Clear,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
        /// Write to the system config.kdl instead of the data directory's
        #[arg(long)]
        system: bool,
    },

    /// List all configuration values with their sources
    List,
}

/// Parse a date argument: `DD/MM/YYYY`, `YYYY-MM-DD`, or a spreadsheet serial.
pub fn parse_cli_date(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("invalid date '{}': use DD/MM/YYYY or YYYY-MM-DD", s))
}

/// Parse an origin filter into its canonical label. Unknown names are an error.
pub fn parse_cli_origin(s: &str) -> Result<String, String> {
    Origin::parse(s).map(|o| o.as_str().to_string()).ok_or_else(|| {
        format!(
            "unknown origin '{}': use one of {}",
            s,
            Origin::ALL.map(|o| o.as_str()).join(", ")
        )
    })
}

/// Parse sort arguments.
pub fn parse_sort(
    sort: Option<&str>,
    order: Option<&str>,
) -> Result<(Option<SortField>, Option<SortOrder>), String> {
    let field = sort
        .map(|s| SortField::parse(s).ok_or_else(|| format!("unknown sort field '{}'", s)))
        .transpose()?;
    let order = order
        .map(|s| SortOrder::parse(s).ok_or_else(|| format!("unknown sort order '{}'", s)))
        .transpose()?;
    Ok((field, order))
}

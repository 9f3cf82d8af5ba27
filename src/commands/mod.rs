//! Command implementations for the Fluxo CLI.
//!
//! Each public function opens the store in a data directory, performs one
//! operation, and returns a result that can be printed as JSON or as text.
//! Mutating operations append to the audit log.

use crate::accounts;
use crate::action_log;
use crate::config::{
    ConfigOverrides, FluxoConfig, ResolvedConfig, ValueSource, ViewPreferences, data_config_path,
    resolve_config, system_config_path,
};
use crate::export::{self, ExportFormat, ExportSummary};
use crate::import::{self, BatchReport, SkippedRow, StorageSink};
use crate::models::current::{process_history, resolve_current};
use crate::models::stats::{AggregateBucket, Dashboard, aggregate, classify_deadline};
use crate::models::{Actor, AuditAction, AuditEntry, MovementFields, MovementRecord, User};
use crate::query::{FilterState, QueryDescriptor};
use crate::storage::{QueryPage, Storage};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

fn date_cell(date: Option<NaiveDate>) -> String {
    export::format_date(date)
}

fn record_line(record: &MovementRecord) -> String {
    format!(
        "{}  {}  {:<20} {:<10} {}{}",
        record.id,
        date_cell(record.entry_date),
        if record.sector.is_empty() {
            "-"
        } else {
            record.sector.as_str()
        },
        record.origin.as_str(),
        record.number,
        if record.urgent { "  [urgente]" } else { "" }
    )
}

fn record_detail(record: &MovementRecord, today: NaiveDate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Process {} ({})", record.number, record.id);
    let _ = writeln!(out, "  Sector:      {}", record.sector);
    let _ = writeln!(out, "  Origin:      {}", record.origin);
    let _ = writeln!(out, "  Interested:  {}", record.interested_party);
    let _ = writeln!(out, "  Subject:     {}", record.subject);
    if !record.observations.is_empty() {
        let _ = writeln!(out, "  Notes:       {}", record.observations);
    }
    let _ = writeln!(out, "  Entry:       {}", date_cell(record.entry_date));
    let _ = writeln!(out, "  Exit:        {}", date_cell(record.exit_date));
    let _ = writeln!(
        out,
        "  Deadline:    {} ({})",
        date_cell(record.deadline),
        classify_deadline(record.deadline, today).label()
    );
    let _ = write!(out, "  Urgent:      {}", if record.urgent { "yes" } else { "no" });
    out
}

// === System ===

#[derive(Serialize)]
pub struct InitResult {
    pub initialized: bool,
    pub data_dir: String,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.initialized {
            format!("Initialized fluxo data directory at {}", self.data_dir)
        } else {
            format!("Already initialized at {}", self.data_dir)
        }
    }
}

/// Create the store in the data directory. Safe to run twice.
pub fn system_init(data_dir: &Path) -> Result<InitResult> {
    let existed = Storage::exists(data_dir);
    Storage::init(data_dir)?;
    Ok(InitResult {
        initialized: !existed,
        data_dir: data_dir.display().to_string(),
    })
}

#[derive(Serialize)]
pub struct VersionInfo {
    pub version: String,
    pub commit: String,
    pub build_timestamp: String,
}

impl Output for VersionInfo {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "fluxo {} ({} built {})",
            self.version, self.commit, self.build_timestamp
        )
    }
}

pub fn version() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: option_env!("FLUXO_GIT_COMMIT")
            .unwrap_or("unknown")
            .to_string(),
        build_timestamp: option_env!("FLUXO_BUILD_TIMESTAMP")
            .unwrap_or("unknown")
            .to_string(),
    }
}

// === Users ===

#[derive(Serialize)]
pub struct UserResult {
    pub action: &'static str,
    pub user: User,
}

impl Output for UserResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let admin = if self.user.is_admin { " [admin]" } else { "" };
        match self.action {
            "registered" => format!("Registered {} <{}>{}", self.user.name, self.user.email, admin),
            "promoted" => format!("{} is now an administrator", self.user.email),
            "logged_in" => format!("Logged in as {} <{}>{}", self.user.name, self.user.email, admin),
            "logged_out" => format!("Logged out {}", self.user.email),
            other => format!("{}: {}", other, self.user.email),
        }
    }
}

pub fn user_add(
    data_dir: &Path,
    email: &str,
    name: &str,
    password: &str,
    confirm: &str,
) -> Result<UserResult> {
    let mut storage = Storage::open(data_dir)?;
    let actor = accounts::current_actor(&storage)?;
    let user = accounts::register(&mut storage, email, name, password, confirm, &actor)?;
    Ok(UserResult {
        action: "registered",
        user,
    })
}

pub fn user_bootstrap_admin(data_dir: &Path, email: &str) -> Result<UserResult> {
    let mut storage = Storage::open(data_dir)?;
    let actor = accounts::current_actor(&storage)?;
    let user = accounts::bootstrap_admin(&mut storage, email, &actor)?;
    Ok(UserResult {
        action: "promoted",
        user,
    })
}

pub fn user_login(data_dir: &Path, email: &str, password: &str) -> Result<UserResult> {
    let mut storage = Storage::open(data_dir)?;
    let user = accounts::login(&mut storage, email, password)?;
    Ok(UserResult {
        action: "logged_in",
        user,
    })
}

pub fn user_logout(data_dir: &Path) -> Result<UserResult> {
    let mut storage = Storage::open(data_dir)?;
    let user = accounts::logout(&mut storage)?;
    Ok(UserResult {
        action: "logged_out",
        user,
    })
}

#[derive(Serialize)]
pub struct WhoAmI {
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub actor: Actor,
}

impl Output for WhoAmI {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.user {
            Some(ref user) => format!(
                "{} <{}>{}",
                user.name,
                user.email,
                if user.is_admin { " [admin]" } else { "" }
            ),
            None => format!("Not logged in (acting as {})", self.actor.name),
        }
    }
}

pub fn user_whoami(data_dir: &Path) -> Result<WhoAmI> {
    let storage = Storage::open(data_dir)?;
    let user = accounts::current_user(&storage)?;
    let actor = user
        .as_ref()
        .map(Actor::from)
        .unwrap_or_else(Actor::system);
    Ok(WhoAmI {
        logged_in: user.is_some(),
        user,
        actor,
    })
}

// === Processes ===

#[derive(Serialize)]
pub struct MovementResult {
    pub action: &'static str,
    pub record: MovementRecord,
    #[serde(skip)]
    pub today: NaiveDate,
}

impl Output for MovementResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.action {
            "show" => record_detail(&self.record, self.today),
            action => format!(
                "{} movement {} of process {}",
                action, self.record.id, self.record.number
            ),
        }
    }
}

/// Register a new process (its first movement).
pub fn process_add(data_dir: &Path, fields: MovementFields, today: NaiveDate) -> Result<MovementResult> {
    let mut storage = Storage::open(data_dir)?;
    let actor = accounts::current_actor(&storage)?;

    let record = fields.into_record()?;
    let stored = storage.upsert_movement(&record, &actor)?;
    action_log::record(
        &mut storage,
        AuditAction::Create,
        format!("created process {}", stored.number),
        &actor,
        Some(&stored.id),
    )?;

    Ok(MovementResult {
        action: "Created",
        record: stored,
        today,
    })
}

/// Record a new movement for an existing process, starting from its current state.
pub fn process_move(
    data_dir: &Path,
    number: &str,
    entry_date: NaiveDate,
    fields: MovementFields,
    today: NaiveDate,
) -> Result<MovementResult> {
    let mut storage = Storage::open(data_dir)?;
    let actor = accounts::current_actor(&storage)?;

    let history = storage.movements_for_number(number)?;
    let current = resolve_current(history)
        .get(number)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("Process not found: {}", number.trim())))?;

    let mut next = current.next_movement(entry_date);
    next.apply(&MovementFields {
        number: None,
        entry_date: None,
        ..fields
    });
    let stored = storage.upsert_movement(&next, &actor)?;

    action_log::record(
        &mut storage,
        AuditAction::Create,
        format!(
            "moved process {} from '{}' to '{}'",
            stored.number, current.sector, stored.sector
        ),
        &actor,
        Some(&stored.id),
    )?;

    Ok(MovementResult {
        action: "Recorded",
        record: stored,
        today,
    })
}

/// Edit one movement row in place.
pub fn process_edit(
    data_dir: &Path,
    id: &str,
    fields: MovementFields,
    today: NaiveDate,
) -> Result<MovementResult> {
    let mut storage = Storage::open(data_dir)?;
    let actor = accounts::current_actor(&storage)?;

    let mut record = storage.get_movement(id)?;
    record.apply(&fields);
    let stored = storage.upsert_movement(&record, &actor)?;

    action_log::record(
        &mut storage,
        AuditAction::Update,
        format!("edited movement of process {}", stored.number),
        &actor,
        Some(&stored.id),
    )?;

    Ok(MovementResult {
        action: "Updated",
        record: stored,
        today,
    })
}

/// Delete exactly one movement row.
pub fn process_delete(data_dir: &Path, id: &str, today: NaiveDate) -> Result<MovementResult> {
    let mut storage = Storage::open(data_dir)?;
    accounts::require_admin(&storage)?;
    let actor = accounts::current_actor(&storage)?;

    let removed = storage.delete_movement(id)?;
    action_log::record(
        &mut storage,
        AuditAction::Delete,
        format!("deleted movement of process {}", removed.number),
        &actor,
        Some(&removed.id),
    )?;

    Ok(MovementResult {
        action: "Deleted",
        record: removed,
        today,
    })
}

pub fn process_show(data_dir: &Path, id: &str, today: NaiveDate) -> Result<MovementResult> {
    let storage = Storage::open(data_dir)?;
    Ok(MovementResult {
        action: "show",
        record: storage.get_movement(id)?,
        today,
    })
}

#[derive(Serialize)]
pub struct HistoryResult {
    pub number: String,
    pub count: usize,
    pub movements: Vec<MovementRecord>,
}

impl Output for HistoryResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.movements.is_empty() {
            return format!("No movements for process {}", self.number);
        }
        let mut out = format!("Process {} ({} movements):\n", self.number, self.count);
        for record in &self.movements {
            let _ = writeln!(
                out,
                "  {} -> {}  {}",
                date_cell(record.entry_date),
                if record.exit_date.is_some() {
                    date_cell(record.exit_date)
                } else {
                    "current   ".to_string()
                },
                record.sector
            );
        }
        out.trim_end().to_string()
    }
}

/// Every movement of one process, oldest first.
pub fn process_history_for(data_dir: &Path, number: &str) -> Result<HistoryResult> {
    let storage = Storage::open(data_dir)?;
    let movements = process_history(storage.movements_for_number(number)?, number);
    Ok(HistoryResult {
        number: number.trim().to_string(),
        count: movements.len(),
        movements,
    })
}

#[derive(Serialize)]
pub struct ListResult {
    pub query: QueryDescriptor,
    pub total_count: usize,
    pub total_pages: usize,
    pub page: u32,
    pub records: Vec<MovementRecord>,
    pub saved: bool,
}

impl Output for ListResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = String::new();
        if self.records.is_empty() {
            out.push_str("No movements found.");
        } else {
            for record in &self.records {
                let _ = writeln!(out, "{}", record_line(record));
            }
            let _ = write!(
                out,
                "Page {} of {} ({} movements)",
                self.page,
                self.total_pages.max(1),
                self.total_count
            );
        }
        if self.saved {
            out.push_str("\nFilters saved.");
        }
        out
    }
}

/// Query the movement history with filters, sort, and paging.
pub fn process_list(
    data_dir: &Path,
    state: FilterState,
    save: bool,
    today: NaiveDate,
) -> Result<ListResult> {
    state.validate()?;
    let mut storage = Storage::open(data_dir)?;
    let query = state.to_query();
    let QueryPage {
        records,
        total_count,
        ..
    } = storage.query_movements(&query, today)?;

    if save {
        ViewPreferences::new(state).save(&mut storage)?;
    }

    let per_page = query.items_per_page.max(1) as usize;
    Ok(ListResult {
        total_pages: total_count.div_ceil(per_page),
        page: query.page,
        query,
        total_count,
        records,
        saved: save,
    })
}

#[derive(Serialize)]
pub struct CurrentResult {
    pub count: usize,
    /// Rows fetched from the store before resolution
    pub fetched: usize,
    pub capped: bool,
    pub records: Vec<MovementRecord>,
}

impl Output for CurrentResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            let _ = writeln!(out, "{}", record_line(record));
        }
        let _ = write!(out, "{} current processes", self.count);
        if self.capped {
            let _ = write!(out, " (history truncated at {} rows)", self.fetched);
        }
        out
    }
}

/// Fetch the newest rows, resolve them to current state, and filter.
fn load_current(storage: &Storage, cap: u32) -> Result<(Vec<MovementRecord>, usize, bool)> {
    let fetched = storage.fetch_recent(cap as usize)?;
    let fetched_count = fetched.len();
    let capped = fetched_count >= cap as usize && storage.count_movements()? > fetched_count;
    if capped {
        tracing::warn!(cap, "current-state view truncated at fetch cap");
    }
    Ok((
        resolve_current(fetched).into_records(),
        fetched_count,
        capped,
    ))
}

/// The current movement of every process, optionally filtered.
pub fn process_current(
    data_dir: &Path,
    state: FilterState,
    cap: u32,
    today: NaiveDate,
) -> Result<CurrentResult> {
    state.validate()?;
    let storage = Storage::open(data_dir)?;
    let query = state.to_query();
    let (records, fetched, capped) = load_current(&storage, cap)?;
    let records: Vec<MovementRecord> = records
        .into_iter()
        .filter(|r| query.matches(r, today))
        .collect();

    Ok(CurrentResult {
        count: records.len(),
        fetched,
        capped,
        records,
    })
}

// === Dashboard ===

#[derive(Serialize)]
pub struct DashboardResult {
    #[serde(flatten)]
    pub dashboard: Dashboard,
    pub top_sectors: Vec<AggregateBucket>,
    pub top_interested_parties: Vec<AggregateBucket>,
    pub month_trend: Vec<AggregateBucket>,
    pub capped: bool,
}

fn bucket_lines(out: &mut String, title: &str, buckets: &[AggregateBucket]) {
    let _ = writeln!(out, "\n{}:", title);
    if buckets.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for bucket in buckets {
        let _ = writeln!(out, "  {:<30} {:>5}", bucket.label, bucket.count);
    }
}

impl Output for DashboardResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let t = &self.dashboard.totals;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Dashboard ({})",
            self.dashboard.today.format("%d/%m/%Y")
        );
        let _ = writeln!(out, "  Processes:      {}", t.unique_processes);
        let _ = writeln!(out, "  History rows:   {}", t.total_history_rows);
        let _ = writeln!(out, "  Urgent:         {}", t.urgent);
        let _ = writeln!(out, "  Overdue:        {}", t.overdue);
        let _ = writeln!(out, "  Near deadline:  {}", t.near_deadline);
        let _ = writeln!(out, "  No sector:      {}", t.empty_sector);
        bucket_lines(&mut out, "By sector", &self.top_sectors);
        bucket_lines(&mut out, "By origin", &self.dashboard.by_origin);
        bucket_lines(&mut out, "By interested party", &self.top_interested_parties);
        bucket_lines(&mut out, "By month", &self.month_trend);
        if self.capped {
            let _ = writeln!(out, "\nNote: history truncated at the fetch cap.");
        }
        out.trim_end().to_string()
    }
}

pub fn dashboard(data_dir: &Path, cap: u32, today: NaiveDate) -> Result<DashboardResult> {
    let storage = Storage::open(data_dir)?;
    let (records, _, capped) = load_current(&storage, cap)?;
    let total_history_rows = storage.count_movements()?;
    let dashboard = aggregate(records.iter(), total_history_rows, today);

    Ok(DashboardResult {
        top_sectors: dashboard.top_sectors().to_vec(),
        top_interested_parties: dashboard.top_interested_parties().to_vec(),
        month_trend: dashboard.month_trend(),
        dashboard,
        capped,
    })
}

// === Saved filters ===

#[derive(Serialize)]
pub struct FiltersResult {
    #[serde(flatten)]
    pub preferences: ViewPreferences,
    pub query: QueryDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<bool>,
}

impl Output for FiltersResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.cleared {
            Some(true) => "Saved filters cleared.".to_string(),
            Some(false) => "No saved filters.".to_string(),
            None => serde_json::to_string_pretty(&self.query)
                .unwrap_or_else(|_| "(unprintable)".to_string()),
        }
    }
}

pub fn filters_show(data_dir: &Path) -> Result<FiltersResult> {
    let storage = Storage::open(data_dir)?;
    let preferences = ViewPreferences::load(&storage)?;
    Ok(FiltersResult {
        query: preferences.filters.to_query(),
        preferences,
        cleared: None,
    })
}

pub fn filters_clear(data_dir: &Path) -> Result<FiltersResult> {
    let mut storage = Storage::open(data_dir)?;
    let removed = ViewPreferences::clear(&mut storage)?;
    let preferences = ViewPreferences::default();
    Ok(FiltersResult {
        query: preferences.filters.to_query(),
        preferences,
        cleared: Some(removed),
    })
}

/// The saved filter state, used as the base of `process list --saved`.
pub fn saved_filters(data_dir: &Path) -> Result<FilterState> {
    let storage = Storage::open(data_dir)?;
    Ok(ViewPreferences::load(&storage)?.filters)
}

// === Import / Export ===

#[derive(Serialize)]
pub struct ImportResult {
    pub file: String,
    pub imported: usize,
    pub batches: usize,
    pub batch_size: usize,
    pub skipped: Vec<SkippedRow>,
    pub defaulted_entry_dates: usize,
    pub unrecognized_headers: Vec<String>,
}

impl Output for ImportResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!(
            "Imported {} rows from {} in {} batch(es)",
            self.imported, self.file, self.batches
        );
        if self.defaulted_entry_dates > 0 {
            let _ = write!(
                out,
                "\n{} rows had no valid entry date and were dated today",
                self.defaulted_entry_dates
            );
        }
        for skipped in &self.skipped {
            let _ = write!(out, "\nSkipped line {}: {}", skipped.line, skipped.reason);
        }
        if !self.unrecognized_headers.is_empty() {
            let _ = write!(
                out,
                "\nIgnored columns: {}",
                self.unrecognized_headers.join(", ")
            );
        }
        out
    }
}

/// Import a CSV file in batches.
///
/// One `bulk_import` audit entry is written even when a batch fails, so
/// partially committed imports are visible in the log.
pub fn import_csv(
    data_dir: &Path,
    file: &Path,
    batch_size: usize,
    today: NaiveDate,
) -> Result<ImportResult> {
    let mut storage = Storage::open(data_dir)?;
    let actor = accounts::current_actor(&storage)?;
    let parsed = import::parse_file(file, today)?;

    let outcome = import::write_batches(
        &mut StorageSink::new(&mut storage, &actor),
        &parsed.records,
        batch_size,
    );
    let committed = match &outcome {
        Ok(report) => report.written,
        Err(Error::ImportAborted { committed, .. }) => *committed,
        Err(_) => 0,
    };

    action_log::record(
        &mut storage,
        AuditAction::BulkImport,
        format!(
            "imported {} of {} rows from {}",
            committed,
            parsed.records.len(),
            file.display()
        ),
        &actor,
        None,
    )?;

    let BatchReport { written, batches } = outcome?;
    Ok(ImportResult {
        file: file.display().to_string(),
        imported: written,
        batches,
        batch_size: batch_size.max(1),
        skipped: parsed.skipped,
        defaulted_entry_dates: parsed.defaulted_entry_dates,
        unrecognized_headers: parsed.unrecognized_headers,
    })
}

#[derive(Serialize)]
pub struct ExportResult {
    #[serde(flatten)]
    pub summary: ExportSummary,
    pub capped: bool,
}

impl Output for ExportResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Exported {} processes to {} ({})",
            self.summary.rows,
            self.summary.path,
            self.summary.format.as_str()
        )
    }
}

/// Export the current-state set, optionally filtered.
pub fn export_current(
    data_dir: &Path,
    format: ExportFormat,
    output: &Path,
    state: FilterState,
    cap: u32,
    today: NaiveDate,
) -> Result<ExportResult> {
    state.validate()?;
    let storage = Storage::open(data_dir)?;
    let query = state.to_query();
    let (records, _, capped) = load_current(&storage, cap)?;
    let selected: Vec<&MovementRecord> = records.iter().filter(|r| query.matches(r, today)).collect();

    let summary = export::export_to_path(output, format, &selected, today)?;
    Ok(ExportResult { summary, capped })
}

// === Audit log ===

#[derive(Serialize)]
pub struct LogResult {
    pub count: usize,
    pub entries: Vec<AuditEntry>,
}

impl Output for LogResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "Audit log is empty.".to_string();
        }
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "{}  {:<12} {:<16} {}",
                    e.timestamp.format("%d/%m/%Y %H:%M:%S"),
                    e.action.as_str(),
                    e.actor_name,
                    e.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn log_list(data_dir: &Path, limit: usize) -> Result<LogResult> {
    let storage = Storage::open(data_dir)?;
    let entries = storage.list_audit(limit)?;
    Ok(LogResult {
        count: entries.len(),
        entries,
    })
}

// === Config ===

#[derive(Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub source: ValueSource,
}

#[derive(Serialize)]
pub struct ConfigResult {
    pub entries: Vec<ConfigEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written_to: Option<String>,
}

impl Output for ConfigResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{} = {} ({})", e.key, e.value, e.source))
            .collect();
        if let Some(ref path) = self.written_to {
            lines.push(format!("Written to {}", path));
        }
        lines.join("\n")
    }
}

fn config_entries(resolved: &ResolvedConfig, only: Option<&str>) -> Vec<ConfigEntry> {
    resolved
        .entries()
        .into_iter()
        .filter(|(key, _, _)| only.is_none_or(|k| k == *key))
        .map(|(key, value, source)| ConfigEntry {
            key: key.to_string(),
            value,
            source,
        })
        .collect()
}

pub fn config_get(data_dir: &Path, key: &str) -> Result<ConfigResult> {
    // Reject unknown keys with the schema's message.
    FluxoConfig::new().get(key)?;
    let resolved = resolve_config(data_dir, &ConfigOverrides::new())?;
    Ok(ConfigResult {
        entries: config_entries(&resolved, Some(key)),
        written_to: None,
    })
}

/// Set a key in the data-dir config.kdl, or the system one when `system` is set.
pub fn config_set(data_dir: &Path, key: &str, value: &str, system: bool) -> Result<ConfigResult> {
    let path = if system {
        system_config_path()
            .ok_or_else(|| Error::Other("Could not determine config directory".to_string()))?
    } else {
        data_config_path(data_dir)
    };

    let mut config = FluxoConfig::load(&path)?;
    config.set(key, value)?;
    config.save(&path)?;
    tracing::info!(key, path = %path.display(), "config updated");

    let resolved = resolve_config(data_dir, &ConfigOverrides::new())?;
    Ok(ConfigResult {
        entries: config_entries(&resolved, Some(key)),
        written_to: Some(path.display().to_string()),
    })
}

pub fn config_list(data_dir: &Path) -> Result<ConfigResult> {
    let resolved = resolve_config(data_dir, &ConfigOverrides::new())?;
    Ok(ConfigResult {
        entries: config_entries(&resolved, None),
        written_to: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Origin;
    use crate::test_utils::TestEnv;
    use std::fs;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 6, 10)
    }

    fn fields(number: &str, entry: NaiveDate, sector: &str) -> MovementFields {
        MovementFields {
            number: Some(number.to_string()),
            entry_date: Some(entry),
            sector: Some(sector.to_string()),
            ..Default::default()
        }
    }

    fn setup() -> TestEnv {
        let env = TestEnv::new();
        env.init_storage();
        env
    }

    #[test]
    fn test_init_is_idempotent() {
        let env = TestEnv::new();
        assert!(system_init(env.data_path()).unwrap().initialized);
        assert!(!system_init(env.data_path()).unwrap().initialized);
    }

    #[test]
    fn test_commands_require_init() {
        let env = TestEnv::new();
        assert!(matches!(
            log_list(env.data_path(), 10),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn test_add_requires_entry_date() {
        let env = setup();
        let result = process_add(
            env.data_path(),
            MovementFields {
                number: Some("1".to_string()),
                ..Default::default()
            },
            today(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(log_list(env.data_path(), 10).unwrap().count, 0);
    }

    #[test]
    fn test_move_copies_current_state() {
        let env = setup();
        let mut first = fields("2024/001", date(2024, 1, 1), "Protocolo");
        first.origin = Some("cgof".to_string());
        first.subject = Some("Licitação".to_string());
        process_add(env.data_path(), first, today()).unwrap();

        let moved = process_move(
            env.data_path(),
            " 2024/001 ",
            date(2024, 2, 1),
            MovementFields {
                sector: Some("Jurídico".to_string()),
                ..Default::default()
            },
            today(),
        )
        .unwrap();
        assert_eq!(moved.record.sector, "Jurídico");
        assert_eq!(moved.record.origin, Origin::Cgof);
        assert_eq!(moved.record.subject, "Licitação");
        assert_eq!(moved.record.entry_date, Some(date(2024, 2, 1)));

        let history = process_history_for(env.data_path(), "2024/001").unwrap();
        assert_eq!(history.count, 2);
        assert_eq!(history.movements[0].sector, "Protocolo");

        let current = process_current(env.data_path(), FilterState::default(), 100, today()).unwrap();
        assert_eq!(current.count, 1);
        assert_eq!(current.records[0].sector, "Jurídico");

        assert!(matches!(
            process_move(env.data_path(), "nope", today(), MovementFields::default(), today()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_edit_and_delete_one_row() {
        let env = setup();
        let created = process_add(env.data_path(), fields("1", date(2024, 1, 1), "A"), today())
            .unwrap()
            .record;
        process_move(env.data_path(), "1", date(2024, 1, 5), MovementFields::default(), today())
            .unwrap();

        let edited = process_edit(
            env.data_path(),
            &created.id,
            MovementFields {
                deadline: Some(Some(date(2024, 6, 12))),
                urgent: Some(true),
                ..Default::default()
            },
            today(),
        )
        .unwrap();
        assert_eq!(edited.record.deadline, Some(date(2024, 6, 12)));
        assert!(edited.record.urgent);
        assert_eq!(edited.record.created_at, created.created_at);

        process_delete(env.data_path(), &created.id, today()).unwrap();
        let history = process_history_for(env.data_path(), "1").unwrap();
        assert_eq!(history.count, 1);

        let actions: Vec<AuditAction> = log_list(env.data_path(), 10)
            .unwrap()
            .entries
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Delete,
                AuditAction::Update,
                AuditAction::Create,
                AuditAction::Create
            ]
        );
    }

    #[test]
    fn test_list_paging_and_saved_filters() {
        let env = setup();
        for i in 1..=3 {
            process_add(
                env.data_path(),
                fields(&i.to_string(), date(2024, 1, i), "A"),
                today(),
            )
            .unwrap();
        }

        let state = FilterState {
            items_per_page: 2,
            ..Default::default()
        };
        let page = process_list(env.data_path(), state.clone(), true, today()).unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.records.len(), 2);
        assert!(page.saved);

        let shown = filters_show(env.data_path()).unwrap();
        assert_eq!(shown.preferences.filters, state);
        assert_eq!(saved_filters(env.data_path()).unwrap(), state);

        assert_eq!(filters_clear(env.data_path()).unwrap().cleared, Some(true));
        assert_eq!(
            saved_filters(env.data_path()).unwrap(),
            FilterState::default()
        );
    }

    #[test]
    fn test_unknown_origin_filter_is_an_error() {
        let env = setup();
        process_add(env.data_path(), fields("1", date(2024, 1, 1), "A"), today()).unwrap();

        let state = FilterState {
            origin: "Gabinet".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            process_list(env.data_path(), state.clone(), true, today()),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            process_current(env.data_path(), state, 100, today()),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(
            saved_filters(env.data_path()).unwrap(),
            FilterState::default()
        );
    }

    #[test]
    fn test_dashboard_counts_current_state() {
        let env = setup();
        let mut a = fields("A", date(2024, 5, 1), "Jurídico");
        a.deadline = Some(Some(date(2024, 6, 9)));
        a.urgent = Some(true);
        process_add(env.data_path(), a, today()).unwrap();
        process_move(env.data_path(), "A", date(2024, 5, 20), MovementFields::default(), today())
            .unwrap();
        process_add(env.data_path(), fields("B", date(2024, 4, 1), ""), today()).unwrap();

        let result = dashboard(env.data_path(), 100, today()).unwrap();
        let totals = &result.dashboard.totals;
        assert_eq!(totals.unique_processes, 2);
        assert_eq!(totals.total_history_rows, 3);
        assert_eq!(totals.urgent, 1);
        assert_eq!(totals.overdue, 1);
        assert_eq!(totals.empty_sector, 1);
        assert!(!result.capped);

        let capped = dashboard(env.data_path(), 1, today()).unwrap();
        assert!(capped.capped);
        assert_eq!(capped.dashboard.totals.unique_processes, 1);
        assert_eq!(capped.dashboard.totals.total_history_rows, 3);
    }

    #[test]
    fn test_import_and_export_roundtrip() {
        let env = setup();
        let csv_path = env.data_path().join("in.csv");
        fs::write(
            &csv_path,
            "Número,Setor,Data Entrada\n1,A,01/03/2024\n1,B,45366\n2,C,02/03/2024\n,X,01/01/2024\n",
        )
        .unwrap();

        let result = import_csv(env.data_path(), &csv_path, 2, today()).unwrap();
        assert_eq!(result.imported, 3);
        assert_eq!(result.batches, 2);
        assert_eq!(result.skipped.len(), 1);

        let out = env.data_path().join("out.csv");
        let exported = export_current(
            env.data_path(),
            ExportFormat::Csv,
            &out,
            FilterState::default(),
            100,
            today(),
        )
        .unwrap();
        assert_eq!(exported.summary.rows, 2);
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.contains("1,B,Outros,,,15/03/2024"));
        assert!(!text.contains(",A,"));

        let log = log_list(env.data_path(), 1).unwrap();
        assert_eq!(log.entries[0].action, AuditAction::BulkImport);
    }

    #[test]
    fn test_config_set_get_list() {
        let env = setup();
        let set = config_set(env.data_path(), "items-per-page", "25", false).unwrap();
        assert_eq!(set.entries[0].value, "25");
        assert_eq!(set.entries[0].source, ValueSource::DataDir);

        let got = config_get(env.data_path(), "items-per-page").unwrap();
        assert_eq!(got.entries.len(), 1);
        assert_eq!(got.entries[0].value, "25");

        assert_eq!(config_list(env.data_path()).unwrap().entries.len(), 5);
        assert!(config_get(env.data_path(), "bogus").is_err());
        assert!(config_set(env.data_path(), "fetch-cap", "0", false).is_err());
    }
}

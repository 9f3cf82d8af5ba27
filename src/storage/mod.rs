//! Storage layer for Fluxo data.
//!
//! This module is the history store: one SQLite database (`fluxo.db`) in the
//! data directory holding
//! - `movements` - one row per movement of a process, keyed by row id
//! - `audit_log` - append-only audit entries
//! - `users` - registered accounts
//! - `config` - key/value settings (session, saved view preferences)
//!
//! Rows read back from SQLite pass through [`StoredMovementRow`], which fills
//! every optional column with its default before a record reaches the core.

use crate::models::{Actor, AuditAction, AuditEntry, MovementRecord, Origin, User};
use crate::query::{QueryDescriptor, SortField, SortOrder};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the default data directory.
pub const DATA_DIR_ENV: &str = "FLUXO_DATA_DIR";

const DB_FILE: &str = "fluxo.db";

/// SQL function lowercasing text with full Unicode case mapping.
/// SQLite's built-in `LOWER` folds ASCII only.
const UNICODE_LOWER: &str = "unicode_lower";

/// Columns a free-text search looks in.
const SEARCH_COLUMNS: [&str; 5] = ["number", "interested_party", "subject", "sector", "observations"];

const MOVEMENT_COLUMNS: &str = "id, number, sector, origin, interested_party, subject, \
     observations, entry_date, exit_date, deadline, urgent, created_at, updated_at, \
     created_by, updated_by";

/// Storage manager for one data directory.
pub struct Storage {
    /// Root directory holding the database and config files
    pub root: PathBuf,
    conn: Connection,
}

impl Storage {
    /// Open existing storage in the given data directory.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join(DB_FILE);
        if !db_path.exists() {
            return Err(Error::NotInitialized);
        }

        let conn = Self::connect(&db_path)?;

        Ok(Self {
            root: data_dir.to_path_buf(),
            conn,
        })
    }

    /// Initialize storage in the given data directory.
    pub fn init(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;

        let conn = Self::connect(&data_dir.join(DB_FILE))?;
        tracing::info!(path = %data_dir.display(), "initialized storage");

        Ok(Self {
            root: data_dir.to_path_buf(),
            conn,
        })
    }

    /// Check if storage exists in the given data directory.
    pub fn exists(data_dir: &Path) -> bool {
        data_dir.join(DB_FILE).exists()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn connect(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)?;
        conn.create_scalar_function(
            UNICODE_LOWER,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text: Option<String> = ctx.get(0)?;
                Ok(text.map(|t| t.to_lowercase()))
            },
        )?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS movements (
                id TEXT PRIMARY KEY,
                number TEXT NOT NULL,
                sector TEXT NOT NULL DEFAULT '',
                origin TEXT NOT NULL DEFAULT 'Outros',
                interested_party TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                observations TEXT NOT NULL DEFAULT '',
                entry_date TEXT,
                exit_date TEXT,
                deadline TEXT,
                urgent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT,
                updated_at TEXT,
                created_by TEXT,
                updated_by TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_movements_number ON movements(number);
            CREATE INDEX IF NOT EXISTS idx_movements_entry_date ON movements(entry_date);
            CREATE INDEX IF NOT EXISTS idx_movements_sector ON movements(sector);
            CREATE INDEX IF NOT EXISTS idx_movements_origin ON movements(origin);

            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                description TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                actor_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                target_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log(timestamp);

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    // === Movement Operations ===

    /// Insert or update a movement by id.
    ///
    /// `created_at` and `created_by` are kept from the first write; `updated_at`
    /// and `updated_by` are always refreshed. Returns the row as stored.
    pub fn upsert_movement(
        &mut self,
        record: &MovementRecord,
        actor: &Actor,
    ) -> Result<MovementRecord> {
        record.validate()?;
        write_movement(&self.conn, record, actor, Utc::now())?;
        self.get_movement(&record.id)
    }

    /// Write a batch of movements in a single transaction.
    ///
    /// Either every row of the batch is committed or none is.
    pub fn upsert_movements(&mut self, records: &[MovementRecord], actor: &Actor) -> Result<usize> {
        for record in records {
            record.validate()?;
        }

        let now = Utc::now();
        let tx = self.conn.transaction()?;
        for record in records {
            write_movement(&tx, record, actor, now)?;
        }
        tx.commit()?;

        Ok(records.len())
    }

    /// Get a movement by row id.
    pub fn get_movement(&self, id: &str) -> Result<MovementRecord> {
        let sql = format!("SELECT {} FROM movements WHERE id = ?1", MOVEMENT_COLUMNS);
        self.conn
            .query_row(&sql, [id], StoredMovementRow::from_row)
            .optional()?
            .map(StoredMovementRow::into_record)
            .ok_or_else(|| Error::NotFound(format!("Movement not found: {}", id)))
    }

    /// Delete exactly one movement by row id, returning what was removed.
    pub fn delete_movement(&mut self, id: &str) -> Result<MovementRecord> {
        let record = self.get_movement(id)?;
        self.conn
            .execute("DELETE FROM movements WHERE id = ?1", [id])?;
        Ok(record)
    }

    /// Every movement of one process number (trimmed comparison).
    pub fn movements_for_number(&self, number: &str) -> Result<Vec<MovementRecord>> {
        let sql = format!(
            "SELECT {} FROM movements WHERE TRIM(number) = ?1",
            MOVEMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([number.trim()], StoredMovementRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(StoredMovementRow::into_record).collect())
    }

    /// Total number of movement rows.
    pub fn count_movements(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM movements", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// The newest movements (by entry date), at most `cap` rows.
    pub fn fetch_recent(&self, cap: usize) -> Result<Vec<MovementRecord>> {
        let sql = format!(
            "SELECT {} FROM movements ORDER BY entry_date DESC, updated_at DESC, id LIMIT ?1",
            MOVEMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([cap as i64], StoredMovementRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(StoredMovementRow::into_record).collect())
    }

    /// Run a history query: filtered, sorted, one page of rows plus the total match count.
    pub fn query_movements(&self, query: &QueryDescriptor, today: NaiveDate) -> Result<QueryPage> {
        let mut where_sql = String::from(" WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref term) = query.search_term {
            let clauses: Vec<String> = SEARCH_COLUMNS
                .iter()
                .map(|column| format!("{}({}) LIKE ? ESCAPE '\\'", UNICODE_LOWER, column))
                .collect();
            where_sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
            let pattern = like_pattern(term);
            for _ in SEARCH_COLUMNS {
                params_vec.push(Box::new(pattern.clone()));
            }
        }

        let filters = &query.filters;
        if let Some(origin) = filters.origin {
            where_sql.push_str(" AND origin = ?");
            params_vec.push(Box::new(origin.as_str().to_string()));
        }
        if let Some(ref sector) = filters.sector {
            where_sql.push_str(&format!(" AND {}(sector) LIKE ? ESCAPE '\\'", UNICODE_LOWER));
            params_vec.push(Box::new(like_pattern(sector)));
        }
        if let Some(start) = filters.entry_date_start {
            where_sql.push_str(" AND substr(entry_date, 1, 10) >= ?");
            params_vec.push(Box::new(format_date(start)));
        }
        if let Some(end) = filters.entry_date_end {
            where_sql.push_str(" AND substr(entry_date, 1, 10) <= ?");
            params_vec.push(Box::new(format_date(end)));
        }
        if filters.urgent == Some(true) {
            where_sql.push_str(" AND urgent = 1");
        }
        if filters.overdue == Some(true) {
            where_sql.push_str(" AND deadline IS NOT NULL AND substr(deadline, 1, 10) < ?");
            params_vec.push(Box::new(format_date(today)));
        }
        if filters.empty_sector == Some(true) {
            where_sql.push_str(" AND TRIM(sector) = ''");
        }
        if filters.empty_exit_date == Some(true) {
            where_sql.push_str(" AND exit_date IS NULL");
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let count_sql = format!("SELECT COUNT(*) FROM movements{}", where_sql);
        let total_count: i64 =
            self.conn
                .query_row(&count_sql, params_refs.as_slice(), |row| row.get(0))?;

        let select_sql = format!(
            "SELECT {} FROM movements{} ORDER BY {} {}, updated_at DESC, id LIMIT {} OFFSET {}",
            MOVEMENT_COLUMNS,
            where_sql,
            sort_column(query.sort_by.field),
            sort_direction(query.sort_by.order),
            query.items_per_page,
            query.offset(),
        );
        let mut stmt = self.conn.prepare(&select_sql)?;
        let rows = stmt
            .query_map(params_refs.as_slice(), StoredMovementRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(QueryPage {
            records: rows.into_iter().map(StoredMovementRow::into_record).collect(),
            total_count: total_count as usize,
            page: query.page,
            items_per_page: query.items_per_page,
        })
    }

    // === Audit Log Operations ===

    /// Append an audit entry. Entries are never updated or deleted.
    pub fn append_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO audit_log (id, action, description, actor_id, actor_name, timestamp, target_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                entry.id,
                entry.action.as_str(),
                entry.description,
                entry.actor_id,
                entry.actor_name,
                entry.timestamp.to_rfc3339(),
                entry.target_id,
            ],
        )?;
        Ok(())
    }

    /// Most recent audit entries first.
    pub fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, action, description, actor_id, actor_name, timestamp, target_id
             FROM audit_log ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map([limit as i64], |row| {
                let action: String = row.get(1)?;
                let timestamp: String = row.get(5)?;
                Ok(AuditEntry {
                    id: row.get(0)?,
                    action: AuditAction::parse(&action).unwrap_or(AuditAction::Update),
                    description: row.get(2)?,
                    actor_id: row.get(3)?,
                    actor_name: row.get(4)?,
                    timestamp: parse_timestamp(&timestamp).unwrap_or_default(),
                    target_id: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn count_audit(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // === User Operations ===

    /// Register a user. E-mails are unique, compared case-insensitively.
    pub fn create_user(&mut self, user: &User) -> Result<()> {
        if self.get_user_by_email(&user.email)?.is_some() {
            return Err(Error::Conflict(format!(
                "a user with e-mail {} already exists",
                user.email
            )));
        }
        self.conn.execute(
            r#"
            INSERT INTO users (id, email, name, password_hash, is_admin, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                user.id,
                user.email,
                user.name,
                user.password_hash,
                user.is_admin,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, email, name, password_hash, is_admin, created_at FROM users WHERE id = ?1",
                [id],
                user_from_row,
            )
            .optional()?)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, email, name, password_hash, is_admin, created_at FROM users WHERE email = ?1",
                [email.trim()],
                user_from_row,
            )
            .optional()?)
    }

    /// Whether any user has administrator rights.
    pub fn has_admin(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn set_admin(&mut self, user_id: &str, is_admin: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE users SET is_admin = ?1 WHERE id = ?2",
            params![is_admin, user_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("User not found: {}", user_id)));
        }
        Ok(())
    }

    // === Config Operations ===

    /// Get a configuration value.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Set a configuration value.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove a configuration value. Returns whether it existed.
    pub fn delete_config(&mut self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    /// List all configuration values.
    pub fn list_configs(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM config ORDER BY key")?;
        let configs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(configs)
    }
}

/// One page of a history query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
    pub records: Vec<MovementRecord>,
    /// Rows matching the filters across all pages
    pub total_count: usize,
    pub page: u32,
    pub items_per_page: u32,
}

impl QueryPage {
    pub fn total_pages(&self) -> usize {
        let per_page = self.items_per_page.max(1) as usize;
        self.total_count.div_ceil(per_page)
    }
}

/// Upsert one row. Shared by single writes and batched transactions.
fn write_movement(
    conn: &Connection,
    record: &MovementRecord,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<()> {
    let created_at = record.created_at.unwrap_or(now);
    let created_by = record.created_by.clone().unwrap_or_else(|| actor.id.clone());

    conn.execute(
        r#"
        INSERT INTO movements
        (id, number, sector, origin, interested_party, subject, observations,
         entry_date, exit_date, deadline, urgent, created_at, updated_at, created_by, updated_by)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT(id) DO UPDATE SET
            number = excluded.number,
            sector = excluded.sector,
            origin = excluded.origin,
            interested_party = excluded.interested_party,
            subject = excluded.subject,
            observations = excluded.observations,
            entry_date = excluded.entry_date,
            exit_date = excluded.exit_date,
            deadline = excluded.deadline,
            urgent = excluded.urgent,
            updated_at = excluded.updated_at,
            updated_by = excluded.updated_by
        "#,
        params![
            record.id,
            record.number.trim(),
            record.sector,
            record.origin.as_str(),
            record.interested_party,
            record.subject,
            record.observations,
            record.entry_date.map(format_stored_date),
            record.exit_date.map(format_stored_date),
            record.deadline.map(format_stored_date),
            record.urgent,
            created_at.to_rfc3339(),
            now.to_rfc3339(),
            created_by,
            actor.id,
        ],
    )?;
    Ok(())
}

/// A movement row exactly as SQLite returns it, every column optional.
#[derive(Debug, Default)]
pub struct StoredMovementRow {
    pub id: Option<String>,
    pub number: Option<String>,
    pub sector: Option<String>,
    pub origin: Option<String>,
    pub interested_party: Option<String>,
    pub subject: Option<String>,
    pub observations: Option<String>,
    pub entry_date: Option<String>,
    pub exit_date: Option<String>,
    pub deadline: Option<String>,
    pub urgent: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl StoredMovementRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            number: row.get("number")?,
            sector: row.get("sector")?,
            origin: row.get("origin")?,
            interested_party: row.get("interested_party")?,
            subject: row.get("subject")?,
            observations: row.get("observations")?,
            entry_date: row.get("entry_date")?,
            exit_date: row.get("exit_date")?,
            deadline: row.get("deadline")?,
            urgent: row.get("urgent")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            created_by: row.get("created_by")?,
            updated_by: row.get("updated_by")?,
        })
    }

    /// Fill defaults and parse dates leniently; malformed dates become `None`.
    pub fn into_record(self) -> MovementRecord {
        MovementRecord {
            id: self.id.unwrap_or_default(),
            number: self.number.unwrap_or_default().trim().to_string(),
            sector: self.sector.unwrap_or_default(),
            origin: self
                .origin
                .as_deref()
                .map(Origin::normalize)
                .unwrap_or_default(),
            interested_party: self.interested_party.unwrap_or_default(),
            subject: self.subject.unwrap_or_default(),
            observations: self.observations.unwrap_or_default(),
            entry_date: self.entry_date.as_deref().and_then(parse_stored_date),
            exit_date: self.exit_date.as_deref().and_then(parse_stored_date),
            deadline: self.deadline.as_deref().and_then(parse_stored_date),
            urgent: self.urgent.unwrap_or(0) != 0,
            created_at: self.created_at.as_deref().and_then(parse_timestamp),
            updated_at: self.updated_at.as_deref().and_then(parse_timestamp),
            created_by: self.created_by,
            updated_by: self.updated_by,
        }
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let created_at: String = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        password_hash: row.get(3)?,
        is_admin: row.get(4)?,
        created_at: parse_timestamp(&created_at).unwrap_or_default(),
    })
}

fn sort_column(field: SortField) -> &'static str {
    match field {
        SortField::EntryDate => "entry_date",
        SortField::Number => "number",
        SortField::Sector => "sector",
        SortField::Origin => "origin",
        SortField::Deadline => "deadline",
        SortField::InterestedParty => "interested_party",
        SortField::UpdatedAt => "updated_at",
    }
}

fn sort_direction(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    }
}

/// Case-insensitive substring pattern with LIKE wildcards escaped.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Dates are stored at local noon so they never shift across a day boundary.
fn format_stored_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%dT12:00:00").to_string()
}

/// Parse the date part of a stored value (`YYYY-MM-DD...`).
pub fn parse_stored_date(value: &str) -> Option<NaiveDate> {
    let head = value.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Resolve the data directory.
///
/// Priority: explicit path > `FLUXO_DATA_DIR` > `<platform data dir>/fluxo`.
pub fn get_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?;
    Ok(data_dir.join("fluxo"))
}

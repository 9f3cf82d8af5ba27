//! Data models for Fluxo entities.
//!
//! This module defines the core data structures:
//! - `MovementRecord` - One historical state of a tracked process
//! - `Origin` - The closed set of originating departments
//! - `MovementFields` - Field values supplied on create, move, edit, or import
//! - `AuditEntry` - Append-only log of user-visible operations
//! - `User` - Accounts that act on records

pub mod current;
pub mod stats;

use crate::{Error, Result};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used for empty sectors, parties, and undated months.
pub const NOT_INFORMED: &str = "Not Informed";

/// Originating department of a process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "CGOF")]
    Cgof,
    Gabinete,
    Protocolo,
    Externo,
    #[default]
    Outros,
}

impl Origin {
    /// Every origin, in display order.
    pub const ALL: [Origin; 5] = [
        Origin::Cgof,
        Origin::Gabinete,
        Origin::Protocolo,
        Origin::Externo,
        Origin::Outros,
    ];

    /// Canonical label, as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Cgof => "CGOF",
            Origin::Gabinete => "Gabinete",
            Origin::Protocolo => "Protocolo",
            Origin::Externo => "Externo",
            Origin::Outros => "Outros",
        }
    }

    /// Parse a known origin label or alias. Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        let key = fold_text(s);
        match key.as_str() {
            "cgof" | "coordenacao geral de orcamento e financas" => Some(Origin::Cgof),
            "gabinete" | "gab" | "gabinete do secretario" => Some(Origin::Gabinete),
            "protocolo" | "prot" | "protocolo geral" => Some(Origin::Protocolo),
            "externo" | "externa" | "orgao externo" => Some(Origin::Externo),
            "outros" | "outro" | "outra" | "outras" => Some(Origin::Outros),
            _ => None,
        }
    }

    /// Normalize free text into the closed set; unknown values become `Outros`.
    pub fn normalize(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lowercase, trim, collapse inner whitespace, and strip Portuguese accents.
///
/// Used wherever user-supplied labels (origins, spreadsheet headers) are
/// matched against a fixed vocabulary.
pub fn fold_text(s: &str) -> String {
    let stripped: String = s
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'º' | '°' => 'o',
            other => other,
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Convert a calendar date to the instant it is stored at (local noon).
///
/// Date-only values are pinned to noon so a timezone shift never moves
/// them to a neighbouring day.
pub fn local_noon(date: NaiveDate) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(12, 0, 0)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// One historical state of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    /// Unique row identifier (UUID v4)
    pub id: String,

    /// Process number, shared by every movement of the same process
    pub number: String,

    /// Current location, empty when unknown
    #[serde(default)]
    pub sector: String,

    /// Originating department
    #[serde(default)]
    pub origin: Origin,

    #[serde(default)]
    pub interested_party: String,

    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub observations: String,

    /// Date this state began. `None` only for malformed rows read back from the store.
    pub entry_date: Option<NaiveDate>,

    /// Date this state ended, `None` while still current
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_date: Option<NaiveDate>,

    /// Date by which action is due
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,

    #[serde(default)]
    pub urgent: bool,

    /// Creation timestamp, immutable after the first write
    pub created_at: Option<DateTime<Utc>>,

    /// Last write timestamp
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl MovementRecord {
    /// Create a new record with a fresh ID and creation timestamps.
    pub fn new(number: impl Into<String>, entry_date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            number: number.into().trim().to_string(),
            sector: String::new(),
            origin: Origin::default(),
            interested_party: String::new(),
            subject: String::new(),
            observations: String::new(),
            entry_date: Some(entry_date),
            exit_date: None,
            deadline: None,
            urgent: false,
            created_at: Some(now),
            updated_at: Some(now),
            created_by: None,
            updated_by: None,
        }
    }

    /// The key this record is grouped under: the trimmed process number.
    pub fn key(&self) -> &str {
        self.number.trim()
    }

    /// The instant the entry date is stored at.
    pub fn entry_instant(&self) -> Option<DateTime<Utc>> {
        self.entry_date.and_then(local_noon)
    }

    /// Tie-break instant: `updated_at`, else `created_at`, else the entry instant.
    pub fn fallback_instant(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .or(self.created_at)
            .or_else(|| self.entry_instant())
    }

    /// Copy this record as the starting point of a new movement.
    ///
    /// The copy gets a fresh ID and timestamps; exit date is cleared.
    pub fn next_movement(&self, entry_date: NaiveDate) -> Self {
        let mut next = Self::new(self.number.clone(), entry_date);
        next.sector = self.sector.clone();
        next.origin = self.origin;
        next.interested_party = self.interested_party.clone();
        next.subject = self.subject.clone();
        next.observations = self.observations.clone();
        next.deadline = self.deadline;
        next.urgent = self.urgent;
        next
    }

    /// Apply field overrides in place.
    pub fn apply(&mut self, fields: &MovementFields) {
        if let Some(ref number) = fields.number {
            self.number = number.trim().to_string();
        }
        if let Some(ref sector) = fields.sector {
            self.sector = sector.trim().to_string();
        }
        if let Some(ref origin) = fields.origin {
            self.origin = Origin::normalize(origin);
        }
        if let Some(ref party) = fields.interested_party {
            self.interested_party = party.trim().to_string();
        }
        if let Some(ref subject) = fields.subject {
            self.subject = subject.trim().to_string();
        }
        if let Some(ref observations) = fields.observations {
            self.observations = observations.trim().to_string();
        }
        if let Some(entry_date) = fields.entry_date {
            self.entry_date = Some(entry_date);
        }
        if let Some(exit_date) = fields.exit_date {
            self.exit_date = exit_date;
        }
        if let Some(deadline) = fields.deadline {
            self.deadline = deadline;
        }
        if let Some(urgent) = fields.urgent {
            self.urgent = urgent;
        }
    }

    /// Check the fields every written record must carry.
    pub fn validate(&self) -> Result<()> {
        if self.number.trim().is_empty() {
            return Err(Error::Validation("process number is required".to_string()));
        }
        if self.entry_date.is_none() {
            return Err(Error::Validation("entry date is required".to_string()));
        }
        Ok(())
    }
}

/// Field values supplied when creating, moving, editing, or importing a record.
///
/// `None` leaves a field untouched. The nested options on the optional dates
/// distinguish "leave as is" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFields {
    pub number: Option<String>,
    pub sector: Option<String>,
    pub origin: Option<String>,
    pub interested_party: Option<String>,
    pub subject: Option<String>,
    pub observations: Option<String>,
    pub entry_date: Option<NaiveDate>,
    pub exit_date: Option<Option<NaiveDate>>,
    pub deadline: Option<Option<NaiveDate>>,
    pub urgent: Option<bool>,
}

impl MovementFields {
    /// Build a brand-new record from these fields.
    ///
    /// Fails with a validation error if the number or entry date is missing.
    pub fn into_record(self) -> Result<MovementRecord> {
        let number = self
            .number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Validation("process number is required".to_string()))?
            .to_string();
        let entry_date = self
            .entry_date
            .ok_or_else(|| Error::Validation("entry date is required".to_string()))?;

        let mut record = MovementRecord::new(number, entry_date);
        record.apply(&self);
        Ok(record)
    }
}

/// Kinds of operations recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    BulkImport,
    Login,
    Logout,
    UserCreate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::BulkImport => "bulk_import",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::UserCreate => "user_create",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(AuditAction::Create),
            "update" => Some(AuditAction::Update),
            "delete" => Some(AuditAction::Delete),
            "bulk_import" => Some(AuditAction::BulkImport),
            "login" => Some(AuditAction::Login),
            "logout" => Some(AuditAction::Logout),
            "user_create" => Some(AuditAction::UserCreate),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single immutable audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub action: AuditAction,
    pub description: String,
    pub actor_id: String,
    pub actor_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Identity attached to writes and audit entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

impl Actor {
    /// The actor used when nobody is logged in.
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            name: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "system".to_string()),
        }
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
        }
    }
}

//! Filter state and the canonical query descriptor sent to the history store.
//!
//! `FilterState` mirrors what a user has selected: free text, dropdowns,
//! date range, boolean toggles, sort, and page. `QueryDescriptor` is the
//! normalized request derived from it; empty selections are omitted rather
//! than sent as empty constraints.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{MovementRecord, Origin};
use crate::{Error, Result};

/// Rows per page when nothing else is configured.
pub const DEFAULT_ITEMS_PER_PAGE: u32 = 10;

/// Columns a listing can be sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    EntryDate,
    Number,
    Sector,
    Origin,
    Deadline,
    InterestedParty,
    UpdatedAt,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::EntryDate => "entry_date",
            SortField::Number => "number",
            SortField::Sector => "sector",
            SortField::Origin => "origin",
            SortField::Deadline => "deadline",
            SortField::InterestedParty => "interested_party",
            SortField::UpdatedAt => "updated_at",
        }
    }

    /// Parse from string, case-insensitive, accepting `-` for `_`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "entry_date" | "entry" => Some(SortField::EntryDate),
            "number" => Some(SortField::Number),
            "sector" => Some(SortField::Sector),
            "origin" => Some(SortField::Origin),
            "deadline" => Some(SortField::Deadline),
            "interested_party" | "interested" => Some(SortField::InterestedParty),
            "updated_at" | "updated" => Some(SortField::UpdatedAt),
            _ => None,
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" => Some(SortOrder::Asc),
            "desc" | "descending" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the user currently has selected.
///
/// Every field is independent. `FilterState::default()` is both the initial
/// state and the result of "clear".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub search_term: String,
    pub origin: String,
    pub sector: String,
    pub entry_date_start: Option<NaiveDate>,
    pub entry_date_end: Option<NaiveDate>,
    pub urgent: bool,
    pub overdue: bool,
    pub empty_sector: bool,
    pub empty_exit_date: bool,
    /// `None` means the default sort (entry date)
    pub sort_field: Option<SortField>,
    pub sort_order: SortOrder,
    pub page: u32,
    pub items_per_page: u32,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            search_term: String::new(),
            origin: String::new(),
            sector: String::new(),
            entry_date_start: None,
            entry_date_end: None,
            urgent: false,
            overdue: false,
            empty_sector: false,
            empty_exit_date: false,
            sort_field: None,
            sort_order: SortOrder::Desc,
            page: 1,
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
        }
    }
}

impl FilterState {
    /// Reset every field to its default at once.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Reject selections that cannot be turned into a query.
    ///
    /// Origin must name one of the closed set; unknown text is never
    /// widened to `Outros` the way it is on write.
    pub fn validate(&self) -> Result<()> {
        if let Some(origin) = non_empty(&self.origin) {
            if Origin::parse(&origin).is_none() {
                return Err(Error::InvalidInput(format!(
                    "unknown origin '{}': use one of {}",
                    origin,
                    Origin::ALL.map(|o| o.as_str()).join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Build the canonical query descriptor for this state.
    ///
    /// An origin outside the closed set is dropped; call [`validate`](Self::validate) first.
    pub fn to_query(&self) -> QueryDescriptor {
        QueryDescriptor {
            search_term: non_empty(&self.search_term),
            filters: QueryFilters {
                origin: non_empty(&self.origin).and_then(|o| Origin::parse(&o)),
                sector: non_empty(&self.sector),
                entry_date_start: self.entry_date_start,
                entry_date_end: self.entry_date_end,
                urgent: self.urgent.then_some(true),
                overdue: self.overdue.then_some(true),
                empty_sector: self.empty_sector.then_some(true),
                empty_exit_date: self.empty_exit_date.then_some(true),
            },
            sort_by: SortSpec {
                field: self.sort_field.unwrap_or_default(),
                order: self.sort_order,
            },
            page: self.page.max(1),
            items_per_page: self.items_per_page.max(1),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Filters of a history query. Absent fields impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_date_start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_date_end: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overdue: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_sector: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_exit_date: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub order: SortOrder,
}

/// Canonical request to the history store. Pages are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    pub filters: QueryFilters,
    pub sort_by: SortSpec,
    pub page: u32,
    pub items_per_page: u32,
}

impl QueryDescriptor {
    /// Zero-based row offset of the requested page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.items_per_page)
    }

    /// Evaluate the filters and search term against one record in memory.
    ///
    /// Mirrors what the history store does for the same descriptor.
    pub fn matches(&self, record: &MovementRecord, today: NaiveDate) -> bool {
        let contains = |haystack: &str, needle: &str| {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        };

        if let Some(ref term) = self.search_term {
            let hit = [
                record.number.as_str(),
                record.interested_party.as_str(),
                record.subject.as_str(),
                record.sector.as_str(),
                record.observations.as_str(),
            ]
            .iter()
            .any(|field| contains(field, term));
            if !hit {
                return false;
            }
        }

        let f = &self.filters;
        if f.origin.is_some_and(|origin| origin != record.origin) {
            return false;
        }
        if f.sector.as_ref().is_some_and(|s| !contains(&record.sector, s)) {
            return false;
        }
        if let Some(start) = f.entry_date_start {
            if record.entry_date.is_none_or(|d| d < start) {
                return false;
            }
        }
        if let Some(end) = f.entry_date_end {
            if record.entry_date.is_none_or(|d| d > end) {
                return false;
            }
        }
        if f.urgent == Some(true) && !record.urgent {
            return false;
        }
        if f.overdue == Some(true) && !record.deadline.is_some_and(|d| d < today) {
            return false;
        }
        if f.empty_sector == Some(true) && !record.sector.trim().is_empty() {
            return false;
        }
        if f.empty_exit_date == Some(true) && record.exit_date.is_some() {
            return false;
        }
        true
    }
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        FilterState::default().to_query()
    }
}

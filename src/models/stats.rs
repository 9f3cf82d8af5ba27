//! Dashboard aggregation over the current-state set.
//!
//! All functions here are pure: they take resolved records plus a reference
//! "today" and return freshly computed buckets. Nothing is persisted.

use super::{MovementRecord, NOT_INFORMED};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Days after today (inclusive) that still count as "near" the deadline.
pub const NEAR_DEADLINE_DAYS: i64 = 5;

/// Rows shown in the sector table.
pub const TOP_SECTORS: usize = 8;

/// Rows shown in the interested-party table.
pub const TOP_INTERESTED_PARTIES: usize = 5;

/// Buckets shown in the monthly trend.
pub const TREND_MONTHS: usize = 12;

/// Interested-party labels longer than this are truncated for display.
pub const PARTY_LABEL_WIDTH: usize = 25;

/// Deadline situation of a process relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineStatus {
    Overdue,
    Near,
    OnTime,
}

impl DeadlineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadlineStatus::Overdue => "overdue",
            DeadlineStatus::Near => "near",
            DeadlineStatus::OnTime => "on_time",
        }
    }

    /// Portuguese label used in exports.
    pub fn label(&self) -> &'static str {
        match self {
            DeadlineStatus::Overdue => "Atrasado",
            DeadlineStatus::Near => "Próximo do prazo",
            DeadlineStatus::OnTime => "No prazo",
        }
    }
}

/// Classify a deadline against a local calendar day.
///
/// The near window is `[today, today + NEAR_DEADLINE_DAYS]`, both ends inclusive.
pub fn classify_deadline(deadline: Option<NaiveDate>, today: NaiveDate) -> DeadlineStatus {
    let Some(deadline) = deadline else {
        return DeadlineStatus::OnTime;
    };
    if deadline < today {
        DeadlineStatus::Overdue
    } else if deadline <= today + Duration::days(NEAR_DEADLINE_DAYS) {
        DeadlineStatus::Near
    } else {
        DeadlineStatus::OnTime
    }
}

/// A labelled count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub label: String,
    pub count: usize,
}

/// Scalar figures shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    /// Distinct processes in the current-state set
    pub unique_processes: usize,
    /// Movement rows in the store, as counted by the store
    pub total_history_rows: usize,
    pub urgent: usize,
    pub overdue: usize,
    pub near_deadline: usize,
    pub empty_sector: usize,
}

/// Everything the dashboard displays, computed from one current-state set.
///
/// The grouped tables hold every group. The display views (`top_sectors`,
/// `top_interested_parties`, `month_trend`) slice them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    pub today: NaiveDate,
    pub totals: Totals,
    pub by_sector: Vec<AggregateBucket>,
    pub by_origin: Vec<AggregateBucket>,
    pub by_interested_party: Vec<AggregateBucket>,
    /// `YYYY-MM` buckets ascending, undated records last
    pub by_month: Vec<AggregateBucket>,
}

impl Dashboard {
    pub fn top_sectors(&self) -> &[AggregateBucket] {
        &self.by_sector[..self.by_sector.len().min(TOP_SECTORS)]
    }

    pub fn top_interested_parties(&self) -> &[AggregateBucket] {
        &self.by_interested_party[..self.by_interested_party.len().min(TOP_INTERESTED_PARTIES)]
    }

    /// The most recent dated months, ascending, labelled `MM/YYYY`.
    pub fn month_trend(&self) -> Vec<AggregateBucket> {
        let dated: Vec<&AggregateBucket> = self
            .by_month
            .iter()
            .filter(|b| b.label != NOT_INFORMED)
            .collect();
        let skip = dated.len().saturating_sub(TREND_MONTHS);
        dated
            .into_iter()
            .skip(skip)
            .map(|b| AggregateBucket {
                label: month_display(&b.label),
                count: b.count,
            })
            .collect()
    }
}

/// `YYYY-MM` -> `MM/YYYY`.
fn month_display(key: &str) -> String {
    match (key.get(0..4), key.get(5..7)) {
        (Some(year), Some(month)) => format!("{}/{}", month, year),
        _ => key.to_string(),
    }
}

/// Truncate an interested-party name for display.
pub fn party_label(raw: &str) -> String {
    if raw.trim().is_empty() {
        return NOT_INFORMED.to_string();
    }
    if raw.chars().count() > PARTY_LABEL_WIDTH {
        let head: String = raw.chars().take(PARTY_LABEL_WIDTH).collect();
        format!("{}...", head)
    } else {
        raw.to_string()
    }
}

/// Counts keyed by a grouping value, remembering first-encounter order.
struct GroupCounter {
    index: HashMap<String, usize>,
    buckets: Vec<AggregateBucket>,
}

impl GroupCounter {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            buckets: Vec::new(),
        }
    }

    fn add(&mut self, key: &str, label: impl FnOnce() -> String) {
        match self.index.get(key) {
            Some(&i) => self.buckets[i].count += 1,
            None => {
                self.index.insert(key.to_string(), self.buckets.len());
                self.buckets.push(AggregateBucket {
                    label: label(),
                    count: 1,
                });
            }
        }
    }

    /// Count descending; equal counts keep first-encounter order.
    fn by_count(mut self) -> Vec<AggregateBucket> {
        self.buckets.sort_by(|a, b| b.count.cmp(&a.count));
        self.buckets
    }
}

/// Compute dashboard figures from the current-state records.
///
/// `records` should be in listing order; ties in the grouped tables keep
/// the order records are encountered. `total_history_rows` comes from the
/// store because the in-memory set may be capped.
pub fn aggregate<'a, I>(records: I, total_history_rows: usize, today: NaiveDate) -> Dashboard
where
    I: IntoIterator<Item = &'a MovementRecord>,
{
    let mut totals = Totals {
        total_history_rows,
        ..Default::default()
    };
    let mut sectors = GroupCounter::new();
    let mut origins = GroupCounter::new();
    let mut parties = GroupCounter::new();
    let mut months: HashMap<String, usize> = HashMap::new();

    for record in records {
        totals.unique_processes += 1;
        if record.urgent {
            totals.urgent += 1;
        }
        match classify_deadline(record.deadline, today) {
            DeadlineStatus::Overdue => totals.overdue += 1,
            DeadlineStatus::Near => totals.near_deadline += 1,
            DeadlineStatus::OnTime => {}
        }

        let sector = record.sector.trim();
        if sector.is_empty() {
            totals.empty_sector += 1;
            sectors.add(NOT_INFORMED, || NOT_INFORMED.to_string());
        } else {
            sectors.add(sector, || sector.to_string());
        }

        let origin = record.origin.as_str();
        origins.add(origin, || origin.to_string());

        let party = record.interested_party.trim();
        parties.add(party, || party_label(party));

        let month = record
            .entry_date
            .map(|d| d.format("%Y-%m").to_string())
            .unwrap_or_else(|| NOT_INFORMED.to_string());
        *months.entry(month).or_insert(0) += 1;
    }

    let mut by_month: Vec<AggregateBucket> = months
        .into_iter()
        .map(|(label, count)| AggregateBucket { label, count })
        .collect();
    by_month.sort_by(|a, b| {
        (a.label == NOT_INFORMED, &a.label).cmp(&(b.label == NOT_INFORMED, &b.label))
    });

    Dashboard {
        today,
        totals,
        by_sector: sectors.by_count(),
        by_origin: origins.by_count(),
        by_interested_party: parties.by_count(),
        by_month,
    }
}

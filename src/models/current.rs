//! Current-state resolution over movement history.
//!
//! Every movement of a process is stored as its own row. The "current"
//! movement of a process number is the one with the latest entry date,
//! tie-broken by the latest write timestamp. When both instants tie, the
//! record seen first is kept.

use super::MovementRecord;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// The single current record per process number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentState {
    by_number: BTreeMap<String, MovementRecord>,
}

impl CurrentState {
    /// Number of distinct processes.
    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    /// Look up the current record of a process number (trimmed, case-sensitive).
    pub fn get(&self, number: &str) -> Option<&MovementRecord> {
        self.by_number.get(number.trim())
    }

    /// The underlying mapping from trimmed number to record.
    pub fn as_map(&self) -> &BTreeMap<String, MovementRecord> {
        &self.by_number
    }

    /// Records in listing order: newest entry date first, then number ascending.
    ///
    /// Consumers that break ties by "first encountered" rely on this order.
    pub fn records(&self) -> Vec<&MovementRecord> {
        let mut records: Vec<&MovementRecord> = self.by_number.values().collect();
        records.sort_by(|a, b| listing_order(a, b));
        records
    }

    /// Owned records in listing order.
    pub fn into_records(self) -> Vec<MovementRecord> {
        let mut records: Vec<MovementRecord> = self.by_number.into_values().collect();
        records.sort_by(listing_order);
        records
    }
}

fn listing_order(a: &MovementRecord, b: &MovementRecord) -> Ordering {
    b.entry_instant()
        .cmp(&a.entry_instant())
        .then_with(|| a.key().cmp(b.key()))
}

/// Whether `candidate` should replace `stored` as the current record.
fn supersedes(candidate: &MovementRecord, stored: &MovementRecord) -> bool {
    match candidate.entry_instant().cmp(&stored.entry_instant()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.fallback_instant() > stored.fallback_instant(),
    }
}

/// Reduce movement rows to one current record per trimmed process number.
///
/// Missing entry dates compare as the smallest possible instant, so any
/// dated record beats them. Numbers are trimmed but not case-folded:
/// `"a-1"` and `"A-1"` are distinct processes.
pub fn resolve_current<I>(records: I) -> CurrentState
where
    I: IntoIterator<Item = MovementRecord>,
{
    let mut by_number: BTreeMap<String, MovementRecord> = BTreeMap::new();

    for candidate in records {
        let key = candidate.key().to_string();
        match by_number.get(&key) {
            Some(stored) if !supersedes(&candidate, stored) => {}
            _ => {
                by_number.insert(key, candidate);
            }
        }
    }

    CurrentState { by_number }
}

/// All movements of one process number in chronological order.
///
/// Oldest entry first; equal entry dates are ordered by write timestamp.
pub fn process_history<I>(records: I, number: &str) -> Vec<MovementRecord>
where
    I: IntoIterator<Item = MovementRecord>,
{
    let wanted = number.trim();
    let mut history: Vec<MovementRecord> =
        records.into_iter().filter(|r| r.key() == wanted).collect();
    history.sort_by(|a, b| {
        a.entry_instant()
            .cmp(&b.entry_instant())
            .then_with(|| a.fallback_instant().cmp(&b.fallback_instant()))
    });
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn record(id: &str, number: &str, entry: Option<NaiveDate>) -> MovementRecord {
        let mut r = MovementRecord::new(number, date(2000, 1, 1));
        r.id = id.to_string();
        r.number = number.to_string();
        r.entry_date = entry;
        r.created_at = None;
        r.updated_at = None;
        r
    }

    #[test]
    fn test_empty_input() {
        let state = resolve_current(Vec::new());
        assert!(state.is_empty());
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn test_later_entry_date_wins() {
        let old = record("r1", "A", Some(date(2024, 1, 1)));
        let new = record("r2", "A", Some(date(2024, 2, 1)));

        let state = resolve_current(vec![old.clone(), new.clone()]);
        assert_eq!(state.get("A").unwrap().id, "r2");

        let state = resolve_current(vec![new, old]);
        assert_eq!(state.get("A").unwrap().id, "r2");
    }

    #[test]
    fn test_equal_entry_dates_use_updated_at() {
        let mut first = record("r1", "A", Some(date(2024, 1, 1)));
        first.updated_at = Some(at(2024, 1, 2));
        let mut second = record("r2", "A", Some(date(2024, 1, 1)));
        second.updated_at = Some(at(2024, 1, 3));

        let state = resolve_current(vec![first.clone(), second.clone()]);
        assert_eq!(state.get("A").unwrap().id, "r2");

        let state = resolve_current(vec![second, first]);
        assert_eq!(state.get("A").unwrap().id, "r2");
    }

    #[test]
    fn test_fallback_uses_created_at_when_updated_missing() {
        let mut first = record("r1", "A", Some(date(2024, 1, 1)));
        first.created_at = Some(at(2024, 1, 5));
        let mut second = record("r2", "A", Some(date(2024, 1, 1)));
        second.created_at = Some(at(2024, 1, 4));

        let state = resolve_current(vec![second, first]);
        assert_eq!(state.get("A").unwrap().id, "r1");
    }

    #[test]
    fn test_full_tie_keeps_first_seen() {
        let first = record("r1", "A", Some(date(2024, 1, 1)));
        let second = record("r2", "A", Some(date(2024, 1, 1)));

        let state = resolve_current(vec![first.clone(), second.clone()]);
        assert_eq!(state.get("A").unwrap().id, "r1");

        let state = resolve_current(vec![second, first]);
        assert_eq!(state.get("A").unwrap().id, "r2");
    }

    #[test]
    fn test_missing_entry_date_loses_to_any_dated_record() {
        let undated = record("r1", "A", None);
        let mut dated = record("r2", "A", Some(date(1990, 1, 1)));
        dated.updated_at = Some(at(1990, 1, 1));

        let state = resolve_current(vec![undated.clone(), dated.clone()]);
        assert_eq!(state.get("A").unwrap().id, "r2");

        let state = resolve_current(vec![dated, undated]);
        assert_eq!(state.get("A").unwrap().id, "r2");
    }

    #[test]
    fn test_only_undated_records_still_resolve() {
        let state = resolve_current(vec![record("r1", "A", None), record("r2", "A", None)]);
        assert_eq!(state.len(), 1);
        assert_eq!(state.get("A").unwrap().id, "r1");
    }

    #[test]
    fn test_numbers_are_trimmed_not_case_folded() {
        let records = vec![
            record("r1", "abc", Some(date(2024, 1, 1))),
            record("r2", " abc ", Some(date(2024, 1, 2))),
            record("r3", "ABC", Some(date(2024, 1, 3))),
        ];
        let state = resolve_current(records);
        assert_eq!(state.len(), 2);
        assert_eq!(state.get("abc").unwrap().id, "r2");
        assert_eq!(state.get("  abc").unwrap().id, "r2");
        assert_eq!(state.get("ABC").unwrap().id, "r3");
    }

    #[test]
    fn test_records_listing_order() {
        let records = vec![
            record("r1", "B", Some(date(2024, 1, 1))),
            record("r2", "A", Some(date(2024, 1, 1))),
            record("r3", "C", Some(date(2024, 3, 1))),
            record("r4", "D", None),
        ];
        let state = resolve_current(records);
        let ids: Vec<&str> = state.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r2", "r1", "r4"]);

        let owned: Vec<String> = state.into_records().into_iter().map(|r| r.id).collect();
        assert_eq!(owned, vec!["r3", "r2", "r1", "r4"]);
    }

    #[test]
    fn test_process_history_chronological() {
        let mut late_write = record("r2", "A", Some(date(2024, 1, 1)));
        late_write.updated_at = Some(at(2024, 1, 9));
        let mut early_write = record("r1", "A", Some(date(2024, 1, 1)));
        early_write.updated_at = Some(at(2024, 1, 2));
        let records = vec![
            record("r3", "A", Some(date(2024, 2, 1))),
            late_write,
            record("x", "B", Some(date(2023, 1, 1))),
            early_write,
        ];

        let ids: Vec<String> = process_history(records, " A ")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
    }

    fn arb_records() -> impl Strategy<Value = Vec<MovementRecord>> {
        prop::collection::vec((0usize..4, prop::option::of(0i64..20), any::<bool>()), 0..24)
            .prop_map(|specs| {
                let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (n, day, padded))| {
                        let number = if padded {
                            format!(" P-{} ", n)
                        } else {
                            format!("P-{}", n)
                        };
                        let entry = day.map(|d| date(2024, 1, 1) + Duration::days(d));
                        let mut r = record(&format!("r{}", i), &number, entry);
                        // Distinct write timestamps keep every comparison decisive.
                        r.updated_at = Some(base + Duration::minutes(i as i64));
                        r
                    })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn prop_resolver_is_idempotent(records in arb_records()) {
            let once = resolve_current(records);
            let twice = resolve_current(once.as_map().values().cloned().collect::<Vec<_>>());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_resolver_is_order_independent(
            (records, shuffled) in arb_records()
                .prop_flat_map(|r| (Just(r.clone()), Just(r).prop_shuffle()))
        ) {
            prop_assert_eq!(resolve_current(records), resolve_current(shuffled));
        }

        #[test]
        fn prop_one_entry_per_distinct_number(records in arb_records()) {
            let keys: BTreeSet<String> = records.iter().map(|r| r.key().to_string()).collect();
            let state = resolve_current(records);
            prop_assert_eq!(state.len(), keys.len());
        }
    }
}

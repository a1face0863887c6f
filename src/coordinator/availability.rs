use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::*;

// ── Per-day classification ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityStatus {
    Full,
    NearFull,
    Normal,
}

/// Capacity of one day as seen by a specific item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    /// Hours booked by every contributor except the excluded item.
    pub other_hours: f64,
    pub remaining: f64,
    pub status: CapacityStatus,
}

/// `remaining <= 0` is full, `0 < remaining < 2` is near-full, anything else normal.
pub fn classify(remaining: f64) -> CapacityStatus {
    if remaining <= FULL_REMAINING_HOURS {
        CapacityStatus::Full
    } else if remaining < NEAR_FULL_HOURS {
        CapacityStatus::NearFull
    } else {
        CapacityStatus::Normal
    }
}

/// Classify a day, ignoring `exclude`'s own contribution so an item being
/// rescheduled never blocks the day it already occupies.
pub fn assess(record: &AllocationRecord, exclude: Option<ItemId>) -> DayAvailability {
    let other_hours: f64 = record
        .contributions
        .iter()
        .filter(|c| Some(c.item_id) != exclude)
        .map(|c| c.hours)
        .sum();
    let remaining = record.max_hours - other_hours;
    DayAvailability {
        date: record.date,
        other_hours,
        remaining,
        status: classify(remaining),
    }
}

pub fn assess_all(records: &[AllocationRecord], exclude: Option<ItemId>) -> Vec<DayAvailability> {
    records.iter().map(|r| assess(r, exclude)).collect()
}

/// Dates to grey out or warn about in a date picker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkdayStatus {
    pub fully_booked: BTreeSet<NaiveDate>,
    pub nearly_full: BTreeSet<NaiveDate>,
}

pub fn workday_status(records: &[AllocationRecord], exclude: Option<ItemId>) -> WorkdayStatus {
    let mut status = WorkdayStatus::default();
    for day in records.iter().map(|r| assess(r, exclude)) {
        match day.status {
            CapacityStatus::Full => {
                status.fully_booked.insert(day.date);
            }
            CapacityStatus::NearFull => {
                status.nearly_full.insert(day.date);
            }
            CapacityStatus::Normal => {}
        }
    }
    status
}

// ── Load summary ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Overloaded,
    High,
    Normal,
}

/// Whole-day load, counting every contributor.
pub fn load_level(record: &AllocationRecord) -> LoadLevel {
    if record.allocated_hours > record.max_hours {
        LoadLevel::Overloaded
    } else if record.allocated_hours > record.max_hours * HIGH_LOAD_RATIO {
        LoadLevel::High
    } else {
        LoadLevel::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayLoad {
    pub date: NaiveDate,
    pub allocated_hours: f64,
    pub max_hours: f64,
    pub level: LoadLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySummary {
    pub entity_id: EntityId,
    pub range: DateRange,
    pub days: Vec<DayLoad>,
    pub total_allocated: f64,
    /// `total_allocated` in the configured display unit.
    pub total_label: String,
}

impl CapacitySummary {
    pub fn build(
        entity_id: EntityId,
        range: DateRange,
        records: &[AllocationRecord],
        work_hours: &WorkHours,
    ) -> Self {
        let mut days: Vec<DayLoad> = records
            .iter()
            .filter(|r| range.contains(r.date))
            .map(|r| DayLoad {
                date: r.date,
                allocated_hours: r.allocated_hours,
                max_hours: r.max_hours,
                level: load_level(r),
            })
            .collect();
        days.sort_by_key(|d| d.date);
        let total_allocated = days.iter().map(|d| d.allocated_hours).sum();
        Self {
            entity_id,
            range,
            days,
            total_allocated,
            total_label: work_hours.format_hours(total_allocated),
        }
    }

    pub fn overloaded_days(&self) -> impl Iterator<Item = &DayLoad> {
        self.days.iter().filter(|d| d.level == LoadLevel::Overloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(date: &str, max_hours: f64, contributions: &[(ItemId, f64)]) -> AllocationRecord {
        let contributions: Vec<Contribution> = contributions
            .iter()
            .map(|&(item_id, hours)| Contribution { item_id, item_name: None, hours })
            .collect();
        AllocationRecord {
            entity_id: 1,
            date: d(date),
            allocated_hours: contributions.iter().map(|c| c.hours).sum(),
            max_hours,
            contributions,
            is_overtime: false,
        }
    }

    // ── classify ────────────────────────────────────────

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(-1.0), CapacityStatus::Full);
        assert_eq!(classify(0.0), CapacityStatus::Full);
        assert_eq!(classify(0.5), CapacityStatus::NearFull);
        assert_eq!(classify(1.99), CapacityStatus::NearFull);
        assert_eq!(classify(2.0), CapacityStatus::Normal);
        assert_eq!(classify(8.0), CapacityStatus::Normal);
    }

    // ── assess ──────────────────────────────────────────

    #[test]
    fn excluding_either_contributor_leaves_normal() {
        let r = record("2024-06-10", 8.0, &[(1, 5.0), (2, 3.0)]);

        let without_two = assess(&r, Some(2));
        assert_eq!(without_two.other_hours, 5.0);
        assert_eq!(without_two.remaining, 3.0);
        assert_eq!(without_two.status, CapacityStatus::Normal);

        let without_one = assess(&r, Some(1));
        assert_eq!(without_one.other_hours, 3.0);
        assert_eq!(without_one.remaining, 5.0);
        assert_eq!(without_one.status, CapacityStatus::Normal);
    }

    #[test]
    fn exactly_two_hours_left_is_not_near_full() {
        let r = record("2024-06-10", 8.0, &[(1, 6.0), (2, 2.0)]);
        let day = assess(&r, Some(2));
        assert_eq!(day.other_hours, 6.0);
        assert_eq!(day.remaining, 2.0);
        assert_eq!(day.status, CapacityStatus::Normal);
    }

    #[test]
    fn others_filling_the_day_is_full() {
        let r = record("2024-06-10", 8.0, &[(1, 8.0), (2, 4.0)]);
        let day = assess(&r, Some(2));
        assert_eq!(day.other_hours, 8.0);
        assert_eq!(day.remaining, 0.0);
        assert_eq!(day.status, CapacityStatus::Full);
    }

    #[test]
    fn no_exclusion_counts_everyone() {
        let r = record("2024-06-10", 8.0, &[(1, 5.0), (2, 2.0)]);
        let day = assess(&r, None);
        assert_eq!(day.other_hours, 7.0);
        assert_eq!(day.status, CapacityStatus::NearFull);
    }

    #[test]
    fn excluding_unrelated_item_changes_nothing() {
        let r = record("2024-06-10", 8.0, &[(1, 5.0), (2, 2.0)]);
        assert_eq!(assess(&r, Some(99)), assess(&r, None));
    }

    #[test]
    fn empty_day_is_normal() {
        let r = record("2024-06-10", 8.0, &[]);
        let day = assess(&r, Some(1));
        assert_eq!(day.remaining, 8.0);
        assert_eq!(day.status, CapacityStatus::Normal);
    }

    // ── workday_status ──────────────────────────────────

    #[test]
    fn workday_status_buckets_dates() {
        let records = vec![
            record("2024-06-10", 8.0, &[(1, 8.0)]),
            record("2024-06-11", 8.0, &[(1, 7.0)]),
            record("2024-06-12", 8.0, &[(1, 2.0)]),
            record("2024-06-13", 8.0, &[(1, 4.0), (5, 4.0)]),
        ];
        let status = workday_status(&records, Some(5));
        assert_eq!(status.fully_booked, BTreeSet::from([d("2024-06-10")]));
        assert_eq!(status.nearly_full, BTreeSet::from([d("2024-06-11")]));
    }

    // ── load summary ────────────────────────────────────

    #[test]
    fn load_levels() {
        assert_eq!(load_level(&record("2024-06-10", 8.0, &[(1, 9.0)])), LoadLevel::Overloaded);
        assert_eq!(load_level(&record("2024-06-10", 8.0, &[(1, 7.0)])), LoadLevel::High);
        assert_eq!(load_level(&record("2024-06-10", 8.0, &[(1, 6.4)])), LoadLevel::Normal);
        assert_eq!(load_level(&record("2024-06-10", 8.0, &[(1, 8.0)])), LoadLevel::High);
    }

    #[test]
    fn summary_sorts_and_clips_to_range() {
        let records = vec![
            record("2024-06-12", 8.0, &[(1, 10.0)]),
            record("2024-06-10", 8.0, &[(1, 4.0)]),
            record("2024-06-20", 8.0, &[(1, 8.0)]),
        ];
        let range = DateRange::new(d("2024-06-10"), d("2024-06-12"));
        let summary = CapacitySummary::build(1, range, &records, &WorkHours::default());
        assert_eq!(summary.days.len(), 2);
        assert_eq!(summary.days[0].date, d("2024-06-10"));
        assert_eq!(summary.total_allocated, 14.0);
        assert_eq!(summary.total_label, "1.8d");
        assert_eq!(summary.overloaded_days().count(), 1);
    }
}

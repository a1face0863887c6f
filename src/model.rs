use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend identifier of a schedulable item (task).
pub type ItemId = i64;

/// Backend identifier of a capacity-owning entity (developer).
pub type EntityId = i64;

/// Partial field set sent to `updateItem` / `batchUpdateItems`.
/// `Value::Null` means "clear this field"; an absent key means "not provided".
pub type Fields = Map<String, Value>;

// ── Field vocabulary ──────────────────────────────────────────

pub const FIELD_OWNER: &str = "owner_id";
pub const FIELD_START: &str = "planned_start";
pub const FIELD_END: &str = "planned_end";
pub const FIELD_HOURS: &str = "planned_hours";

/// Fields whose change can move hours between days or developers.
pub const AVAILABILITY_FIELDS: [&str; 4] = [FIELD_OWNER, FIELD_START, FIELD_END, FIELD_HOURS];

pub fn affects_availability(field: &str) -> bool {
    AVAILABILITY_FIELDS.contains(&field)
}

/// Read an owner id out of a JSON value (`null` and non-integers mean no owner).
pub fn owner_from_value(value: &Value) -> Option<EntityId> {
    value.as_i64()
}

// ── Allocation data ───────────────────────────────────────────

/// One item's share of a developer's day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub item_id: ItemId,
    #[serde(default)]
    pub item_name: Option<String>,
    pub hours: f64,
}

/// One developer's booked hours on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub entity_id: EntityId,
    pub date: NaiveDate,
    pub allocated_hours: f64,
    pub max_hours: f64,
    pub contributions: Vec<Contribution>,
    #[serde(default)]
    pub is_overtime: bool,
}

/// Inclusive calendar-day range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_inverted(&self) -> bool {
        self.start > self.end
    }

    /// Number of calendar days covered, 0 for an inverted range.
    pub fn days(&self) -> i64 {
        if self.is_inverted() {
            0
        } else {
            (self.end - self.start).num_days() + 1
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

// ── Items ─────────────────────────────────────────────────────

/// An item as loaded into the local view: id plus its current field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub fields: Fields,
}

impl ItemRecord {
    pub fn new(id: ItemId, fields: Fields) -> Self {
        Self { id, fields }
    }

    pub fn owner(&self) -> Option<EntityId> {
        self.fields.get(FIELD_OWNER).and_then(owner_from_value)
    }
}

/// One entry of a batched write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub id: ItemId,
    pub fields: Fields,
}

/// Outcome summary of `batchUpdateItems`; per-item outcomes stay opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub success_count: usize,
    pub fail_count: usize,
    pub errors: Vec<String>,
}

impl BatchResult {
    pub fn is_complete_success(&self) -> bool {
        self.fail_count == 0
    }
}

/// The schedule-relevant slice of an item that a drag or resize gesture moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub owner_id: Option<EntityId>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ScheduleState {
    pub fn new(owner_id: Option<EntityId>, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { owner_id, start, end }
    }

    /// Extract the schedule from an item's field values. Unparseable dates read as unset.
    pub fn from_fields(fields: &Fields) -> Self {
        let date = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        };
        Self {
            owner_id: fields.get(FIELD_OWNER).and_then(owner_from_value),
            start: date(FIELD_START),
            end: date(FIELD_END),
        }
    }

    /// Full field set for this schedule; unset parts become explicit clears.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(FIELD_OWNER.into(), self.owner_id.map_or(Value::Null, Value::from));
        fields.insert(FIELD_START.into(), date_value(self.start));
        fields.insert(FIELD_END.into(), date_value(self.end));
        fields
    }

    pub fn range(&self) -> Option<DateRange> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(DateRange::new(start, end)),
            (Some(day), None) | (None, Some(day)) => Some(DateRange::new(day, day)),
            (None, None) => None,
        }
    }
}

fn date_value(date: Option<NaiveDate>) -> Value {
    date.map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d").to_string()))
}

/// The schedule fields of an item exactly as stored. `None` marks an absent key,
/// which is not the same as an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub owner: Option<Value>,
    pub start: Option<Value>,
    pub end: Option<Value>,
}

impl ScheduleSnapshot {
    pub fn capture(fields: &Fields) -> Self {
        Self {
            owner: fields.get(FIELD_OWNER).cloned(),
            start: fields.get(FIELD_START).cloned(),
            end: fields.get(FIELD_END).cloned(),
        }
    }

    fn entries(&self) -> [(&'static str, &Option<Value>); 3] {
        [(FIELD_OWNER, &self.owner), (FIELD_START, &self.start), (FIELD_END, &self.end)]
    }

    /// Typed reading of the captured values.
    pub fn state(&self) -> ScheduleState {
        let present: Fields = self
            .entries()
            .into_iter()
            .filter_map(|(key, value)| value.clone().map(|v| (key.to_string(), v)))
            .collect();
        ScheduleState::from_fields(&present)
    }

    /// Write the captured values back; keys that were absent are removed.
    pub fn restore(&self, fields: &mut Fields) {
        for (key, value) in self.entries() {
            match value {
                Some(v) => {
                    fields.insert(key.to_string(), v.clone());
                }
                None => {
                    fields.remove(key);
                }
            }
        }
    }
}

// ── Display units ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayUnit {
    Day,
    Hour,
}

/// Read-only display settings supplied by the external settings collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkHours {
    pub unit: DisplayUnit,
    pub hours_per_day: f64,
}

impl Default for WorkHours {
    fn default() -> Self {
        Self {
            unit: DisplayUnit::Day,
            hours_per_day: 8.0,
        }
    }
}

impl WorkHours {
    /// Render stored hours in the configured unit, e.g. `"24h"`, `"3d"` or `"2.5d"`.
    pub fn format_hours(&self, hours: f64) -> String {
        match self.unit {
            DisplayUnit::Hour => format!("{}h", trim_number(hours)),
            DisplayUnit::Day => {
                let days = hours / self.hours_per_day;
                if days.fract() == 0.0 {
                    format!("{}d", trim_number(days))
                } else {
                    format!("{days:.1}d")
                }
            }
        }
    }

    /// Convert a value typed in the display unit into stored hours.
    pub fn input_to_hours(&self, input: f64) -> f64 {
        match self.unit {
            DisplayUnit::Hour => input,
            DisplayUnit::Day => input * self.hours_per_day,
        }
    }

    /// Convert stored hours into the display unit, rounded to two decimals.
    pub fn hours_to_display(&self, hours: f64) -> f64 {
        match self.unit {
            DisplayUnit::Hour => hours,
            DisplayUnit::Day => ((hours / self.hours_per_day) * 100.0).round() / 100.0,
        }
    }

    pub fn unit_suffix(&self) -> &'static str {
        match self.unit {
            DisplayUnit::Hour => "h",
            DisplayUnit::Day => "d",
        }
    }
}

fn trim_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

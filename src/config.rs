use std::time::Duration;

use crate::limits::*;
use crate::model::{DisplayUnit, WorkHours};

/// Runtime knobs of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Quiet period after the last edit to a `(item, field)` before it is written.
    pub debounce: Duration,
    /// Passed through to every allocation fetch.
    pub include_overtime: bool,
    /// Publish a capacity summary for the new owner after a committed drag.
    pub summary_on_commit: bool,
    pub summary_ttl: Duration,
    pub notify_capacity: usize,
    pub work_hours: WorkHours,
    pub metrics_port: Option<u16>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            include_overtime: true,
            summary_on_commit: true,
            summary_ttl: Duration::from_millis(DEFAULT_SUMMARY_TTL_MS),
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
            work_hours: WorkHours::default(),
            metrics_port: None,
        }
    }
}

impl CoordinatorConfig {
    /// Read `LOADWISE_*` variables, falling back to defaults for unset or unparseable ones.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let ms = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|s| parse_flag(&s))
                .unwrap_or(default)
        };

        let unit = match lookup("LOADWISE_DISPLAY_UNIT").as_deref() {
            Some("hour") | Some("h") => DisplayUnit::Hour,
            Some("day") | Some("d") => DisplayUnit::Day,
            _ => defaults.work_hours.unit,
        };
        let hours_per_day = lookup("LOADWISE_HOURS_PER_DAY")
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|h| *h > 0.0)
            .unwrap_or(defaults.work_hours.hours_per_day);

        Self {
            debounce: ms("LOADWISE_DEBOUNCE_MS", defaults.debounce),
            include_overtime: flag("LOADWISE_INCLUDE_OVERTIME", defaults.include_overtime),
            summary_on_commit: flag("LOADWISE_SUMMARY_ON_COMMIT", defaults.summary_on_commit),
            summary_ttl: ms("LOADWISE_SUMMARY_TTL_MS", defaults.summary_ttl),
            notify_capacity: lookup("LOADWISE_NOTIFY_CAPACITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.notify_capacity),
            work_hours: WorkHours { unit, hours_per_day },
            metrics_port: lookup("LOADWISE_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

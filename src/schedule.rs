//! Cron matching for notification windows, and the table of scheduled watchers

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{LookoutError, Result};
use crate::watcher::WatcherConfig;

/// Day-of-week names indexed by standard cron numbers
const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A standard five-field cron expression (minute hour day-of-month month day-of-week)
#[derive(Debug, Clone)]
pub struct CronExpr {
    raw: String,
    /// More than one schedule when both day fields are restricted; any match counts
    schedules: Vec<Schedule>,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let raw = expr.trim();
        let fields: Vec<&str> = raw.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields.as_slice() else {
            return Err(LookoutError::InvalidCron(format!(
                "{} (expected 5 fields, got {})",
                raw,
                fields.len()
            )));
        };
        let restricted_days = is_restricted(day_of_month) && is_restricted(day_of_week);
        let day_of_week = normalize_weekdays(day_of_week)?;

        // Standard cron ORs the two day fields when both are restricted
        let variants = if restricted_days {
            vec![
                format!("0 {minute} {hour} {day_of_month} {month} *"),
                format!("0 {minute} {hour} * {month} {day_of_week}"),
            ]
        } else {
            vec![format!("0 {minute} {hour} {day_of_month} {month} {day_of_week}")]
        };

        let schedules = variants
            .iter()
            .map(|v| {
                Schedule::from_str(v)
                    .map_err(|e| LookoutError::InvalidCron(format!("{}: {}", raw, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_string(),
            schedules,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the minute containing `at` is part of this schedule
    pub fn includes<Z: TimeZone>(&self, at: &DateTime<Z>) -> bool {
        let Some(minute) = at.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return false;
        };
        self.schedules.iter().any(|s| s.includes(minute.clone()))
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A field starting with `*` counts as unrestricted, as in vixie cron
fn is_restricted(field: &str) -> bool {
    !field.starts_with('*') && field != "?"
}

/// Rewrite the day-of-week field as a list of day names.
///
/// Ranges and steps are expanded over standard numbering first, so `0-7`,
/// `5-7` and `1-7/2` never reach the parser with Sunday at the end.
fn normalize_weekdays(field: &str) -> Result<String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        expand_weekday_item(item, &mut days)?;
    }
    Ok(days
        .into_iter()
        .map(|day| WEEKDAYS[day])
        .collect::<Vec<_>>()
        .join(","))
}

fn expand_weekday_item(item: &str, days: &mut BTreeSet<usize>) -> Result<()> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => {
            let step = step
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| LookoutError::InvalidCron(format!("bad day-of-week step '{}'", step)))?;
            (range, Some(step))
        }
        None => (item, None),
    };

    let (start, end) = if range == "*" {
        (0, 6)
    } else if let Some((start, end)) = range.split_once('-') {
        (weekday_number(start)?, weekday_number(end)?)
    } else {
        let day = weekday_number(range)?;
        // `1/2` runs to the end of the week
        (day, if step.is_some() { 6 } else { day })
    };
    if start > end {
        return Err(LookoutError::InvalidCron(format!(
            "day-of-week range '{}' runs backwards",
            range
        )));
    }

    for day in (start..=end).step_by(step.unwrap_or(1)) {
        days.insert(day % 7);
    }
    Ok(())
}

/// Standard cron day number (0-7, Sunday is both 0 and 7) for a number or a name
fn weekday_number(token: &str) -> Result<usize> {
    if let Ok(n) = token.parse::<usize>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(LookoutError::InvalidCron(format!("day-of-week {} out of range", n)))
        };
    }
    WEEKDAYS
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .ok_or_else(|| LookoutError::InvalidCron(format!("bad day-of-week '{}'", token)))
}

/// Is `now` inside the window? No expression means every moment is.
pub fn matches(expr: Option<&CronExpr>, now: DateTime<Utc>, tz: Tz) -> bool {
    match expr {
        None => true,
        Some(expr) => expr.includes(&now.with_timezone(&tz)),
    }
}

/// Watchers registered for periodic fetching, keyed by name
///
/// Whoever owns the configuration calls `on_saved` / `on_deleted` after a
/// change is committed; `sync` does that for a freshly loaded config.
#[derive(Debug, Default)]
pub struct ScheduleTable {
    entries: BTreeMap<String, Option<CronExpr>>,
}

/// What a `sync` changed
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScheduleChanges {
    pub scheduled: Vec<String>,
    pub unscheduled: Vec<String>,
}

impl ScheduleChanges {
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty() && self.unscheduled.is_empty()
    }
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook for a created or edited watcher. Returns whether it is now scheduled.
    pub fn on_saved(&mut self, watcher: &WatcherConfig) -> bool {
        if watcher.is_active {
            self.entries.insert(watcher.name.clone(), watcher.cron.clone());
            true
        } else {
            self.entries.remove(&watcher.name);
            false
        }
    }

    /// Hook for a deleted (or renamed away) watcher
    pub fn on_deleted(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Bring the table in line with `watchers`, calling the hooks for each difference
    pub fn sync(&mut self, watchers: &[WatcherConfig]) -> ScheduleChanges {
        let mut changes = ScheduleChanges::default();
        let names: BTreeSet<&str> = watchers.iter().map(|w| w.name.as_str()).collect();

        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|name| !names.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            if self.on_deleted(&name) {
                changes.unscheduled.push(name);
            }
        }

        for watcher in watchers {
            let previous = self.entries.get(&watcher.name).cloned();
            let scheduled = self.on_saved(watcher);
            match previous {
                Some(_) if !scheduled => changes.unscheduled.push(watcher.name.clone()),
                Some(cron) if cron == watcher.cron => {}
                _ if scheduled => changes.scheduled.push(watcher.name.clone()),
                _ => {}
            }
        }

        changes
    }

    /// Names of scheduled watchers whose fetch cron matches `now`
    pub fn due(&self, now: DateTime<Utc>, tz: Tz) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, cron)| matches(cron.as_ref(), now, tz))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::{Selector, WebSelector};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn watcher(name: &str, cron: Option<&str>) -> WatcherConfig {
        let mut w = WatcherConfig::new(
            name,
            "https://example.com",
            Selector::Web(WebSelector::parse("a").unwrap()),
        );
        w.cron = cron.map(|c| CronExpr::parse(c).unwrap());
        w
    }

    #[test]
    fn test_empty_expression_always_matches() {
        assert!(matches(None, Utc::now(), Tz::UTC));
    }

    #[test]
    fn test_minute_and_hour() {
        let expr = CronExpr::parse("30 9 * * *").unwrap();
        assert!(matches(Some(&expr), at("2024-05-06T09:30:00Z"), Tz::UTC));
        assert!(matches(Some(&expr), at("2024-05-06T09:30:42Z"), Tz::UTC));
        assert!(!matches(Some(&expr), at("2024-05-06T09:31:00Z"), Tz::UTC));
    }

    #[test]
    fn test_evaluated_in_configured_timezone() {
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        // 09:00 in Bucharest (UTC+3 in summer) is 06:00 UTC
        let now = at("2024-07-01T06:00:00Z");
        assert!(matches(Some(&expr), now, chrono_tz::Europe::Bucharest));
        assert!(!matches(Some(&expr), now, Tz::UTC));
    }

    #[test]
    fn test_numeric_weekdays_use_standard_numbering() {
        // 2024-05-05 is a Sunday
        let sunday = at("2024-05-05T12:00:00Z");
        let monday = at("2024-05-06T12:00:00Z");
        for expr in ["0 12 * * 0", "0 12 * * 7", "0 12 * * sun"] {
            let expr = CronExpr::parse(expr).unwrap();
            assert!(matches(Some(&expr), sunday, Tz::UTC));
            assert!(!matches(Some(&expr), monday, Tz::UTC));
        }

        let weekdays = CronExpr::parse("0 12 * * 1-5").unwrap();
        assert!(matches(Some(&weekdays), monday, Tz::UTC));
        assert!(!matches(Some(&weekdays), sunday, Tz::UTC));

        let weekend = CronExpr::parse("0 12 * * 6-7").unwrap();
        assert!(matches(Some(&weekend), sunday, Tz::UTC));
        assert!(!matches(Some(&weekend), monday, Tz::UTC));
    }

    #[test]
    fn test_weekday_ranges_ending_on_sunday() {
        // 2024-05-05 is a Sunday
        let day = |d: u32| at(&format!("2024-05-{:02}T12:00:00Z", d));
        let matching = |expr: &str| -> Vec<u32> {
            let expr = CronExpr::parse(expr).unwrap();
            (5..12).filter(|&d| matches(Some(&expr), day(d), Tz::UTC)).collect()
        };

        assert_eq!(matching("0 12 * * 0-7"), vec![5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(matching("0 12 * * 5-7"), vec![5, 10, 11]);
        // Mon, Wed, Fri, Sun
        assert_eq!(matching("0 12 * * 1-7/2"), vec![5, 6, 8, 10]);
        assert_eq!(matching("0 12 * * */2"), vec![5, 7, 9, 11]);
        assert_eq!(matching("0 12 * * mon-wed,sat"), vec![6, 7, 8, 11]);
    }

    #[test]
    fn test_weekday_field_is_written_as_names() {
        assert_eq!(normalize_weekdays("0-7").unwrap(), "SUN,MON,TUE,WED,THU,FRI,SAT");
        assert_eq!(normalize_weekdays("1-7/2").unwrap(), "SUN,MON,WED,FRI");
        assert_eq!(normalize_weekdays("*").unwrap(), "*");
        assert!(normalize_weekdays("5-1").is_err());
        assert!(normalize_weekdays("1-5/0").is_err());
    }

    #[test]
    fn test_restricted_day_fields_are_ored() {
        // The 1st of the month, or any Monday
        let expr = CronExpr::parse("0 8 1 * 1").unwrap();
        assert!(matches(Some(&expr), at("2024-05-01T08:00:00Z"), Tz::UTC)); // Wednesday the 1st
        assert!(matches(Some(&expr), at("2024-05-06T08:00:00Z"), Tz::UTC)); // Monday the 6th
        assert!(!matches(Some(&expr), at("2024-05-07T08:00:00Z"), Tz::UTC));
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        for bad in ["* * * *", "0 0 * * * *", "61 * * * *", "0 0 * * 9", "0 0 * * m0n"] {
            assert!(
                matches!(CronExpr::parse(bad), Err(LookoutError::InvalidCron(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_table_hooks() {
        let mut table = ScheduleTable::new();
        assert!(table.on_saved(&watcher("a", Some("*/5 * * * *"))));
        assert!(table.contains("a"));

        let mut paused = watcher("a", None);
        paused.is_active = false;
        assert!(!table.on_saved(&paused));
        assert!(!table.contains("a"));

        table.on_saved(&watcher("b", None));
        assert!(table.on_deleted("b"));
        assert!(!table.on_deleted("b"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_sync_treats_rename_as_delete_and_save() {
        let mut table = ScheduleTable::new();
        let changes = table.sync(&[watcher("old", None), watcher("keep", None)]);
        assert_eq!(changes.scheduled, vec!["old".to_string(), "keep".to_string()]);

        let changes = table.sync(&[watcher("new", None), watcher("keep", None)]);
        assert_eq!(changes.unscheduled, vec!["old".to_string()]);
        assert_eq!(changes.scheduled, vec!["new".to_string()]);

        let changes = table.sync(&[watcher("new", None), watcher("keep", None)]);
        assert!(changes.is_empty());

        let changes = table.sync(&[watcher("new", Some("0 * * * *")), watcher("keep", None)]);
        assert_eq!(changes.scheduled, vec!["new".to_string()]);
    }

    #[test]
    fn test_due_watchers() {
        let mut table = ScheduleTable::new();
        table.sync(&[watcher("hourly", Some("0 * * * *")), watcher("always", None)]);

        let on_the_hour = table.due(at("2024-05-06T10:00:00Z"), Tz::UTC);
        assert_eq!(on_the_hour, vec!["always".to_string(), "hourly".to_string()]);

        let off_the_hour = table.due(at("2024-05-06T10:17:00Z"), Tz::UTC);
        assert_eq!(off_the_hour, vec!["always".to_string()]);
    }
}

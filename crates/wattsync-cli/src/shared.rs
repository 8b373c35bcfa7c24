use std::fs;
use std::io::{self, Read};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use wattsync_core::{DstRule, Period, Reconciler, TransitionCalendar};

use crate::cli::ZoneArgs;
use crate::error::{CliError, CliResult};

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parsed `--tz` / `--dst-rule` pair.
#[derive(Debug, Clone, Copy)]
pub struct Zone {
    pub tz: Tz,
    pub rule: DstRule,
}

impl Zone {
    pub fn from_args(args: &ZoneArgs) -> CliResult<Self> {
        let zone = Self {
            tz: parse_tz_or_input_error(&args.tz)?,
            rule: parse_dst_rule(&args.dst_rule)?,
        };
        zone.check_rule(Utc::now().year())?;
        Ok(zone)
    }

    /// Reject a DST rule whose Sundays differ from the zone's own
    /// transitions in `year`.
    pub fn check_rule(&self, year: i32) -> CliResult<()> {
        let mismatches = self.rule.mismatches(self.tz, year);
        if mismatches.is_empty() {
            return Ok(());
        }
        let dates: Vec<String> = mismatches.iter().map(NaiveDate::to_string).collect();
        Err(CliError::input(format!(
            "DST rule does not match timezone '{}' in {}: transition dates disagree on {}. \
             Pass --dst-rule matching the zone (eu, us)",
            self.tz,
            year,
            dates.join(", ")
        ))
        .with_status("dst_rule_mismatch"))
    }

    /// Reconciler with a fresh transition calendar for this run.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::new(TransitionCalendar::new(self.rule)), self.tz)
    }
}

pub fn parse_tz_or_input_error(name: &str) -> CliResult<Tz> {
    wattsync_core::tz::parse_tz(name)
        .map_err(|e| CliError::input(format!("Invalid timezone '{}': {}", name, e)))
}

pub fn parse_dst_rule(s: &str) -> CliResult<DstRule> {
    s.parse::<DstRule>()
        .map_err(|_| CliError::input(format!("Invalid dst_rule '{}'. Expected: eu, us", s)))
}

pub fn parse_period(s: &str) -> CliResult<Period> {
    s.parse::<Period>().map_err(|e| {
        CliError::input(format!(
            "Invalid period '{}': {}. Expected e.g. PT15MIN, PT1H",
            s, e
        ))
    })
}

pub fn parse_date(s: &str) -> CliResult<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| CliError::input(format!("Invalid date '{}'. Expected: YYYY-MM-DD", s)))
}

pub fn parse_local_time(s: &str) -> CliResult<NaiveDateTime> {
    let trimmed = s.trim();
    LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| {
            CliError::input(format!(
                "Invalid local time format '{}'. Expected: YYYY-MM-DDTHH:MM:SS",
                s
            ))
        })
}

/// Parse `HH:MM[:SS]` on `date`, or a full local date-time.
pub fn parse_local_on(s: &str, date: NaiveDate) -> CliResult<NaiveDateTime> {
    let trimmed = s.trim();
    if let Some(time) = ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
    {
        return Ok(date.and_time(time));
    }
    parse_local_time(trimmed)
}

/// Parse a user-supplied sync bound: a date (local midnight) or a local
/// date-time in `tz`. An offset suffix is honoured.
pub fn parse_sync_bound(s: &str, tz: Tz) -> CliResult<DateTime<Utc>> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let local = match parse_date(trimmed) {
        Ok(date) => date.and_time(NaiveTime::MIN),
        Err(_) => parse_local_time(trimmed)?,
    };

    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            CliError::input(format!(
                "Local time '{}' does not exist in timezone '{}'",
                trimmed, tz
            ))
            .with_status("nonexistent")
        })
}

/// Read a file, or stdin for `-`.
pub fn read_input(path: &str) -> CliResult<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| CliError::runtime(format!("Failed to read stdin: {}", e)))?;
        return Ok(buf);
    }

    fs::read_to_string(path)
        .map_err(|e| CliError::runtime(format!("Failed to open file '{}': {}", path, e)))
}

pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::runtime(format!("Failed to serialize JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}

pub fn format_rfc3339<T: TimeZone>(dt: &DateTime<T>) -> String
where
    T::Offset: std::fmt::Display,
{
    wattsync_core::tz::format_rfc3339(dt)
}

pub fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

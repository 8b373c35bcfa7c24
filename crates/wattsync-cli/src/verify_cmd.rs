use std::collections::{BTreeMap, BTreeSet};
use std::process::ExitCode;

use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Utc};
use serde::Serialize;
use tracing::warn;
use wattsync_core::tz::format_rfc3339_utc;
use wattsync_core::{Period, TransitionCalendar, TransitionKind, Window, civil_day_bounds};

use crate::cli::VerifyArgs;
use crate::error::{CliResult, EXIT_SUCCESS, OutputFormat};
use crate::influx::{InfluxStore, consumption_series};
use crate::shared::{Zone, format_rfc3339, parse_date, parse_period, print_json};

pub async fn run_verify(args: VerifyArgs, output_format: OutputFormat) -> CliResult<ExitCode> {
    let zone = Zone::from_args(&args.zone)?;
    let date = parse_date(&args.date)?;
    let period = parse_period(&args.period)?;

    let (start, end) = civil_day_bounds(date, zone.tz);
    let window = Window::new(start, end)?;
    let store = InfluxStore::new(
        reqwest::Client::new(),
        &args.influx.influxdb_url,
        &args.influx.influxdb_token,
        &args.influx.influxdb_org,
        &args.influx.influxdb_bucket,
    );
    let instants = store
        .instants_in(&consumption_series(&args.metering_point), &window)
        .await?;

    let calendar = TransitionCalendar::new(zone.rule);
    let report = summarize_day(&calendar, zone, date, period, &instants);
    if report.status != DayStatus::Complete {
        warn!(
            %date,
            expected = report.expected,
            stored = report.stored,
            "Stored readings do not match the expected period count"
        );
    }

    match output_format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_text(&report),
    }

    Ok(ExitCode::from(EXIT_SUCCESS))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum DayStatus {
    Complete,
    Incomplete,
    Excess,
}

impl std::fmt::Display for DayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DayStatus::Complete => write!(f, "complete"),
            DayStatus::Incomplete => write!(f, "incomplete"),
            DayStatus::Excess => write!(f, "excess"),
        }
    }
}

#[derive(Debug, Serialize)]
struct HourCount {
    utc_hour: String,
    local_hour: String,
    count: usize,
}

#[derive(Debug, Serialize)]
struct VerifyReport {
    date: String,
    tz: String,
    classification: TransitionKind,
    period: Period,
    expected: usize,
    stored: usize,
    status: DayStatus,
    hours: Vec<HourCount>,
}

fn summarize_day(
    calendar: &TransitionCalendar,
    zone: Zone,
    date: NaiveDate,
    period: Period,
    instants: &[DateTime<Utc>],
) -> VerifyReport {
    let expected = calendar.expected_period_count(date, zone.tz, period);
    let unique: BTreeSet<DateTime<Utc>> = instants.iter().copied().collect();

    let mut per_hour: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
    for instant in &unique {
        let hour = instant
            .duration_trunc(TimeDelta::hours(1))
            .unwrap_or(*instant);
        *per_hour.entry(hour).or_default() += 1;
    }

    let stored = unique.len();
    let status = match stored.cmp(&expected) {
        std::cmp::Ordering::Equal => DayStatus::Complete,
        std::cmp::Ordering::Less => DayStatus::Incomplete,
        std::cmp::Ordering::Greater => DayStatus::Excess,
    };

    let hours = per_hour
        .into_iter()
        .map(|(hour, count)| HourCount {
            utc_hour: format_rfc3339_utc(&hour),
            local_hour: format_rfc3339(&hour.with_timezone(&zone.tz)),
            count,
        })
        .collect();

    VerifyReport {
        date: date.to_string(),
        tz: zone.tz.to_string(),
        classification: calendar.classify(date, zone.tz).kind(),
        period,
        expected,
        stored,
        status,
        hours,
    }
}

fn print_text(report: &VerifyReport) {
    println!("Date: {} ({})", report.date, report.classification);
    println!("Timezone: {}", report.tz);
    for hour in &report.hours {
        println!("  {}  {}  {}", hour.utc_hour, hour.local_hour, hour.count);
    }
    println!(
        "Stored: {} / expected {} at {} -> {}",
        report.stored,
        report.expected,
        report.period,
        report.status
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::parse_tz_or_input_error;
    use chrono::{Duration, TimeZone, Timelike};
    use wattsync_core::DstRule;

    fn helsinki() -> Zone {
        Zone {
            tz: parse_tz_or_input_error("Europe/Helsinki").unwrap(),
            rule: DstRule::EU,
        }
    }

    fn quarter_hours(start: DateTime<Utc>, count: i64) -> Vec<DateTime<Utc>> {
        (0..count).map(|i| start + Duration::minutes(15 * i)).collect()
    }

    #[test]
    fn complete_fall_day_has_four_in_both_doubled_hours() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let day = NaiveDate::from_ymd_opt(2025, 10, 26).unwrap();
        let start = Utc.with_ymd_and_hms(2025, 10, 25, 21, 0, 0).unwrap();

        let report = summarize_day(&calendar, helsinki(), day, Period::QUARTER_HOUR, &quarter_hours(start, 100));

        assert_eq!(report.expected, 100);
        assert_eq!(report.stored, 100);
        assert_eq!(report.status, DayStatus::Complete);
        assert_eq!(report.hours.len(), 25);

        let doubled: Vec<_> = report
            .hours
            .iter()
            .filter(|h| h.local_hour.contains("T03:00:00"))
            .map(|h| (h.utc_hour.as_str(), h.count))
            .collect();
        assert_eq!(
            doubled,
            vec![("2025-10-26T00:00:00Z", 4), ("2025-10-26T01:00:00Z", 4)]
        );
    }

    #[test]
    fn missing_second_pass_is_incomplete() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let day = NaiveDate::from_ymd_opt(2025, 10, 26).unwrap();
        let start = Utc.with_ymd_and_hms(2025, 10, 25, 21, 0, 0).unwrap();
        let mut instants = quarter_hours(start, 100);
        instants.retain(|i| i.hour() != 1 || i.date_naive() != day);

        let report = summarize_day(&calendar, helsinki(), day, Period::QUARTER_HOUR, &instants);

        assert_eq!(report.stored, 96);
        assert_eq!(report.status, DayStatus::Incomplete);
    }

    #[test]
    fn duplicates_are_counted_once() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let start = Utc.with_ymd_and_hms(2025, 5, 31, 21, 0, 0).unwrap();
        let mut instants = quarter_hours(start, 96);
        instants.push(start);

        let report = summarize_day(&calendar, helsinki(), day, Period::QUARTER_HOUR, &instants);

        assert_eq!(report.stored, 96);
        assert_eq!(report.status, DayStatus::Complete);
    }
}

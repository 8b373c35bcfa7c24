use std::process::ExitCode;

use chrono::offset::LocalResult;
use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use serde::Serialize;
use wattsync_core::tz::{format_rfc3339_utc, offset_at};
use wattsync_core::{
    Occurrence, Period, Resolver, TransitionCalendar, TransitionKind, civil_day_bounds,
};

use crate::cli::ExplainArgs;
use crate::error::{CliError, CliResult, EXIT_SUCCESS, OutputFormat};
use crate::shared::{Zone, parse_date, parse_local_on, parse_period, print_json};

pub fn run_explain(args: ExplainArgs, output_format: OutputFormat) -> CliResult<ExitCode> {
    let zone = Zone::from_args(&args.zone)?;
    let date = parse_date(&args.date)?;
    let period = parse_period(&args.period)?;
    let occurrence: Occurrence = args
        .occurrence
        .parse()
        .map_err(|e| CliError::input(format!("{}", e)))?;
    let local = args
        .local
        .as_deref()
        .map(|s| parse_local_on(s, date))
        .transpose()?;

    let calendar = TransitionCalendar::new(zone.rule);
    let result = explain_date(&calendar, zone, date, period, local, occurrence);

    match output_format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            println!("Date: {}", result.date);
            println!("Timezone: {}", result.tz);
            println!("Classification: {}", result.classification);
            if let Some(hour) = result.transition_hour {
                println!(
                    "Transition: {:02}:00 local, clock shift {} min",
                    hour,
                    result.delta_minutes.unwrap_or_default()
                );
            }
            println!("Day (UTC): {} to {}", result.day_start_utc, result.day_end_utc);
            println!("Expected periods at {}: {}", period, result.expected_periods);
            if let Some(resolution) = &result.resolution {
                println!("Local time: {}", resolution.local_time);
                println!("Status: {}", resolution.status);
                println!(
                    "Resolution: {} -> {} (offset {})",
                    resolution.occurrence, resolution.utc, resolution.offset
                );
                if let Some(note) = &resolution.note {
                    println!("Note: {}", note);
                }
            }
        }
    }

    Ok(ExitCode::from(EXIT_SUCCESS))
}

#[derive(Debug, Serialize)]
struct ExplainResult {
    date: String,
    tz: String,
    classification: TransitionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    transition_hour: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta_minutes: Option<i64>,
    day_start_utc: String,
    day_end_utc: String,
    expected_periods: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<Resolution>,
}

#[derive(Debug, Serialize)]
struct Resolution {
    local_time: String,
    status: String,
    occurrence: Occurrence,
    utc: String,
    offset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

fn explain_date(
    calendar: &TransitionCalendar,
    zone: Zone,
    date: NaiveDate,
    period: Period,
    local: Option<NaiveDateTime>,
    occurrence: Occurrence,
) -> ExplainResult {
    let classification = calendar.classify(date, zone.tz);
    let transition = classification.transition();
    let (day_start, day_end) = civil_day_bounds(date, zone.tz);

    ExplainResult {
        date: date.to_string(),
        tz: zone.tz.to_string(),
        classification: classification.kind(),
        transition_hour: transition.map(|t| t.hour()),
        delta_minutes: transition.map(|t| t.delta.num_minutes()),
        day_start_utc: format_rfc3339_utc(&day_start),
        day_end_utc: format_rfc3339_utc(&day_end),
        expected_periods: calendar.expected_period_count(date, zone.tz, period),
        resolution: local.map(|l| explain_local(calendar, zone, l, occurrence)),
    }
}

fn explain_local(
    calendar: &TransitionCalendar,
    zone: Zone,
    local: NaiveDateTime,
    occurrence: Occurrence,
) -> Resolution {
    let resolver = Resolver::new(calendar, zone.tz);

    let (status, instant, note) = match zone.tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => ("normal", dt.with_timezone(&chrono::Utc), None),
        LocalResult::Ambiguous(first, second) => {
            let chosen = match occurrence {
                Occurrence::First => first,
                Occurrence::Second => second,
            };
            ("ambiguous", chosen.with_timezone(&chrono::Utc), None)
        }
        LocalResult::None => (
            "nonexistent",
            resolver.resolve_nonexistent(local),
            Some(
                "Skipped by DST spring forward; shown with the offset in effect before the gap"
                    .to_string(),
            ),
        ),
    };

    Resolution {
        local_time: local.format("%Y-%m-%dT%H:%M:%S").to_string(),
        status: status.to_string(),
        occurrence,
        utc: format_rfc3339_utc(&instant),
        offset: offset_at(instant, zone.tz).to_string(),
        note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::parse_tz_or_input_error;
    use wattsync_core::DstRule;

    fn helsinki() -> Zone {
        Zone {
            tz: parse_tz_or_input_error("Europe/Helsinki").unwrap(),
            rule: DstRule::EU,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fall_day_second_occurrence() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let day = date(2025, 10, 26);
        let local = day.and_hms_opt(3, 15, 0).unwrap();

        let result = explain_date(
            &calendar,
            helsinki(),
            day,
            Period::QUARTER_HOUR,
            Some(local),
            Occurrence::Second,
        );

        assert_eq!(result.classification, TransitionKind::Fall);
        assert_eq!(result.transition_hour, Some(3));
        assert_eq!(result.delta_minutes, Some(60));
        assert_eq!(result.expected_periods, 100);
        assert_eq!(result.day_start_utc, "2025-10-25T21:00:00Z");
        assert_eq!(result.day_end_utc, "2025-10-26T22:00:00Z");

        let resolution = result.resolution.unwrap();
        assert_eq!(resolution.status, "ambiguous");
        assert_eq!(resolution.utc, "2025-10-26T01:15:00Z");
        assert_eq!(resolution.offset, "+02:00");
    }

    #[test]
    fn fall_day_first_occurrence_keeps_summer_offset() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let local = date(2025, 10, 26).and_hms_opt(3, 15, 0).unwrap();

        let resolution = explain_local(&calendar, helsinki(), local, Occurrence::First);

        assert_eq!(resolution.status, "ambiguous");
        assert_eq!(resolution.utc, "2025-10-26T00:15:00Z");
        assert_eq!(resolution.offset, "+03:00");
        assert!(resolution.note.is_none());
    }

    #[test]
    fn spring_gap_is_explained_not_rejected() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let day = date(2025, 3, 30);
        let local = day.and_hms_opt(3, 30, 0).unwrap();

        let result = explain_date(
            &calendar,
            helsinki(),
            day,
            Period::QUARTER_HOUR,
            Some(local),
            Occurrence::First,
        );

        assert_eq!(result.classification, TransitionKind::Spring);
        assert_eq!(result.expected_periods, 92);
        let resolution = result.resolution.unwrap();
        assert_eq!(resolution.status, "nonexistent");
        assert_eq!(resolution.utc, "2025-03-30T01:30:00Z");
        assert!(resolution.note.is_some());
    }

    #[test]
    fn ordinary_day_has_no_transition() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let result = explain_date(
            &calendar,
            helsinki(),
            date(2025, 10, 25),
            Period::HOUR,
            None,
            Occurrence::First,
        );

        assert_eq!(result.classification, TransitionKind::None);
        assert_eq!(result.transition_hour, None);
        assert_eq!(result.expected_periods, 24);
        assert!(result.resolution.is_none());
    }
}

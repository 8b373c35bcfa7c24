//! Resolution of local timestamps to absolute instants.
//!
//! The metering API reports wall-clock times in the metering zone. Most of
//! them map to exactly one instant. On a fall-back day the doubled hour maps
//! to two instants and an [`Occurrence`] hint picks one; on a spring-forward
//! day the skipped hour maps to none and resolution fails with
//! [`SyncError::NonexistentLocalTime`].

use chrono::offset::LocalResult;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::calendar::TransitionCalendar;
use crate::error::{Result, SyncError};
use crate::models::{Occurrence, TransitionClassification};
use crate::tz::{format_rfc3339_utc, local_with_offset, offset_before};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A timestamp as found in the API payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTimestamp {
    /// Wall-clock time in the metering zone.
    Naive(NaiveDateTime),
    /// Time carrying its own offset, trusted as-is.
    Explicit(DateTime<FixedOffset>),
}

impl LocalTimestamp {
    /// Wall-clock view of the timestamp in `tz`, used for grouping.
    pub fn local_in(&self, tz: Tz) -> NaiveDateTime {
        match self {
            LocalTimestamp::Naive(naive) => *naive,
            LocalTimestamp::Explicit(dt) => dt.with_timezone(&tz).naive_local(),
        }
    }
}

/// Parse timestamp text from the API.
///
/// A trailing `Z` is stripped and the rest is read as naive local time: the
/// API marks local times with `Z` even though they are not UTC. Any other
/// explicit offset is honoured.
///
/// # Examples
///
/// ```
/// use wattsync_core::resolve::{LocalTimestamp, parse_local_timestamp};
///
/// let ts = parse_local_timestamp("2025-10-26T03:15:00Z").unwrap();
/// assert!(matches!(ts, LocalTimestamp::Naive(_)));
///
/// let ts = parse_local_timestamp("2025-10-26T03:15:00+02:00").unwrap();
/// assert!(matches!(ts, LocalTimestamp::Explicit(_)));
/// ```
pub fn parse_local_timestamp(input: &str) -> Result<LocalTimestamp> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SyncError::ParseError("Empty timestamp".to_string()));
    }

    if let Some(stripped) = trimmed
        .strip_suffix('Z')
        .or_else(|| trimmed.strip_suffix('z'))
    {
        return parse_naive(stripped).map(LocalTimestamp::Naive);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(LocalTimestamp::Explicit(dt));
    }

    parse_naive(trimmed).map(LocalTimestamp::Naive)
}

fn parse_naive(input: &str) -> Result<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .ok_or_else(|| {
            SyncError::ParseError(format!(
                "Invalid local timestamp: '{}'. Expected YYYY-MM-DDTHH:MM:SS",
                input
            ))
        })
}

/// Resolves local timestamps in one zone, sharing a transition calendar.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    calendar: &'a TransitionCalendar,
    tz: Tz,
}

impl<'a> Resolver<'a> {
    pub fn new(calendar: &'a TransitionCalendar, tz: Tz) -> Self {
        Self { calendar, tz }
    }

    /// Resolve timestamp text belonging to `date`.
    ///
    /// The occurrence hint only matters for naive times inside the doubled
    /// hour of a fall-back day.
    pub fn resolve(
        &self,
        text: &str,
        date: NaiveDate,
        occurrence: Occurrence,
    ) -> Result<DateTime<Utc>> {
        match parse_local_timestamp(text)? {
            LocalTimestamp::Explicit(dt) => Ok(dt.with_timezone(&Utc)),
            LocalTimestamp::Naive(local) => self.resolve_naive(local, date, occurrence),
        }
    }

    /// Resolve a naive local time belonging to `date`.
    pub fn resolve_naive(
        &self,
        local: NaiveDateTime,
        date: NaiveDate,
        occurrence: Occurrence,
    ) -> Result<DateTime<Utc>> {
        let classification = self.calendar.classify(date, self.tz);

        match self.tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(first, second) => {
                let in_doubled_hour = matches!(
                    classification,
                    TransitionClassification::Fall(t) if local.hour() == t.hour()
                );
                let chosen = if in_doubled_hour && occurrence == Occurrence::Second {
                    second
                } else {
                    first
                };
                let instant = chosen.with_timezone(&Utc);
                debug!(
                    local = %local,
                    %occurrence,
                    utc = %format_rfc3339_utc(&instant),
                    "Resolved ambiguous local time"
                );
                Ok(instant)
            }
            LocalResult::None => Err(SyncError::NonexistentLocalTime {
                local: local.format("%Y-%m-%dT%H:%M:%S").to_string(),
                date,
                tz: self.tz.to_string(),
            }),
        }
    }

    /// Best-effort instant for a local time that does not exist.
    ///
    /// Reads the wall-clock time with the offset in effect just before the
    /// gap, so `03:15` in a `+02:00 -> +03:00` gap becomes `01:15Z`.
    pub fn resolve_nonexistent(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let offset = offset_before(local, self.tz).unwrap_or_else(|| Utc.fix());
        local_with_offset(local, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::DstRule;
    use crate::tz::parse_tz;

    fn calendar() -> TransitionCalendar {
        TransitionCalendar::new(DstRule::EU)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parse_strips_trailing_z() {
        let ts = parse_local_timestamp("2025-10-26T03:15:00Z").unwrap();
        assert_eq!(
            ts,
            LocalTimestamp::Naive(date(2025, 10, 26).and_hms_opt(3, 15, 0).unwrap())
        );
    }

    #[test]
    fn parse_accepts_fractional_seconds_and_space_separator() {
        let expected = date(2025, 1, 5).and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(
            parse_local_timestamp("2025-01-05T12:00:00.000").unwrap(),
            LocalTimestamp::Naive(expected)
        );
        assert_eq!(
            parse_local_timestamp("2025-01-05 12:00").unwrap(),
            LocalTimestamp::Naive(expected)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_local_timestamp("").is_err());
        assert!(parse_local_timestamp("not-a-date").is_err());
        assert!(parse_local_timestamp("2025-13-01T00:00:00").is_err());
    }

    #[test]
    fn fall_occurrences_are_one_delta_apart() {
        let cal = calendar();
        let resolver = Resolver::new(&cal, parse_tz("Europe/Helsinki").unwrap());
        let day = date(2025, 10, 26);

        let first = resolver
            .resolve("2025-10-26T03:15:00Z", day, Occurrence::First)
            .unwrap();
        let second = resolver
            .resolve("2025-10-26T03:15:00Z", day, Occurrence::Second)
            .unwrap();

        assert_eq!(first, utc("2025-10-26T00:15:00Z"));
        assert_eq!(second, utc("2025-10-26T01:15:00Z"));
        assert!(first < second);
        assert_eq!(second - first, chrono::Duration::hours(1));
    }

    #[test]
    fn hint_is_ignored_outside_the_doubled_hour() {
        let cal = calendar();
        let resolver = Resolver::new(&cal, parse_tz("Europe/Helsinki").unwrap());
        let day = date(2025, 10, 26);

        let a = resolver
            .resolve("2025-10-26T05:00:00", day, Occurrence::First)
            .unwrap();
        let b = resolver
            .resolve("2025-10-26T05:00:00", day, Occurrence::Second)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, utc("2025-10-26T03:00:00Z"));
    }

    #[test]
    fn spring_gap_hour_is_an_error() {
        let cal = calendar();
        let resolver = Resolver::new(&cal, parse_tz("Europe/Helsinki").unwrap());

        let err = resolver
            .resolve("2025-03-30T03:15:00Z", date(2025, 3, 30), Occurrence::First)
            .unwrap_err();
        assert!(matches!(err, SyncError::NonexistentLocalTime { .. }));
    }

    #[test]
    fn spring_neighbours_resolve_normally() {
        let cal = calendar();
        let resolver = Resolver::new(&cal, parse_tz("Europe/Helsinki").unwrap());
        let day = date(2025, 3, 30);

        assert_eq!(
            resolver.resolve("2025-03-30T02:45:00", day, Occurrence::First).unwrap(),
            utc("2025-03-30T00:45:00Z")
        );
        assert_eq!(
            resolver.resolve("2025-03-30T04:00:00", day, Occurrence::First).unwrap(),
            utc("2025-03-30T01:00:00Z")
        );
    }

    #[test]
    fn nonexistent_time_best_effort_uses_pre_transition_offset() {
        let cal = calendar();
        let resolver = Resolver::new(&cal, parse_tz("Europe/Helsinki").unwrap());
        let local = date(2025, 3, 30).and_hms_opt(3, 15, 0).unwrap();

        assert_eq!(resolver.resolve_nonexistent(local), utc("2025-03-30T01:15:00Z"));
    }

    #[test]
    fn explicit_offsets_are_trusted() {
        let cal = calendar();
        let resolver = Resolver::new(&cal, parse_tz("Europe/Helsinki").unwrap());

        let instant = resolver
            .resolve("2025-10-26T03:15:00+02:00", date(2025, 10, 26), Occurrence::First)
            .unwrap();
        assert_eq!(instant, utc("2025-10-26T01:15:00Z"));
    }

    #[test]
    fn explicit_timestamp_local_view() {
        let tz = parse_tz("Europe/Helsinki").unwrap();
        let ts = parse_local_timestamp("2025-07-01T09:00:00+00:00").unwrap();
        assert_eq!(ts.local_in(tz), date(2025, 7, 1).and_hms_opt(12, 0, 0).unwrap());
    }
}

//! Timezone handling utilities.
//!
//! This module provides functions for parsing timezone names, converting
//! between UTC and local time, and probing a zone for the offsets it uses
//! around a DST transition.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SyncError};

/// Parse an IANA timezone name into a [`chrono_tz::Tz`].
///
/// # Examples
///
/// ```
/// use wattsync_core::tz::parse_tz;
///
/// let tz = parse_tz("Europe/Helsinki").unwrap();
/// assert_eq!(tz.to_string(), "Europe/Helsinki");
/// ```
pub fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| SyncError::InvalidTimezone(name.to_string()))
}

/// Interpret a naive local time with an explicit fixed offset.
///
/// Unlike [`TimeZone::from_local_datetime`] this never fails, which is what
/// best-effort resolution of a nonexistent local time needs.
pub fn local_with_offset(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - chrono::Duration::seconds(i64::from(offset.local_minus_utc()))))
}

/// The zone's UTC offset in effect at the given instant.
pub fn offset_at(utc: DateTime<Utc>, tz: Tz) -> FixedOffset {
    utc.with_timezone(&tz).offset().fix()
}

/// Offset in effect immediately before a local wall-clock time.
///
/// Searches backwards minute by minute for the closest representable local
/// time. Returns `None` only if nothing within a day before is valid.
pub fn offset_before(local: NaiveDateTime, tz: Tz) -> Option<FixedOffset> {
    (1..=24 * 60).find_map(|minutes| {
        let candidate = local - chrono::Duration::minutes(minutes);
        tz.from_local_datetime(&candidate)
            .latest()
            .map(|dt| dt.offset().fix())
    })
}

/// Format a datetime as RFC3339 with timezone offset.
///
/// Produces e.g. `2025-10-26T03:00:00+03:00`.
pub fn format_rfc3339<T: TimeZone>(dt: &DateTime<T>) -> String
where
    T::Offset: std::fmt::Display,
{
    dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Format a UTC datetime as RFC3339 with Z suffix.
///
/// Produces e.g. `2025-10-26T00:00:00Z`.
pub fn format_rfc3339_utc(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

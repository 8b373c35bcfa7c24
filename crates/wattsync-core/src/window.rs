//! Sync windows over absolute time.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::tz::format_rfc3339_utc;

/// Half-open interval `[start, end)` of absolute instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Build a window, rejecting empty or inverted ranges.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(SyncError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window for an incremental sync ending at `now`.
    ///
    /// Starts `buffer` before the latest stored instant so late corrections
    /// from the API are picked up, or `initial_days` back when nothing has
    /// been stored yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, TimeZone, Utc};
    /// use wattsync_core::window::Window;
    ///
    /// let now = Utc.with_ymd_and_hms(2025, 10, 27, 12, 0, 0).unwrap();
    /// let latest = Utc.with_ymd_and_hms(2025, 10, 27, 9, 45, 0).unwrap();
    ///
    /// let w = Window::incremental(Some(latest), Duration::hours(2), 7, now).unwrap();
    /// assert_eq!(w.start, Utc.with_ymd_and_hms(2025, 10, 27, 7, 45, 0).unwrap());
    /// assert_eq!(w.end, now);
    /// ```
    pub fn incremental(
        latest: Option<DateTime<Utc>>,
        buffer: Duration,
        initial_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let start = match latest {
            Some(latest) => latest - buffer,
            None => now - Duration::days(i64::from(initial_days)),
        };
        Self::new(start, now)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_rfc3339_utc(&self.start),
            format_rfc3339_utc(&self.end)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 27, h, m, 0).unwrap()
    }

    #[test]
    fn rejects_empty_and_inverted_windows() {
        assert!(matches!(
            Window::new(at(10, 0), at(10, 0)),
            Err(SyncError::InvalidWindow { .. })
        ));
        assert!(Window::new(at(11, 0), at(10, 0)).is_err());
        assert!(Window::new(at(10, 0), at(10, 15)).is_ok());
    }

    #[test]
    fn incremental_without_history_goes_back_initial_days() {
        let now = at(12, 0);
        let w = Window::incremental(None, Duration::hours(2), 7, now).unwrap();
        assert_eq!(w.duration(), Duration::days(7));
        assert_eq!(w.end, now);
    }

    #[test]
    fn incremental_with_latest_in_future_is_invalid() {
        let now = at(12, 0);
        let err = Window::incremental(Some(at(15, 0)), Duration::hours(2), 7, now).unwrap_err();
        assert!(matches!(err, SyncError::InvalidWindow { .. }));
    }

    #[test]
    fn display_uses_utc_rfc3339() {
        let w = Window::new(at(0, 0), at(1, 0)).unwrap();
        assert_eq!(w.to_string(), "[2025-10-27T00:00:00Z, 2025-10-27T01:00:00Z)");
    }
}

//! Error types for wattsync-core.
//!
//! Only conditions that stop a record or a whole sync invocation are errors.
//! Data-quality conditions on DST transition days are reported as
//! [`Anomaly`](crate::models::Anomaly) values instead.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// The main error type for wattsync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid timezone name provided.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Error parsing a timestamp, date or quantity.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Local time that does not exist in the zone (spring-forward gap).
    #[error("Nonexistent local time '{local}' on {date} in timezone '{tz}'")]
    NonexistentLocalTime {
        local: String,
        date: NaiveDate,
        tz: String,
    },

    /// Sync window with start not strictly before end.
    #[error("Invalid window: start {start} must be earlier than end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Unknown or unsupported metering period token.
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// Fatal failure in an external collaborator (fetch, auth, persistence).
    #[error("{collaborator} failed{}: {message}", window_suffix(.window))]
    Upstream {
        collaborator: &'static str,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        message: String,
    },
}

impl SyncError {
    /// Build an [`SyncError::Upstream`] for a collaborator call.
    pub fn upstream(
        collaborator: &'static str,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        message: impl Into<String>,
    ) -> Self {
        SyncError::Upstream {
            collaborator,
            window,
            message: message.into(),
        }
    }
}

fn window_suffix(window: &Option<(DateTime<Utc>, DateTime<Utc>)>) -> String {
    match window {
        Some((start, end)) => format!(
            " for window [{}, {})",
            start.format("%Y-%m-%dT%H:%M:%SZ"),
            end.format("%Y-%m-%dT%H:%M:%SZ")
        ),
        None => String::new(),
    }
}

/// Result type alias for wattsync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn upstream_error_names_collaborator_and_window() {
        let start = Utc.with_ymd_and_hms(2025, 10, 25, 21, 0, 0).single().unwrap();
        let end = Utc.with_ymd_and_hms(2025, 10, 26, 22, 0, 0).single().unwrap();
        let err = SyncError::upstream("meter-api", Some((start, end)), "status 502");

        assert_eq!(
            err.to_string(),
            "meter-api failed for window [2025-10-25T21:00:00Z, 2025-10-26T22:00:00Z): status 502"
        );
    }

    #[test]
    fn upstream_error_without_window() {
        let err = SyncError::upstream("influxdb", None, "connection refused");
        assert_eq!(err.to_string(), "influxdb failed: connection refused");
    }
}

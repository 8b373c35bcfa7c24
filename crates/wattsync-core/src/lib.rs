//! # wattsync-core
//!
//! DST-aware reconciliation of electricity consumption readings.
//!
//! Metering APIs often report consumption against local wall-clock time. On
//! the two days a year where the zone changes its UTC offset those labels
//! stop mapping one-to-one onto real instants: an hour is repeated in the
//! fall and skipped in the spring. This library turns such records into an
//! ordered series of absolute-instant readings.
//!
//! ## Features
//!
//! - **Transition calendar**: classifies civil dates as ordinary,
//!   spring-forward or fall-back days using a configurable annual rule
//!   checked against the zone's tz data.
//! - **Doubled-hour split**: records of the repeated hour are assigned to
//!   the first or second pass by a substitutable policy.
//! - **Anomaly signals**: partial doubled hours, unexplained counts and data
//!   in a skipped hour are reported rather than silently absorbed.
//! - **Resolution fallback**: fetch at a fine period, retry at a coarse one.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wattsync_core::prelude::*;
//!
//! let calendar = Arc::new(TransitionCalendar::new(DstRule::EU));
//! let tz = parse_tz("Europe/Helsinki").unwrap();
//! let reconciler = Reconciler::new(calendar, tz);
//!
//! // The API repeats 03:00 on the fall-back day.
//! let records = vec![
//!     RawRecord::new("2025-10-26T03:00:00Z", None),
//!     RawRecord::new("2025-10-26T03:00:00Z", None),
//! ];
//! let result = reconciler.reconcile(&records, Period::HOUR);
//!
//! // Records without a quantity are skipped, not fatal.
//! assert!(result.is_empty());
//! assert_eq!(result.skipped.len(), 2);
//! ```

pub mod calendar;
pub mod error;
pub mod fetch;
pub mod group;
pub mod models;
pub mod reconcile;
pub mod resolve;
pub mod sync;
pub mod tz;
pub mod window;

// Re-export commonly used types at the crate root
pub use calendar::{DstRule, TransitionCalendar, civil_day_bounds};
pub use error::{Result, SyncError};
pub use fetch::{FetchOutcome, MeterDataSource, ResolutionFallbackFetcher};
pub use models::{
    Anomaly, AnomalyKind, Occurrence, Period, RawRecord, Reading, Severity, SkippedRecord,
    TransitionClassification, TransitionKind,
};
pub use reconcile::{ArrivalOrderSplit, DoubledHourPolicy, Reconciler, Reconciliation};
pub use resolve::{LocalTimestamp, Resolver, parse_local_timestamp};
pub use sync::{ReadingStore, Series, SyncJob, SyncSettings, SyncSummary, WindowRequest};
pub use window::Window;

/// Prelude module for convenient imports.
///
/// ```
/// use wattsync_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::calendar::{DstRule, TransitionCalendar};
    pub use crate::error::{Result, SyncError};
    pub use crate::fetch::{MeterDataSource, ResolutionFallbackFetcher};
    pub use crate::models::*;
    pub use crate::reconcile::{Reconciler, Reconciliation};
    pub use crate::resolve::Resolver;
    pub use crate::sync::{ReadingStore, Series, SyncJob, SyncSettings, WindowRequest};
    pub use crate::tz::parse_tz;
    pub use crate::window::Window;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[test]
    fn full_workflow_fall_day() {
        let calendar = Arc::new(TransitionCalendar::new(DstRule::EU));
        let tz = tz::parse_tz("Europe/Helsinki").unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 10, 26).unwrap();

        assert_eq!(calendar.classify(day, tz).kind(), TransitionKind::Fall);
        assert_eq!(
            calendar.expected_period_count(day, tz, Period::QUARTER_HOUR),
            100
        );

        // Captured doubled hour: first pass then second pass.
        let quantities = [
            dec!(0.102),
            dec!(0.098),
            dec!(0.101),
            dec!(0.108),
            dec!(0.116),
            dec!(0.096),
            dec!(0.106),
            dec!(0.093),
        ];
        let records: Vec<_> = quantities
            .iter()
            .enumerate()
            .map(|(i, q)| {
                RawRecord::new(format!("2025-10-26T03:{:02}:00Z", (i % 4) * 15), Some(*q))
            })
            .collect();

        let result = Reconciler::new(calendar, tz).reconcile(&records, Period::QUARTER_HOUR);

        assert_eq!(result.len(), 8);
        assert!(result.anomalies.is_empty());
        let rendered: Vec<_> = result
            .readings
            .iter()
            .map(|r| (tz::format_rfc3339_utc(&r.instant), r.quantity_kwh))
            .collect();
        assert_eq!(rendered[0], ("2025-10-26T00:00:00Z".to_string(), dec!(0.102)));
        assert_eq!(rendered[3], ("2025-10-26T00:45:00Z".to_string(), dec!(0.108)));
        assert_eq!(rendered[4], ("2025-10-26T01:00:00Z".to_string(), dec!(0.116)));
        assert_eq!(rendered[7], ("2025-10-26T01:45:00Z".to_string(), dec!(0.093)));
        assert_eq!(result.readings[4].quantity_wh, dec!(116));
    }
}

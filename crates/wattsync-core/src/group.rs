//! Grouping of raw API records by civil date and local hour.
//!
//! Arrival order inside each (date, hour) bucket is preserved exactly; the
//! doubled-hour policy in [`crate::reconcile`] depends on it.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{RawRecord, SkippedRecord};
use crate::resolve::{LocalTimestamp, parse_local_timestamp};

/// A raw record that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedRecord {
    /// Position of the record in the API response.
    pub index: usize,
    pub timestamp: LocalTimestamp,
    /// Wall-clock time in the metering zone.
    pub local: NaiveDateTime,
    pub quantity: Decimal,
    pub unit: String,
}

/// Records of one civil date, keyed by local hour-of-day.
pub type HourBuckets = BTreeMap<u32, Vec<GroupedRecord>>;

/// Output of [`group_records`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    pub dates: BTreeMap<NaiveDate, HourBuckets>,
    pub skipped: Vec<SkippedRecord>,
}

impl Grouping {
    /// Total number of grouped (non-skipped) records.
    pub fn record_count(&self) -> usize {
        self.dates
            .values()
            .flat_map(|hours| hours.values())
            .map(Vec::len)
            .sum()
    }
}

/// Partition records by local date and hour.
///
/// Records with a missing quantity or an unreadable timestamp are left out
/// and listed in [`Grouping::skipped`].
pub fn group_records(records: &[RawRecord], tz: Tz) -> Grouping {
    let mut grouping = Grouping::default();

    for (index, record) in records.iter().enumerate() {
        let Some(quantity) = record.quantity else {
            debug!(index, ts = %record.timestamp_text, "Skipping record without quantity");
            grouping.skipped.push(SkippedRecord {
                index,
                timestamp_text: record.timestamp_text.clone(),
                reason: "missing quantity".to_string(),
            });
            continue;
        };

        let timestamp = match parse_local_timestamp(&record.timestamp_text) {
            Ok(ts) => ts,
            Err(e) => {
                debug!(index, ts = %record.timestamp_text, "Skipping record: {}", e);
                grouping.skipped.push(SkippedRecord {
                    index,
                    timestamp_text: record.timestamp_text.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let local = timestamp.local_in(tz);
        grouping
            .dates
            .entry(local.date())
            .or_default()
            .entry(local.hour())
            .or_default()
            .push(GroupedRecord {
                index,
                timestamp,
                local,
                quantity,
                unit: record.unit.clone(),
            });
    }

    grouping
}

//! Reconciliation of raw API records into unambiguous readings.
//!
//! Records are grouped by civil date and local hour, each date is classified
//! by the [`TransitionCalendar`], and every record is resolved to an absolute
//! instant. On a fall-back day the doubled hour is split between its two
//! passes by a [`DoubledHourPolicy`]; on a spring-forward day data for the
//! skipped hour is flagged and resolved best-effort.

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::calendar::TransitionCalendar;
use crate::group::{GroupedRecord, HourBuckets, group_records};
use crate::models::{
    Anomaly, AnomalyKind, Occurrence, Period, RawRecord, Reading, Severity, SkippedRecord,
    TransitionClassification,
};
use crate::resolve::{LocalTimestamp, Resolver};
use crate::tz::format_rfc3339_utc;

/// Assigns occurrences to a doubled-hour bucket that holds two full passes.
///
/// Only consulted when the bucket has exactly `2 * per_pass` records.
pub trait DoubledHourPolicy: Send + Sync + fmt::Debug {
    fn split(&self, bucket: &[GroupedRecord], per_pass: usize) -> Vec<Occurrence>;
}

/// First `per_pass` records in arrival order are the first pass.
///
/// This mirrors how the metering API has been observed to order the doubled
/// hour. It is not part of the API's documented contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrivalOrderSplit;

impl DoubledHourPolicy for ArrivalOrderSplit {
    fn split(&self, bucket: &[GroupedRecord], per_pass: usize) -> Vec<Occurrence> {
        (0..bucket.len())
            .map(|idx| {
                if idx < per_pass {
                    Occurrence::First
                } else {
                    Occurrence::Second
                }
            })
            .collect()
    }
}

/// Readings and signals for a single civil date, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayReconciliation {
    pub readings: Vec<Reading>,
    pub anomalies: Vec<Anomaly>,
    best_effort: Vec<bool>,
}

/// Result of reconciling a batch of raw records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Readings ordered by instant, one per instant.
    pub readings: Vec<Reading>,
    pub anomalies: Vec<Anomaly>,
    pub skipped: Vec<SkippedRecord>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Highest anomaly severity seen, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.anomalies.iter().map(|a| a.severity).max()
    }
}

/// Drives grouping, classification and resolution for one zone.
#[derive(Debug, Clone)]
pub struct Reconciler {
    calendar: Arc<TransitionCalendar>,
    tz: Tz,
    policy: Arc<dyn DoubledHourPolicy>,
}

impl Reconciler {
    pub fn new(calendar: Arc<TransitionCalendar>, tz: Tz) -> Self {
        Self {
            calendar,
            tz,
            policy: Arc::new(ArrivalOrderSplit),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn DoubledHourPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Reconcile an arrival-ordered batch of raw records.
    ///
    /// Output readings are sorted by instant. When two readings land on the
    /// same instant the first one in processing order is kept, except that
    /// a regular reading always wins over a best-effort one from a skipped
    /// spring hour. Every dropped reading is reported as an anomaly.
    pub fn reconcile(&self, records: &[RawRecord], period: Period) -> Reconciliation {
        let grouping = group_records(records, self.tz);
        if !grouping.skipped.is_empty() {
            warn!(
                count = grouping.skipped.len(),
                "Skipped malformed records (missing quantity or unreadable timestamp)"
            );
        }

        let mut anomalies = Vec::new();
        let mut candidates = Vec::with_capacity(grouping.record_count());
        for (date, hours) in &grouping.dates {
            let day = self.reconcile_date(*date, hours, period);
            anomalies.extend(day.anomalies);
            candidates.extend(
                day.readings
                    .into_iter()
                    .zip(day.best_effort)
                    .map(|(reading, best_effort)| (*date, reading, best_effort)),
            );
        }

        // Stable sort: ties keep processing order, regular before best-effort.
        candidates.sort_by_key(|(_, reading, best_effort)| (reading.instant, *best_effort));

        let mut readings: Vec<Reading> = Vec::with_capacity(candidates.len());
        for (date, reading, _) in candidates {
            if readings.last().is_some_and(|kept| kept.instant == reading.instant) {
                let anomaly = Anomaly::new(
                    date,
                    AnomalyKind::DuplicateInstant {
                        instant: format_rfc3339_utc(&reading.instant),
                    },
                );
                warn!("{}", anomaly);
                anomalies.push(anomaly);
                continue;
            }
            readings.push(reading);
        }

        info!(
            readings = readings.len(),
            records = records.len(),
            skipped = grouping.skipped.len(),
            %period,
            "Reconciled API records"
        );

        Reconciliation {
            readings,
            anomalies,
            skipped: grouping.skipped,
        }
    }

    /// Reconcile the hour buckets of one civil date.
    ///
    /// Readings come out in hour order, arrival order within an hour.
    pub fn reconcile_date(
        &self,
        date: NaiveDate,
        hours: &HourBuckets,
        period: Period,
    ) -> DayReconciliation {
        let resolver = Resolver::new(&self.calendar, self.tz);
        let mut day = DayReconciliation::default();

        match self.calendar.classify(date, self.tz) {
            TransitionClassification::None => {
                for bucket in hours.values() {
                    for record in bucket {
                        resolve_into(&resolver, date, record, Occurrence::First, false, &mut day);
                    }
                }
            }
            TransitionClassification::Fall(transition) => {
                let doubled = transition.hour();
                let per_pass = period.periods_per_hour();
                let count = hours.get(&doubled).map_or(0, Vec::len);
                info!(
                    %date,
                    hour = doubled,
                    count,
                    "Processing fall DST transition day (hour {:02}:00 repeats)",
                    doubled
                );

                for (hour, bucket) in hours {
                    let occurrences = if *hour == doubled {
                        self.doubled_hour_occurrences(date, doubled, bucket, per_pass, &mut day)
                    } else {
                        vec![Occurrence::First; bucket.len()]
                    };
                    for (record, occurrence) in bucket.iter().zip(occurrences) {
                        resolve_into(&resolver, date, record, occurrence, false, &mut day);
                    }
                }
            }
            TransitionClassification::Spring(transition) => {
                let skipped_hour = transition.hour();
                info!(
                    %date,
                    hour = skipped_hour,
                    "Processing spring DST transition day (hour {:02}:00 does not exist)",
                    skipped_hour
                );

                let flagged = hours.get(&skipped_hour).filter(|b| !b.is_empty());
                if let Some(bucket) = flagged {
                    let anomaly = Anomaly::new(
                        date,
                        AnomalyKind::SpringHourData {
                            hour: skipped_hour,
                            count: bucket.len(),
                        },
                    );
                    warn!("{}", anomaly);
                    day.anomalies.push(anomaly);
                }

                for (hour, bucket) in hours {
                    let in_gap = *hour == skipped_hour;
                    for record in bucket {
                        resolve_into(&resolver, date, record, Occurrence::First, in_gap, &mut day);
                    }
                }
            }
        }

        day
    }

    fn doubled_hour_occurrences(
        &self,
        date: NaiveDate,
        hour: u32,
        bucket: &[GroupedRecord],
        per_pass: usize,
        day: &mut DayReconciliation,
    ) -> Vec<Occurrence> {
        let count = bucket.len();
        let expected = per_pass * 2;

        if count == expected {
            info!(
                %date,
                hour,
                count,
                "Splitting doubled hour {}+{} between first and second occurrence",
                per_pass,
                per_pass
            );
            return self.policy.split(bucket, per_pass);
        }

        let anomaly = if count == per_pass {
            let anomaly = Anomaly::new(
                date,
                AnomalyKind::PartialDoubledHour {
                    hour,
                    count,
                    expected,
                },
            );
            warn!("{}", anomaly);
            anomaly
        } else {
            let anomaly = Anomaly::new(
                date,
                AnomalyKind::UnexpectedDoubledHourCount {
                    hour,
                    count,
                    expected,
                },
            );
            error!("{}", anomaly);
            anomaly
        };
        day.anomalies.push(anomaly);

        vec![Occurrence::First; count]
    }
}

/// Resolve one record and append its reading to `day`.
///
/// `already_flagged` marks records whose date-level anomaly has been raised,
/// so a nonexistent time there is not reported twice.
fn resolve_into(
    resolver: &Resolver<'_>,
    date: NaiveDate,
    record: &GroupedRecord,
    occurrence: Occurrence,
    already_flagged: bool,
    day: &mut DayReconciliation,
) {
    let (instant, best_effort) = match record.timestamp {
        LocalTimestamp::Explicit(dt) => (dt.with_timezone(&Utc), false),
        LocalTimestamp::Naive(local) => match resolver.resolve_naive(local, date, occurrence) {
            Ok(instant) => (instant, false),
            Err(e) => {
                if !already_flagged {
                    let anomaly = Anomaly::new(
                        date,
                        AnomalyKind::SpringHourData {
                            hour: local.hour(),
                            count: 1,
                        },
                    );
                    warn!("{}: {}", anomaly, e);
                    day.anomalies.push(anomaly);
                }
                (resolver.resolve_nonexistent(local), true)
            }
        },
    };

    day.readings.push(Reading::new(
        instant,
        record.quantity,
        record.unit.clone(),
        occurrence,
    ));
    day.best_effort.push(best_effort);
}

//! Core data types for wattsync.
//!
//! This module defines the primary types used throughout the library:
//! - [`RawRecord`] - A reading as received from the metering API
//! - [`Occurrence`] - Which pass through a doubled hour a record belongs to
//! - [`TransitionClassification`] - DST classification of a civil date
//! - [`Period`] - Metering period length (e.g. `PT15MIN`)
//! - [`Reading`] - A reconciled, unambiguous reading
//! - [`Anomaly`] - A data-quality signal raised during reconciliation

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

use crate::error::{Result, SyncError};

/// A single record as delivered by the metering API.
///
/// `timestamp_text` is a local wall-clock time without a reliable offset
/// marker. `quantity` is `None` when the API reported `null` or a value that
/// could not be read as a decimal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub timestamp_text: String,
    pub quantity: Option<Decimal>,
    pub unit: String,
}

impl RawRecord {
    pub fn new(timestamp_text: impl Into<String>, quantity: Option<Decimal>) -> Self {
        Self {
            timestamp_text: timestamp_text.into(),
            quantity,
            unit: DEFAULT_UNIT.to_string(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// Unit assumed when the API omits one.
pub const DEFAULT_UNIT: &str = "kWh";

/// Which real-world pass through an ambiguous wall-clock hour is meant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Occurrence {
    /// Earlier pass, still on the pre-transition (summer) offset.
    #[default]
    First,
    /// Later pass, on the post-transition (standard) offset.
    Second,
}

impl std::fmt::Display for Occurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Occurrence::First => write!(f, "first"),
            Occurrence::Second => write!(f, "second"),
        }
    }
}

impl FromStr for Occurrence {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "first" | "0" => Ok(Occurrence::First),
            "second" | "1" => Ok(Occurrence::Second),
            _ => Err(SyncError::ParseError(format!(
                "Unknown occurrence: '{}'. Expected 'first' or 'second'",
                s
            ))),
        }
    }
}

/// The kind of DST transition a date carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    None,
    Spring,
    Fall,
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionKind::None => write!(f, "none"),
            TransitionKind::Spring => write!(f, "spring"),
            TransitionKind::Fall => write!(f, "fall"),
        }
    }
}

/// Where and by how much the local clock moves on a transition date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Start of the skipped (spring) or doubled (fall) local hour.
    pub local: NaiveDateTime,
    /// Size of the clock change, usually one hour.
    pub delta: chrono::Duration,
}

impl Transition {
    /// Local hour-of-day that is skipped or doubled.
    pub fn hour(&self) -> u32 {
        self.local.hour()
    }
}

/// DST classification of a civil date in a given zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionClassification {
    None,
    Spring(Transition),
    Fall(Transition),
}

impl TransitionClassification {
    pub fn kind(&self) -> TransitionKind {
        match self {
            TransitionClassification::None => TransitionKind::None,
            TransitionClassification::Spring(_) => TransitionKind::Spring,
            TransitionClassification::Fall(_) => TransitionKind::Fall,
        }
    }

    pub fn transition(&self) -> Option<&Transition> {
        match self {
            TransitionClassification::None => None,
            TransitionClassification::Spring(t) | TransitionClassification::Fall(t) => Some(t),
        }
    }
}

/// Length of one metering period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    minutes: u32,
}

impl Period {
    pub const QUARTER_HOUR: Period = Period { minutes: 15 };
    pub const HOUR: Period = Period { minutes: 60 };

    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 || (minutes < 60 && 60 % minutes != 0) || (minutes > 60 && minutes % 60 != 0)
        {
            return Err(SyncError::InvalidPeriod(format!(
                "{} minutes does not tile an hour",
                minutes
            )));
        }
        Ok(Self { minutes })
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    /// Records expected for one full pass through a clock hour.
    pub fn periods_per_hour(&self) -> usize {
        if self.minutes >= 60 {
            1
        } else {
            (60 / self.minutes) as usize
        }
    }

    /// Token understood by the metering API (`PT15MIN`, `PT1H`).
    pub fn as_api_token(&self) -> String {
        if self.minutes % 60 == 0 {
            format!("PT{}H", self.minutes / 60)
        } else {
            format!("PT{}MIN", self.minutes)
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_api_token())
    }
}

impl FromStr for Period {
    type Err = SyncError;

    /// Accepts `PT15MIN`, `PT15M`, `PT1H` and friends, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let invalid = || SyncError::InvalidPeriod(format!("'{}'", s));

        let body = upper.strip_prefix("PT").ok_or_else(invalid)?;
        let (digits, factor) = if let Some(n) = body.strip_suffix("MIN") {
            (n, 1)
        } else if let Some(n) = body.strip_suffix('M') {
            (n, 1)
        } else if let Some(n) = body.strip_suffix('H') {
            (n, 60)
        } else {
            return Err(invalid());
        };

        let value: u32 = digits.parse().map_err(|_| invalid())?;
        let minutes = value.checked_mul(factor).ok_or_else(invalid)?;
        Period::from_minutes(minutes)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_api_token())
    }
}

/// A reconciled reading anchored to an absolute instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reading {
    pub instant: DateTime<Utc>,
    pub quantity_kwh: Decimal,
    pub quantity_wh: Decimal,
    pub unit: String,
    pub occurrence: Occurrence,
}

impl Reading {
    pub fn new(
        instant: DateTime<Utc>,
        quantity_kwh: Decimal,
        unit: impl Into<String>,
        occurrence: Occurrence,
    ) -> Self {
        Self {
            instant,
            quantity_kwh,
            quantity_wh: (quantity_kwh * Decimal::ONE_THOUSAND).normalize(),
            unit: unit.into(),
            occurrence,
        }
    }
}

/// Severity of a data-quality anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// What went wrong on a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Records reported for the hour skipped by a spring transition.
    SpringHourData { hour: u32, count: usize },
    /// Only one pass through the doubled hour was returned.
    PartialDoubledHour {
        hour: u32,
        count: usize,
        expected: usize,
    },
    /// Doubled-hour record count matches neither one nor two passes.
    UnexpectedDoubledHourCount {
        hour: u32,
        count: usize,
        expected: usize,
    },
    /// Two records resolved to the same instant; the later arrival was dropped.
    DuplicateInstant { instant: String },
}

/// A data-quality signal. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub date: NaiveDate,
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: AnomalyKind,
}

impl Anomaly {
    pub fn new(date: NaiveDate, kind: AnomalyKind) -> Self {
        let severity = match kind {
            AnomalyKind::UnexpectedDoubledHourCount { .. } => Severity::Error,
            _ => Severity::Warning,
        };
        Self {
            date,
            severity,
            kind,
        }
    }
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            AnomalyKind::SpringHourData { hour, count } => write!(
                f,
                "{}: {} record(s) for nonexistent hour {:02}:00 on spring transition day",
                self.date, count, hour
            ),
            AnomalyKind::PartialDoubledHour {
                hour,
                count,
                expected,
            } => write!(
                f,
                "{}: only {} record(s) for doubled hour {:02}:00, expected {}; resolved as first occurrence",
                self.date, count, hour, expected
            ),
            AnomalyKind::UnexpectedDoubledHourCount {
                hour,
                count,
                expected,
            } => write!(
                f,
                "{}: unexpected record count {} for doubled hour {:02}:00 (expected {} or {}); resolved as first occurrence",
                self.date,
                count,
                hour,
                expected,
                expected / 2
            ),
            AnomalyKind::DuplicateInstant { instant } => {
                write!(f, "{}: duplicate reading at {} dropped", self.date, instant)
            }
        }
    }
}

/// A raw record excluded before grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    /// Position of the record in the API response.
    pub index: usize,
    pub timestamp_text: String,
    pub reason: String,
}

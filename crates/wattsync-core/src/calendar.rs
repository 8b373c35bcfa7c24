//! DST transition calendar.
//!
//! Classifies a civil date as a spring-forward day, a fall-back day or an
//! ordinary day. The annual rule picks candidate Sundays; the zone's own tz
//! data then decides which local hour is skipped or doubled and by how much,
//! so the same rule works for any zone that follows it and reports `None`
//! for zones that do not observe DST at all.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::models::{Period, Transition, TransitionClassification};
use crate::tz::{local_with_offset, offset_before};

/// Which Sunday of a month a transition falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SundayRule {
    /// Last Sunday of the month.
    Last,
    /// n-th Sunday of the month, 1-based.
    Nth(u8),
}

/// Transition Sunday for one season.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonRule {
    pub month: u32,
    pub sunday: SundayRule,
}

impl SeasonRule {
    /// The transition Sunday in `year`, if the month has one.
    ///
    /// For [`SundayRule::Last`] the month is scanned backwards from its last
    /// day; the first Sunday met is the answer.
    pub fn sunday_in(&self, year: i32) -> Option<NaiveDate> {
        match self.sunday {
            SundayRule::Last => {
                let last_day = last_day_of_month(year, self.month)?;
                (0..7)
                    .map(|back| last_day - chrono::Duration::days(back))
                    .find(|day| day.weekday() == Weekday::Sun)
            }
            SundayRule::Nth(n) => {
                if n == 0 {
                    return None;
                }
                let first = u32::from(n - 1) * 7 + 1;
                (first..first + 7)
                    .filter_map(|day| NaiveDate::from_ymd_opt(year, self.month, day))
                    .find(|day| day.weekday() == Weekday::Sun)
            }
        }
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let next_month_start = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    next_month_start.pred_opt()
}

/// Annual pair of transition Sundays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DstRule {
    pub spring: SeasonRule,
    pub fall: SeasonRule,
}

impl DstRule {
    /// EU convention: last Sunday of March and of October.
    pub const EU: DstRule = DstRule {
        spring: SeasonRule {
            month: 3,
            sunday: SundayRule::Last,
        },
        fall: SeasonRule {
            month: 10,
            sunday: SundayRule::Last,
        },
    };

    /// North American convention: second Sunday of March, first of November.
    pub const US: DstRule = DstRule {
        spring: SeasonRule {
            month: 3,
            sunday: SundayRule::Nth(2),
        },
        fall: SeasonRule {
            month: 11,
            sunday: SundayRule::Nth(1),
        },
    };
}

impl Default for DstRule {
    fn default() -> Self {
        DstRule::EU
    }
}

impl FromStr for DstRule {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "eu" => Ok(DstRule::EU),
            "us" => Ok(DstRule::US),
            _ => Err(SyncError::ParseError(format!(
                "Unknown DST rule: '{}'. Expected 'eu' or 'us'",
                s
            ))),
        }
    }
}

impl DstRule {
    /// Transition dates in `year` where the rule and the zone's tz data
    /// disagree, in date order.
    ///
    /// Empty when they agree, and for zones that never change offset.
    pub fn mismatches(&self, tz: Tz, year: i32) -> Vec<NaiveDate> {
        let Some(first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
            return Vec::new();
        };
        let observed: BTreeSet<NaiveDate> = first
            .iter_days()
            .take_while(|day| day.year() == year)
            .filter(|day| probe_transition(*day, tz) != TransitionClassification::None)
            .collect();
        if observed.is_empty() {
            return Vec::new();
        }

        let predicted: BTreeSet<NaiveDate> = [self.spring.sunday_in(year), self.fall.sunday_in(year)]
            .into_iter()
            .flatten()
            .collect();
        observed.symmetric_difference(&predicted).copied().collect()
    }
}

/// Memoizing DST classifier, one instance per sync run.
#[derive(Debug, Default)]
pub struct TransitionCalendar {
    rule: DstRule,
    cache: Mutex<HashMap<(NaiveDate, &'static str), TransitionClassification>>,
}

impl TransitionCalendar {
    pub fn new(rule: DstRule) -> Self {
        Self {
            rule,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Classify `date` in `tz`.
    ///
    /// Total and deterministic; repeated queries are served from the cache.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use wattsync_core::calendar::{DstRule, TransitionCalendar};
    /// use wattsync_core::models::TransitionKind;
    /// use wattsync_core::tz::parse_tz;
    ///
    /// let calendar = TransitionCalendar::new(DstRule::EU);
    /// let tz = parse_tz("Europe/Helsinki").unwrap();
    /// let date = NaiveDate::from_ymd_opt(2025, 10, 26).unwrap();
    ///
    /// assert_eq!(calendar.classify(date, tz).kind(), TransitionKind::Fall);
    /// ```
    pub fn classify(&self, date: NaiveDate, tz: Tz) -> TransitionClassification {
        let key = (date, tz.name());
        if let Some(hit) = self.lock_cache().get(&key) {
            return *hit;
        }

        let result = self.compute(date, tz);
        match &result {
            TransitionClassification::Spring(t) => {
                info!(%date, tz = tz.name(), hour = t.hour(), "Detected spring DST transition day")
            }
            TransitionClassification::Fall(t) => {
                info!(%date, tz = tz.name(), hour = t.hour(), "Detected fall DST transition day")
            }
            TransitionClassification::None => {}
        }

        self.lock_cache().insert(key, result);
        result
    }

    /// Number of cached classifications.
    pub fn cached_entries(&self) -> usize {
        self.lock_cache().len()
    }

    /// Number of metering periods in the civil day `date`.
    ///
    /// 96 for quarter-hour data on an ordinary day, 92 on a spring-forward
    /// day and 100 on a fall-back day in a zone with a one-hour shift.
    pub fn expected_period_count(&self, date: NaiveDate, tz: Tz, period: Period) -> usize {
        let (start, end) = civil_day_bounds(date, tz);
        let minutes = (end - start).num_minutes().max(0) as u64;
        (minutes / u64::from(period.minutes())) as usize
    }

    fn lock_cache(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(NaiveDate, &'static str), TransitionClassification>>
    {
        // The cache only ever holds complete entries, so a poisoned lock is still usable.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn compute(&self, date: NaiveDate, tz: Tz) -> TransitionClassification {
        if date.weekday() != Weekday::Sun {
            return TransitionClassification::None;
        }

        let candidates = [self.rule.spring, self.rule.fall];
        let on_rule_sunday = candidates.iter().any(|season| {
            season.month == date.month() && season.sunday_in(date.year()) == Some(date)
        });
        if !on_rule_sunday {
            return TransitionClassification::None;
        }

        let classification = probe_transition(date, tz);
        if classification == TransitionClassification::None {
            debug!(%date, tz = tz.name(), "Rule Sunday without a clock change in zone");
        }
        classification
    }
}

/// Find the skipped or doubled local hour on `date` from the zone's tz data.
fn probe_transition(date: NaiveDate, tz: Tz) -> TransitionClassification {
    for hour in 0..24 {
        for minute in [0, 30] {
            let Some(local) = date.and_hms_opt(hour, minute, 0) else {
                continue;
            };
            match tz.from_local_datetime(&local) {
                LocalResult::None => {
                    if let Some(delta) = gap_size(local, tz) {
                        return TransitionClassification::Spring(Transition { local, delta });
                    }
                }
                LocalResult::Ambiguous(first, second) => {
                    let delta = second.with_timezone(&Utc) - first.with_timezone(&Utc);
                    return TransitionClassification::Fall(Transition { local, delta });
                }
                LocalResult::Single(_) => {}
            }
        }
    }
    TransitionClassification::None
}

/// Offset change across a spring-forward gap containing `local`.
fn gap_size(local: NaiveDateTime, tz: Tz) -> Option<chrono::Duration> {
    let before = offset_before(local, tz)?;
    let after = (1..=24 * 60).find_map(|minutes| {
        tz.from_local_datetime(&(local + chrono::Duration::minutes(minutes)))
            .earliest()
            .map(|dt| chrono::Offset::fix(dt.offset()))
    })?;
    Some(chrono::Duration::seconds(i64::from(
        after.local_minus_utc() - before.local_minus_utc(),
    )))
}

/// UTC instants of local midnight at the start and end of `date`.
///
/// A midnight that falls into a gap is read with the offset in effect just
/// before it.
pub fn civil_day_bounds(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = date.succ_opt().unwrap_or(date);
    (local_midnight(date, tz), local_midnight(next, tz))
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => {
            let offset = offset_before(midnight, tz).unwrap_or_else(|| chrono::Offset::fix(&Utc));
            local_with_offset(midnight, offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransitionKind;
    use crate::tz::parse_tz;

    fn helsinki() -> Tz {
        parse_tz("Europe/Helsinki").unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn classifies_helsinki_2025() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let tz = helsinki();

        assert_eq!(calendar.classify(date(2025, 10, 26), tz).kind(), TransitionKind::Fall);
        assert_eq!(calendar.classify(date(2025, 3, 30), tz).kind(), TransitionKind::Spring);
        assert_eq!(calendar.classify(date(2025, 10, 25), tz).kind(), TransitionKind::None);
    }

    #[test]
    fn helsinki_transition_hour_and_delta() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let tz = helsinki();

        let fall = calendar.classify(date(2025, 10, 26), tz);
        let t = fall.transition().unwrap();
        assert_eq!(t.hour(), 3);
        assert_eq!(t.delta, chrono::Duration::hours(1));

        let spring = calendar.classify(date(2025, 3, 30), tz);
        let t = spring.transition().unwrap();
        assert_eq!(t.hour(), 3);
        assert_eq!(t.delta, chrono::Duration::hours(1));
    }

    #[test]
    fn transition_hour_follows_the_zone() {
        // Central European zones switch at 02:00 local, not 03:00.
        let calendar = TransitionCalendar::new(DstRule::EU);
        let berlin = parse_tz("Europe/Berlin").unwrap();

        let fall = calendar.classify(date(2025, 10, 26), berlin);
        assert_eq!(fall.kind(), TransitionKind::Fall);
        assert_eq!(fall.transition().unwrap().hour(), 2);
    }

    #[test]
    fn us_rule_for_new_york() {
        let calendar = TransitionCalendar::new(DstRule::US);
        let ny = parse_tz("America/New_York").unwrap();

        assert_eq!(calendar.classify(date(2025, 3, 9), ny).kind(), TransitionKind::Spring);
        assert_eq!(calendar.classify(date(2025, 11, 2), ny).kind(), TransitionKind::Fall);
        assert_eq!(calendar.classify(date(2025, 10, 26), ny).kind(), TransitionKind::None);
    }

    #[test]
    fn zone_without_dst_is_never_a_transition() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let tokyo = parse_tz("Asia/Tokyo").unwrap();

        assert_eq!(calendar.classify(date(2025, 10, 26), tokyo).kind(), TransitionKind::None);
        assert_eq!(calendar.classify(date(2025, 3, 30), tokyo).kind(), TransitionKind::None);
    }

    #[test]
    fn non_last_sunday_is_none() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        // 2025-10-19 is a Sunday, but not the last one of October.
        assert_eq!(calendar.classify(date(2025, 10, 19), helsinki()).kind(), TransitionKind::None);
    }

    #[test]
    fn last_sunday_scan_handles_short_months() {
        let november = SeasonRule {
            month: 11,
            sunday: SundayRule::Last,
        };
        // November 2024 has 30 days and its last Sunday is the 24th.
        assert_eq!(november.sunday_in(2024), Some(date(2024, 11, 24)));

        let february = SeasonRule {
            month: 2,
            sunday: SundayRule::Last,
        };
        assert_eq!(february.sunday_in(2026), Some(date(2026, 2, 22)));
    }

    #[test]
    fn nth_sunday_scan() {
        assert_eq!(DstRule::US.spring.sunday_in(2025), Some(date(2025, 3, 9)));
        assert_eq!(DstRule::US.fall.sunday_in(2025), Some(date(2025, 11, 2)));
        let zeroth = SeasonRule {
            month: 3,
            sunday: SundayRule::Nth(0),
        };
        assert_eq!(zeroth.sunday_in(2025), None);
    }

    #[test]
    fn classification_is_memoized_and_deterministic() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let tz = helsinki();

        let first = calendar.classify(date(2025, 10, 26), tz);
        let second = calendar.classify(date(2025, 10, 26), tz);
        assert_eq!(first, second);
        assert_eq!(calendar.cached_entries(), 1);

        calendar.classify(date(2025, 10, 26), parse_tz("Europe/Berlin").unwrap());
        assert_eq!(calendar.cached_entries(), 2);
    }

    #[test]
    fn fresh_calendars_do_not_share_cache() {
        let a = TransitionCalendar::new(DstRule::EU);
        let b = TransitionCalendar::new(DstRule::EU);
        a.classify(date(2025, 3, 30), helsinki());
        assert_eq!(a.cached_entries(), 1);
        assert_eq!(b.cached_entries(), 0);
    }

    #[test]
    fn expected_period_counts() {
        let calendar = TransitionCalendar::new(DstRule::EU);
        let tz = helsinki();

        assert_eq!(calendar.expected_period_count(date(2025, 10, 25), tz, Period::QUARTER_HOUR), 96);
        assert_eq!(calendar.expected_period_count(date(2025, 3, 30), tz, Period::QUARTER_HOUR), 92);
        assert_eq!(calendar.expected_period_count(date(2025, 10, 26), tz, Period::QUARTER_HOUR), 100);
        assert_eq!(calendar.expected_period_count(date(2025, 10, 26), tz, Period::HOUR), 25);
    }

    #[test]
    fn rule_matching_the_zone_has_no_mismatches() {
        assert!(DstRule::EU.mismatches(helsinki(), 2025).is_empty());
        let ny = parse_tz("America/New_York").unwrap();
        assert!(DstRule::US.mismatches(ny, 2025).is_empty());
        assert!(DstRule::US.mismatches(parse_tz("Asia/Tokyo").unwrap(), 2025).is_empty());
    }

    #[test]
    fn eu_rule_for_new_york_reports_every_disagreeing_date() {
        let ny = parse_tz("America/New_York").unwrap();
        assert_eq!(
            DstRule::EU.mismatches(ny, 2025),
            vec![
                date(2025, 3, 9),
                date(2025, 3, 30),
                date(2025, 10, 26),
                date(2025, 11, 2)
            ]
        );
    }

    #[test]
    fn rule_from_str() {
        assert_eq!("EU".parse::<DstRule>().unwrap(), DstRule::EU);
        assert_eq!("us".parse::<DstRule>().unwrap(), DstRule::US);
        assert!("au".parse::<DstRule>().is_err());
    }
}

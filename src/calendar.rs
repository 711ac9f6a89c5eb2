//! Calendar capability for holiday detection.
//!
//! Gregorian keys (day of month, nth weekday, weekday from month end) are
//! computed inline by the holiday transformer. Non-Gregorian calendars are
//! external tables behind the `CalendarLookup` trait; the lunar phase is
//! astronomy and computed here directly.

use chrono::{Datelike, NaiveDate, NaiveDateTime};

/// Mean length of the synodic month in days.
const SYNODIC_MONTH: f64 = 29.530_588_67;

/// Supplies named binary flag columns for external calendar systems
/// (Islamic month/day, Hebrew month/day). Implementations are expected to
/// be pure date lookups.
pub trait CalendarLookup: Send + Sync {
    /// One `(name, flags)` pair per calendar key; `flags` aligns with
    /// `dates`.
    fn flags(&self, dates: &[NaiveDateTime]) -> Vec<(String, Vec<bool>)>;
}

/// Default lookup with no external calendars wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCalendar;

impl CalendarLookup for NullCalendar {
    fn flags(&self, _dates: &[NaiveDateTime]) -> Vec<(String, Vec<bool>)> {
        Vec::new()
    }
}

/// Fraction of the lunar cycle elapsed, in `[0, 1)`. 0 is new moon,
/// 0.5 is full moon. Anchored to the new moon of 2000-01-06 18:14 UTC.
pub fn moon_phase(date: NaiveDateTime) -> f64 {
    let anchor = NaiveDate::from_ymd_opt(2000, 1, 6)
        .unwrap()
        .and_hms_opt(18, 14, 0)
        .unwrap();
    let days = (date - anchor).num_seconds() as f64 / 86_400.0;
    let cycles = days / SYNODIC_MONTH;
    let frac = cycles - cycles.floor();
    if frac < 0.0 {
        frac + 1.0
    } else {
        frac
    }
}

/// Illuminated fraction of the moon, in `[0, 1]`.
pub fn moon_illumination(date: NaiveDateTime) -> f64 {
    0.5 * (1.0 - (2.0 * std::f64::consts::PI * moon_phase(date)).cos())
}

/// Phase bucketed into a whole lunar day, `0..=29`.
pub fn lunar_day(date: NaiveDateTime) -> u32 {
    (moon_phase(date) * SYNODIC_MONTH).floor().min(29.0) as u32
}

/// Occurrence of this date's weekday within its month, starting at 1.
pub fn weekday_of_month(date: NaiveDateTime) -> u32 {
    (date.day() - 1) / 7 + 1
}

/// Occurrence of this date's weekday counted from the end of its month,
/// starting at 1 (1 means the last such weekday of the month).
pub fn weekday_from_month_end(date: NaiveDateTime) -> u32 {
    let last = days_in_month(date.year(), date.month());
    (last - date.day()) / 7 + 1
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_next = NaiveDate::from_ymd_opt(ny, nm, 1).unwrap();
    first_next.pred_opt().unwrap().day()
}

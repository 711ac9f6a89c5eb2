//! Calendar and Fourier seasonal feature generation.
//!
//! `date_part` expands a timestamp index into numeric feature columns for
//! the datepart regression transforms; `fourier_series` builds harmonic
//! bases; `seasonal_int` draws typical seasonality lags for random search.

use crate::calendar::{moon_illumination, days_in_month, weekday_of_month};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Reference origin for the Fourier time axis.
fn fourier_origin() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2030, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Seconds between the Unix epoch and 2000-01-01.
const Y2K_EPOCH_SECS: i64 = 946_684_800;

/// Datepart expansion flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePartMethod {
    Simple,
    Expanded,
    Recurring,
    Simple2,
    Simple3,
    SimpleBinarized,
    ExpandedBinarized,
    LunarPhase,
    CommonFourier,
    CommonFourierRw,
}

impl DatePartMethod {
    pub const ALL: [DatePartMethod; 10] = [
        DatePartMethod::Simple,
        DatePartMethod::Expanded,
        DatePartMethod::Recurring,
        DatePartMethod::Simple2,
        DatePartMethod::Simple3,
        DatePartMethod::SimpleBinarized,
        DatePartMethod::ExpandedBinarized,
        DatePartMethod::LunarPhase,
        DatePartMethod::CommonFourier,
        DatePartMethod::CommonFourierRw,
    ];
}

fn weekday(d: &NaiveDateTime) -> f64 {
    d.weekday().num_days_from_monday() as f64
}

fn quarter(d: &NaiveDateTime) -> f64 {
    ((d.month() - 1) / 3 + 1) as f64
}

fn is_weekend(d: &NaiveDateTime) -> f64 {
    if d.weekday().num_days_from_monday() > 4 {
        1.0
    } else {
        0.0
    }
}

fn is_midyear(d: &NaiveDateTime) -> f64 {
    let doy = d.ordinal();
    if doy > 74 && doy < 258 {
        1.0
    } else {
        0.0
    }
}

fn julian_date(d: &NaiveDateTime) -> f64 {
    d.and_utc().timestamp() as f64 / 86_400.0 + 2_440_587.5
}

struct FeatureTable {
    names: Vec<String>,
    cols: Vec<Vec<f64>>,
}

impl FeatureTable {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            cols: Vec::new(),
        }
    }

    fn push<F: Fn(&NaiveDateTime) -> f64>(
        &mut self,
        name: &str,
        dates: &[NaiveDateTime],
        f: F,
    ) {
        self.names.push(name.to_string());
        self.cols.push(dates.iter().map(f).collect());
    }

    /// One 0/1 column per category value in `categories`.
    fn push_dummies<F: Fn(&NaiveDateTime) -> i64>(
        &mut self,
        prefix: &str,
        categories: std::ops::RangeInclusive<i64>,
        dates: &[NaiveDateTime],
        f: F,
    ) {
        let values: Vec<i64> = dates.iter().map(&f).collect();
        for c in categories {
            self.names.push(format!("{prefix}_{c}"));
            self.cols.push(
                values
                    .iter()
                    .map(|&v| if v == c { 1.0 } else { 0.0 })
                    .collect(),
            );
        }
    }

    fn finish(self, n_rows: usize) -> (Vec<String>, Array2<f64>) {
        let mut arr = Array2::zeros((n_rows, self.cols.len()));
        for (j, col) in self.cols.iter().enumerate() {
            for (i, &v) in col.iter().enumerate() {
                arr[[i, j]] = v;
            }
        }
        (self.names, arr)
    }
}

/// Expand timestamps into named feature columns.
pub fn date_part(
    dates: &[NaiveDateTime],
    method: DatePartMethod,
) -> (Vec<String>, Array2<f64>) {
    let n = dates.len();
    let mut t = FeatureTable::new();
    match method {
        DatePartMethod::Recurring => {
            t.push("month", dates, |d| d.month() as f64);
            t.push("day", dates, |d| d.day() as f64);
            t.push("weekday", dates, weekday);
            t.push("weekend", dates, is_weekend);
            t.push("hour", dates, |d| d.hour() as f64);
            t.push("quarter", dates, quarter);
            t.push("midyear", dates, is_midyear);
        }
        DatePartMethod::Simple => {
            t.push("year", dates, |d| d.year() as f64);
            t.push("month", dates, |d| d.month() as f64);
            t.push("day", dates, |d| d.day() as f64);
            t.push("weekday", dates, weekday);
        }
        DatePartMethod::Expanded => {
            t.push("year", dates, |d| d.year() as f64);
            t.push("month", dates, |d| d.month() as f64);
            t.push("day", dates, |d| d.day() as f64);
            t.push("weekday", dates, weekday);
            t.push("hour", dates, |d| d.hour() as f64);
            t.push("week", dates, |d| d.iso_week().week() as f64);
            t.push("quarter", dates, quarter);
            t.push("dayofyear", dates, |d| d.ordinal() as f64);
            t.push("midyear", dates, is_midyear);
            t.push("weekend", dates, is_weekend);
            t.push("weekdayofmonth", dates, |d| weekday_of_month(*d) as f64);
            t.push("month_end", dates, |d| {
                if d.day() == days_in_month(d.year(), d.month()) {
                    1.0
                } else {
                    0.0
                }
            });
            t.push("month_start", dates, |d| if d.day() == 1 { 1.0 } else { 0.0 });
            t.push("quarter_end", dates, |d| {
                let quarter_end = matches!(d.month(), 3 | 6 | 9 | 12)
                    && d.day() == days_in_month(d.year(), d.month());
                if quarter_end {
                    1.0
                } else {
                    0.0
                }
            });
            t.push("year_end", dates, |d| {
                if d.month() == 12 && d.day() == 31 {
                    1.0
                } else {
                    0.0
                }
            });
            t.push("daysinmonth", dates, |d| {
                days_in_month(d.year(), d.month()) as f64
            });
            t.push("epoch", dates, |d| {
                (d.and_utc().timestamp() - Y2K_EPOCH_SECS) as f64
            });
            t.push("us_election_year", dates, |d| {
                if d.year() % 4 == 0 {
                    1.0
                } else {
                    0.0
                }
            });
        }
        DatePartMethod::Simple2 => {
            t.push("month", dates, |d| d.month() as f64);
            t.push("day", dates, |d| d.day() as f64);
            t.push("weekday", dates, weekday);
            t.push("weekend", dates, is_weekend);
            t.push("epoch", dates, |d| d.and_utc().timestamp() as f64 / 100.0);
        }
        DatePartMethod::Simple3 | DatePartMethod::LunarPhase => {
            t.push("weekend", dates, is_weekend);
            t.push("quarter", dates, quarter);
            t.push("epoch", dates, julian_date);
            t.push_dummies("month", 1..=12, dates, |d| d.month() as i64);
            t.push_dummies("weekday", 0..=6, dates, |d| {
                d.weekday().num_days_from_monday() as i64
            });
            if method == DatePartMethod::LunarPhase {
                t.push("phase", dates, |d| moon_illumination(*d));
            }
        }
        DatePartMethod::SimpleBinarized => {
            t.push("day", dates, |d| d.day() as f64);
            t.push("weekend", dates, is_weekend);
            t.push("epoch", dates, julian_date);
            t.push_dummies("month", 1..=12, dates, |d| d.month() as i64);
            t.push_dummies("weekday", 0..=6, dates, |d| {
                d.weekday().num_days_from_monday() as i64
            });
        }
        DatePartMethod::ExpandedBinarized => {
            t.push("weekend", dates, is_weekend);
            t.push("quarter", dates, quarter);
            t.push("epoch", dates, julian_date);
            t.push_dummies("month", 1..=12, dates, |d| d.month() as i64);
            t.push_dummies("weekday", 0..=6, dates, |d| {
                d.weekday().num_days_from_monday() as i64
            });
            t.push_dummies("day", 1..=31, dates, |d| d.day() as i64);
            t.push_dummies("weekdayofmonth", 1..=5, dates, |d| {
                weekday_of_month(*d) as i64
            });
        }
        DatePartMethod::CommonFourier | DatePartMethod::CommonFourierRw => {
            let (mut names, mut arr) = common_fourier(dates);
            if method == DatePartMethod::CommonFourierRw {
                let epoch: Vec<f64> = dates
                    .iter()
                    .map(|d| julian_date(d).powf(0.65).floor())
                    .collect();
                names.push("epoch".to_string());
                let epoch_col =
                    Array2::from_shape_vec((n, 1), epoch).expect("column shape");
                arr = concatenate(Axis(1), &[arr.view(), epoch_col.view()])
                    .expect("column concat");
            }
            return (names, arr);
        }
    }
    t.finish(n)
}

///// Harmonic basis: `cos` block then `sin` block of `2*pi*k/period * t`
/// for `k = 1..=n`, giving `2n` columns.
pub fn fourier_series(t: &Array1<f64>, period: f64, n: usize) -> Array2<f64> {
    let mut out = Array2::zeros((t.len(), 2 * n));
    for (i, &ti) in t.iter().enumerate() {
        for k in 1..=n {
            let x = 2.0 * PI * k as f64 / period * ti;
            out[[i, k - 1]] = x.cos();
            out[[i, n + k - 1]] = x.sin();
        }
    }
    out
}

/// Fourier bands chosen by the span-to-sample ratio of the index.
///
/// `ratio = (max_year - min_year + 1) / len`; small ratios mean dense
/// sampling (hourly), large ratios sparse (yearly). Bands interact via
/// element-wise products at the hourly and daily resolutions.
pub fn common_fourier(dates: &[NaiveDateTime]) -> (Vec<String>, Array2<f64>) {
    let origin = fourier_origin();
    let min_year = dates.iter().map(|d| d.year()).min().unwrap_or(2000);
    let max_year = dates.iter().map(|d| d.year()).max().unwrap_or(2000);
    let ratio = (max_year - min_year + 1) as f64 / dates.len().max(1) as f64;

    let days: Array1<f64> = Array1::from_iter(
        dates
            .iter()
            .map(|d| (*d - origin).num_seconds() as f64 / 86_400.0),
    );
    let mut blocks: Vec<Array2<f64>> = Vec::new();
    if ratio < 0.001 {
        // hourly: in-day, weekly, and yearly cycles plus interactions
        let hours = days.mapv(|v| v * 24.0);
        blocks.push(fourier_series(&hours, 8766.0, 10));
        blocks.push(fourier_series(&hours, 24.0, 3));
        blocks.push(fourier_series(&hours, 168.0, 5));
        blocks.push(&fourier_series(&hours, 168.0, 5) * &fourier_series(&hours, 24.0, 5));
        blocks.push(&fourier_series(&hours, 168.0, 3) * &fourier_series(&hours, 8766.0, 3));
    } else if ratio < 0.012 {
        // daily
        blocks.push(fourier_series(&days, 365.25, 10));
        blocks.push(fourier_series(&days, 7.0, 3));
        let w = fourier_series(&days, 7.0, 5);
        blocks.push(&w * &w);
    } else if ratio < 0.05 {
        // weekly
        blocks.push(fourier_series(&days, 365.25, 10));
        blocks.push(fourier_series(&days, 28.0, 3));
    } else if ratio < 0.5 {
        // monthly
        blocks.push(fourier_series(&days, 365.25, 3));
        blocks.push(fourier_series(&days, 1461.0, 10));
    } else {
        // yearly
        blocks.push(fourier_series(&days, 1461.0, 10));
    }
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    let arr = concatenate(Axis(1), &views).expect("fourier block concat");
    let names = (0..arr.ncols())
        .map(|i| format!("seasonalitycommonfourier_{i}"))
        .collect();
    (names, arr)
}

/// Weighted draw of a typical seasonality lag.
///
/// `include_one` permits a lag of 1; `small` caps at 364; `very_small`
/// redraws until the lag is 30 or less. The -1 bucket redraws uniformly
/// from 2..=100.
pub fn seasonal_int<R: Rng + ?Sized>(
    rng: &mut R,
    include_one: bool,
    small: bool,
    very_small: bool,
) -> usize {
    const CHOICES: [(i64, f64); 17] = [
        (-1, 0.1),
        (1, 0.05),
        (2, 0.1),
        (4, 0.05),
        (7, 0.15),
        (10, 0.01),
        (12, 0.1),
        (24, 0.1),
        (28, 0.1),
        (60, 0.05),
        (96, 0.04),
        (168, 0.01),
        (364, 0.1),
        (1440, 0.01),
        (420, 0.01),
        (52, 0.01),
        (84, 0.01),
    ];
    loop {
        let total: f64 = CHOICES.iter().map(|&(_, w)| w).sum();
        let mut roll = rng.gen::<f64>() * total;
        let mut lag = CHOICES[CHOICES.len() - 1].0;
        for &(v, w) in &CHOICES {
            if roll < w {
                lag = v;
                break;
            }
            roll -= w;
        }
        let mut lag = if lag == -1 {
            rng.gen_range(2..=100)
        } else {
            lag as usize
        };
        if !include_one && lag == 1 {
            continue;
        }
        if small && lag > 364 {
            lag = 364;
        }
        if very_small && lag > 30 {
            continue;
        }
        return lag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::{rngs::StdRng, SeedableRng};

    fn range(start: NaiveDateTime, step: Duration, n: usize) -> Vec<NaiveDateTime> {
        (0..n).map(|i| start + step * i as i32).collect()
    }

    fn jan1(year: i32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_simple_dateparts() {
        let dates = range(jan1(2023), Duration::days(1), 3);
        let (names, arr) = date_part(&dates, DatePartMethod::Simple);
        assert_eq!(names, ["year", "month", "day", "weekday"]);
        assert_eq!(arr[[0, 0]], 2023.0);
        // 2023-01-01 was a Sunday
        assert_eq!(arr[[0, 3]], 6.0);
        assert_eq!(arr[[1, 3]], 0.0);
    }

    #[test]
    fn test_binarized_has_full_dummy_set() {
        let dates = range(jan1(2023), Duration::days(1), 10);
        let (names, arr) = date_part(&dates, DatePartMethod::SimpleBinarized);
        // day, weekend, epoch + 12 months + 7 weekdays
        assert_eq!(names.len(), 3 + 12 + 7);
        // each row has exactly one month dummy and one weekday dummy set
        let month_cols = 3..15;
        let row0: f64 = month_cols.map(|j| arr[[0, j]]).sum();
        assert_eq!(row0, 1.0);
    }

    #[test]
    fn test_fourier_ratio_hourly_band() {
        // one year of hourly stamps: ratio well under 0.001
        let dates = range(jan1(2022), Duration::hours(1), 8760);
        let (names, arr) = date_part(&dates, DatePartMethod::CommonFourier);
        // 20 + 6 + 10 + 10 + 6 columns
        assert_eq!(names.len(), 52);
        assert_eq!(arr.ncols(), 52);
    }

    #[test]
    fn test_fourier_ratio_daily_band() {
        // five years of daily stamps: ratio about 0.0027
        let dates = range(jan1(2019), Duration::days(1), 1826);
        let (names, _) = date_part(&dates, DatePartMethod::CommonFourier);
        // 20 + 6 + 10 columns
        assert_eq!(names.len(), 36);
    }

    #[test]
    fn test_fourier_ratio_yearly_band() {
        let dates = range(jan1(2000), Duration::days(365), 20);
        let (names, _) = date_part(&dates, DatePartMethod::CommonFourier);
        assert_eq!(names.len(), 20);
    }

    #[test]
    fn test_fourier_series_layout() {
        let t = Array1::from_vec(vec![0.0, 1.0, 2.0]);
        let f = fourier_series(&t, 7.0, 2);
        assert_eq!(f.ncols(), 4);
        // t=0: all cosines 1, all sines 0
        assert!((f[[0, 0]] - 1.0).abs() < 1e-12);
        assert!(f[[0, 2]].abs() < 1e-12);
    }

    #[test]
    fn test_seasonal_int_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let lag = seasonal_int(&mut rng, false, false, false);
            assert!(lag >= 2);
            let small = seasonal_int(&mut rng, false, true, false);
            assert!(small <= 364);
            let tiny = seasonal_int(&mut rng, false, false, true);
            assert!((2..=30).contains(&tiny));
        }
    }
}

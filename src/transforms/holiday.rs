//! Holiday detection from recurring anomalies, and neutralization of the
//! detected holiday effects.
//!
//! Detection runs the anomaly detector over the fit frame, then clusters
//! flagged dates by calendar keys (day of month, nth weekday of month,
//! weekday counted from month end, lunar day, lunar day + weekday, and
//! any external calendars supplied through `CalendarLookup`). A key whose
//! anomaly count reaches `min_occurrences` and covers at least
//! `threshold` of that key's dates in the fit index becomes a holiday
//! rule. Rules are pure functions of the date, so flags can be
//! reconstructed for arbitrary forecast horizons and the neutralization
//! reversed exactly.

use crate::calendar::{
    lunar_day, weekday_from_month_end, weekday_of_month, CalendarLookup, NullCalendar,
};
use crate::error::{ForgeError, Result};
use crate::fillna::FillMethod;
use crate::frame::TimeSeriesFrame;
use crate::linalg;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::regression::Regressor;
use crate::seasonal::date_part;
use crate::transforms::anomaly::{AnomalyDetector, AnomalyMethod};
use crate::transforms::{HolidayRegressionParams, InverseMode, Transform};
use chrono::{Datelike, NaiveDateTime};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How detected holidays are neutralized in the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolidayImpact {
    /// Detect only; values pass through unchanged.
    None,
    /// Subtract the gap between the holiday's mean value and the series
    /// median at holiday dates.
    MedianValue,
    /// Divide by the holiday's score ratio at holiday dates.
    AnomalyScore,
    /// Subtract a weighted regression of the series on its holiday flags.
    Regression,
    /// Subtract a regression on calendar features plus holiday flags.
    DatepartRegression,
}

/// Full parameter set, grouped because the configuration surface is wide.
pub struct HolidayParams {
    pub anomaly_method: AnomalyMethod,
    pub anomaly_pre_clean: Option<PipelineConfig>,
    pub anomaly_fillna: Option<FillMethod>,
    pub threshold: f64,
    pub min_occurrences: usize,
    pub use_dayofmonth_holidays: bool,
    pub use_wkdom_holidays: bool,
    pub use_wkdeom_holidays: bool,
    pub use_lunar_holidays: bool,
    pub use_lunar_weekday: bool,
    pub use_islamic_holidays: bool,
    pub use_hebrew_holidays: bool,
    pub remove_excess_anomalies: bool,
    pub impact: HolidayImpact,
    pub regression_params: Option<HolidayRegressionParams>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HolidayKey {
    DayOfMonth { month: u32, day: u32 },
    Wkdom { month: u32, weekday: u32, nth: u32 },
    Wkdeom { month: u32, weekday: u32, nth: u32 },
    LunarDay { day: u32 },
    LunarWeekday { day: u32, weekday: u32 },
    External { name: String },
}

#[derive(Debug, Clone)]
struct HolidayRule {
    key: HolidayKey,
    mean_value: f64,
    mean_score: f64,
}

struct SeriesState {
    rules: Vec<HolidayRule>,
    median: f64,
    score_median: f64,
    regression_coef: Option<Array1<f64>>,
    datepart_model: Option<Box<dyn Regressor>>,
}

pub struct HolidayTransformer {
    params: HolidayParams,
    calendar: Box<dyn CalendarLookup>,
    series: Option<Vec<SeriesState>>,
    fit_mask: Option<Array2<i8>>,
}

impl HolidayTransformer {
    pub fn new(params: HolidayParams) -> Result<Self> {
        if !(params.threshold > 0.0 && params.threshold <= 1.0) {
            return Err(ForgeError::InvalidParameter(format!(
                "holiday threshold must be in (0, 1], got {}",
                params.threshold
            )));
        }
        if params.min_occurrences == 0 {
            return Err(ForgeError::InvalidParameter(
                "min_occurrences must be at least 1".into(),
            ));
        }
        if params.impact == HolidayImpact::DatepartRegression
            && params.regression_params.is_none()
        {
            return Err(ForgeError::InvalidParameter(
                "datepart_regression impact needs regression_params".into(),
            ));
        }
        Ok(Self {
            params,
            calendar: Box::new(NullCalendar),
            series: None,
            fit_mask: None,
        })
    }

    /// Wire in external (Islamic/Hebrew) calendar tables.
    pub fn with_calendar(mut self, calendar: Box<dyn CalendarLookup>) -> Self {
        self.calendar = calendar;
        self
    }

    fn keys_for(&self, date: NaiveDateTime) -> Vec<HolidayKey> {
        let mut keys = Vec::new();
        let weekday = date.weekday().num_days_from_monday();
        if self.params.use_dayofmonth_holidays {
            keys.push(HolidayKey::DayOfMonth {
                month: date.month(),
                day: date.day(),
            });
        }
        if self.params.use_wkdom_holidays {
            keys.push(HolidayKey::Wkdom {
                month: date.month(),
                weekday,
                nth: weekday_of_month(date),
            });
        }
        if self.params.use_wkdeom_holidays {
            keys.push(HolidayKey::Wkdeom {
                month: date.month(),
                weekday,
                nth: weekday_from_month_end(date),
            });
        }
        if self.params.use_lunar_holidays {
            keys.push(HolidayKey::LunarDay {
                day: lunar_day(date),
            });
        }
        if self.params.use_lunar_weekday {
            keys.push(HolidayKey::LunarWeekday {
                day: lunar_day(date),
                weekday,
            });
        }
        keys
    }

    fn external_keys(&self, dates: &[NaiveDateTime]) -> Vec<(String, Vec<bool>)> {
        if self.params.use_islamic_holidays || self.params.use_hebrew_holidays {
            self.calendar.flags(dates)
        } else {
            Vec::new()
        }
    }

    /// Binary flag matrix, one column per rule of this series.
    fn rule_flags(&self, rules: &[HolidayRule], dates: &[NaiveDateTime]) -> Array2<f64> {
        let n = dates.len();
        let externals = self.external_keys(dates);
        let mut flags = Array2::zeros((n, rules.len()));
        for (i, &d) in dates.iter().enumerate() {
            let date_keys = self.keys_for(d);
            for (r, rule) in rules.iter().enumerate() {
                let hit = match &rule.key {
                    HolidayKey::External { name } => externals
                        .iter()
                        .any(|(ext_name, vals)| ext_name == name && vals[i]),
                    key => date_keys.contains(key),
                };
                if hit {
                    flags[[i, r]] = 1.0;
                }
            }
        }
        flags
    }

    /// Per-row neutralization offsets for the additive impact modes.
    fn median_offsets(&self, state: &SeriesState, dates: &[NaiveDateTime]) -> Array1<f64> {
        let flags = self.rule_flags(&state.rules, dates);
        let mut offsets = Array1::zeros(dates.len());
        for i in 0..dates.len() {
            for (r, rule) in state.rules.iter().enumerate() {
                if flags[[i, r]] > 0.0 {
                    offsets[i] += rule.mean_value - state.median;
                }
            }
        }
        offsets
    }

    /// Per-row multiplicative factors for the anomaly-score mode.
    fn score_factors(&self, state: &SeriesState, dates: &[NaiveDateTime]) -> Array1<f64> {
        let flags = self.rule_flags(&state.rules, dates);
        let mut factors = Array1::ones(dates.len());
        for i in 0..dates.len() {
            for (r, rule) in state.rules.iter().enumerate() {
                if flags[[i, r]] > 0.0 && state.score_median > 0.0 {
                    let ratio = rule.mean_score / state.score_median;
                    if ratio.is_finite() && ratio.abs() > 1e-12 {
                        factors[i] *= ratio;
                    }
                }
            }
        }
        factors
    }

    fn datepart_design(&self, state: &SeriesState, dates: &[NaiveDateTime]) -> Array2<f64> {
        let method = self
            .params
            .regression_params
            .as_ref()
            .map(|p| p.datepart_method)
            .unwrap_or(crate::seasonal::DatePartMethod::Simple3);
        let (_, features) = date_part(dates, method);
        let flags = self.rule_flags(&state.rules, dates);
        let mut design = Array2::zeros((dates.len(), features.ncols() + flags.ncols()));
        design
            .slice_mut(ndarray::s![.., ..features.ncols()])
            .assign(&features);
        design
            .slice_mut(ndarray::s![.., features.ncols()..])
            .assign(&flags);
        design
    }

    /// Signed adjustment the impact mode applies; transform subtracts it,
    /// inverse adds it. The anomaly-score mode is multiplicative and
    /// handled separately.
    fn additive_adjustment(
        &self,
        state: &SeriesState,
        dates: &[NaiveDateTime],
    ) -> Result<Array1<f64>> {
        match self.params.impact {
            HolidayImpact::MedianValue => Ok(self.median_offsets(state, dates)),
            HolidayImpact::Regression => {
                if state.rules.is_empty() {
                    return Ok(Array1::zeros(dates.len()));
                }
                let coef = state
                    .regression_coef
                    .as_ref()
                    .ok_or(ForgeError::NotFitted("HolidayTransformer"))?;
                let flags = self.rule_flags(&state.rules, dates);
                // intercept is excluded so only the holiday effect moves
                let mut adj = Array1::zeros(dates.len());
                for i in 0..dates.len() {
                    for r in 0..flags.ncols() {
                        adj[i] += flags[[i, r]] * coef[r];
                    }
                }
                Ok(adj)
            }
            HolidayImpact::DatepartRegression => {
                let model = state
                    .datepart_model
                    .as_ref()
                    .ok_or(ForgeError::NotFitted("HolidayTransformer"))?;
                let design = self.datepart_design(state, dates);
                let pred = model.predict(&design)?;
                Ok(pred.column(0).to_owned())
            }
            _ => Ok(Array1::zeros(dates.len())),
        }
    }
}

impl Transform for HolidayTransformer {
    fn name(&self) -> &'static str {
        "HolidayTransformer"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let detection_input = match &self.params.anomaly_pre_clean {
            Some(cfg) => Pipeline::from_config(cfg.clone())?.fit_transform(df)?,
            None => df.clone(),
        };
        let (mask, scores) =
            AnomalyDetector::new(self.params.anomaly_method.clone()).detect(&detection_input)?;

        let dates = df.index().to_vec();
        let externals = self.external_keys(&dates);

        // how often every key appears in the whole fit index
        let mut totals: HashMap<HolidayKey, usize> = HashMap::new();
        for (i, &d) in dates.iter().enumerate() {
            for key in self.keys_for(d) {
                *totals.entry(key).or_insert(0) += 1;
            }
            for (name, vals) in &externals {
                if vals[i] {
                    *totals
                        .entry(HolidayKey::External { name: name.clone() })
                        .or_insert(0) += 1;
                }
            }
        }

        let mut series_states = Vec::with_capacity(df.ncols());
        for j in 0..df.ncols() {
            // cluster this series' anomaly dates by key
            let mut hits: HashMap<HolidayKey, (usize, f64, f64)> = HashMap::new();
            for (i, &d) in dates.iter().enumerate() {
                if mask[[i, j]] != -1 {
                    continue;
                }
                let value = df.values()[[i, j]];
                let score = scores[[i, j]];
                let mut keys = self.keys_for(d);
                for (name, vals) in &externals {
                    if vals[i] {
                        keys.push(HolidayKey::External { name: name.clone() });
                    }
                }
                for key in keys {
                    let entry = hits.entry(key).or_insert((0, 0.0, 0.0));
                    entry.0 += 1;
                    if !value.is_nan() {
                        entry.1 += value;
                    }
                    entry.2 += score;
                }
            }
            let mut rules = Vec::new();
            for (key, (count, value_sum, score_sum)) in hits {
                let total = *totals.get(&key).unwrap_or(&0);
                if total == 0 || count < self.params.min_occurrences {
                    continue;
                }
                if (count as f64) / (total as f64) >= self.params.threshold {
                    rules.push(HolidayRule {
                        key,
                        mean_value: value_sum / count as f64,
                        mean_score: score_sum / count as f64,
                    });
                }
            }
            let median = df.col_median()[j];
            let mut col_scores: Vec<f64> =
                scores.column(j).iter().copied().filter(|s| *s > 0.0).collect();
            col_scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let score_median = if col_scores.is_empty() {
                1.0
            } else {
                col_scores[col_scores.len() / 2]
            };

            let mut state = SeriesState {
                rules,
                median,
                score_median,
                regression_coef: None,
                datepart_model: None,
            };

            match self.params.impact {
                HolidayImpact::Regression if !state.rules.is_empty() => {
                    let flags = self.rule_flags(&state.rules, &dates);
                    let n = dates.len();
                    let p = flags.ncols();
                    // recent rows carry more weight in the fit
                    let mut design = Array2::ones((n, p + 1));
                    let mut target = Array2::zeros((n, 1));
                    for i in 0..n {
                        let w = ((i + 1) as f64).powf(0.6).sqrt();
                        for r in 0..p {
                            design[[i, r]] = flags[[i, r]] * w;
                        }
                        design[[i, p]] = w;
                        let v = df.values()[[i, j]];
                        target[[i, 0]] = if v.is_nan() { 0.0 } else { v * w };
                    }
                    let beta = linalg::lstsq(&design, &target)?;
                    state.regression_coef =
                        Some(Array1::from_iter((0..p).map(|r| beta[[r, 0]])));
                }
                HolidayImpact::DatepartRegression => {
                    let spec = self
                        .params
                        .regression_params
                        .as_ref()
                        .ok_or(ForgeError::NotFitted("HolidayTransformer"))?;
                    let design = self.datepart_design(&state, &dates);
                    let target = Array2::from_shape_fn((dates.len(), 1), |(i, _)| {
                        let v = df.values()[[i, j]];
                        if v.is_nan() {
                            0.0
                        } else {
                            v
                        }
                    });
                    let mut model = spec.regression.build();
                    model.fit(&design, &target)?;
                    state.datepart_model = Some(model);
                }
                _ => {}
            }
            series_states.push(state);
        }

        self.series = Some(series_states);
        self.fit_mask = Some(mask);
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let series = self
            .series
            .as_ref()
            .ok_or(ForgeError::NotFitted("HolidayTransformer"))?;
        if series.len() != df.ncols() {
            return Err(ForgeError::ShapeMismatch(
                "holiday transformer fitted on a different column count".into(),
            ));
        }
        let dates = df.index().to_vec();
        let mut out = df.clone();

        if self.params.remove_excess_anomalies {
            let fitted_mask = self.fit_mask.as_ref().unwrap();
            let mask = if fitted_mask.dim() == df.values().dim() {
                fitted_mask.clone()
            } else {
                AnomalyDetector::new(self.params.anomaly_method.clone())
                    .detect(df)?
                    .0
            };
            let mut values = out.values().clone();
            for (j, state) in series.iter().enumerate() {
                let flags = self.rule_flags(&state.rules, &dates);
                for i in 0..dates.len() {
                    let is_holiday = (0..flags.ncols()).any(|r| flags[[i, r]] > 0.0);
                    if mask[[i, j]] == -1 && !is_holiday {
                        values[[i, j]] = f64::NAN;
                    }
                }
            }
            out = out.with_values(values)?;
            out = match &self.params.anomaly_fillna {
                Some(fill) => fill.apply(&out)?,
                None => out.ffill().bfill(),
            };
        }

        let mut values = out.values().clone();
        for (j, state) in series.iter().enumerate() {
            match self.params.impact {
                HolidayImpact::None => {}
                HolidayImpact::AnomalyScore => {
                    let factors = self.score_factors(state, &dates);
                    for i in 0..dates.len() {
                        values[[i, j]] /= factors[i];
                    }
                }
                _ => {
                    let adj = self.additive_adjustment(state, &dates)?;
                    for i in 0..dates.len() {
                        values[[i, j]] -= adj[i];
                    }
                }
            }
        }
        out.with_values(values)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let series = self
            .series
            .as_ref()
            .ok_or(ForgeError::NotFitted("HolidayTransformer"))?;
        if series.len() != df.ncols() {
            return Err(ForgeError::ShapeMismatch(
                "holiday transformer fitted on a different column count".into(),
            ));
        }
        let dates = df.index().to_vec();
        let mut values = df.values().clone();
        for (j, state) in series.iter().enumerate() {
            match self.params.impact {
                HolidayImpact::None => {}
                HolidayImpact::AnomalyScore => {
                    let factors = self.score_factors(state, &dates);
                    for i in 0..dates.len() {
                        values[[i, j]] *= factors[i];
                    }
                }
                _ => {
                    let adj = self.additive_adjustment(state, &dates)?;
                    for i in 0..dates.len() {
                        values[[i, j]] += adj[i];
                    }
                }
            }
        }
        df.with_values(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::RegressionSpec;
    use crate::seasonal::DatePartMethod;
    use chrono::NaiveDate;

    fn default_params(impact: HolidayImpact) -> HolidayParams {
        HolidayParams {
            anomaly_method: AnomalyMethod::Zscore { threshold: 2.5 },
            anomaly_pre_clean: None,
            anomaly_fillna: Some(FillMethod::Ffill),
            threshold: 0.8,
            min_occurrences: 2,
            use_dayofmonth_holidays: true,
            use_wkdom_holidays: false,
            use_wkdeom_holidays: false,
            use_lunar_holidays: false,
            use_lunar_weekday: false,
            use_islamic_holidays: false,
            use_hebrew_holidays: false,
            remove_excess_anomalies: false,
            impact,
            regression_params: Some(HolidayRegressionParams {
                regression: RegressionSpec::Linear,
                datepart_method: DatePartMethod::Simple3,
            }),
        }
    }

    /// Three years of daily data with a spike every March 3rd.
    fn spiky_years() -> TimeSeriesFrame {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let n = 1096;
        let index: Vec<_> = (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        let values = Array2::from_shape_fn((n, 1), |(i, _)| {
            let d = index[i];
            if d.month() == 3 && d.day() == 3 {
                40.0
            } else {
                10.0 + (i as f64 / 30.0).sin()
            }
        });
        TimeSeriesFrame::new(index, vec!["a".into()], values).unwrap()
    }

    fn holiday_dates(df: &TimeSeriesFrame) -> Vec<usize> {
        df.index()
            .iter()
            .enumerate()
            .filter_map(|(i, d)| (d.month() == 3 && d.day() == 3).then_some(i))
            .collect()
    }

    #[test]
    fn test_detects_recurring_day_of_month() {
        let df = spiky_years();
        let mut t = HolidayTransformer::new(default_params(HolidayImpact::None)).unwrap();
        t.fit(&df).unwrap();
        let rules = &t.series.as_ref().unwrap()[0].rules;
        assert!(rules.iter().any(|r| matches!(
            &r.key,
            HolidayKey::DayOfMonth { month: 3, day: 3 }
        )));
    }

    #[test]
    fn test_median_value_neutralizes_and_inverts() {
        let df = spiky_years();
        let mut t =
            HolidayTransformer::new(default_params(HolidayImpact::MedianValue)).unwrap();
        let out = t.fit_transform(&df).unwrap();
        for &i in &holiday_dates(&df) {
            assert!(
                out.values()[[i, 0]] < 20.0,
                "holiday value {} not neutralized",
                out.values()[[i, 0]]
            );
        }
        let back = t.inverse_transform(&out, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn test_anomaly_score_roundtrip() {
        let df = spiky_years();
        let mut t =
            HolidayTransformer::new(default_params(HolidayImpact::AnomalyScore)).unwrap();
        let out = t.fit_transform(&df).unwrap();
        let back = t.inverse_transform(&out, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn test_regression_impact_shrinks_holidays() {
        let df = spiky_years();
        let mut t =
            HolidayTransformer::new(default_params(HolidayImpact::Regression)).unwrap();
        let out = t.fit_transform(&df).unwrap();
        for &i in &holiday_dates(&df) {
            assert!(out.values()[[i, 0]] < 25.0);
        }
        let back = t.inverse_transform(&out, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_remove_excess_anomalies_keeps_holidays() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let n = 1096;
        let index: Vec<_> = (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        // recurring holiday spike plus one lone outlier
        let values = Array2::from_shape_fn((n, 1), |(i, _)| {
            let d = index[i];
            if d.month() == 3 && d.day() == 3 {
                40.0
            } else if i == 500 {
                -60.0
            } else {
                10.0
            }
        });
        let df = TimeSeriesFrame::new(index, vec!["a".into()], values).unwrap();
        let mut params = default_params(HolidayImpact::None);
        params.remove_excess_anomalies = true;
        let mut t = HolidayTransformer::new(params).unwrap();
        let out = t.fit_transform(&df).unwrap();
        // lone outlier is scrubbed, the recurring holiday survives
        assert!((out.values()[[500, 0]] - 10.0).abs() < 1e-9);
        let hd = holiday_dates(&df);
        assert!(out.values()[[hd[0], 0]] > 30.0);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut p = default_params(HolidayImpact::None);
        p.threshold = 0.0;
        assert!(HolidayTransformer::new(p).is_err());
    }

    #[test]
    fn test_future_dates_get_flags() {
        let df = spiky_years();
        let mut t =
            HolidayTransformer::new(default_params(HolidayImpact::MedianValue)).unwrap();
        t.fit(&df).unwrap();
        // forecast horizon covering the next March 3rd
        let start = NaiveDate::from_ymd_opt(2023, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let index: Vec<_> = (0..10)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        let zeros = TimeSeriesFrame::new(index, vec!["a".into()], Array2::zeros((10, 1)))
            .unwrap();
        let out = t.inverse_transform(&zeros, InverseMode::Forecast).unwrap();
        // day index 2 is March 3rd; the holiday uplift is re-added there
        assert!(out.values()[[2, 0]] > 10.0);
        assert!(out.values()[[0, 0]].abs() < 1e-9);
    }
}

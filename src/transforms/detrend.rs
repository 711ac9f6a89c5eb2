//! Trend removal: regression on time, periodic-signal fitting, local
//! linear trends, and regression on calendar features.

use crate::error::{ForgeError, Result};
use crate::frame::TimeSeriesFrame;
use crate::linalg;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::regression::{Regressor, RegressionSpec, TheilSenRegressor};
use crate::seasonal::{date_part, DatePartMethod};
use crate::transforms::{CenterStat, InverseMode, Transform};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

/// Column count above which per-series fits fan out over rayon.
const PARALLEL_COLUMN_THRESHOLD: usize = 100;

fn pre_cleaned(df: &TimeSeriesFrame, cfg: &Option<PipelineConfig>) -> Result<TimeSeriesFrame> {
    match cfg {
        Some(cfg) => {
            let mut pipeline = Pipeline::from_config(cfg.clone())?;
            pipeline.fit_transform(df)
        }
        None => Ok(df.clone()),
    }
}

/// Trend model choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetrendModel {
    /// Straight line through the origin of the fit window.
    Gls,
    /// Straight line with intercept.
    Linear,
    /// Robust median-slope line.
    TheilSen,
}

enum FittedTrend {
    NoIntercept(Array1<f64>),
    Model(Box<dyn Regressor>),
}

/// Subtract a regression of each series on elapsed time. `phi` dampens the
/// re-added trend on the inverse (`phi^step`, starting at the first output
/// row); `window` restricts the fit to the most recent rows.
pub struct Detrend {
    model: DetrendModel,
    phi: f64,
    window: Option<usize>,
    pre_clean: Option<PipelineConfig>,
    fitted: Option<FittedTrend>,
    origin_secs: Option<f64>,
}

impl Detrend {
    pub fn new(
        model: DetrendModel,
        phi: f64,
        window: Option<usize>,
        pre_clean: Option<PipelineConfig>,
    ) -> Result<Self> {
        if !(phi > 0.0 && phi <= 1.0) {
            return Err(ForgeError::InvalidParameter(format!(
                "detrend phi must be in (0, 1], got {phi}"
            )));
        }
        if window == Some(0) {
            return Err(ForgeError::InvalidParameter(
                "detrend window must be nonzero".into(),
            ));
        }
        Ok(Self {
            model,
            phi,
            window,
            pre_clean,
            fitted: None,
            origin_secs: None,
        })
    }

    /// Elapsed days since the fit origin, as the regression design.
    fn design(&self, df: &TimeSeriesFrame) -> Result<Array2<f64>> {
        let origin = self.origin_secs.ok_or(ForgeError::NotFitted("Detrend"))?;
        let secs = df.epoch_seconds();
        let mut x = Array2::zeros((df.nrows(), 1));
        for (i, &s) in secs.iter().enumerate() {
            x[[i, 0]] = (s - origin) / 86_400.0;
        }
        Ok(x)
    }

    fn prediction(&self, df: &TimeSeriesFrame) -> Result<Array2<f64>> {
        let x = self.design(df)?;
        match self.fitted.as_ref().ok_or(ForgeError::NotFitted("Detrend"))? {
            FittedTrend::NoIntercept(slopes) => {
                let mut out = Array2::zeros((x.nrows(), slopes.len()));
                for i in 0..x.nrows() {
                    for (j, &s) in slopes.iter().enumerate() {
                        out[[i, j]] = s * x[[i, 0]];
                    }
                }
                Ok(out)
            }
            FittedTrend::Model(model) => model.predict(&x),
        }
    }
}

impl Transform for Detrend {
    fn name(&self) -> &'static str {
        "Detrend"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let cleaned = pre_cleaned(df, &self.pre_clean)?;
        let fit_df = match self.window {
            Some(w) => cleaned.tail(w),
            None => cleaned,
        };
        if fit_df.nrows() < 2 {
            return Err(ForgeError::InvalidParameter(
                "detrend needs at least two rows".into(),
            ));
        }
        self.origin_secs = Some(
            fit_df.index()[0].and_utc().timestamp() as f64,
        );
        let x = self.design(&fit_df)?;
        let y = fit_df.values();

        self.fitted = Some(match self.model {
            DetrendModel::Gls => {
                let mut slopes = Array1::zeros(y.ncols());
                let sxx: f64 = x.column(0).iter().map(|v| v * v).sum();
                for (j, col) in y.axis_iter(Axis(1)).enumerate() {
                    let sxy: f64 = x
                        .column(0)
                        .iter()
                        .zip(col.iter())
                        .filter(|(_, v)| !v.is_nan())
                        .map(|(t, v)| t * v)
                        .sum();
                    slopes[j] = if sxx > 0.0 { sxy / sxx } else { 0.0 };
                }
                FittedTrend::NoIntercept(slopes)
            }
            DetrendModel::Linear => {
                let mut model: Box<dyn Regressor> =
                    Box::new(crate::regression::LinearRegressor::default());
                model.fit(&x, &y.to_owned())?;
                FittedTrend::Model(model)
            }
            DetrendModel::TheilSen => {
                let mut model: Box<dyn Regressor> = Box::new(TheilSenRegressor::default());
                model.fit(&x, &y.to_owned())?;
                FittedTrend::Model(model)
            }
        });
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let trend = self.prediction(df)?;
        df.with_values(df.values() - &trend)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let mut trend = self.prediction(df)?;
        if self.phi < 1.0 {
            let mut damp = 1.0;
            for mut row in trend.axis_iter_mut(Axis(0)) {
                row.mapv_inplace(|v| v * damp);
                damp *= self.phi;
            }
        }
        df.with_values(df.values() + &trend)
    }
}

/// Per-column sine parameters.
#[derive(Debug, Clone, Copy)]
struct SineParams {
    amp: f64,
    omega: f64,
    phase: f64,
}

/// Subtract a fitted sinusoid from each series. The dominant frequency
/// comes from the FFT magnitude spectrum; amplitude and phase are then an
/// exact linear fit at that frequency. The constant offset is left in the
/// series so only the oscillation is removed.
#[derive(Default)]
pub struct SinTrend {
    params: Option<Vec<SineParams>>,
    origin_secs: Option<f64>,
}

impl SinTrend {
    fn elapsed(&self, df: &TimeSeriesFrame) -> Result<Vec<f64>> {
        let origin = self.origin_secs.ok_or(ForgeError::NotFitted("SinTrend"))?;
        Ok(df
            .epoch_seconds()
            .iter()
            .map(|&s| s - origin)
            .collect())
    }

    fn sine(&self, df: &TimeSeriesFrame) -> Result<Array2<f64>> {
        let params = self.params.as_ref().ok_or(ForgeError::NotFitted("SinTrend"))?;
        if params.len() != df.ncols() {
            return Err(ForgeError::ShapeMismatch(
                "sine trend fitted on a different column count".into(),
            ));
        }
        let t = self.elapsed(df)?;
        let mut out = Array2::zeros((df.nrows(), df.ncols()));
        for (j, p) in params.iter().enumerate() {
            for (i, &ti) in t.iter().enumerate() {
                out[[i, j]] = p.amp * (p.omega * ti + p.phase).sin();
            }
        }
        Ok(out)
    }
}

fn fit_sine(t: &[f64], y: &[f64]) -> SineParams {
    let n = y.len();
    let mean = y.iter().sum::<f64>() / n as f64;

    // dominant frequency from the magnitude spectrum, skipping the DC bin
    let mut buf: Vec<Complex64> = y.iter().map(|&v| Complex64::new(v - mean, 0.0)).collect();
    FftPlanner::new().plan_fft_forward(n).process(&mut buf);
    let dt = if n > 1 { (t[1] - t[0]).max(1e-9) } else { 1.0 };
    let mut best_k = 1usize;
    let mut best_mag = 0.0;
    for (k, c) in buf.iter().enumerate().take(n / 2).skip(1) {
        if c.norm() > best_mag {
            best_mag = c.norm();
            best_k = k;
        }
    }
    let freq = best_k as f64 / (n as f64 * dt);
    let omega = 2.0 * std::f64::consts::PI * freq;

    // exact linear fit of a*sin + b*cos + c at the fixed frequency
    let mut design = Array2::zeros((n, 3));
    for (i, &ti) in t.iter().enumerate() {
        design[[i, 0]] = (omega * ti).sin();
        design[[i, 1]] = (omega * ti).cos();
        design[[i, 2]] = 1.0;
    }
    let target = Array2::from_shape_fn((n, 1), |(i, _)| y[i]);
    match linalg::lstsq(&design, &target) {
        Ok(beta) => {
            let (a, b) = (beta[[0, 0]], beta[[1, 0]]);
            SineParams {
                amp: (a * a + b * b).sqrt(),
                omega,
                phase: b.atan2(a),
            }
        }
        Err(_) => SineParams {
            amp: 0.0,
            omega,
            phase: 0.0,
        },
    }
}

impl Transform for SinTrend {
    fn name(&self) -> &'static str {
        "SinTrend"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.nrows() < 4 {
            return Err(ForgeError::InvalidParameter(
                "sine fitting needs at least four rows".into(),
            ));
        }
        self.origin_secs = Some(df.index()[0].and_utc().timestamp() as f64);
        let t = self.elapsed(df)?;
        let columns: Vec<Vec<f64>> = (0..df.ncols())
            .map(|j| {
                df.values()
                    .column(j)
                    .iter()
                    .map(|&v| if v.is_nan() { 0.0 } else { v })
                    .collect()
            })
            .collect();
        let params: Vec<SineParams> = if df.ncols() >= PARALLEL_COLUMN_THRESHOLD {
            columns.par_iter().map(|col| fit_sine(&t, col)).collect()
        } else {
            columns.iter().map(|col| fit_sine(&t, col)).collect()
        };
        self.params = Some(params);
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let sine = self.sine(df)?;
        df.with_values(df.values() - &sine)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let sine = self.sine(df)?;
        df.with_values(df.values() + &sine)
    }
}

/// Piecewise linear trend from a centered rolling regression. Lookup
/// beyond the fit support extends the edge segments, so forecasts get the
/// most recent local slope.
pub struct LocalLinearTrend {
    rolling_window: f64,
    n_future: f64,
    method: CenterStat,
    full_dates: Option<Vec<f64>>,
    full_slope: Option<Array2<f64>>,
    full_intercept: Option<Array2<f64>>,
}

impl LocalLinearTrend {
    pub fn new(rolling_window: f64, n_future: f64, method: CenterStat) -> Result<Self> {
        if !(rolling_window > 0.0) || !(n_future > 0.0) {
            return Err(ForgeError::InvalidParameter(
                "local linear trend windows must be positive".into(),
            ));
        }
        Ok(Self {
            rolling_window,
            n_future,
            method,
            full_dates: None,
            full_slope: None,
            full_intercept: None,
        })
    }

    fn resolve(fraction_or_count: f64, n: usize) -> usize {
        let raw = if fraction_or_count < 1.0 {
            (fraction_or_count * n as f64) as usize
        } else {
            fraction_or_count as usize
        };
        raw.clamp(2, n.max(2))
    }

    fn lookup(&self, dates: &[f64]) -> Result<(Vec<usize>, &Array2<f64>, &Array2<f64>)> {
        let full_dates = self
            .full_dates
            .as_ref()
            .ok_or(ForgeError::NotFitted("LocalLinearTrend"))?;
        let slope = self.full_slope.as_ref().unwrap();
        let intercept = self.full_intercept.as_ref().unwrap();
        let idx = dates
            .iter()
            .map(|&d| full_dates.partition_point(|&x| x < d))
            .collect();
        Ok((idx, slope, intercept))
    }

    fn trend(&self, df: &TimeSeriesFrame) -> Result<Array2<f64>> {
        let julian: Vec<f64> = df.julian_dates().to_vec();
        let (idx, slope, intercept) = self.lookup(&julian)?;
        let k = slope.ncols();
        if k != df.ncols() {
            return Err(ForgeError::ShapeMismatch(
                "local trend fitted on a different column count".into(),
            ));
        }
        let mut out = Array2::zeros((df.nrows(), k));
        for (i, (&d, &row)) in julian.iter().zip(idx.iter()).enumerate() {
            for j in 0..k {
                out[[i, j]] = slope[[row, j]] * d + intercept[[row, j]];
            }
        }
        Ok(out)
    }
}

impl Transform for LocalLinearTrend {
    fn name(&self) -> &'static str {
        "LocalLinearTrend"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let n = df.nrows();
        if n < 4 {
            return Err(ForgeError::InvalidParameter(
                "local linear trend needs at least four rows".into(),
            ));
        }
        let w = Self::resolve(self.rolling_window, n);
        let nf = Self::resolve(self.n_future, n).min(n);
        let julian: Vec<f64> = df.julian_dates().to_vec();
        let k = df.ncols();
        let half = w / 2;

        let mut slope = Array2::zeros((n, k));
        let mut intercept = Array2::zeros((n, k));
        for j in 0..k {
            for r in 0..n {
                let lo = r.saturating_sub(half);
                let hi = (r + half + 1).min(n);
                let xs = &julian[lo..hi];
                let xm = xs.iter().sum::<f64>() / xs.len() as f64;
                let (mut sxy, mut sxx, mut ym, mut cnt) = (0.0, 0.0, 0.0, 0usize);
                for (off, &x) in xs.iter().enumerate() {
                    let y = df.values()[[lo + off, j]];
                    if y.is_nan() {
                        continue;
                    }
                    ym += y;
                    cnt += 1;
                }
                if cnt == 0 {
                    continue;
                }
                ym /= cnt as f64;
                for (off, &x) in xs.iter().enumerate() {
                    let y = df.values()[[lo + off, j]];
                    if y.is_nan() {
                        continue;
                    }
                    sxy += (x - xm) * (y - ym);
                    sxx += (x - xm) * (x - xm);
                }
                let s = if sxx > 0.0 { sxy / sxx } else { 0.0 };
                slope[[r, j]] = s;
                intercept[[r, j]] = ym - s * xm;
            }
        }

        // edge segments: a summarized leading slope before the support and
        // the mean trailing slope extended past it twice (one for the gap
        // guard date, one for everything beyond)
        let summarize = |vals: &Array2<f64>, range: std::ops::Range<usize>| -> Array1<f64> {
            let window = vals.slice(ndarray::s![range, ..]);
            match self.method {
                CenterStat::Median => {
                    let mut out = Array1::zeros(k);
                    for j in 0..k {
                        let mut v: Vec<f64> = window.column(j).to_vec();
                        v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                        out[j] = v[v.len() / 2];
                    }
                    out
                }
                _ => window.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(k)),
            }
        };
        let lead_slope = summarize(&slope, 0..nf);
        let lead_intercept = summarize(&intercept, 0..nf);
        let tail_slope = slope
            .slice(ndarray::s![n - nf.., ..])
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(k));
        let tail_intercept = intercept
            .slice(ndarray::s![n - nf.., ..])
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(k));

        let mut full_slope = Array2::zeros((n + 3, k));
        let mut full_intercept = Array2::zeros((n + 3, k));
        full_slope.row_mut(0).assign(&lead_slope);
        full_intercept.row_mut(0).assign(&lead_intercept);
        full_slope.slice_mut(ndarray::s![1..=n, ..]).assign(&slope);
        full_intercept
            .slice_mut(ndarray::s![1..=n, ..])
            .assign(&intercept);
        for r in [n + 1, n + 2] {
            full_slope.row_mut(r).assign(&tail_slope);
            full_intercept.row_mut(r).assign(&tail_intercept);
        }

        let mut full_dates = Vec::with_capacity(n + 2);
        full_dates.push(julian[0] - 0.01);
        full_dates.extend_from_slice(&julian);
        full_dates.push(julian[n - 1] + 0.01);

        self.full_dates = Some(full_dates);
        self.full_slope = Some(full_slope);
        self.full_intercept = Some(full_intercept);
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let trend = self.trend(df)?;
        df.with_values(df.values() - &trend)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let trend = self.trend(df)?;
        df.with_values(df.values() + &trend)
    }
}

/// Subtract a regression of values on `date_part` calendar features.
pub struct DatepartRegression {
    regression: RegressionSpec,
    datepart_method: DatePartMethod,
    pre_clean: Option<PipelineConfig>,
    model: Option<Box<dyn Regressor>>,
}

impl DatepartRegression {
    pub fn new(
        regression: RegressionSpec,
        datepart_method: DatePartMethod,
        pre_clean: Option<PipelineConfig>,
    ) -> Self {
        Self {
            regression,
            datepart_method,
            pre_clean,
            model: None,
        }
    }

    fn features(&self, df: &TimeSeriesFrame) -> Array2<f64> {
        date_part(df.index(), self.datepart_method).1
    }

    fn prediction(&self, df: &TimeSeriesFrame) -> Result<Array2<f64>> {
        let model = self
            .model
            .as_ref()
            .ok_or(ForgeError::NotFitted("DatepartRegression"))?;
        model.predict(&self.features(df))
    }
}

impl Transform for DatepartRegression {
    fn name(&self) -> &'static str {
        "DatepartRegression"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let cleaned = pre_cleaned(df, &self.pre_clean)?;
        let x = self.features(&cleaned);
        let y = cleaned.values().mapv(|v| if v.is_nan() { 0.0 } else { v });
        let mut model = self.regression.build();
        model.fit(&x, &y)?;
        self.model = Some(model);
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let pred = self.prediction(df)?;
        df.with_values(df.values() - &pred)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let pred = self.prediction(df)?;
        df.with_values(df.values() + &pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn frame_from(values: Vec<f64>) -> TimeSeriesFrame {
        let rows = values.len();
        let index = (0..rows)
            .map(|i| {
                NaiveDate::from_ymd_opt(2022, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    + chrono::Duration::days(i as i64)
            })
            .collect();
        TimeSeriesFrame::new(
            index,
            vec!["a".into()],
            Array2::from_shape_vec((rows, 1), values).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_linear_detrend_flattens_line() {
        let df = frame_from((0..30).map(|i| 5.0 + 2.0 * i as f64).collect());
        let mut t = Detrend::new(DetrendModel::Linear, 1.0, None, None).unwrap();
        let out = t.fit_transform(&df).unwrap();
        for v in out.values().iter() {
            assert!(v.abs() < 1e-6, "residual {v}");
        }
        let back = t.inverse_transform(&out, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_theilsen_detrend_resists_outlier() {
        let mut vals: Vec<f64> = (0..40).map(|i| 1.0 + 0.5 * i as f64).collect();
        vals[20] = 1000.0;
        let df = frame_from(vals);
        let mut t = Detrend::new(DetrendModel::TheilSen, 1.0, None, None).unwrap();
        let out = t.fit_transform(&df).unwrap();
        assert!(out.values()[[39, 0]].abs() < 1.0);
    }

    #[test]
    fn test_detrend_phi_dampens_inverse() {
        let df = frame_from((0..20).map(|i| i as f64).collect());
        let mut t = Detrend::new(DetrendModel::Linear, 0.5, None, None).unwrap();
        let fwd = t.fit_transform(&df).unwrap();
        let back = t.inverse_transform(&fwd, InverseMode::Forecast).unwrap();
        // damped trend re-addition undershoots an undamped one
        assert!(back.values()[[19, 0]] < df.values()[[19, 0]]);
    }

    #[test]
    fn test_sin_trend_removes_oscillation() {
        let n = 128;
        let vals: Vec<f64> = (0..n)
            .map(|i| 10.0 + 3.0 * (2.0 * std::f64::consts::PI * i as f64 / 16.0).sin())
            .collect();
        let df = frame_from(vals);
        let mut t = SinTrend::default();
        let out = t.fit_transform(&df).unwrap();
        let std_before = df.col_std()[0];
        let std_after = out.col_std()[0];
        assert!(std_after < std_before * 0.2, "{std_after} vs {std_before}");
        let back = t.inverse_transform(&out, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_local_linear_trend_roundtrip_and_extension() {
        let df = frame_from((0..60).map(|i| 2.0 * i as f64).collect());
        let mut t = LocalLinearTrend::new(0.2, 0.2, CenterStat::Mean).unwrap();
        let fwd = t.fit_transform(&df).unwrap();
        for v in fwd.values().iter() {
            assert!(v.abs() < 1e-6);
        }
        // future dates pick up the trailing slope
        let future_index: Vec<_> = (60..70)
            .map(|i| {
                NaiveDate::from_ymd_opt(2022, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    + chrono::Duration::days(i)
            })
            .collect();
        let zeros =
            TimeSeriesFrame::new(future_index, vec!["a".into()], Array2::zeros((10, 1)))
                .unwrap();
        let out = t.inverse_transform(&zeros, InverseMode::Forecast).unwrap();
        for (i, v) in out.values().column(0).iter().enumerate() {
            let expected = 2.0 * (60 + i) as f64;
            assert!((v - expected).abs() < 0.5, "{v} vs {expected}");
        }
    }

    #[test]
    fn test_datepart_regression_removes_weekly_pattern() {
        let vals: Vec<f64> = (0..84).map(|i| if i % 7 == 0 { 10.0 } else { 2.0 }).collect();
        let df = frame_from(vals);
        let mut t = DatepartRegression::new(
            RegressionSpec::Linear,
            DatePartMethod::SimpleBinarized,
            None,
        );
        let out = t.fit_transform(&df).unwrap();
        assert!(out.col_std()[0] < df.col_std()[0] * 0.2);
        let back = t.inverse_transform(&out, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}

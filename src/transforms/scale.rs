//! Per-column scaling transforms with exact inverses.

use crate::error::{ForgeError, Result};
use crate::frame::TimeSeriesFrame;
use crate::transforms::{InverseMode, Transform};
use ndarray::Array1;

fn scale_frame(
    df: &TimeSeriesFrame,
    shift: &Array1<f64>,
    scale: &Array1<f64>,
) -> Result<TimeSeriesFrame> {
    let mut values = df.values().clone();
    for ((i, j), v) in values.indexed_iter_mut() {
        let _ = i;
        *v = (*v - shift[j]) / scale[j];
    }
    df.with_values(values)
}

fn unscale_frame(
    df: &TimeSeriesFrame,
    shift: &Array1<f64>,
    scale: &Array1<f64>,
) -> Result<TimeSeriesFrame> {
    let mut values = df.values().clone();
    for ((_, j), v) in values.indexed_iter_mut() {
        *v = *v * scale[j] + shift[j];
    }
    df.with_values(values)
}

fn nonzero(v: f64) -> f64 {
    if v.abs() < 1e-12 || v.is_nan() {
        1.0
    } else {
        v
    }
}

fn check_width(df: &TimeSeriesFrame, shift: &Array1<f64>) -> Result<()> {
    if df.ncols() != shift.len() {
        return Err(ForgeError::ShapeMismatch(format!(
            "fitted on {} columns, given {}",
            shift.len(),
            df.ncols()
        )));
    }
    Ok(())
}

/// Scale each column to `[0, 1]` over the fit range.
#[derive(Debug, Clone, Default)]
pub struct MinMaxScaler {
    state: Option<(Array1<f64>, Array1<f64>)>,
}

impl Transform for MinMaxScaler {
    fn name(&self) -> &'static str {
        "MinMaxScaler"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let min = df.col_min();
        let max = df.map(|v| -v).col_min().mapv(|v| -v);
        let range = (&max - &min).mapv(nonzero);
        self.state = Some((min, range));
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let (min, range) = self
            .state
            .as_ref()
            .ok_or(ForgeError::NotFitted("MinMaxScaler"))?;
        check_width(df, min)?;
        scale_frame(df, min, range)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let (min, range) = self
            .state
            .as_ref()
            .ok_or(ForgeError::NotFitted("MinMaxScaler"))?;
        check_width(df, min)?;
        unscale_frame(df, min, range)
    }
}

/// Center to zero mean, scale to unit standard deviation.
#[derive(Debug, Clone, Default)]
pub struct StandardScaler {
    state: Option<(Array1<f64>, Array1<f64>)>,
}

impl Transform for StandardScaler {
    fn name(&self) -> &'static str {
        "StandardScaler"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let mean = df.col_mean();
        let std = df.col_std().mapv(nonzero);
        self.state = Some((mean, std));
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let (mean, std) = self
            .state
            .as_ref()
            .ok_or(ForgeError::NotFitted("StandardScaler"))?;
        check_width(df, mean)?;
        scale_frame(df, mean, std)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let (mean, std) = self
            .state
            .as_ref()
            .ok_or(ForgeError::NotFitted("StandardScaler"))?;
        check_width(df, mean)?;
        unscale_frame(df, mean, std)
    }
}

/// Divide each column by its maximum absolute value.
#[derive(Debug, Clone, Default)]
pub struct MaxAbsScaler {
    scale: Option<Array1<f64>>,
}

impl Transform for MaxAbsScaler {
    fn name(&self) -> &'static str {
        "MaxAbsScaler"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let max_abs = df.map(|v| -v.abs()).col_min().mapv(|v| nonzero(-v));
        self.scale = Some(max_abs);
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let scale = self
            .scale
            .as_ref()
            .ok_or(ForgeError::NotFitted("MaxAbsScaler"))?;
        check_width(df, scale)?;
        let zeros = Array1::zeros(scale.len());
        scale_frame(df, &zeros, scale)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let scale = self
            .scale
            .as_ref()
            .ok_or(ForgeError::NotFitted("MaxAbsScaler"))?;
        check_width(df, scale)?;
        let zeros = Array1::zeros(scale.len());
        unscale_frame(df, &zeros, scale)
    }
}

/// Center on the median, scale by the interquartile range.
#[derive(Debug, Clone, Default)]
pub struct RobustScaler {
    state: Option<(Array1<f64>, Array1<f64>)>,
}

impl Transform for RobustScaler {
    fn name(&self) -> &'static str {
        "RobustScaler"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let median = df.col_median();
        let iqr = (&df.col_quantile(0.75) - &df.col_quantile(0.25)).mapv(nonzero);
        self.state = Some((median, iqr));
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let (median, iqr) = self
            .state
            .as_ref()
            .ok_or(ForgeError::NotFitted("RobustScaler"))?;
        check_width(df, median)?;
        scale_frame(df, median, iqr)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let (median, iqr) = self
            .state
            .as_ref()
            .ok_or(ForgeError::NotFitted("RobustScaler"))?;
        check_width(df, median)?;
        unscale_frame(df, median, iqr)
    }
}

/// Shift each column into positive territory, optionally squaring and
/// taking the natural log. The log configuration shifts so the minimum is
/// at least one.
#[derive(Debug, Clone)]
pub struct PositiveShift {
    log: bool,
    center_one: bool,
    squared: bool,
    shift: Option<Array1<f64>>,
}

impl PositiveShift {
    pub fn new(log: bool, center_one: bool, squared: bool) -> Self {
        Self {
            log,
            center_one,
            squared,
            shift: None,
        }
    }
}

impl Transform for PositiveShift {
    fn name(&self) -> &'static str {
        if self.log {
            "Log"
        } else {
            "PositiveShift"
        }
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let min = df.col_min();
        let floor_one = self.center_one || self.log;
        let shift = min.mapv(|m| {
            if m.is_infinite() || m.is_nan() {
                0.0
            } else if floor_one && m < 1.0 {
                1.0 - m
            } else if !floor_one && m < 0.0 {
                -m
            } else {
                0.0
            }
        });
        self.shift = Some(shift);
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let shift = self
            .shift
            .as_ref()
            .ok_or(ForgeError::NotFitted("PositiveShift"))?;
        check_width(df, shift)?;
        let mut values = df.values().clone();
        for ((_, j), v) in values.indexed_iter_mut() {
            let mut x = *v + shift[j];
            if self.squared {
                x = x * x;
            }
            if self.log {
                x = x.ln();
            }
            *v = x;
        }
        df.with_values(values)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let shift = self
            .shift
            .as_ref()
            .ok_or(ForgeError::NotFitted("PositiveShift"))?;
        check_width(df, shift)?;
        let mut values = df.values().clone();
        for ((_, j), v) in values.indexed_iter_mut() {
            let mut x = *v;
            if self.log {
                x = x.exp();
            }
            if self.squared {
                x = x.abs().sqrt();
            }
            *v = x - shift[j];
        }
        df.with_values(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TimeSeriesFrame;
    use chrono::NaiveDate;
    use ndarray::Array2;

    fn frame(values: Vec<f64>, cols: usize) -> TimeSeriesFrame {
        let rows = values.len() / cols;
        let index = (0..rows)
            .map(|i| {
                NaiveDate::from_ymd_opt(2023, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    + chrono::Duration::days(i as i64)
            })
            .collect();
        let names = (0..cols).map(|j| format!("s{j}")).collect();
        TimeSeriesFrame::new(
            index,
            names,
            Array2::from_shape_vec((rows, cols), values).unwrap(),
        )
        .unwrap()
    }

    fn assert_roundtrip(mut t: impl Transform, df: &TimeSeriesFrame) {
        let fwd = t.fit_transform(df).unwrap();
        let back = t.inverse_transform(&fwd, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }

    #[test]
    fn test_minmax_range_and_roundtrip() {
        let df = frame(vec![2.0, 4.0, 6.0, 8.0, 10.0], 1);
        let mut s = MinMaxScaler::default();
        let out = s.fit_transform(&df).unwrap();
        assert_eq!(out.values()[[0, 0]], 0.0);
        assert_eq!(out.values()[[4, 0]], 1.0);
        assert_roundtrip(MinMaxScaler::default(), &df);
    }

    #[test]
    fn test_standard_zero_mean() {
        let df = frame(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2);
        let mut s = StandardScaler::default();
        let out = s.fit_transform(&df).unwrap();
        let means = out.col_mean();
        assert!(means[0].abs() < 1e-10);
        assert!(means[1].abs() < 1e-10);
        assert_roundtrip(StandardScaler::default(), &df);
    }

    #[test]
    fn test_maxabs_and_robust_roundtrip() {
        let df = frame(vec![-4.0, 1.0, 3.0, -2.0, 8.0, 0.5], 1);
        assert_roundtrip(MaxAbsScaler::default(), &df);
        assert_roundtrip(RobustScaler::default(), &df);
    }

    #[test]
    fn test_constant_column_is_safe() {
        let df = frame(vec![5.0, 5.0, 5.0], 1);
        let mut s = MinMaxScaler::default();
        let out = s.fit_transform(&df).unwrap();
        assert!(out.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_log_shifts_negatives() {
        let df = frame(vec![-3.0, 0.0, 4.0, 9.0], 1);
        let mut t = PositiveShift::new(true, true, false);
        let out = t.fit_transform(&df).unwrap();
        assert!(out.values().iter().all(|v| v.is_finite()));
        assert_roundtrip(PositiveShift::new(true, true, false), &df);
        assert_roundtrip(PositiveShift::new(false, false, true), &df);
    }

    #[test]
    fn test_transform_before_fit_errors() {
        let df = frame(vec![1.0, 2.0], 1);
        assert!(StandardScaler::default().transform(&df).is_err());
    }
}

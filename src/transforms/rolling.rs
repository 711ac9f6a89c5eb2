//! Rolling and exponentially weighted smoothers.

use crate::error::{ForgeError, Result};
use crate::frame::TimeSeriesFrame;
use crate::transforms::{InverseMode, Transform};
use ndarray::{Array1, Array2};

fn rolling_mean(x: &Array2<f64>, window: usize) -> Array2<f64> {
    let (n, k) = (x.nrows(), x.ncols());
    let mut out = Array2::from_elem((n, k), f64::NAN);
    for j in 0..k {
        for i in 0..n {
            let start = i.saturating_sub(window - 1);
            let (mut sum, mut cnt) = (0.0, 0usize);
            for r in start..=i {
                let v = x[[r, j]];
                if !v.is_nan() {
                    sum += v;
                    cnt += 1;
                }
            }
            if cnt > 0 {
                out[[i, j]] = sum / cnt as f64;
            }
        }
    }
    out
}

/// Rolling mean with a minimum period of one. With `fixed` the inverse is
/// the identity (the smoothing is kept); otherwise the inverse unwinds the
/// mean sequentially from stored edge rows.
#[derive(Debug, Clone)]
pub struct RollingMean {
    window: usize,
    fixed: bool,
    first_values: Option<Array2<f64>>,
    last_values: Option<Array2<f64>>,
    last_rolling: Option<Array1<f64>>,
}

impl RollingMean {
    pub fn new(window: usize, fixed: bool) -> Result<Self> {
        if window < 2 {
            return Err(ForgeError::InvalidParameter(
                "rolling mean window must be at least 2".into(),
            ));
        }
        Ok(Self {
            window,
            fixed,
            first_values: None,
            last_values: None,
            last_rolling: None,
        })
    }
}

impl Transform for RollingMean {
    fn name(&self) -> &'static str {
        "RollingMeanTransformer"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.nrows() < self.window + 1 {
            return Err(ForgeError::InvalidParameter(format!(
                "rolling window {} needs more than {} rows",
                self.window,
                df.nrows()
            )));
        }
        let filled = df.ffill().bfill();
        self.first_values = Some(filled.head(self.window).into_values());
        self.last_values = Some(filled.tail(self.window).into_values());
        let rolled = rolling_mean(filled.values(), self.window);
        self.last_rolling = Some(rolled.row(rolled.nrows() - 1).to_owned());
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if self.last_values.is_none() {
            return Err(ForgeError::NotFitted("RollingMeanTransformer"));
        }
        df.with_values(rolling_mean(df.values(), self.window))
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        if self.fixed {
            return Ok(df.clone());
        }
        let last_values = self
            .last_values
            .as_ref()
            .ok_or(ForgeError::NotFitted("RollingMeanTransformer"))?;
        let first_values = self.first_values.as_ref().unwrap();
        let last_rolling = self.last_rolling.as_ref().unwrap();
        let x = df.values();
        let (n, k) = (x.nrows(), x.ncols());
        let w = self.window as f64;

        match mode {
            InverseMode::Forecast => {
                // rolling[t]*w - rolling[t-1]*w recovers the step between
                // the entering value and the one that left the window
                let mut staged = last_values.clone();
                for i in 0..n {
                    let mut row = Array1::zeros(k);
                    for j in 0..k {
                        let prev = if i == 0 { last_rolling[j] } else { x[[i - 1, j]] };
                        let diffed = (x[[i, j]] - prev) * w;
                        row[j] = diffed + staged[[i, j]];
                    }
                    staged = grow(staged, &row);
                }
                let out = staged.slice(ndarray::s![staged.nrows() - n.., ..]).to_owned();
                df.with_values(out)
            }
            InverseMode::Original => {
                if n < self.window {
                    return Err(ForgeError::ShapeMismatch(
                        "original inverse needs at least one full window".into(),
                    ));
                }
                let mut staged = first_values.clone();
                for i in self.window..n {
                    let mut row = Array1::zeros(k);
                    for j in 0..k {
                        let diffed = (x[[i, j]] - x[[i - 1, j]]) * w;
                        row[j] = diffed + staged[[i - self.window, j]];
                    }
                    staged = grow(staged, &row);
                }
                df.with_values(staged)
            }
        }
    }
}

fn grow(staged: Array2<f64>, row: &Array1<f64>) -> Array2<f64> {
    let (n, k) = (staged.nrows(), staged.ncols());
    let mut out = Array2::zeros((n + 1, k));
    out.slice_mut(ndarray::s![..n, ..]).assign(&staged);
    out.row_mut(n).assign(row);
    out
}

/// Exponentially weighted mean with pandas-style adjusted weighting.
#[derive(Debug, Clone)]
pub struct EwmaFilter {
    span: usize,
}

impl EwmaFilter {
    pub fn new(span: usize) -> Result<Self> {
        if span < 2 {
            return Err(ForgeError::InvalidParameter(
                "ewma span must be at least 2".into(),
            ));
        }
        Ok(Self { span })
    }
}

impl Transform for EwmaFilter {
    fn name(&self) -> &'static str {
        "EWMAFilter"
    }

    fn fit(&mut self, _df: &TimeSeriesFrame) -> Result<()> {
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let alpha = 2.0 / (self.span as f64 + 1.0);
        let decay = 1.0 - alpha;
        let x = df.values();
        let (n, k) = (x.nrows(), x.ncols());
        let mut out = Array2::from_elem((n, k), f64::NAN);
        for j in 0..k {
            let mut num = 0.0;
            let mut den = 0.0;
            for i in 0..n {
                num *= decay;
                den *= decay;
                let v = x[[i, j]];
                if !v.is_nan() {
                    num += v;
                    den += 1.0;
                }
                if den > 0.0 {
                    out[[i, j]] = num / den;
                }
            }
        }
        df.with_values(out)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        Ok(df.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

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

    #[test]
    fn test_rolling_mean_values() {
        let df = frame(vec![1.0, 2.0, 3.0, 4.0, 5.0], 1);
        let mut t = RollingMean::new(3, false).unwrap();
        let out = t.fit_transform(&df).unwrap();
        assert!((out.values()[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((out.values()[[1, 0]] - 1.5).abs() < 1e-12);
        assert!((out.values()[[4, 0]] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_rolling_mean_original_roundtrip() {
        let df = frame(vec![2.0, 4.0, 3.0, 7.0, 5.0, 6.0, 8.0, 4.0], 1);
        let mut t = RollingMean::new(3, false).unwrap();
        let fwd = t.fit_transform(&df).unwrap();
        let back = t.inverse_transform(&fwd, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }

    #[test]
    fn test_rolling_mean_fixed_inverse_is_identity() {
        let df = frame(vec![1.0, 2.0, 3.0, 4.0, 5.0], 1);
        let mut t = RollingMean::new(3, true).unwrap();
        let fwd = t.fit_transform(&df).unwrap();
        let back = t.inverse_transform(&fwd, InverseMode::Forecast).unwrap();
        assert_eq!(back.values(), fwd.values());
    }

    #[test]
    fn test_rolling_mean_forecast_flat_continuation() {
        // history is constant, a flat smoothed forecast inverts to constant
        let df = frame(vec![5.0; 10], 1);
        let mut t = RollingMean::new(3, false).unwrap();
        t.fit(&df).unwrap();
        let smoothed = frame(vec![5.0; 4], 1);
        let out = t
            .inverse_transform(&smoothed, InverseMode::Forecast)
            .unwrap();
        for v in out.values().iter() {
            assert!((v - 5.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_ewma_converges_to_constant() {
        let df = frame(vec![3.0; 20], 1);
        let mut t = EwmaFilter::new(5).unwrap();
        let out = t.fit_transform(&df).unwrap();
        for v in out.values().iter() {
            assert!((v - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_ewma_first_row_passthrough() {
        let df = frame(vec![7.0, 1.0, 1.0], 1);
        let mut t = EwmaFilter::new(3).unwrap();
        let out = t.fit_transform(&df).unwrap();
        assert!((out.values()[[0, 0]] - 7.0).abs() < 1e-12);
        assert!(out.values()[[2, 0]] < 7.0);
    }
}

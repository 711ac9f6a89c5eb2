//! Forecast alignment to the most recent history.

use crate::error::{ForgeError, Result};
use crate::frame::TimeSeriesFrame;
use crate::transforms::{AlignMethod, InverseMode, Transform};
use ndarray::Array1;

/// No-op on the forward pass; the forecast-mode inverse shifts (or scales)
/// rows so the first forecast row matches a centerpoint taken from the end
/// of the fit data. Interval bounds and original-mode replays pass through
/// untouched.
#[derive(Debug, Clone)]
pub struct AlignLastValue {
    rows: usize,
    lag: usize,
    method: AlignMethod,
    strength: f64,
    first_value_only: bool,
    center: Option<Array1<f64>>,
}

impl AlignLastValue {
    pub fn new(
        rows: usize,
        lag: usize,
        method: AlignMethod,
        strength: f64,
        first_value_only: bool,
    ) -> Result<Self> {
        if rows == 0 || lag == 0 {
            return Err(ForgeError::InvalidParameter(
                "alignment rows and lag must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&strength) {
            return Err(ForgeError::InvalidParameter(format!(
                "alignment strength must be in [0, 1], got {strength}"
            )));
        }
        Ok(Self {
            rows,
            lag,
            method,
            strength,
            first_value_only,
            center: None,
        })
    }

    fn find_centerpoint(&self, df: &TimeSeriesFrame) -> Array1<f64> {
        let n = df.nrows();
        let x = df.values();
        if self.rows <= 1 {
            let r = n.saturating_sub(self.lag);
            x.row(r.min(n - 1)).to_owned()
        } else if self.lag > 1 {
            // window of `rows` values ending `lag - 1` rows before the end
            let end = n.saturating_sub(self.lag - 1);
            let start = end.saturating_sub(self.rows);
            let window = x.slice(ndarray::s![start..end, ..]);
            window.mean_axis(ndarray::Axis(0)).unwrap_or_else(|| x.row(n - 1).to_owned())
        } else {
            df.tail(self.rows).col_mean()
        }
    }
}

impl Transform for AlignLastValue {
    fn name(&self) -> &'static str {
        "AlignLastValue"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.is_empty() {
            return Err(ForgeError::InvalidParameter(
                "alignment requires at least one row".into(),
            ));
        }
        // NaN near the end would poison the centerpoint
        let tail_has_nan = df.tail(50).has_nan();
        let source = if tail_has_nan { df.ffill() } else { df.clone() };
        self.center = Some(self.find_centerpoint(&source));
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if self.center.is_none() {
            return Err(ForgeError::NotFitted("AlignLastValue"));
        }
        Ok(df.clone())
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        self.inverse_transform_bounded(df, mode, false)
    }

    fn inverse_transform_bounded(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
        bounds: bool,
    ) -> Result<TimeSeriesFrame> {
        let center = self
            .center
            .as_ref()
            .ok_or(ForgeError::NotFitted("AlignLastValue"))?;
        if mode == InverseMode::Original || bounds || df.is_empty() {
            return Ok(df.clone());
        }
        if center.len() != df.ncols() {
            return Err(ForgeError::ShapeMismatch(
                "alignment fitted on a different column count".into(),
            ));
        }
        let first = df.values().row(0).to_owned();
        let mut values = df.values().clone();
        match self.method {
            AlignMethod::Additive => {
                for ((i, j), v) in values.indexed_iter_mut() {
                    if self.first_value_only && i > 0 {
                        continue;
                    }
                    *v += self.strength * (center[j] - first[j]);
                }
            }
            AlignMethod::Multiplicative => {
                for ((i, j), v) in values.indexed_iter_mut() {
                    if self.first_value_only && i > 0 {
                        continue;
                    }
                    let ratio = if first[j].abs() < 1e-12 {
                        1.0
                    } else {
                        center[j] / first[j]
                    };
                    *v *= 1.0 + (ratio - 1.0) * self.strength;
                }
            }
        }
        df.with_values(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::Array2;

    fn frame(values: Vec<f64>) -> TimeSeriesFrame {
        let rows = values.len();
        let index = (0..rows)
            .map(|i| {
                NaiveDate::from_ymd_opt(2023, 1, 1)
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
    fn test_additive_alignment_shifts_to_last_value() {
        let history = frame(vec![1.0, 2.0, 3.0, 10.0]);
        let mut t =
            AlignLastValue::new(1, 1, AlignMethod::Additive, 1.0, false).unwrap();
        t.fit(&history).unwrap();
        let forecast = frame(vec![7.0, 8.0, 9.0]);
        let out = t
            .inverse_transform(&forecast, InverseMode::Forecast)
            .unwrap();
        assert_eq!(out.values()[[0, 0]], 10.0);
        assert_eq!(out.values()[[2, 0]], 12.0);
    }

    #[test]
    fn test_original_mode_and_bounds_pass_through() {
        let history = frame(vec![1.0, 2.0, 3.0]);
        let mut t =
            AlignLastValue::new(1, 1, AlignMethod::Additive, 1.0, false).unwrap();
        t.fit(&history).unwrap();
        let df = frame(vec![5.0, 6.0]);
        let orig = t.inverse_transform(&df, InverseMode::Original).unwrap();
        assert_eq!(orig.values(), df.values());
        let bounded = t
            .inverse_transform_bounded(&df, InverseMode::Forecast, true)
            .unwrap();
        assert_eq!(bounded.values(), df.values());
    }

    #[test]
    fn test_first_value_only() {
        let history = frame(vec![0.0, 0.0, 4.0]);
        let mut t = AlignLastValue::new(1, 1, AlignMethod::Additive, 1.0, true).unwrap();
        t.fit(&history).unwrap();
        let forecast = frame(vec![0.0, 1.0]);
        let out = t
            .inverse_transform(&forecast, InverseMode::Forecast)
            .unwrap();
        assert_eq!(out.values()[[0, 0]], 4.0);
        assert_eq!(out.values()[[1, 0]], 1.0);
    }

    #[test]
    fn test_multiplicative_zero_first_row_is_safe() {
        let history = frame(vec![1.0, 2.0]);
        let mut t =
            AlignLastValue::new(1, 1, AlignMethod::Multiplicative, 1.0, false).unwrap();
        t.fit(&history).unwrap();
        let forecast = frame(vec![0.0, 3.0]);
        let out = t
            .inverse_transform(&forecast, InverseMode::Forecast)
            .unwrap();
        assert!(out.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_lagged_centerpoint() {
        let history = frame(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut t = AlignLastValue::new(1, 2, AlignMethod::Additive, 1.0, false).unwrap();
        t.fit(&history).unwrap();
        let forecast = frame(vec![0.0]);
        let out = t
            .inverse_transform(&forecast, InverseMode::Forecast)
            .unwrap();
        // lag 2 centers on the second to last observation
        assert_eq!(out.values()[[0, 0]], 4.0);
    }
}

//! Wide-format time series frame.
//!
//! Rows are unique, strictly increasing timestamps; columns are series
//! identifiers; values are `f64` (NaN marks missing data). The frame is
//! caller-owned input/output and is never retained by a transform beyond
//! the state its `fit` extracts.

use crate::error::{ForgeError, Result};
use chrono::NaiveDateTime;
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Days between the Unix epoch and the Julian day zero point.
const UNIX_EPOCH_JULIAN: f64 = 2440587.5;

/// A labeled, time-indexed numeric table (one column per series).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesFrame {
    index: Vec<NaiveDateTime>,
    columns: Vec<String>,
    values: Array2<f64>,
}

impl TimeSeriesFrame {
    /// Build a frame, validating index ordering and shape.
    pub fn new(
        index: Vec<NaiveDateTime>,
        columns: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self> {
        if values.nrows() != index.len() {
            return Err(ForgeError::ShapeMismatch(format!(
                "{} index entries vs {} value rows",
                index.len(),
                values.nrows()
            )));
        }
        if values.ncols() != columns.len() {
            return Err(ForgeError::ShapeMismatch(format!(
                "{} column names vs {} value columns",
                columns.len(),
                values.ncols()
            )));
        }
        for pair in index.windows(2) {
            if pair[1] <= pair[0] {
                return Err(ForgeError::InvalidParameter(
                    "index must be strictly increasing with unique timestamps".into(),
                ));
            }
        }
        Ok(Self {
            index,
            columns,
            values,
        })
    }

    /// Number of rows (timestamps).
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    /// Number of series.
    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Array2<f64> {
        &mut self.values
    }

    pub fn into_values(self) -> Array2<f64> {
        self.values
    }

    /// Same index/columns, new values. Shape must match.
    pub fn with_values(&self, values: Array2<f64>) -> Result<Self> {
        Self::new(self.index.clone(), self.columns.clone(), values)
    }

    /// New frame with the same index but different columns/values.
    pub fn with_columns(&self, columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        Self::new(self.index.clone(), columns, values)
    }

    /// Last `n` rows (all rows when `n >= nrows`).
    pub fn tail(&self, n: usize) -> Self {
        let start = self.nrows().saturating_sub(n);
        Self {
            index: self.index[start..].to_vec(),
            columns: self.columns.clone(),
            values: self.values.slice(s![start.., ..]).to_owned(),
        }
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Self {
        let end = n.min(self.nrows());
        Self {
            index: self.index[..end].to_vec(),
            columns: self.columns.clone(),
            values: self.values.slice(s![..end, ..]).to_owned(),
        }
    }

    /// True if any cell is NaN.
    pub fn has_nan(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    /// Error when any cell is non-finite (NaN or infinity).
    pub fn ensure_finite(&self, context: &str) -> Result<()> {
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(ForgeError::NanProduced(context.to_string()));
        }
        Ok(())
    }

    /// Error when any cell is infinite. NaN is tolerated (pre-fill data).
    pub fn ensure_numeric(&self) -> Result<()> {
        if self.values.iter().any(|v| v.is_infinite()) {
            return Err(ForgeError::NonNumeric(
                "frame contains infinite values".into(),
            ));
        }
        Ok(())
    }

    /// Apply `f` element-wise, keeping labels.
    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        Self {
            index: self.index.clone(),
            columns: self.columns.clone(),
            values: self.values.mapv(&f),
        }
    }

    /// Seconds since the Unix epoch for each row, as `f64`.
    pub fn epoch_seconds(&self) -> Array1<f64> {
        Array1::from_iter(
            self.index
                .iter()
                .map(|t| t.and_utc().timestamp() as f64 + f64::from(t.and_utc().timestamp_subsec_millis()) / 1000.0),
        )
    }

    /// Julian day numbers for each row.
    pub fn julian_dates(&self) -> Array1<f64> {
        Array1::from_iter(
            self.index
                .iter()
                .map(|t| t.and_utc().timestamp() as f64 / 86_400.0 + UNIX_EPOCH_JULIAN),
        )
    }

    /// Per-column mean, skipping NaN. Empty columns yield NaN.
    pub fn col_mean(&self) -> Array1<f64> {
        self.reduce_cols(|col| {
            let (mut sum, mut n) = (0.0, 0usize);
            for &v in col {
                if !v.is_nan() {
                    sum += v;
                    n += 1;
                }
            }
            if n == 0 {
                f64::NAN
            } else {
                sum / n as f64
            }
        })
    }

    /// Per-column sample standard deviation, skipping NaN.
    pub fn col_std(&self) -> Array1<f64> {
        let means = self.col_mean();
        let mut out = Array1::zeros(self.ncols());
        for (j, col) in self.values.axis_iter(Axis(1)).enumerate() {
            let m = means[j];
            let (mut acc, mut n) = (0.0, 0usize);
            for &v in col.iter() {
                if !v.is_nan() {
                    acc += (v - m) * (v - m);
                    n += 1;
                }
            }
            out[j] = if n > 1 {
                (acc / (n - 1) as f64).sqrt()
            } else {
                0.0
            };
        }
        out
    }

    /// Per-column quantile (linear interpolation), skipping NaN.
    pub fn col_quantile(&self, q: f64) -> Array1<f64> {
        self.reduce_cols(|col| {
            let mut vals: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
            if vals.is_empty() {
                return f64::NAN;
            }
            vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let pos = q.clamp(0.0, 1.0) * (vals.len() - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            if lo == hi {
                vals[lo]
            } else {
                vals[lo] + (pos - lo as f64) * (vals[hi] - vals[lo])
            }
        })
    }

    /// Per-column median, skipping NaN.
    pub fn col_median(&self) -> Array1<f64> {
        self.col_quantile(0.5)
    }

    /// Per-column minimum, skipping NaN.
    pub fn col_min(&self) -> Array1<f64> {
        self.reduce_cols(|col| {
            col.iter()
                .copied()
                .filter(|v| !v.is_nan())
                .fold(f64::INFINITY, f64::min)
        })
    }

    fn reduce_cols<F: Fn(&[f64]) -> f64>(&self, f: F) -> Array1<f64> {
        let mut out = Array1::zeros(self.ncols());
        for (j, col) in self.values.axis_iter(Axis(1)).enumerate() {
            let v: Vec<f64> = col.iter().copied().collect();
            out[j] = f(&v);
        }
        out
    }

    /// Forward-fill NaN within each column.
    pub fn ffill(&self) -> Self {
        let mut values = self.values.clone();
        for mut col in values.axis_iter_mut(Axis(1)) {
            let mut last = f64::NAN;
            for v in col.iter_mut() {
                if v.is_nan() {
                    if !last.is_nan() {
                        *v = last;
                    }
                } else {
                    last = *v;
                }
            }
        }
        Self {
            index: self.index.clone(),
            columns: self.columns.clone(),
            values,
        }
    }

    /// Backward-fill NaN within each column.
    pub fn bfill(&self) -> Self {
        let mut values = self.values.clone();
        for mut col in values.axis_iter_mut(Axis(1)) {
            let mut next = f64::NAN;
            for v in col.iter_mut().rev() {
                if v.is_nan() {
                    if !next.is_nan() {
                        *v = next;
                    }
                } else {
                    next = *v;
                }
            }
        }
        Self {
            index: self.index.clone(),
            columns: self.columns.clone(),
            values,
        }
    }

    /// Stack `top` rows above `bottom` rows. Columns must match; the
    /// combined index is re-validated.
    pub fn concat_rows(top: &Self, bottom: &Self) -> Result<Self> {
        if top.columns != bottom.columns {
            return Err(ForgeError::ShapeMismatch(
                "concat_rows requires matching columns".into(),
            ));
        }
        let mut index = top.index.clone();
        index.extend_from_slice(&bottom.index);
        let values = ndarray::concatenate(
            Axis(0),
            &[top.values.view(), bottom.values.view()],
        )
        .map_err(|e| ForgeError::ShapeMismatch(e.to_string()))?;
        Self::new(index, top.columns.clone(), values)
    }

    /// Keep rows where `mask` is true.
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.nrows() {
            return Err(ForgeError::ShapeMismatch(
                "row mask length mismatch".into(),
            ));
        }
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect();
        let index = keep.iter().map(|&i| self.index[i]).collect();
        let values = self.values.select(Axis(0), &keep);
        Self::new(index, self.columns.clone(), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn daily_index(n: usize) -> Vec<NaiveDateTime> {
        (0..n)
            .map(|i| {
                NaiveDate::from_ymd_opt(2023, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    + chrono::Duration::days(i as i64)
            })
            .collect()
    }

    #[test]
    fn test_rejects_unsorted_index() {
        let mut idx = daily_index(3);
        idx.swap(0, 2);
        let values = Array2::zeros((3, 1));
        assert!(TimeSeriesFrame::new(idx, vec!["a".into()], values).is_err());
    }

    #[test]
    fn test_ffill_and_bfill() {
        let values =
            Array2::from_shape_vec((4, 1), vec![f64::NAN, 2.0, f64::NAN, 4.0]).unwrap();
        let df = TimeSeriesFrame::new(daily_index(4), vec!["a".into()], values).unwrap();
        let filled = df.ffill().bfill();
        assert_eq!(filled.values()[[0, 0]], 2.0);
        assert_eq!(filled.values()[[2, 0]], 2.0);
    }

    #[test]
    fn test_col_median_skips_nan() {
        let values =
            Array2::from_shape_vec((4, 1), vec![1.0, f64::NAN, 3.0, 5.0]).unwrap();
        let df = TimeSeriesFrame::new(daily_index(4), vec!["a".into()], values).unwrap();
        assert_eq!(df.col_median()[0], 3.0);
    }

    #[test]
    fn test_tail_and_concat() {
        let values = Array2::from_shape_vec((5, 1), (0..5).map(|v| v as f64).collect()).unwrap();
        let df = TimeSeriesFrame::new(daily_index(5), vec!["a".into()], values).unwrap();
        let head = df.head(2);
        let tail = df.tail(3);
        let back = TimeSeriesFrame::concat_rows(&head, &tail).unwrap();
        assert_eq!(back.nrows(), 5);
        assert_eq!(back.values()[[4, 0]], 4.0);
    }
}

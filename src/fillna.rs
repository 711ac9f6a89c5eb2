//! Missing-value fill strategies applied before a pipeline runs.
//!
//! Simple strategies (fill forward, mean, interpolation) are cheap
//! column-wise passes. The KNN and iterative strategies borrow from
//! classical tabular imputation and are only worth their cost on frames
//! with cross-series structure.

use crate::error::{ForgeError, Result};
use crate::frame::TimeSeriesFrame;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

#[inline]
pub(crate) fn is_missing(v: f64) -> bool {
    v.is_nan()
}

/// How NaN cells are filled before transforms run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMethod {
    /// Forward fill, then backward fill for leading gaps.
    Ffill,
    /// Backward fill, then forward fill for trailing gaps.
    Bfill,
    Zero,
    Mean,
    Median,
    /// Rolling mean of the prior 10 observations.
    RollingMean,
    /// Rolling mean of the prior 24 observations, then backward fill.
    RollingMean24,
    /// Midpoint of forward fill and the column mean.
    FfillMeanBiased,
    /// Linear interpolation between observed neighbors.
    Interpolate,
    /// Compress observed values toward the end of the index.
    FakeDate,
    /// Nearest-neighbor imputation over complete rows.
    KnnImputer,
    /// Round-robin regression refinement of an initial mean fill.
    IterativeImputer,
}

impl FillMethod {
    /// Fill NaN cells, returning a frame with the same labels.
    pub fn apply(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if !df.has_nan() {
            return Ok(df.clone());
        }
        let filled = match self {
            FillMethod::Ffill => df.ffill().bfill(),
            FillMethod::Bfill => df.bfill().ffill(),
            FillMethod::Zero => df.map(|v| if is_missing(v) { 0.0 } else { v }),
            FillMethod::Mean => fill_with_stat(df, &df.col_mean())?,
            FillMethod::Median => fill_with_stat(df, &df.col_median())?,
            FillMethod::RollingMean => rolling_fill(df, 10)?,
            FillMethod::RollingMean24 => rolling_fill(df, 24)?,
            FillMethod::FfillMeanBiased => {
                let ff = df.ffill().bfill();
                let means = df.col_mean();
                let mut values = ff.into_values();
                for (j, mut col) in values.axis_iter_mut(Axis(1)).enumerate() {
                    let m = if means[j].is_nan() { 0.0 } else { means[j] };
                    for v in col.iter_mut() {
                        if is_missing(*v) {
                            *v = m;
                        } else {
                            *v = (*v + m) / 2.0;
                        }
                    }
                }
                // only originally-missing cells move; restore observed ones
                let mut out = df.values().clone();
                for ((o, &orig), &v) in out.iter_mut().zip(df.values().iter()).zip(values.iter()) {
                    if is_missing(orig) {
                        *o = v;
                    } else {
                        *o = orig;
                    }
                }
                df.with_values(out)?
            }
            FillMethod::Interpolate => interpolate_fill(df)?,
            FillMethod::FakeDate => fake_date_fill(df)?,
            FillMethod::KnnImputer => knn_fill(df, 5)?,
            FillMethod::IterativeImputer => iterative_fill(df, 10, 1e-3)?,
        };
        // any strategy can leave gaps on pathological input (all-NaN column)
        Ok(filled.ffill().bfill().map(|v| if is_missing(v) { 0.0 } else { v }))
    }
}

fn fill_with_stat(df: &TimeSeriesFrame, stat: &Array1<f64>) -> Result<TimeSeriesFrame> {
    let mut values = df.values().clone();
    for (j, mut col) in values.axis_iter_mut(Axis(1)).enumerate() {
        let s = stat[j];
        for v in col.iter_mut() {
            if is_missing(*v) && !s.is_nan() {
                *v = s;
            }
        }
    }
    df.with_values(values)
}

fn rolling_fill(df: &TimeSeriesFrame, window: usize) -> Result<TimeSeriesFrame> {
    let mut values = df.values().clone();
    for mut col in values.axis_iter_mut(Axis(1)) {
        for i in 0..col.len() {
            if !is_missing(col[i]) {
                continue;
            }
            let start = i.saturating_sub(window);
            let (mut sum, mut n) = (0.0, 0usize);
            for k in start..i {
                if !is_missing(col[k]) {
                    sum += col[k];
                    n += 1;
                }
            }
            if n > 0 {
                col[i] = sum / n as f64;
            }
        }
    }
    df.with_values(values)
}

fn interpolate_fill(df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
    let mut values = df.values().clone();
    for mut col in values.axis_iter_mut(Axis(1)) {
        let n = col.len();
        let mut prev: Option<usize> = None;
        let mut i = 0;
        while i < n {
            if !is_missing(col[i]) {
                prev = Some(i);
                i += 1;
                continue;
            }
            // find the next observed point
            let mut next = i + 1;
            while next < n && is_missing(col[next]) {
                next += 1;
            }
            match (prev, next < n) {
                (Some(p), true) => {
                    let span = (next - p) as f64;
                    for k in i..next {
                        let w = (k - p) as f64 / span;
                        col[k] = col[p] * (1.0 - w) + col[next] * w;
                    }
                }
                _ => {} // leading/trailing gap handled by the fallback pass
            }
            i = next;
        }
    }
    df.with_values(values)
}

/// Shift each column's observed values toward the latest timestamps,
/// padding the head with the earliest observation.
fn fake_date_fill(df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
    let n = df.nrows();
    let mut values = df.values().clone();
    for mut col in values.axis_iter_mut(Axis(1)) {
        let observed: Vec<f64> = col.iter().copied().filter(|v| !is_missing(*v)).collect();
        if observed.is_empty() {
            continue;
        }
        let pad = n - observed.len();
        for i in 0..pad {
            col[i] = observed[0];
        }
        for (i, &v) in observed.iter().enumerate() {
            col[pad + i] = v;
        }
    }
    df.with_values(values)
}

fn nan_safe_distance(a: &[f64], b: &[f64]) -> f64 {
    let (mut acc, mut n) = (0.0, 0usize);
    for (&x, &y) in a.iter().zip(b.iter()) {
        if is_missing(x) || is_missing(y) {
            continue;
        }
        let d = x - y;
        acc += d * d;
        n += 1;
    }
    if n == 0 {
        f64::INFINITY
    } else {
        (acc / n as f64).sqrt()
    }
}

fn knn_fill(df: &TimeSeriesFrame, k: usize) -> Result<TimeSeriesFrame> {
    let values = df.values();
    let complete: Vec<usize> = (0..values.nrows())
        .filter(|&i| !values.row(i).iter().any(|&v| is_missing(v)))
        .collect();
    if complete.is_empty() {
        // nothing to anchor on; fall back to column means
        return fill_with_stat(df, &df.col_mean());
    }

    let mut out = values.clone();
    for i in 0..values.nrows() {
        let row: Vec<f64> = values.row(i).iter().copied().collect();
        if !row.iter().any(|&v| is_missing(v)) {
            continue;
        }
        let mut dists: Vec<(f64, usize)> = complete
            .iter()
            .map(|&c| {
                let other: Vec<f64> = values.row(c).iter().copied().collect();
                (nan_safe_distance(&row, &other), c)
            })
            .filter(|(d, _)| d.is_finite())
            .collect();
        dists.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        dists.truncate(k.max(1));
        for j in 0..values.ncols() {
            if is_missing(row[j]) {
                if dists.is_empty() {
                    continue;
                }
                let sum: f64 = dists.iter().map(|&(_, c)| values[[c, j]]).sum();
                out[[i, j]] = sum / dists.len() as f64;
            }
        }
    }
    df.with_values(out)
}

fn iterative_fill(df: &TimeSeriesFrame, max_iter: usize, tol: f64) -> Result<TimeSeriesFrame> {
    let n_cols = df.ncols();
    if n_cols < 2 {
        return fill_with_stat(df, &df.col_mean());
    }
    let orig = df.values();
    let means = df.col_mean();
    let mut data = orig.clone();
    for (j, mut col) in data.axis_iter_mut(Axis(1)).enumerate() {
        let m = if means[j].is_nan() { 0.0 } else { means[j] };
        for v in col.iter_mut() {
            if is_missing(*v) {
                *v = m;
            }
        }
    }

    for _ in 0..max_iter {
        let mut change = 0.0;
        for target in 0..n_cols {
            let missing: Vec<usize> = (0..orig.nrows())
                .filter(|&i| is_missing(orig[[i, target]]))
                .collect();
            if missing.is_empty() {
                continue;
            }
            let observed: Vec<usize> = (0..orig.nrows())
                .filter(|&i| !is_missing(orig[[i, target]]))
                .collect();
            if observed.len() < 2 {
                continue;
            }
            let predictors: Vec<usize> = (0..n_cols).filter(|&c| c != target).collect();

            let mut x = Array2::zeros((observed.len(), predictors.len() + 1));
            let mut y = Array2::zeros((observed.len(), 1));
            for (r, &i) in observed.iter().enumerate() {
                x[[r, 0]] = 1.0;
                for (c, &p) in predictors.iter().enumerate() {
                    x[[r, c + 1]] = data[[i, p]];
                }
                y[[r, 0]] = data[[i, target]];
            }
            let beta = match crate::linalg::lstsq_ridge(&x, &y, 1e-6) {
                Ok(b) => b,
                Err(_) => continue,
            };
            for &i in &missing {
                let mut pred = beta[[0, 0]];
                for (c, &p) in predictors.iter().enumerate() {
                    pred += beta[[c + 1, 0]] * data[[i, p]];
                }
                change += (pred - data[[i, target]]).abs();
                data[[i, target]] = pred;
            }
        }
        if change < tol {
            break;
        }
    }
    df.with_values(data)
}

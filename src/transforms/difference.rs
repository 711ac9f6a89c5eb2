//! Differencing transforms. All of these are mode-aware: the forecast
//! inverse integrates forward from the last fitted values, while the
//! original inverse replays the fit support from the first fitted values.

use crate::error::{ForgeError, Result};
use crate::frame::TimeSeriesFrame;
use crate::transforms::{InverseMode, Transform};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

fn require_no_nan(df: &TimeSeriesFrame, name: &str) -> Result<()> {
    if df.has_nan() {
        return Err(ForgeError::NanProduced(format!(
            "{name} inverse requires complete input"
        )));
    }
    Ok(())
}

/// First difference with the leading row backfilled.
#[derive(Debug, Clone, Default)]
pub struct Differenced {
    first_row: Option<Array1<f64>>,
    last_row: Option<Array1<f64>>,
}

impl Transform for Differenced {
    fn name(&self) -> &'static str {
        "DifferencedTransformer"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.is_empty() {
            return Err(ForgeError::InvalidParameter(
                "differencing requires at least one row".into(),
            ));
        }
        self.first_row = Some(df.values().row(0).to_owned());
        self.last_row = Some(df.values().row(df.nrows() - 1).to_owned());
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if self.first_row.is_none() {
            return Err(ForgeError::NotFitted("DifferencedTransformer"));
        }
        let x = df.values();
        let (n, k) = (x.nrows(), x.ncols());
        let mut out = Array2::zeros((n, k));
        for i in 1..n {
            for j in 0..k {
                out[[i, j]] = x[[i, j]] - x[[i - 1, j]];
            }
        }
        // leading row mirrors pandas diff + bfill
        if n > 1 {
            for j in 0..k {
                out[[0, j]] = out[[1, j]];
            }
        }
        df.with_values(out)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let first = self
            .first_row
            .as_ref()
            .ok_or(ForgeError::NotFitted("DifferencedTransformer"))?;
        let last = self.last_row.as_ref().unwrap();
        let x = df.values();
        let (n, k) = (x.nrows(), x.ncols());
        let mut out = Array2::zeros((n, k));
        match mode {
            InverseMode::Forecast => {
                require_no_nan(df, "DifferencedTransformer")?;
                let mut running = last.clone();
                for i in 0..n {
                    for j in 0..k {
                        running[j] += x[[i, j]];
                        out[[i, j]] = running[j];
                    }
                }
            }
            InverseMode::Original => {
                // row 0 was a backfilled duplicate, so it is discarded
                let mut running = first.clone();
                for j in 0..k {
                    out[[0, j]] = running[j];
                }
                for i in 1..n {
                    for j in 0..k {
                        running[j] += x[[i, j]];
                        out[[i, j]] = running[j];
                    }
                }
            }
        }
        df.with_values(out)
    }
}

fn replace_zeros(values: &mut Array2<f64>) {
    for j in 0..values.ncols() {
        let surrogate = values
            .column(j)
            .iter()
            .filter(|v| v.abs() > 1e-12 && !v.is_nan())
            .fold(f64::INFINITY, |m, v| m.min(v.abs()));
        let surrogate = if surrogate.is_finite() { surrogate } else { 0.1 };
        for v in values.column_mut(j).iter_mut() {
            if v.abs() < 1e-12 {
                *v = surrogate;
            }
        }
    }
}

/// Relative change between consecutive rows, with zeros replaced by the
/// smallest nonzero magnitude per column so ratios stay finite.
#[derive(Debug, Clone, Default)]
pub struct PctChange {
    first_row: Option<Array1<f64>>,
    last_row: Option<Array1<f64>>,
}

impl Transform for PctChange {
    fn name(&self) -> &'static str {
        "PctChangeTransformer"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.is_empty() {
            return Err(ForgeError::InvalidParameter(
                "pct change requires at least one row".into(),
            ));
        }
        let mut values = df.values().clone();
        replace_zeros(&mut values);
        self.first_row = Some(values.row(0).to_owned());
        self.last_row = Some(values.row(values.nrows() - 1).to_owned());
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if self.first_row.is_none() {
            return Err(ForgeError::NotFitted("PctChangeTransformer"));
        }
        let mut base = df.values().clone();
        replace_zeros(&mut base);
        let (n, k) = (base.nrows(), base.ncols());
        let mut out = Array2::zeros((n, k));
        for i in 1..n {
            for j in 0..k {
                let r = base[[i, j]] / base[[i - 1, j]] - 1.0;
                out[[i, j]] = if r.is_finite() { r } else { 0.0 };
            }
        }
        df.with_values(out)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let first = self
            .first_row
            .as_ref()
            .ok_or(ForgeError::NotFitted("PctChangeTransformer"))?;
        let last = self.last_row.as_ref().unwrap();
        let mut growth = df.map(|v| v + 1.0).into_values();
        replace_zeros(&mut growth);
        let (n, k) = (growth.nrows(), growth.ncols());
        let mut out = Array2::zeros((n, k));
        match mode {
            InverseMode::Forecast => {
                let mut running = last.clone();
                for i in 0..n {
                    for j in 0..k {
                        running[j] *= growth[[i, j]];
                        out[[i, j]] = running[j];
                    }
                }
            }
            InverseMode::Original => {
                let mut running = first.clone();
                for j in 0..k {
                    out[[0, j]] = running[j];
                }
                for i in 1..n {
                    for j in 0..k {
                        running[j] *= growth[[i, j]];
                        out[[i, j]] = running[j];
                    }
                }
            }
        }
        df.with_values(out)
    }
}

/// Cumulative sum; the inverse re-differences.
#[derive(Debug, Clone, Default)]
pub struct CumSum {
    first_row: Option<Array1<f64>>,
    last_cumsum: Option<Array1<f64>>,
}

impl Transform for CumSum {
    fn name(&self) -> &'static str {
        "CumSumTransformer"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.is_empty() {
            return Err(ForgeError::InvalidParameter(
                "cumsum requires at least one row".into(),
            ));
        }
        self.first_row = Some(df.values().row(0).to_owned());
        let cs = cumsum(df.values());
        self.last_cumsum = Some(cs.row(cs.nrows() - 1).to_owned());
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if self.first_row.is_none() {
            return Err(ForgeError::NotFitted("CumSumTransformer"));
        }
        df.with_values(cumsum(df.values()))
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let first = self
            .first_row
            .as_ref()
            .ok_or(ForgeError::NotFitted("CumSumTransformer"))?;
        let last_cs = self.last_cumsum.as_ref().unwrap();
        let x = df.values();
        let (n, k) = (x.nrows(), x.ncols());
        let mut out = Array2::zeros((n, k));
        match mode {
            InverseMode::Forecast => {
                for j in 0..k {
                    out[[0, j]] = x[[0, j]] - last_cs[j];
                }
                for i in 1..n {
                    for j in 0..k {
                        out[[i, j]] = x[[i, j]] - x[[i - 1, j]];
                    }
                }
            }
            InverseMode::Original => {
                for j in 0..k {
                    out[[0, j]] = first[j];
                }
                for i in 1..n {
                    for j in 0..k {
                        out[[i, j]] = x[[i, j]] - x[[i - 1, j]];
                    }
                }
            }
        }
        df.with_values(out)
    }
}

fn cumsum(x: &Array2<f64>) -> Array2<f64> {
    let mut out = x.clone();
    for i in 1..out.nrows() {
        for j in 0..out.ncols() {
            let prev = out[[i - 1, j]];
            out[[i, j]] += prev;
        }
    }
    out
}

/// Subtract the previous row's cross-series mean from every cell.
#[derive(Debug, Clone, Default)]
pub struct MeanDifference {
    row_means: Option<Array1<f64>>,
}

impl Transform for MeanDifference {
    fn name(&self) -> &'static str {
        "MeanDifference"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.ncols() < 2 {
            return Err(ForgeError::MultivariateRequired("MeanDifference"));
        }
        self.row_means = Some(df.values().mean_axis(Axis(1)).ok_or_else(|| {
            ForgeError::InvalidParameter("mean difference requires data".into())
        })?);
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let means = self
            .row_means
            .as_ref()
            .ok_or(ForgeError::NotFitted("MeanDifference"))?;
        if means.len() != df.nrows() {
            return Err(ForgeError::ShapeMismatch(
                "MeanDifference transform expects the fit support".into(),
            ));
        }
        let x = df.values();
        let (n, k) = (x.nrows(), x.ncols());
        let mut out = Array2::zeros((n, k));
        for i in 0..n {
            // lag-1 mean; the leading row borrows the first mean (bfill)
            let m = if i == 0 { means[0] } else { means[i - 1] };
            for j in 0..k {
                out[[i, j]] = x[[i, j]] - m;
            }
        }
        df.with_values(out)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let means = self
            .row_means
            .as_ref()
            .ok_or(ForgeError::NotFitted("MeanDifference"))?;
        let x = df.values();
        let (n, k) = (x.nrows(), x.ncols());
        let mut out = Array2::zeros((n, k));
        match mode {
            InverseMode::Forecast => {
                require_no_nan(df, "MeanDifference")?;
                let mut running = means[means.len() - 1];
                for i in 0..n {
                    let mut sum = 0.0;
                    for j in 0..k {
                        out[[i, j]] = x[[i, j]] + running;
                        sum += out[[i, j]];
                    }
                    running = sum / k as f64;
                }
            }
            InverseMode::Original => {
                for i in 0..n {
                    let m = if i == 0 {
                        means[0]
                    } else {
                        means[(i - 1).min(means.len() - 1)]
                    };
                    for j in 0..k {
                        out[[i, j]] = x[[i, j]] + m;
                    }
                }
            }
        }
        df.with_values(out)
    }
}

/// How the seasonal tile is summarized from the fit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalMethod {
    LastValue,
    Mean,
    Median,
}

/// Subtract a repeating per-phase pattern of length `lag`. Phases are
/// anchored to the end of the frame so the final row is always the last
/// phase, which makes forecast rows start cleanly at phase zero.
#[derive(Debug, Clone)]
pub struct SeasonalDifference {
    lag: usize,
    method: SeasonalMethod,
    tile: Option<Array2<f64>>,
}

impl SeasonalDifference {
    pub fn new(lag: usize, method: SeasonalMethod) -> Result<Self> {
        if lag < 2 {
            return Err(ForgeError::InvalidParameter(
                "seasonal difference lag must be at least 2".into(),
            ));
        }
        Ok(Self {
            lag,
            method,
            tile: None,
        })
    }

    fn phase(&self, row: usize, nrows: usize) -> usize {
        let pad = (self.lag - nrows % self.lag) % self.lag;
        (row + pad) % self.lag
    }
}

impl Transform for SeasonalDifference {
    fn name(&self) -> &'static str {
        "SeasonalDifference"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let (n, k) = (df.nrows(), df.ncols());
        if n < self.lag {
            return Err(ForgeError::InvalidParameter(format!(
                "seasonal difference lag {} exceeds {} rows",
                self.lag, n
            )));
        }
        let x = df.values();
        let mut tile = Array2::zeros((self.lag, k));
        match self.method {
            SeasonalMethod::LastValue => {
                tile.assign(&x.slice(ndarray::s![n - self.lag.., ..]));
            }
            SeasonalMethod::Mean | SeasonalMethod::Median => {
                for p in 0..self.lag {
                    for j in 0..k {
                        let mut vals: Vec<f64> = (0..n)
                            .filter(|&r| self.phase(r, n) == p)
                            .map(|r| x[[r, j]])
                            .filter(|v| !v.is_nan())
                            .collect();
                        tile[[p, j]] = if vals.is_empty() {
                            0.0
                        } else if self.method == SeasonalMethod::Mean {
                            vals.iter().sum::<f64>() / vals.len() as f64
                        } else {
                            vals.sort_by(|a, b| {
                                a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                            });
                            vals[vals.len() / 2]
                        };
                    }
                }
            }
        }
        self.tile = Some(tile);
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let tile = self
            .tile
            .as_ref()
            .ok_or(ForgeError::NotFitted("SeasonalDifference"))?;
        let x = df.values();
        let (n, k) = (x.nrows(), x.ncols());
        let mut out = Array2::zeros((n, k));
        for i in 0..n {
            let p = self.phase(i, n);
            for j in 0..k {
                out[[i, j]] = x[[i, j]] - tile[[p, j]];
            }
        }
        df.with_values(out)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let tile = self
            .tile
            .as_ref()
            .ok_or(ForgeError::NotFitted("SeasonalDifference"))?;
        let x = df.values();
        let (n, k) = (x.nrows(), x.ncols());
        let mut out = Array2::zeros((n, k));
        for i in 0..n {
            let p = match mode {
                InverseMode::Forecast => i % self.lag,
                InverseMode::Original => self.phase(i, n),
            };
            for j in 0..k {
                out[[i, j]] = x[[i, j]] + tile[[p, j]];
            }
        }
        df.with_values(out)
    }
}

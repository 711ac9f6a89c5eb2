//! Joint (shared) decompositions over the full series matrix, plus the
//! classical seasonal decomposition filter.

use crate::error::{ForgeError, Result};
use crate::frame::TimeSeriesFrame;
use crate::linalg;
use crate::regression::RegressionSpec;
use crate::transforms::{DecompPart, InverseMode, Transform};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn covariance(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows().max(2) as f64;
    let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
    let centered = x - &mean;
    centered.t().dot(&centered) / (n - 1.0)
}

fn symmetrize(m: &Array2<f64>) -> Array2<f64> {
    (m + &m.t().to_owned()) / 2.0
}

/// Classical seasonal decomposition: a centered moving-average (or
/// moving-median) trend, per-phase seasonal means of the detrended series,
/// and the residual. Returns one chosen part.
#[derive(Debug, Clone)]
pub struct StlFilter {
    robust_trend: bool,
    part: DecompPart,
    seasonal: usize,
}

impl StlFilter {
    pub fn new(robust_trend: bool, part: DecompPart, seasonal: usize) -> Result<Self> {
        if seasonal < 3 {
            return Err(ForgeError::InvalidParameter(
                "seasonal period must be at least 3".into(),
            ));
        }
        Ok(Self {
            robust_trend,
            part,
            // centered window needs an odd length
            seasonal: seasonal | 1,
        })
    }
}

impl Transform for StlFilter {
    fn name(&self) -> &'static str {
        "STLFilter"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.nrows() < 2 * self.seasonal {
            return Err(ForgeError::InvalidParameter(format!(
                "decomposition needs at least {} rows",
                2 * self.seasonal
            )));
        }
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if df.has_nan() {
            return Err(ForgeError::NanProduced(
                "seasonal decomposition requires complete input".into(),
            ));
        }
        let (n, k) = (df.nrows(), df.ncols());
        let period = self.seasonal;
        let half = period / 2;
        let x = df.values();
        let mut out = Array2::from_elem((n, k), f64::NAN);

        for j in 0..k {
            let col: Vec<f64> = x.column(j).to_vec();
            let mut trend = vec![f64::NAN; n];
            for i in half..(n - half) {
                let w = &col[i - half..=i + half];
                trend[i] = if self.robust_trend {
                    let mut v = w.to_vec();
                    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    v[v.len() / 2]
                } else {
                    w.iter().sum::<f64>() / w.len() as f64
                };
            }
            let mut phase_sum = vec![0.0; period];
            let mut phase_cnt = vec![0usize; period];
            for i in 0..n {
                if trend[i].is_nan() {
                    continue;
                }
                phase_sum[i % period] += col[i] - trend[i];
                phase_cnt[i % period] += 1;
            }
            let mut phase_mean: Vec<f64> = phase_sum
                .iter()
                .zip(phase_cnt.iter())
                .map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
                .collect();
            let grand = phase_mean.iter().sum::<f64>() / period as f64;
            for m in phase_mean.iter_mut() {
                *m -= grand;
            }
            for i in 0..n {
                out[[i, j]] = match self.part {
                    DecompPart::Trend => trend[i],
                    DecompPart::Seasonal => phase_mean[i % period],
                    DecompPart::Resid => col[i] - trend[i] - phase_mean[i % period],
                };
            }
        }
        Ok(df.with_values(out)?.ffill().bfill())
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        Ok(df.clone())
    }
}

/// Principal component projection over all series jointly.
pub struct Pca {
    whiten: bool,
    mean: Option<Array1<f64>>,
    components: Option<Array2<f64>>,
    scales: Option<Array1<f64>>,
    original_columns: Option<Vec<String>>,
}

impl Pca {
    pub fn new(whiten: bool) -> Self {
        Self {
            whiten,
            mean: None,
            components: None,
            scales: None,
            original_columns: None,
        }
    }
}

impl Transform for Pca {
    fn name(&self) -> &'static str {
        "PCA"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.ncols() < 2 {
            return Err(ForgeError::MultivariateRequired("PCA"));
        }
        if df.ncols() > df.nrows() {
            return Err(ForgeError::InvalidParameter(
                "PCA requires at least as many rows as series".into(),
            ));
        }
        let values = df.values().mapv(|v| if v.is_nan() { 0.0 } else { v });
        let mean = values
            .mean_axis(Axis(0))
            .ok_or_else(|| ForgeError::InvalidParameter("empty frame".into()))?;
        let (vals, vecs) = linalg::jacobi_eigh(&covariance(&values))?;
        let floor = vals.iter().fold(0.0f64, |m, v| m.max(*v)).max(1e-300) * 1e-12;
        self.scales = Some(vals.mapv(|v| v.max(floor).sqrt()));
        self.mean = Some(mean);
        self.components = Some(vecs);
        self.original_columns = Some(df.columns().to_vec());
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let mean = self.mean.as_ref().ok_or(ForgeError::NotFitted("PCA"))?;
        let vecs = self.components.as_ref().unwrap();
        let scales = self.scales.as_ref().unwrap();
        if df.ncols() != mean.len() {
            return Err(ForgeError::ShapeMismatch(
                "PCA fitted on a different column count".into(),
            ));
        }
        let mut scores = (df.values() - mean).dot(vecs);
        if self.whiten {
            for ((_, j), v) in scores.indexed_iter_mut() {
                *v /= scales[j];
            }
        }
        let names = (0..scores.ncols()).map(|i| format!("pca_{i}")).collect();
        df.with_columns(names, scores)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let mean = self.mean.as_ref().ok_or(ForgeError::NotFitted("PCA"))?;
        let vecs = self.components.as_ref().unwrap();
        let scales = self.scales.as_ref().unwrap();
        let columns = self.original_columns.as_ref().unwrap();
        let mut scores = df.values().clone();
        if self.whiten {
            for ((_, j), v) in scores.indexed_iter_mut() {
                *v *= scales[j];
            }
        }
        let restored = scores.dot(&vecs.t()) + mean;
        df.with_columns(columns.clone(), restored)
    }
}

/// Independent component analysis via the parallel fixed-point iteration
/// with the logcosh contrast.
pub struct FastIca {
    max_iter: usize,
    whiten: bool,
    mean: Option<Array1<f64>>,
    unmixing: Option<Array2<f64>>,
    mixing: Option<Array2<f64>>,
    original_columns: Option<Vec<String>>,
}

impl FastIca {
    pub fn new(max_iter: usize, whiten: bool) -> Self {
        Self {
            max_iter: max_iter.max(1),
            whiten,
            mean: None,
            unmixing: None,
            mixing: None,
            original_columns: None,
        }
    }
}

fn decorrelate(w: &Array2<f64>) -> Result<Array2<f64>> {
    let wwt = symmetrize(&w.dot(&w.t()));
    Ok(linalg::inv_sqrt_spd(&wwt)?.dot(w))
}

impl Transform for FastIca {
    fn name(&self) -> &'static str {
        "FastICA"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let k = df.ncols();
        if k < 2 {
            return Err(ForgeError::MultivariateRequired("FastICA"));
        }
        if k > 500 {
            return Err(ForgeError::InvalidParameter(
                "FastICA is limited to 500 series".into(),
            ));
        }
        let values = df.values().mapv(|v| if v.is_nan() { 0.0 } else { v });
        let n = values.nrows() as f64;
        let mean = values
            .mean_axis(Axis(0))
            .ok_or_else(|| ForgeError::InvalidParameter("empty frame".into()))?;
        let centered = &values - &mean;

        let whitener = if self.whiten {
            linalg::inv_sqrt_spd(&covariance(&values))?
        } else {
            Array2::eye(k)
        };
        let xw = centered.dot(&whitener.t());

        // fixed seed keeps a fitted pipeline deterministic
        let mut rng = StdRng::seed_from_u64(42);
        let mut w = Array2::from_shape_fn((k, k), |_| rng.gen::<f64>() - 0.5);
        w = decorrelate(&w)?;

        for _ in 0..self.max_iter {
            let wx = w.dot(&xw.t());
            let g = wx.mapv(f64::tanh);
            let g_prime_mean = g.mapv(|v| 1.0 - v * v).mean_axis(Axis(1)).unwrap();
            let mut w1 = g.dot(&xw) / n;
            for (r, mut row) in w1.axis_iter_mut(Axis(0)).enumerate() {
                let scaled = w.row(r).mapv(|v| v * g_prime_mean[r]);
                row -= &scaled;
            }
            let w_new = decorrelate(&w1)?;
            let delta = w_new
                .dot(&w.t())
                .diag()
                .iter()
                .map(|d| (d.abs() - 1.0).abs())
                .fold(0.0f64, f64::max);
            w = w_new;
            if delta < 1e-4 {
                break;
            }
        }

        let unmixing = w.dot(&whitener);
        let mixing = linalg::lstsq(&unmixing.t().to_owned(), &Array2::eye(k))?;
        self.mean = Some(mean);
        self.unmixing = Some(unmixing);
        self.mixing = Some(mixing);
        self.original_columns = Some(df.columns().to_vec());
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let mean = self.mean.as_ref().ok_or(ForgeError::NotFitted("FastICA"))?;
        let unmixing = self.unmixing.as_ref().unwrap();
        if df.ncols() != mean.len() {
            return Err(ForgeError::ShapeMismatch(
                "FastICA fitted on a different column count".into(),
            ));
        }
        let sources = (df.values() - mean).dot(&unmixing.t());
        let names = (0..sources.ncols()).map(|i| format!("ica_{i}")).collect();
        df.with_columns(names, sources)
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        let mean = self.mean.as_ref().ok_or(ForgeError::NotFitted("FastICA"))?;
        let mixing = self.mixing.as_ref().unwrap();
        let columns = self.original_columns.as_ref().unwrap();
        let restored = df.values().dot(mixing) + mean;
        df.with_columns(columns.clone(), restored)
    }
}

/// Johansen-style cointegrating projection: eigenvectors of the product
/// of lag-residual moment matrices.
pub struct Cointegration {
    det_order: i32,
    k_ar_diff: usize,
    components: Option<Array2<f64>>,
}

impl Cointegration {
    pub fn new(det_order: i32, k_ar_diff: usize) -> Self {
        Self {
            det_order,
            k_ar_diff,
            components: None,
        }
    }
}

fn detrend_columns(x: &Array2<f64>, det_order: i32) -> Array2<f64> {
    match det_order {
        o if o < 0 => x.clone(),
        0 => {
            let mean = x.mean_axis(Axis(0)).unwrap();
            x - &mean
        }
        _ => {
            // residual after removing a linear time trend
            let n = x.nrows();
            let design = Array2::from_shape_fn((n, 2), |(i, c)| {
                if c == 0 {
                    1.0
                } else {
                    i as f64
                }
            });
            match linalg::lstsq(&design, x) {
                Ok(beta) => x - &design.dot(&beta),
                Err(_) => x.clone(),
            }
        }
    }
}

fn partial_out(target: &Array2<f64>, lags: &Array2<f64>) -> Array2<f64> {
    if lags.ncols() == 0 {
        return target.clone();
    }
    match linalg::lstsq(lags, target) {
        Ok(beta) => target - &lags.dot(&beta),
        Err(_) => target.clone(),
    }
}

fn apply_components(
    df: &TimeSeriesFrame,
    components: &Option<Array2<f64>>,
    name: &'static str,
) -> Result<TimeSeriesFrame> {
    let comp = components.as_ref().ok_or(ForgeError::NotFitted(name))?;
    if df.ncols() != comp.ncols() {
        return Err(ForgeError::ShapeMismatch(format!(
            "{name} fitted on a different column count"
        )));
    }
    df.with_values(df.values().dot(&comp.t()))
}

fn invert_components(
    df: &TimeSeriesFrame,
    components: &Option<Array2<f64>>,
    name: &'static str,
) -> Result<TimeSeriesFrame> {
    let comp = components.as_ref().ok_or(ForgeError::NotFitted(name))?;
    let solved = linalg::lstsq(comp, &df.values().t().to_owned())?;
    df.with_values(solved.t().to_owned())
}

impl Transform for Cointegration {
    fn name(&self) -> &'static str {
        "Cointegration"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let k = df.ncols();
        if k < 2 {
            return Err(ForgeError::MultivariateRequired("Cointegration"));
        }
        let n = df.nrows();
        if n < self.k_ar_diff + k + 3 {
            return Err(ForgeError::InvalidParameter(
                "not enough rows for the requested lag order".into(),
            ));
        }
        let y = df.values().mapv(|v| if v.is_nan() { 0.0 } else { v });

        // first differences and lagged levels, trimmed to a common sample
        let m = n - 1 - self.k_ar_diff;
        let mut dy = Array2::zeros((m, k));
        let mut levels = Array2::zeros((m, k));
        let mut lagged = Array2::zeros((m, k * self.k_ar_diff));
        for t in 0..m {
            let row = t + self.k_ar_diff;
            for j in 0..k {
                dy[[t, j]] = y[[row + 1, j]] - y[[row, j]];
                levels[[t, j]] = y[[row, j]];
                for l in 0..self.k_ar_diff {
                    lagged[[t, l * k + j]] = y[[row - l, j]] - y[[row - l - 1, j]];
                }
            }
        }
        let dy = detrend_columns(&dy, self.det_order);
        let levels = detrend_columns(&levels, self.det_order);
        let r0 = partial_out(&dy, &lagged);
        let r1 = partial_out(&levels, &lagged);

        let mf = m as f64;
        let s00 = r0.t().dot(&r0) / mf;
        let s01 = r0.t().dot(&r1) / mf;
        let s11 = r1.t().dot(&r1) / mf;
        let s11_inv_sqrt = linalg::inv_sqrt_spd(&symmetrize(&s11))?;
        let s00_inv_s01 = linalg::lstsq(&s00, &s01)?;
        let middle = s01.t().dot(&s00_inv_s01);
        let m_mat = symmetrize(&s11_inv_sqrt.dot(&middle).dot(&s11_inv_sqrt));
        let (_vals, vecs) = linalg::jacobi_eigh(&m_mat)?;
        self.components = Some(s11_inv_sqrt.dot(&vecs).t().to_owned());
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        apply_components(df, &self.components, "Cointegration")
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        invert_components(df, &self.components, "Cointegration")
    }
}

/// Box-Tiao canonical decomposition: directions ordered by how
/// predictable they are from lagged values, using the regression
/// capability for the forecasting step.
pub struct Btcd {
    regression: RegressionSpec,
    max_lags: usize,
    components: Option<Array2<f64>>,
}

impl Btcd {
    pub fn new(regression: RegressionSpec, max_lags: usize) -> Result<Self> {
        if max_lags == 0 || max_lags > 10 {
            return Err(ForgeError::InvalidParameter(
                "btcd max_lags must be in 1..=10".into(),
            ));
        }
        Ok(Self {
            regression,
            max_lags,
            components: None,
        })
    }
}

impl Transform for Btcd {
    fn name(&self) -> &'static str {
        "BTCD"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let k = df.ncols();
        if k < 2 {
            return Err(ForgeError::MultivariateRequired("BTCD"));
        }
        let n = df.nrows();
        if n <= self.max_lags + k {
            return Err(ForgeError::InvalidParameter(
                "not enough rows for the requested lag order".into(),
            ));
        }
        let y = df.values().mapv(|v| if v.is_nan() { 0.0 } else { v });
        let m = n - self.max_lags;
        let mut design = Array2::zeros((m, k * self.max_lags));
        let mut target = Array2::zeros((m, k));
        for t in 0..m {
            for j in 0..k {
                target[[t, j]] = y[[t + self.max_lags, j]];
                for l in 0..self.max_lags {
                    design[[t, l * k + j]] = y[[t + self.max_lags - 1 - l, j]];
                }
            }
        }
        let mut model = self.regression.build();
        model.fit(&design, &target)?;
        let predicted = model.predict(&design)?;

        let sigma = symmetrize(&covariance(&target));
        let sigma_pred = symmetrize(&covariance(&predicted));
        let sigma_inv_sqrt = linalg::inv_sqrt_spd(&sigma)?;
        let m_mat = symmetrize(&sigma_inv_sqrt.dot(&sigma_pred).dot(&sigma_inv_sqrt));
        let (_vals, vecs) = linalg::jacobi_eigh(&m_mat)?;
        self.components = Some(sigma_inv_sqrt.dot(&vecs).t().to_owned());
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        apply_components(df, &self.components, "BTCD")
    }

    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        _mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        invert_components(df, &self.components, "BTCD")
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

    fn two_series(n: usize) -> TimeSeriesFrame {
        let mut vals = Vec::with_capacity(n * 2);
        for i in 0..n {
            let t = i as f64;
            vals.push((t / 9.0).sin() * 3.0 + 0.01 * t);
            vals.push((t / 9.0).sin() * -1.0 + (t / 4.0).cos() + 5.0);
        }
        frame(vals, 2)
    }

    #[test]
    fn test_stl_trend_of_trended_seasonal() {
        let n = 70;
        let vals: Vec<f64> = (0..n)
            .map(|i| 0.5 * i as f64 + 3.0 * ((i % 7) as f64 - 3.0))
            .collect();
        let df = frame(vals, 1);
        let mut t = StlFilter::new(false, DecompPart::Trend, 7).unwrap();
        let out = t.fit_transform(&df).unwrap();
        // interior trend tracks the underlying slope
        let mid_slope = (out.values()[[40, 0]] - out.values()[[20, 0]]) / 20.0;
        assert!((mid_slope - 0.5).abs() < 0.1, "slope {mid_slope}");
    }

    #[test]
    fn test_stl_nan_errors() {
        let mut vals = vec![1.0; 30];
        vals[4] = f64::NAN;
        let df = frame(vals, 1);
        let mut t = StlFilter::new(false, DecompPart::Resid, 7).unwrap();
        t.fit(&df).unwrap();
        assert!(t.transform(&df).is_err());
    }

    #[test]
    fn test_pca_roundtrip_and_errors() {
        let df = two_series(60);
        let mut t = Pca::new(false);
        let fwd = t.fit_transform(&df).unwrap();
        assert_eq!(fwd.columns()[0], "pca_0");
        let back = t.inverse_transform(&fwd, InverseMode::Original).unwrap();
        assert_eq!(back.columns(), df.columns());
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }

        let single = frame(vec![1.0, 2.0, 3.0], 1);
        assert!(Pca::new(false).fit(&single).is_err());
    }

    #[test]
    fn test_pca_whiten_roundtrip() {
        let df = two_series(80);
        let mut t = Pca::new(true);
        let fwd = t.fit_transform(&df).unwrap();
        let back = t.inverse_transform(&fwd, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fastica_roundtrip_and_errors() {
        let df = two_series(120);
        let mut t = FastIca::new(200, true);
        let fwd = t.fit_transform(&df).unwrap();
        let back = t.inverse_transform(&fwd, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }

        let single = frame(vec![1.0, 2.0, 3.0], 1);
        assert!(FastIca::new(100, true).fit(&single).is_err());
    }

    #[test]
    fn test_cointegration_roundtrip_and_errors() {
        let df = two_series(100);
        let mut t = Cointegration::new(0, 1);
        let fwd = t.fit_transform(&df).unwrap();
        assert_eq!(fwd.ncols(), 2);
        let back = t.inverse_transform(&fwd, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }

        let single = frame(vec![1.0, 2.0, 3.0], 1);
        assert!(Cointegration::new(0, 1).fit(&single).is_err());
    }

    #[test]
    fn test_btcd_roundtrip_and_errors() {
        let df = two_series(100);
        let mut t = Btcd::new(RegressionSpec::Linear, 2).unwrap();
        let fwd = t.fit_transform(&df).unwrap();
        let back = t.inverse_transform(&fwd, InverseMode::Original).unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }

        let single = frame(vec![1.0, 2.0, 3.0], 1);
        assert!(Btcd::new(RegressionSpec::Linear, 2).unwrap().fit(&single).is_err());
    }
}

//! Smoothing filters. All of these are lossy smoothers with an identity
//! inverse; the smoothed series simply replaces the original.

use crate::error::{ForgeError, Result};
use crate::frame::TimeSeriesFrame;
use crate::linalg;
use crate::transforms::{InverseMode, TrendPart, Transform};
use ndarray::{Array1, Array2};
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

/// Butterworth pass band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandType {
    Lowpass,
    Highpass,
}

/// Savitzky-Golay edge handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavgolMode {
    Mirror,
    Nearest,
    /// Polynomial fit over the edge window (the usual default).
    Interp,
}

/// Filter design parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FilterDesign {
    /// Magnitude of the analytic signal.
    Hilbert,
    /// Local-statistics Wiener filter with a window of three.
    Wiener,
    Savgol {
        window_length: usize,
        polyorder: usize,
        deriv: usize,
        mode: SavgolMode,
    },
    Butter {
        order: usize,
        /// Cutoff as a fraction of the Nyquist frequency, in (0, 1).
        cutoff: f64,
        band: BandType,
    },
}

/// Per-column smoothing filter.
#[derive(Debug, Clone)]
pub struct SignalFilter {
    design: FilterDesign,
}

impl SignalFilter {
    pub fn new(design: FilterDesign) -> Result<Self> {
        match &design {
            FilterDesign::Savgol {
                window_length,
                polyorder,
                ..
            } => {
                if window_length % 2 == 0 || *window_length < 3 {
                    return Err(ForgeError::InvalidParameter(
                        "savgol window must be odd and at least 3".into(),
                    ));
                }
                if polyorder >= window_length {
                    return Err(ForgeError::InvalidParameter(
                        "savgol polyorder must be smaller than the window".into(),
                    ));
                }
            }
            FilterDesign::Butter { order, cutoff, .. } => {
                if *order == 0 || *order > 8 {
                    return Err(ForgeError::InvalidParameter(
                        "butterworth order must be in 1..=8".into(),
                    ));
                }
                if !(*cutoff > 0.0 && *cutoff < 1.0) {
                    return Err(ForgeError::InvalidParameter(format!(
                        "butterworth cutoff must be in (0, 1), got {cutoff}"
                    )));
                }
            }
            _ => {}
        }
        Ok(Self { design })
    }

    fn apply_column(&self, col: &[f64]) -> Result<Vec<f64>> {
        match &self.design {
            FilterDesign::Hilbert => Ok(hilbert_envelope(col)),
            FilterDesign::Wiener => Ok(wiener3(col)),
            FilterDesign::Savgol {
                window_length,
                polyorder,
                deriv,
                mode,
            } => savgol(col, *window_length, *polyorder, *deriv, *mode),
            FilterDesign::Butter {
                order,
                cutoff,
                band,
            } => {
                let sos = butter_sos(*order, *cutoff, *band)?;
                Ok(sosfiltfilt(&sos, col))
            }
        }
    }
}

impl Transform for SignalFilter {
    fn name(&self) -> &'static str {
        "ScipyFilter"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.nrows() < 3 {
            return Err(ForgeError::InvalidParameter(
                "filters need at least three rows".into(),
            ));
        }
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let filled = if df.has_nan() { df.ffill().bfill() } else { df.clone() };
        let (n, k) = (filled.nrows(), filled.ncols());
        let mut out = Array2::zeros((n, k));
        for j in 0..k {
            let col: Vec<f64> = filled.values().column(j).to_vec();
            let smoothed = self.apply_column(&col)?;
            for (i, v) in smoothed.into_iter().enumerate() {
                out[[i, j]] = v;
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

fn hilbert_envelope(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut buf: Vec<Complex64> = x.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(n).process(&mut buf);
    // analytic-signal multiplier: keep DC/Nyquist, double positives
    for (k, c) in buf.iter_mut().enumerate() {
        let factor = if k == 0 || (n % 2 == 0 && k == n / 2) {
            1.0
        } else if k < n.div_ceil(2) {
            2.0
        } else {
            0.0
        };
        *c *= factor;
    }
    planner.plan_fft_inverse(n).process(&mut buf);
    buf.iter().map(|c| c.norm() / n as f64).collect()
}

fn wiener3(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut mean = vec![0.0; n];
    let mut var = vec![0.0; n];
    for i in 0..n {
        let lo = i.saturating_sub(1);
        let hi = (i + 2).min(n);
        let w = &x[lo..hi];
        let m = w.iter().sum::<f64>() / w.len() as f64;
        let v = w.iter().map(|&y| y * y).sum::<f64>() / w.len() as f64 - m * m;
        mean[i] = m;
        var[i] = v.max(0.0);
    }
    let noise = var.iter().sum::<f64>() / n as f64;
    (0..n)
        .map(|i| {
            if var[i] > noise && var[i] > 0.0 {
                mean[i] + (1.0 - noise / var[i]) * (x[i] - mean[i])
            } else {
                mean[i]
            }
        })
        .collect()
}

fn savgol(
    x: &[f64],
    window: usize,
    polyorder: usize,
    deriv: usize,
    mode: SavgolMode,
) -> Result<Vec<f64>> {
    let n = x.len();
    if n < window {
        return Err(ForgeError::InvalidParameter(format!(
            "savgol window {window} exceeds {n} rows"
        )));
    }
    if deriv > polyorder {
        return Ok(vec![0.0; n]);
    }
    let h = window / 2;

    // projection coefficients for the centered window
    let mut design = Array2::zeros((window, polyorder + 1));
    for i in 0..window {
        let off = i as f64 - h as f64;
        let mut p = 1.0;
        for m in 0..=polyorder {
            design[[i, m]] = p;
            p *= off;
        }
    }
    let gram = design.t().dot(&design);
    let proj = linalg::solve_multi(&gram, &design.t().to_owned())?;
    let dfact: f64 = (1..=deriv).map(|v| v as f64).product::<f64>().max(1.0);
    let coeffs: Vec<f64> = proj.row(deriv).iter().map(|&c| c * dfact).collect();

    let sample = |i: isize| -> f64 {
        match mode {
            SavgolMode::Nearest | SavgolMode::Interp => {
                x[i.clamp(0, n as isize - 1) as usize]
            }
            SavgolMode::Mirror => {
                let mut i = i;
                if i < 0 {
                    i = -i;
                }
                if i >= n as isize {
                    i = 2 * (n as isize - 1) - i;
                }
                x[i.clamp(0, n as isize - 1) as usize]
            }
        }
    };
    let mut out = vec![0.0; n];
    for i in 0..n {
        let mut acc = 0.0;
        for (c, &w) in coeffs.iter().enumerate() {
            acc += w * sample(i as isize - h as isize + c as isize);
        }
        out[i] = acc;
    }

    if mode == SavgolMode::Interp {
        // exact polynomial fit over the first and last window
        let edge = |slice: &[f64], positions: std::ops::Range<usize>, base: usize| -> Result<Vec<f64>> {
            let mut a = Array2::zeros((window, polyorder + 1));
            for (i, row) in a.rows_mut().into_iter().enumerate() {
                let mut p = 1.0;
                let mut row = row;
                for m in 0..=polyorder {
                    row[m] = p;
                    p *= i as f64;
                }
            }
            let y = Array2::from_shape_fn((window, 1), |(i, _)| slice[i]);
            let beta = linalg::lstsq(&a, &y)?;
            Ok(positions
                .map(|pos| {
                    let t = (pos - base) as f64;
                    let mut acc = 0.0;
                    for m in deriv..=polyorder {
                        let mut fall = 1.0;
                        for q in 0..deriv {
                            fall *= (m - q) as f64;
                        }
                        acc += beta[[m, 0]] * fall * t.powi((m - deriv) as i32);
                    }
                    acc
                })
                .collect())
        };
        let head = edge(&x[..window], 0..h, 0)?;
        out[..h].copy_from_slice(&head);
        let tail = edge(&x[n - window..], (n - h)..n, n - window)?;
        out[(n - h)..].copy_from_slice(&tail);
    }
    Ok(out)
}

/// One second-order section: numerator `b0..b2`, denominator `1, a1, a2`.
#[derive(Debug, Clone, Copy)]
struct Sos {
    b: [f64; 3],
    a: [f64; 2],
}

fn butter_sos(order: usize, cutoff: f64, band: BandType) -> Result<Vec<Sos>> {
    // analog Butterworth prototype poles on the unit circle
    let n = order;
    let mut poles: Vec<Complex64> = (1..=n)
        .map(|k| {
            let theta = std::f64::consts::PI * (2 * k + n - 1) as f64 / (2 * n) as f64;
            Complex64::new(theta.cos(), theta.sin())
        })
        .collect();
    // prewarp and frequency-transform, then bilinear map (fs = 2)
    let warped = 4.0 * (std::f64::consts::PI * cutoff / 2.0).tan();
    for p in poles.iter_mut() {
        *p = match band {
            BandType::Lowpass => *p * warped,
            BandType::Highpass => warped / *p,
        };
    }
    let fs2 = Complex64::new(4.0, 0.0);
    let zpoles: Vec<Complex64> = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();
    let zero = match band {
        BandType::Lowpass => -1.0,
        BandType::Highpass => 1.0,
    };

    // pair poles into sections; an odd order leaves one real pole
    let mut sections = Vec::new();
    let mut remaining: Vec<Complex64> = zpoles
        .iter()
        .copied()
        .filter(|p| p.im >= 0.0)
        .collect();
    remaining.sort_by(|a, b| {
        b.im.abs()
            .partial_cmp(&a.im.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for p in remaining {
        if p.im.abs() > 1e-10 {
            sections.push(Sos {
                b: [1.0, -2.0 * zero, zero * zero],
                a: [-2.0 * p.re, p.norm_sqr()],
            });
        } else {
            sections.push(Sos {
                b: [1.0, -zero, 0.0],
                a: [-p.re, 0.0],
            });
        }
    }

    // normalize unit gain at DC (lowpass) or Nyquist (highpass)
    let eval_at = match band {
        BandType::Lowpass => 1.0,
        BandType::Highpass => -1.0,
    };
    let mut gain = 1.0;
    for s in &sections {
        let num = s.b[0] + s.b[1] * eval_at + s.b[2] * eval_at * eval_at;
        let den = 1.0 + s.a[0] * eval_at + s.a[1] * eval_at * eval_at;
        gain *= num / den;
    }
    if gain.abs() < 1e-300 {
        return Err(ForgeError::Numerical(
            "degenerate butterworth design".into(),
        ));
    }
    let scale = 1.0 / gain;
    if let Some(first) = sections.first_mut() {
        for b in first.b.iter_mut() {
            *b *= scale;
        }
    }
    Ok(sections)
}

fn sosfilt(sos: &[Sos], x: &[f64]) -> Vec<f64> {
    let mut y = x.to_vec();
    for s in sos {
        let (mut s0, mut s1) = (0.0, 0.0);
        for v in y.iter_mut() {
            let xin = *v;
            let out = s.b[0] * xin + s0;
            s0 = s.b[1] * xin - s.a[0] * out + s1;
            s1 = s.b[2] * xin - s.a[1] * out;
            *v = out;
        }
    }
    y
}

fn sosfiltfilt(sos: &[Sos], x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let padlen = (3 * (2 * sos.len() + 1)).min(n.saturating_sub(1));
    // odd extension at both ends
    let mut ext = Vec::with_capacity(n + 2 * padlen);
    for i in (1..=padlen).rev() {
        ext.push(2.0 * x[0] - x[i]);
    }
    ext.extend_from_slice(x);
    for i in 1..=padlen {
        ext.push(2.0 * x[n - 1] - x[n - 1 - i]);
    }
    let mut fwd = sosfilt(sos, &ext);
    fwd.reverse();
    let mut back = sosfilt(sos, &fwd);
    back.reverse();
    back[padlen..padlen + n].to_vec()
}

/// Hodrick-Prescott filter. Solves the pentadiagonal smoothing system per
/// column and returns either the trend or the cycle.
#[derive(Debug, Clone)]
pub struct HpFilter {
    part: TrendPart,
    lamb: f64,
}

impl HpFilter {
    pub fn new(part: TrendPart, lamb: f64) -> Result<Self> {
        if !(lamb > 0.0) {
            return Err(ForgeError::InvalidParameter(
                "hp filter lambda must be positive".into(),
            ));
        }
        Ok(Self { part, lamb })
    }
}

impl Transform for HpFilter {
    fn name(&self) -> &'static str {
        "HPFilter"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.nrows() < 4 {
            return Err(ForgeError::InvalidParameter(
                "hp filter needs at least four rows".into(),
            ));
        }
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if df.has_nan() {
            return Err(ForgeError::NanProduced(
                "hp filter requires complete input".into(),
            ));
        }
        let n = df.nrows();
        // bands of I + lambda * D'D for the second-difference matrix D
        let mut d0 = vec![1.0; n];
        let mut d1 = vec![0.0; n - 1];
        let mut d2 = vec![0.0; n - 2];
        for j in 0..(n - 2) {
            let row = [1.0, -2.0, 1.0];
            for (a, &va) in row.iter().enumerate() {
                d0[j + a] += self.lamb * va * va;
                if a + 1 < 3 {
                    d1[j + a] += self.lamb * va * row[a + 1];
                }
            }
            d2[j] += self.lamb * row[0] * row[2];
        }
        let mut out = Array2::zeros((n, df.ncols()));
        for j in 0..df.ncols() {
            let y = Array1::from_iter(df.values().column(j).iter().copied());
            let trend = linalg::solve_pentadiagonal(&d0, &d1, &d2, &y)?;
            for i in 0..n {
                out[[i, j]] = match self.part {
                    TrendPart::Trend => trend[i],
                    TrendPart::Cycle => y[i] - trend[i],
                };
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

enum ConvolutionKind {
    /// Baxter-King style band-pass residual removal.
    BandPass { low: f64, high: f64, k: usize },
    /// Short two-tap smoothing kernel.
    TwoTap,
}

/// Fixed-kernel convolution filters.
pub struct ConvolutionFilter {
    kind: ConvolutionKind,
}

impl ConvolutionFilter {
    /// Remove business-cycle frequencies (periods 6 to 32 samples).
    pub fn bandpass() -> Self {
        Self {
            kind: ConvolutionKind::BandPass {
                low: 6.0,
                high: 32.0,
                k: 1,
            },
        }
    }

    /// Light smoothing with a `[0.75, 0.25]` kernel.
    pub fn smoothing() -> Self {
        Self {
            kind: ConvolutionKind::TwoTap,
        }
    }
}

impl Transform for ConvolutionFilter {
    fn name(&self) -> &'static str {
        match self.kind {
            ConvolutionKind::BandPass { .. } => "bkfilter",
            ConvolutionKind::TwoTap => "convolution_filter",
        }
    }

    fn fit(&mut self, _df: &TimeSeriesFrame) -> Result<()> {
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let x = df.values();
        let (n, cols) = (x.nrows(), x.ncols());
        let mut out = Array2::from_elem((n, cols), f64::NAN);
        match self.kind {
            ConvolutionKind::BandPass { low, high, k } => {
                let w_lo = 2.0 * std::f64::consts::PI / high;
                let w_hi = 2.0 * std::f64::consts::PI / low;
                let span = 2 * k + 1;
                let mut weights = vec![0.0; span];
                for (idx, w) in weights.iter_mut().enumerate() {
                    let j = idx as f64 - k as f64;
                    *w = if j == 0.0 {
                        (w_hi - w_lo) / std::f64::consts::PI
                    } else {
                        ((w_hi * j).sin() - (w_lo * j).sin()) / (std::f64::consts::PI * j)
                    };
                }
                // zero total weight so the filter passes no level
                let mean_w = weights.iter().sum::<f64>() / span as f64;
                for w in weights.iter_mut() {
                    *w -= mean_w;
                }
                for j in 0..cols {
                    for i in k..n.saturating_sub(k) {
                        let mut cycle = 0.0;
                        for (idx, &w) in weights.iter().enumerate() {
                            cycle += w * x[[i + idx - k, j]];
                        }
                        out[[i, j]] = x[[i, j]] - cycle;
                    }
                }
            }
            ConvolutionKind::TwoTap => {
                for j in 0..cols {
                    for i in 1..n {
                        out[[i, j]] = 0.75 * x[[i, j]] + 0.25 * x[[i - 1, j]];
                    }
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

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

    fn noisy_wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                (2.0 * std::f64::consts::PI * t / 50.0).sin()
                    + 0.5 * (2.0 * std::f64::consts::PI * t / 3.0).sin()
            })
            .collect()
    }

    #[test]
    fn test_hilbert_envelope_of_pure_tone() {
        let n = 256;
        let vals: Vec<f64> = (0..n)
            .map(|i| 2.0 * (2.0 * std::f64::consts::PI * i as f64 / 16.0).sin())
            .collect();
        let df = frame(vals);
        let mut f = SignalFilter::new(FilterDesign::Hilbert).unwrap();
        let out = f.fit_transform(&df).unwrap();
        // envelope of a constant-amplitude tone is the amplitude
        for v in out.values().iter().skip(20).take(n - 40) {
            assert!((v - 2.0).abs() < 0.1, "envelope {v}");
        }
    }

    #[test]
    fn test_wiener_reduces_variance() {
        let df = frame(noisy_wave(200));
        let mut f = SignalFilter::new(FilterDesign::Wiener).unwrap();
        let out = f.fit_transform(&df).unwrap();
        assert!(out.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_savgol_preserves_polynomial() {
        // a polynomial below the filter order passes through exactly
        let vals: Vec<f64> = (0..50).map(|i| 1.0 + 0.3 * i as f64).collect();
        let df = frame(vals.clone());
        let mut f = SignalFilter::new(FilterDesign::Savgol {
            window_length: 7,
            polyorder: 2,
            deriv: 0,
            mode: SavgolMode::Interp,
        })
        .unwrap();
        let out = f.fit_transform(&df).unwrap();
        for (a, b) in out.values().iter().zip(vals.iter()) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn test_savgol_derivative_of_line_is_slope() {
        let vals: Vec<f64> = (0..50).map(|i| 2.0 * i as f64).collect();
        let df = frame(vals);
        let mut f = SignalFilter::new(FilterDesign::Savgol {
            window_length: 7,
            polyorder: 2,
            deriv: 1,
            mode: SavgolMode::Nearest,
        })
        .unwrap();
        let out = f.fit_transform(&df).unwrap();
        for v in out.values().iter().skip(4).take(40) {
            assert!((v - 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_butter_lowpass_keeps_dc_removes_ripple() {
        let n = 300;
        let vals: Vec<f64> = (0..n)
            .map(|i| 5.0 + (2.0 * std::f64::consts::PI * i as f64 / 4.0).sin())
            .collect();
        let df = frame(vals);
        let mut f = SignalFilter::new(FilterDesign::Butter {
            order: 4,
            cutoff: 0.1,
            band: BandType::Lowpass,
        })
        .unwrap();
        let out = f.fit_transform(&df).unwrap();
        for v in out.values().iter().skip(30).take(n - 60) {
            assert!((v - 5.0).abs() < 0.2, "lowpass output {v}");
        }
    }

    #[test]
    fn test_butter_highpass_removes_level() {
        let n = 300;
        let vals: Vec<f64> = (0..n)
            .map(|i| 100.0 + (2.0 * std::f64::consts::PI * i as f64 / 4.0).sin())
            .collect();
        let df = frame(vals);
        let mut f = SignalFilter::new(FilterDesign::Butter {
            order: 3,
            cutoff: 0.3,
            band: BandType::Highpass,
        })
        .unwrap();
        let out = f.fit_transform(&df).unwrap();
        let mean = out.col_mean()[0];
        assert!(mean.abs() < 1.0, "highpass mean {mean}");
    }

    #[test]
    fn test_butter_invalid_params() {
        assert!(SignalFilter::new(FilterDesign::Butter {
            order: 0,
            cutoff: 0.5,
            band: BandType::Lowpass,
        })
        .is_err());
        assert!(SignalFilter::new(FilterDesign::Butter {
            order: 2,
            cutoff: 1.5,
            band: BandType::Lowpass,
        })
        .is_err());
    }

    #[test]
    fn test_hp_filter_trend_of_line_is_line() {
        let vals: Vec<f64> = (0..60).map(|i| 3.0 + 0.5 * i as f64).collect();
        let df = frame(vals.clone());
        let mut f = HpFilter::new(TrendPart::Trend, 1600.0).unwrap();
        f.fit(&df).unwrap();
        let out = f.transform(&df).unwrap();
        // a line has zero second difference, so it is its own trend
        for (a, b) in out.values().iter().zip(vals.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_hp_filter_nan_errors() {
        let df = frame(vec![1.0, f64::NAN, 3.0, 4.0, 5.0]);
        let mut f = HpFilter::new(TrendPart::Trend, 1600.0).unwrap();
        f.fit(&df).unwrap();
        assert!(f.transform(&df).is_err());
    }

    #[test]
    fn test_bandpass_and_twotap_have_no_nan() {
        let df = frame(noisy_wave(100));
        for mut f in [ConvolutionFilter::bandpass(), ConvolutionFilter::smoothing()] {
            let out = f.fit_transform(&df).unwrap();
            assert!(!out.has_nan());
            assert_eq!(out.nrows(), 100);
        }
    }
}

//! Outlier detection and removal.

use crate::error::{ForgeError, Result};
use crate::fillna::FillMethod;
use crate::frame::TimeSeriesFrame;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::transforms::{InverseMode, Transform};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Detection strategy and its cutoffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AnomalyMethod {
    Zscore { threshold: f64 },
    RollingZscore { window: usize, threshold: f64 },
    Iqr { multiplier: f64 },
    Mad { threshold: f64 },
}

/// Stateless detector over a frame: `-1` flags an outlier cell, `1` is
/// normal; scores grow with distance from the expected value.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    method: AnomalyMethod,
}

impl AnomalyDetector {
    pub fn new(method: AnomalyMethod) -> Self {
        Self { method }
    }

    pub fn detect(&self, df: &TimeSeriesFrame) -> Result<(Array2<i8>, Array2<f64>)> {
        let (n, k) = (df.nrows(), df.ncols());
        let mut scores = Array2::zeros((n, k));
        let threshold = match &self.method {
            AnomalyMethod::Zscore { threshold } => {
                let mean = df.col_mean();
                let std = df.col_std();
                for ((i, j), s) in scores.indexed_iter_mut() {
                    let v = df.values()[[i, j]];
                    if !v.is_nan() && std[j] > 0.0 {
                        *s = (v - mean[j]).abs() / std[j];
                    }
                }
                *threshold
            }
            AnomalyMethod::RollingZscore { window, threshold } => {
                if *window < 3 {
                    return Err(ForgeError::InvalidParameter(
                        "rolling zscore window must be at least 3".into(),
                    ));
                }
                for j in 0..k {
                    for i in 0..n {
                        let lo = i.saturating_sub(window - 1);
                        let w: Vec<f64> = (lo..=i)
                            .map(|r| df.values()[[r, j]])
                            .filter(|v| !v.is_nan())
                            .collect();
                        if w.len() < 2 {
                            continue;
                        }
                        let m = w.iter().sum::<f64>() / w.len() as f64;
                        let var = w.iter().map(|&v| (v - m) * (v - m)).sum::<f64>()
                            / (w.len() - 1) as f64;
                        let std = var.sqrt();
                        let v = df.values()[[i, j]];
                        if !v.is_nan() && std > 0.0 {
                            scores[[i, j]] = (v - m).abs() / std;
                        }
                    }
                }
                *threshold
            }
            AnomalyMethod::Iqr { multiplier } => {
                let q1 = df.col_quantile(0.25);
                let q3 = df.col_quantile(0.75);
                for ((i, j), s) in scores.indexed_iter_mut() {
                    let iqr = (q3[j] - q1[j]).max(1e-12);
                    let lo = q1[j] - multiplier * iqr;
                    let hi = q3[j] + multiplier * iqr;
                    let v = df.values()[[i, j]];
                    if v.is_nan() {
                        continue;
                    }
                    *s = if v < lo {
                        (lo - v) / iqr
                    } else if v > hi {
                        (v - hi) / iqr
                    } else {
                        0.0
                    };
                }
                0.0
            }
            AnomalyMethod::Mad { threshold } => {
                let med = df.col_median();
                let mut mad = Array1::zeros(k);
                for j in 0..k {
                    let mut dev: Vec<f64> = df
                        .values()
                        .column(j)
                        .iter()
                        .filter(|v| !v.is_nan())
                        .map(|&v| (v - med[j]).abs())
                        .collect();
                    dev.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    mad[j] = if dev.is_empty() { 0.0 } else { dev[dev.len() / 2] };
                }
                for ((i, j), s) in scores.indexed_iter_mut() {
                    // 1.4826 rescales MAD to a normal-consistent sigma
                    let sigma = 1.4826 * mad[j];
                    let v = df.values()[[i, j]];
                    if !v.is_nan() && sigma > 0.0 {
                        *s = (v - med[j]).abs() / sigma;
                    }
                }
                *threshold
            }
        };
        let mask = scores.mapv(|s| if s > threshold { -1i8 } else { 1i8 });
        Ok((mask, scores))
    }
}

/// Blank out detected outlier cells and optionally refill them. There is
/// no inverse; removal is intentionally lossy.
pub struct AnomalyRemoval {
    method: AnomalyMethod,
    pre_clean: Option<PipelineConfig>,
    fillna: Option<FillMethod>,
    mask: Option<Array2<i8>>,
    scores: Option<Array2<f64>>,
    score_cutoffs: Option<Array1<f64>>,
}

impl AnomalyRemoval {
    pub fn new(
        method: AnomalyMethod,
        pre_clean: Option<PipelineConfig>,
        fillna: Option<FillMethod>,
    ) -> Self {
        Self {
            method,
            pre_clean,
            fillna,
            mask: None,
            scores: None,
            score_cutoffs: None,
        }
    }

    pub fn mask(&self) -> Option<&Array2<i8>> {
        self.mask.as_ref()
    }

    pub fn scores(&self) -> Option<&Array2<f64>> {
        self.scores.as_ref()
    }

    /// Classify new scores against per-column cutoffs learned from the
    /// fit. The cutoffs are trained on first use.
    pub fn score_to_anomaly(&mut self, scores: &Array2<f64>) -> Result<Array2<i8>> {
        if self.score_cutoffs.is_none() {
            let fit_scores = self
                .scores
                .as_ref()
                .ok_or(ForgeError::NotFitted("AnomalyRemoval"))?;
            let mask = self.mask.as_ref().unwrap();
            let k = fit_scores.ncols();
            let mut cutoffs = Array1::from_elem(k, f64::INFINITY);
            for ((i, j), &m) in mask.indexed_iter() {
                if m == -1 {
                    cutoffs[j] = cutoffs[j].min(fit_scores[[i, j]]);
                }
            }
            self.score_cutoffs = Some(cutoffs);
        }
        let cutoffs = self.score_cutoffs.as_ref().unwrap();
        if scores.ncols() != cutoffs.len() {
            return Err(ForgeError::ShapeMismatch(
                "score classifier fitted on a different column count".into(),
            ));
        }
        Ok(Array2::from_shape_fn(scores.dim(), |(i, j)| {
            if scores[[i, j]] >= cutoffs[j] {
                -1
            } else {
                1
            }
        }))
    }
}

impl Transform for AnomalyRemoval {
    fn name(&self) -> &'static str {
        "AnomalyRemoval"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        let detection_input = match &self.pre_clean {
            Some(cfg) => {
                let mut pipeline = Pipeline::from_config(cfg.clone())?;
                pipeline.fit_transform(df)?
            }
            None => df.clone(),
        };
        let (mask, scores) = AnomalyDetector::new(self.method.clone()).detect(&detection_input)?;
        self.mask = Some(mask);
        self.scores = Some(scores);
        self.score_cutoffs = None;
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let fitted_mask = self
            .mask
            .as_ref()
            .ok_or(ForgeError::NotFitted("AnomalyRemoval"))?;
        let mask = if fitted_mask.dim() == df.values().dim() {
            fitted_mask.clone()
        } else {
            AnomalyDetector::new(self.method.clone()).detect(df)?.0
        };
        let mut values = df.values().clone();
        for ((i, j), v) in values.indexed_iter_mut() {
            if mask[[i, j]] == -1 {
                *v = f64::NAN;
            }
        }
        let out = df.with_values(values)?;
        match &self.fillna {
            Some(fill) => fill.apply(&out),
            None => Ok(out),
        }
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

    fn series_with_spike() -> TimeSeriesFrame {
        let mut vals: Vec<f64> = (0..60).map(|i| (i as f64 / 5.0).sin()).collect();
        vals[30] = 50.0;
        frame(vals)
    }

    #[test]
    fn test_zscore_flags_single_spike() {
        let df = series_with_spike();
        let (mask, scores) = AnomalyDetector::new(AnomalyMethod::Zscore { threshold: 3.0 })
            .detect(&df)
            .unwrap();
        let flagged: Vec<usize> = mask
            .column(0)
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| (m == -1).then_some(i))
            .collect();
        assert_eq!(flagged, vec![30]);
        assert!(scores[[30, 0]] > 3.0);
    }

    #[test]
    fn test_iqr_and_mad_flag_spike() {
        let df = series_with_spike();
        for method in [
            AnomalyMethod::Iqr { multiplier: 1.5 },
            AnomalyMethod::Mad { threshold: 5.0 },
        ] {
            let (mask, _) = AnomalyDetector::new(method).detect(&df).unwrap();
            assert_eq!(mask[[30, 0]], -1);
            assert_eq!(mask[[10, 0]], 1);
        }
    }

    #[test]
    fn test_rolling_zscore_catches_level_break() {
        let mut vals = vec![1.0; 50];
        vals[40] = 30.0;
        let df = frame(vals);
        let (mask, _) = AnomalyDetector::new(AnomalyMethod::RollingZscore {
            window: 10,
            threshold: 2.5,
        })
        .detect(&df)
        .unwrap();
        assert_eq!(mask[[40, 0]], -1);
    }

    #[test]
    fn test_removal_blanks_and_refills() {
        let df = series_with_spike();
        let mut t = AnomalyRemoval::new(
            AnomalyMethod::Zscore { threshold: 3.0 },
            None,
            Some(FillMethod::Ffill),
        );
        let out = t.fit_transform(&df).unwrap();
        assert!(!out.has_nan());
        assert!(out.values()[[30, 0]].abs() < 2.0);
    }

    #[test]
    fn test_removal_without_fill_leaves_nan() {
        let df = series_with_spike();
        let mut t = AnomalyRemoval::new(AnomalyMethod::Zscore { threshold: 3.0 }, None, None);
        let out = t.fit_transform(&df).unwrap();
        assert!(out.values()[[30, 0]].is_nan());
    }

    #[test]
    fn test_score_classifier_matches_fit() {
        let df = series_with_spike();
        let mut t = AnomalyRemoval::new(AnomalyMethod::Zscore { threshold: 3.0 }, None, None);
        t.fit(&df).unwrap();
        let scores = t.scores().unwrap().clone();
        let reclassified = t.score_to_anomaly(&scores).unwrap();
        assert_eq!(reclassified, *t.mask().unwrap());
    }
}

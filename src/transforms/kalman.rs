//! Kalman filter + Rauch-Tung-Striebel smoother with a configurable
//! linear state space, applied independently per series.

use crate::error::{ForgeError, Result};
use crate::frame::TimeSeriesFrame;
use crate::linalg;
use crate::transforms::{InverseMode, Transform};
use ndarray::{Array1, Array2};
use rayon::prelude::*;

/// Column count above which smoothing fans out over rayon.
const PARALLEL_COLUMN_THRESHOLD: usize = 100;

/// Smooth each series through a fixed state-space model and keep the
/// smoothed observation. Missing values are skipped in the update step,
/// so the smoother doubles as an interpolator.
#[derive(Debug, Clone)]
pub struct KalmanSmoothing {
    state_transition: Array2<f64>,
    process_noise: Array2<f64>,
    observation_model: Array1<f64>,
    observation_noise: f64,
}

impl KalmanSmoothing {
    pub fn new(
        state_transition: Vec<Vec<f64>>,
        process_noise: Vec<Vec<f64>>,
        observation_model: Vec<f64>,
        observation_noise: f64,
    ) -> Result<Self> {
        let dim = state_transition.len();
        if dim == 0
            || state_transition.iter().any(|r| r.len() != dim)
            || process_noise.len() != dim
            || process_noise.iter().any(|r| r.len() != dim)
            || observation_model.len() != dim
        {
            return Err(ForgeError::ShapeMismatch(
                "kalman matrices must agree on state dimension".into(),
            ));
        }
        if !(observation_noise > 0.0) {
            return Err(ForgeError::InvalidParameter(
                "observation noise must be positive".into(),
            ));
        }
        let a = Array2::from_shape_fn((dim, dim), |(i, j)| state_transition[i][j]);
        let q = Array2::from_shape_fn((dim, dim), |(i, j)| process_noise[i][j]);
        let h = Array1::from_vec(observation_model);
        Ok(Self {
            state_transition: a,
            process_noise: q,
            observation_model: h,
            observation_noise,
        })
    }

    fn smooth_column(&self, y: &[f64]) -> Result<Vec<f64>> {
        let n = y.len();
        let dim = self.observation_model.len();
        let a = &self.state_transition;
        let q = &self.process_noise;
        let h = &self.observation_model;
        let r = self.observation_noise;

        // forward pass, diffuse-ish prior
        let mut x = Array1::zeros(dim);
        let mut p: Array2<f64> = Array2::eye(dim) * 1e7;
        let mut filtered_x = Vec::with_capacity(n);
        let mut filtered_p = Vec::with_capacity(n);
        let mut predicted_x = Vec::with_capacity(n);
        let mut predicted_p = Vec::with_capacity(n);

        for (t, &obs) in y.iter().enumerate() {
            if t > 0 {
                x = a.dot(&x);
                p = a.dot(&p).dot(&a.t()) + q;
            }
            predicted_x.push(x.clone());
            predicted_p.push(p.clone());

            if !obs.is_nan() {
                let s = h.dot(&p.dot(h)) + r;
                if s <= 0.0 {
                    return Err(ForgeError::Numerical(
                        "kalman innovation variance collapsed".into(),
                    ));
                }
                let gain = p.dot(h) / s;
                let innovation = obs - h.dot(&x);
                x = &x + &(&gain * innovation);
                let kh = Array2::from_shape_fn((dim, dim), |(i, j)| gain[i] * h[j]);
                p = (Array2::eye(dim) - kh).dot(&p);
            }
            filtered_x.push(x.clone());
            filtered_p.push(p.clone());
        }

        // backward smoothing pass
        let mut smoothed = vec![Array1::zeros(dim); n];
        smoothed[n - 1] = filtered_x[n - 1].clone();
        let mut next_p = filtered_p[n - 1].clone();
        for t in (0..n - 1).rev() {
            // gain = P_f A' (P_pred)^-1
            let pa = filtered_p[t].dot(&a.t());
            let gain = match linalg::solve_multi(
                &predicted_p[t + 1].t().to_owned(),
                &pa.t().to_owned(),
            ) {
                Ok(g) => g.t().to_owned(),
                Err(_) => Array2::zeros((dim, dim)),
            };
            let dx = &smoothed[t + 1] - &predicted_x[t + 1];
            smoothed[t] = &filtered_x[t] + &gain.dot(&dx);
            let dp = &next_p - &predicted_p[t + 1];
            next_p = &filtered_p[t] + &gain.dot(&dp).dot(&gain.t());
        }

        Ok(smoothed.iter().map(|s| h.dot(s)).collect())
    }
}

impl Transform for KalmanSmoothing {
    fn name(&self) -> &'static str {
        "KalmanSmoothing"
    }

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        if df.nrows() < 2 {
            return Err(ForgeError::InvalidParameter(
                "kalman smoothing needs at least two rows".into(),
            ));
        }
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if df.is_empty() {
            return Ok(df.clone());
        }
        let (n, k) = (df.nrows(), df.ncols());
        let columns: Vec<Vec<f64>> = (0..k)
            .map(|j| df.values().column(j).to_vec())
            .collect();
        let smoothed: Vec<Result<Vec<f64>>> = if k >= PARALLEL_COLUMN_THRESHOLD {
            columns.par_iter().map(|c| self.smooth_column(c)).collect()
        } else {
            columns.iter().map(|c| self.smooth_column(c)).collect()
        };
        let mut out = Array2::zeros((n, k));
        for (j, col) in smoothed.into_iter().enumerate() {
            for (i, v) in col?.into_iter().enumerate() {
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

/// Local linear trend state space (level + slope).
pub fn local_linear_trend_params() -> (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<f64>, f64) {
    (
        vec![vec![1.0, 1.0], vec![0.0, 1.0]],
        vec![vec![0.1, 0.0], vec![0.0, 0.01]],
        vec![1.0, 0.0],
        1.0,
    )
}

/// Level + slope + damped acceleration.
pub fn damped_trend_params() -> (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<f64>, f64) {
    (
        vec![
            vec![1.0, 1.0, 0.0],
            vec![0.0, 1.0, 1.0],
            vec![0.0, 0.0, 0.9],
        ],
        vec![
            vec![0.1, 0.0, 0.0],
            vec![0.0, 0.01, 0.0],
            vec![0.0, 0.0, 0.001],
        ],
        vec![1.0, 0.0, 0.0],
        1.0,
    )
}

/// Plain random walk.
pub fn random_walk_params() -> (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<f64>, f64) {
    (vec![vec![1.0]], vec![vec![0.1]], vec![1.0], 1.0)
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

    fn smoother(params: (Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<f64>, f64)) -> KalmanSmoothing {
        KalmanSmoothing::new(params.0, params.1, params.2, params.3).unwrap()
    }

    #[test]
    fn test_tracks_linear_trend() {
        let vals: Vec<f64> = (0..60).map(|i| 2.0 + 0.5 * i as f64).collect();
        let df = frame(vals.clone());
        let mut t = smoother(local_linear_trend_params());
        let out = t.fit_transform(&df).unwrap();
        for (i, v) in out.values().column(0).iter().enumerate().skip(10) {
            assert!((v - vals[i]).abs() < 0.5, "row {i}: {v} vs {}", vals[i]);
        }
    }

    #[test]
    fn test_smooths_noise() {
        let vals: Vec<f64> = (0..100)
            .map(|i| 5.0 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let df = frame(vals);
        let mut t = smoother(random_walk_params());
        let out = t.fit_transform(&df).unwrap();
        assert!(out.col_std()[0] < df.col_std()[0]);
    }

    #[test]
    fn test_interpolates_missing() {
        let mut vals: Vec<f64> = (0..40).map(|i| i as f64).collect();
        vals[20] = f64::NAN;
        let df = frame(vals);
        let mut t = smoother(local_linear_trend_params());
        let out = t.fit_transform(&df).unwrap();
        assert!(out.values()[[20, 0]].is_finite());
        assert!((out.values()[[20, 0]] - 20.0).abs() < 1.0);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(KalmanSmoothing::new(
            vec![vec![1.0, 0.0]],
            vec![vec![0.1]],
            vec![1.0],
            1.0
        )
        .is_err());
        assert!(KalmanSmoothing::new(vec![vec![1.0]], vec![vec![0.1]], vec![1.0], 0.0).is_err());
    }
}

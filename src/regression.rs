//! Regression capability used by detrenders and holiday neutralization.
//!
//! Transforms that regress values on time or on calendar features accept
//! any `Regressor`; the built-ins cover ordinary least squares, ridge, and
//! a Theil-Sen style robust slope for single-predictor designs.

use crate::error::{ForgeError, Result};
use crate::linalg;
use ndarray::{Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Multi-output regression estimator. Designs are `(n, p)` without an
/// intercept column; implementations add their own.
pub trait Regressor: Send + Sync {
    fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()>;
    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>>;
}

fn with_intercept(x: &Array2<f64>) -> Array2<f64> {
    let mut out = Array2::ones((x.nrows(), x.ncols() + 1));
    out.slice_mut(ndarray::s![.., 1..]).assign(x);
    out
}

/// Ordinary least squares via the normal equations.
#[derive(Debug, Clone, Default)]
pub struct LinearRegressor {
    coef: Option<Array2<f64>>,
}

impl Regressor for LinearRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        self.coef = Some(linalg::lstsq(&with_intercept(x), y)?);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let coef = self
            .coef
            .as_ref()
            .ok_or(ForgeError::NotFitted("LinearRegressor"))?;
        Ok(with_intercept(x).dot(coef))
    }
}

/// Ridge regression with an intercept left unpenalized via centering.
#[derive(Debug, Clone)]
pub struct RidgeRegressor {
    alpha: f64,
    coef: Option<Array2<f64>>,
}

impl RidgeRegressor {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.max(0.0),
            coef: None,
        }
    }
}

impl Regressor for RidgeRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        self.coef = Some(linalg::lstsq_ridge(&with_intercept(x), y, self.alpha)?);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let coef = self
            .coef
            .as_ref()
            .ok_or(ForgeError::NotFitted("RidgeRegressor"))?;
        Ok(with_intercept(x).dot(coef))
    }
}

/// Median-of-pairwise-slopes estimator. Robust to outliers; defined for a
/// single predictor, so multi-feature designs fall back to least squares.
#[derive(Debug, Clone, Default)]
pub struct TheilSenRegressor {
    slopes: Option<Vec<f64>>,
    intercepts: Option<Vec<f64>>,
    fallback: Option<Array2<f64>>,
}

/// Pairwise slope count is capped by striding over the pair set.
const THEILSEN_MAX_PAIRS: usize = 5000;

impl Regressor for TheilSenRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        if x.ncols() != 1 {
            self.fallback = Some(linalg::lstsq(&with_intercept(x), y)?);
            return Ok(());
        }
        let n = x.nrows();
        if n < 2 {
            return Err(ForgeError::InvalidParameter(
                "TheilSen needs at least two observations".into(),
            ));
        }
        let total_pairs = n * (n - 1) / 2;
        let stride = (total_pairs / THEILSEN_MAX_PAIRS).max(1);

        let mut slopes = Vec::with_capacity(y.ncols());
        let mut intercepts = Vec::with_capacity(y.ncols());
        for col in y.axis_iter(Axis(1)) {
            let mut pair_slopes = Vec::new();
            let mut counter = 0usize;
            for i in 0..n {
                for j in (i + 1)..n {
                    counter += 1;
                    if counter % stride != 0 {
                        continue;
                    }
                    let dx = x[[j, 0]] - x[[i, 0]];
                    if dx.abs() > 1e-12 {
                        pair_slopes.push((col[j] - col[i]) / dx);
                    }
                }
            }
            if pair_slopes.is_empty() {
                pair_slopes.push(0.0);
            }
            pair_slopes
                .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let slope = pair_slopes[pair_slopes.len() / 2];

            let mut residuals: Vec<f64> = (0..n).map(|i| col[i] - slope * x[[i, 0]]).collect();
            residuals
                .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            slopes.push(slope);
            intercepts.push(residuals[residuals.len() / 2]);
        }
        self.slopes = Some(slopes);
        self.intercepts = Some(intercepts);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if let Some(coef) = &self.fallback {
            return Ok(with_intercept(x).dot(coef));
        }
        let slopes = self
            .slopes
            .as_ref()
            .ok_or(ForgeError::NotFitted("TheilSenRegressor"))?;
        let intercepts = self.intercepts.as_ref().unwrap();
        let mut out = Array2::zeros((x.nrows(), slopes.len()));
        for i in 0..x.nrows() {
            for (k, (&s, &b)) in slopes.iter().zip(intercepts.iter()).enumerate() {
                out[[i, k]] = b + s * x[[i, 0]];
            }
        }
        Ok(out)
    }
}

/// Serializable choice of regression model for sampled configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum RegressionSpec {
    Linear,
    Ridge { alpha: f64 },
    TheilSen,
}

impl RegressionSpec {
    pub fn build(&self) -> Box<dyn Regressor> {
        match self {
            RegressionSpec::Linear => Box::new(LinearRegressor::default()),
            RegressionSpec::Ridge { alpha } => Box::new(RidgeRegressor::new(*alpha)),
            RegressionSpec::TheilSen => Box::new(TheilSenRegressor::default()),
        }
    }
}

/// Weighted draw of a regression model for randomized search.
pub fn sample_regression_spec<R: Rng + ?Sized>(rng: &mut R) -> RegressionSpec {
    let roll: f64 = rng.gen();
    if roll < 0.6 {
        RegressionSpec::Linear
    } else if roll < 0.85 {
        let alphas = [0.1, 1.0, 10.0];
        RegressionSpec::Ridge {
            alpha: alphas[rng.gen_range(0..alphas.len())],
        }
    } else {
        RegressionSpec::TheilSen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_fits_plane() {
        let x = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 2.0]];
        let y = x.map_axis(Axis(1), |r| 3.0 + 2.0 * r[0] - r[1]);
        let y = y.insert_axis(Axis(1));
        let mut reg = LinearRegressor::default();
        reg.fit(&x, &y).unwrap();
        let pred = reg.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-6);
        }
    }

    #[test]
    fn test_theilsen_ignores_single_outlier() {
        let n = 20;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let mut y = Array2::from_shape_fn((n, 1), |(i, _)| 1.0 + 0.5 * i as f64);
        y[[10, 0]] = 500.0;
        let mut reg = TheilSenRegressor::default();
        reg.fit(&x, &y).unwrap();
        let pred = reg.predict(&x).unwrap();
        assert!((pred[[19, 0]] - (1.0 + 0.5 * 19.0)).abs() < 0.5);
    }

    #[test]
    fn test_predict_before_fit_errors() {
        let reg = RidgeRegressor::new(1.0);
        assert!(reg.predict(&array![[1.0]]).is_err());
    }

    #[test]
    fn test_spec_roundtrip() {
        let spec = RegressionSpec::Ridge { alpha: 0.1 };
        let json = serde_json::to_string(&spec).unwrap();
        let back: RegressionSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}

//! Pipeline orchestration: an ordered chain of transforms applied
//! ascending on the way in and descending on the way back out.
//!
//! The pipeline owns the NaN-filling policy (applied before the first
//! step, and only when NaN is actually present) and wraps every step
//! failure with the step's name and phase so a randomized search can
//! attribute crashes to the configuration that caused them.

use crate::error::{ForgeError, Result};
use crate::fillna::FillMethod;
use crate::frame::TimeSeriesFrame;
use crate::transforms::{InverseMode, Transform, TransformKind, TransformSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Serializable pipeline description: a fill policy plus an ordered list
/// of transform steps. This is the unit the sampler generates and the
/// unit that round-trips through JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub fillna: Option<FillMethod>,
    pub steps: Vec<TransformSpec>,
}

impl PipelineConfig {
    pub fn new(fillna: Option<FillMethod>, steps: Vec<TransformSpec>) -> Self {
        Self { fillna, steps }
    }
}

struct Step {
    kind: TransformKind,
    transform: Box<dyn Transform>,
}

/// Executable pipeline built from a [`PipelineConfig`].
pub struct Pipeline {
    config: PipelineConfig,
    steps: Vec<Step>,
    fitted_columns: Option<Vec<String>>,
    output_columns: Option<Vec<String>>,
}

impl Pipeline {
    /// Instantiate every step of the configuration. Parameter validation
    /// happens here, before any data is touched.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let mut steps = Vec::with_capacity(config.steps.len());
        for spec in &config.steps {
            let transform = spec.build()?;
            steps.push(Step {
                kind: spec.kind(),
                transform,
            });
        }
        Ok(Self {
            config,
            steps,
            fitted_columns: None,
            output_columns: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Column names of the frame the pipeline was fitted on.
    pub fn fitted_columns(&self) -> Option<&[String]> {
        self.fitted_columns.as_deref()
    }

    /// Column names after the final step, which differ from the input
    /// when a step changes cardinality.
    pub fn output_columns(&self) -> Option<&[String]> {
        self.output_columns.as_deref()
    }

    fn fill(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        if !df.has_nan() {
            return Ok(df.clone());
        }
        match &self.config.fillna {
            Some(method) => method.apply(df),
            None => {
                warn!("input contains NaN and no fill method is configured");
                Ok(df.clone())
            }
        }
    }

    pub fn fit_transform(&mut self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        df.ensure_numeric()?;
        self.fitted_columns = Some(df.columns().to_vec());
        let mut current = self.fill(df)?;
        for step in self.steps.iter_mut() {
            let name = step.transform.name();
            debug!(step = name, rows = current.nrows(), "fitting step");
            current = step
                .transform
                .fit_transform(&current)
                .map_err(|e| wrap(name, "fit_transform", e))?;
            if step.kind.changes_cardinality() {
                debug!(
                    step = name,
                    rows = current.nrows(),
                    cols = current.ncols(),
                    "cardinality changed"
                );
            }
        }
        self.output_columns = Some(current.columns().to_vec());
        Ok(current)
    }

    pub fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()> {
        self.fit_transform(df).map(|_| ())
    }

    /// Apply the fitted chain to new rows.
    pub fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        let mut current = self.fill(df)?;
        for step in &self.steps {
            let name = step.transform.name();
            current = step
                .transform
                .transform(&current)
                .map_err(|e| wrap(name, "transform", e))?;
        }
        Ok(current)
    }

    pub fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
    ) -> Result<TimeSeriesFrame> {
        self.inverse_transform_bounded(df, mode, false)
    }

    /// Undo the chain in reverse order. `bounds` is true when the rows are
    /// prediction-interval bounds rather than a point forecast.
    pub fn inverse_transform_bounded(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
        bounds: bool,
    ) -> Result<TimeSeriesFrame> {
        let mut current = df.clone();
        for step in self.steps.iter().rev() {
            let name = step.transform.name();
            debug!(step = name, ?mode, bounds, "inverting step");
            current = step
                .transform
                .inverse_transform_bounded(&current, mode, bounds)
                .map_err(|e| wrap(name, "inverse_transform", e))?;
        }
        Ok(current)
    }
}

fn wrap(step: &str, phase: &'static str, source: ForgeError) -> ForgeError {
    ForgeError::StepFailed {
        step: step.to_string(),
        phase,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::SeasonalMethod;
    use chrono::NaiveDate;
    use ndarray::Array2;

    fn frame(cols: usize, rows: usize) -> TimeSeriesFrame {
        let index = (0..rows)
            .map(|i| {
                NaiveDate::from_ymd_opt(2022, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    + chrono::Duration::days(i as i64)
            })
            .collect();
        let values = Array2::from_shape_fn((rows, cols), |(i, j)| {
            10.0 * (j + 1) as f64 + (i as f64 / 4.0).sin() + 0.05 * i as f64
        });
        let columns = (0..cols).map(|j| format!("s{j}")).collect();
        TimeSeriesFrame::new(index, columns, values).unwrap()
    }

    #[test]
    fn test_fit_transform_then_original_inverse_roundtrips() {
        let df = frame(2, 80);
        let config = PipelineConfig::new(
            Some(FillMethod::Ffill),
            vec![
                TransformSpec::StandardScaler,
                TransformSpec::Differenced,
                TransformSpec::MinMaxScaler,
            ],
        );
        let mut pipeline = Pipeline::from_config(config).unwrap();
        let out = pipeline.fit_transform(&df).unwrap();
        let back = pipeline
            .inverse_transform(&out, InverseMode::Original)
            .unwrap();
        for (a, b) in back.values().iter().zip(df.values().iter()) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }

    #[test]
    fn test_forecast_inverse_recovers_tail() {
        let df = frame(1, 90);
        let config = PipelineConfig::new(
            None,
            vec![
                TransformSpec::Differenced,
                TransformSpec::SeasonalDifference {
                    lag: 7,
                    method: SeasonalMethod::LastValue,
                },
            ],
        );
        let mut pipeline = Pipeline::from_config(config).unwrap();

        let train = df.head(76);
        let future = df.tail(14);
        pipeline.fit(&train).unwrap();
        // a perfect forecast in transformed space inverts to the raw tail
        let transformed_future = pipeline.transform(&df).unwrap().tail(14);
        let back = pipeline
            .inverse_transform(&transformed_future, InverseMode::Forecast)
            .unwrap();
        for (a, b) in back.values().iter().zip(future.values().iter()) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }

    #[test]
    fn test_nan_filled_only_when_present() {
        let mut df = frame(1, 30);
        let mut vals = df.values().clone();
        vals[[10, 0]] = f64::NAN;
        df = df.with_values(vals).unwrap();
        let config = PipelineConfig::new(Some(FillMethod::Ffill), vec![TransformSpec::None]);
        let mut pipeline = Pipeline::from_config(config).unwrap();
        let out = pipeline.fit_transform(&df).unwrap();
        assert!(!out.has_nan());

        // a clean frame passes through untouched
        let clean = frame(1, 30);
        let out = pipeline.transform(&clean).unwrap();
        assert_eq!(out.values(), clean.values());
    }

    #[test]
    fn test_step_failure_names_the_step() {
        let df = frame(1, 30);
        let config = PipelineConfig::new(
            None,
            vec![TransformSpec::StandardScaler, TransformSpec::Pca { whiten: false }],
        );
        let mut pipeline = Pipeline::from_config(config).unwrap();
        let err = pipeline.fit_transform(&df).unwrap_err();
        match err {
            ForgeError::StepFailed { step, phase, .. } => {
                assert_eq!(step, "PCA");
                assert_eq!(phase, "fit_transform");
            }
            other => panic!("expected StepFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_cardinality_change_tracked() {
        let df = frame(3, 60);
        let config = PipelineConfig::new(None, vec![TransformSpec::Pca { whiten: false }]);
        let mut pipeline = Pipeline::from_config(config).unwrap();
        pipeline.fit_transform(&df).unwrap();
        assert_eq!(pipeline.fitted_columns().unwrap(), df.columns());
        assert!(pipeline.output_columns().unwrap()[0].starts_with("pca_"));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = PipelineConfig::new(
            Some(FillMethod::RollingMean24),
            vec![
                TransformSpec::RobustScaler,
                TransformSpec::RollingMean {
                    window: 7,
                    fixed: true,
                },
            ],
        );
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}

//! Transform variant library.
//!
//! Each variant owns its fitted state and implements [`Transform`].
//! [`TransformSpec`] is the serializable parameter form used by pipeline
//! configurations and the randomized sampler; `build` turns a spec into a
//! boxed, unfitted transform instance.

mod align;
mod anomaly;
mod decomposition;
mod detrend;
mod difference;
mod filters;
mod holiday;
mod kalman;
mod misc;
mod rolling;
mod scale;

pub use align::AlignLastValue;
pub use anomaly::{AnomalyDetector, AnomalyMethod, AnomalyRemoval};
pub use decomposition::{Btcd, Cointegration, FastIca, Pca, StlFilter};
pub use detrend::{DatepartRegression, Detrend, DetrendModel, LocalLinearTrend, SinTrend};
pub use difference::{
    CumSum, Differenced, MeanDifference, PctChange, SeasonalDifference, SeasonalMethod,
};
pub use filters::{BandType, ConvolutionFilter, FilterDesign, HpFilter, SavgolMode, SignalFilter};
pub use holiday::{HolidayImpact, HolidayParams, HolidayTransformer};
pub use kalman::{
    damped_trend_params, local_linear_trend_params, random_walk_params, KalmanSmoothing,
};
pub use misc::{
    CenterLastValue, ClipMethod, ClipOutliers, Discretization, Discretize,
    IntermittentOccurrence, CenterStat, Round, Slice,
};
pub use rolling::{EwmaFilter, RollingMean};
pub use scale::{MaxAbsScaler, MinMaxScaler, PositiveShift, RobustScaler, StandardScaler};

use crate::error::Result;
use crate::fillna::FillMethod;
use crate::frame::TimeSeriesFrame;
use crate::pipeline::PipelineConfig;
use crate::regression::RegressionSpec;
use crate::seasonal::DatePartMethod;
use serde::{Deserialize, Serialize};

/// Which direction of data an inverse is applied to.
///
/// `Forecast` means rows immediately following the fit support (the normal
/// path for model output); `Original` replays the fit support itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InverseMode {
    Forecast,
    Original,
}

/// A stateful, possibly invertible transformation of a frame.
pub trait Transform: Send {
    fn name(&self) -> &'static str;

    fn fit(&mut self, df: &TimeSeriesFrame) -> Result<()>;

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame>;

    /// Reverse the transformation. Variants without a meaningful inverse
    /// return the input unchanged.
    fn inverse_transform(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
    ) -> Result<TimeSeriesFrame>;

    fn fit_transform(&mut self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        self.fit(df)?;
        self.transform(df)
    }

    /// Inverse with interval awareness. `bounds` is true when the rows are
    /// prediction-interval bounds rather than the point forecast; only the
    /// last-value alignment changes behavior on it.
    fn inverse_transform_bounded(
        &self,
        df: &TimeSeriesFrame,
        mode: InverseMode,
        _bounds: bool,
    ) -> Result<TimeSeriesFrame> {
        self.inverse_transform(df, mode)
    }
}

/// Discriminant-only transform identifier, used by catalogs and sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    None,
    MinMaxScaler,
    StandardScaler,
    MaxAbsScaler,
    RobustScaler,
    Log,
    PositiveShift,
    Detrend,
    SinTrend,
    LocalLinearTrend,
    DatepartRegression,
    SeasonalDifference,
    Differenced,
    PctChange,
    CumSum,
    MeanDifference,
    RollingMean,
    EwmaFilter,
    ClipOutliers,
    Round,
    Slice,
    Discretize,
    CenterLastValue,
    IntermittentOccurrence,
    SignalFilter,
    HpFilter,
    StlFilter,
    BkFilter,
    ConvolutionFilter,
    KalmanSmoothing,
    Pca,
    FastIca,
    Cointegration,
    Btcd,
    AlignLastValue,
    AnomalyRemoval,
    HolidayTransformer,
}

impl TransformKind {
    /// Inverse differs between forecast and original replay.
    pub fn is_mode_aware(self) -> bool {
        matches!(
            self,
            TransformKind::Differenced
                | TransformKind::PctChange
                | TransformKind::CumSum
                | TransformKind::SeasonalDifference
                | TransformKind::MeanDifference
                | TransformKind::RollingMean
                | TransformKind::AlignLastValue
        )
    }

    /// Inverse additionally changes when applied to interval bounds.
    pub fn is_bounds_aware(self) -> bool {
        matches!(self, TransformKind::AlignLastValue)
    }

    /// Results depend on which series are fitted together.
    pub fn is_shared(self) -> bool {
        matches!(
            self,
            TransformKind::Pca
                | TransformKind::FastIca
                | TransformKind::DatepartRegression
                | TransformKind::MeanDifference
                | TransformKind::Btcd
                | TransformKind::Cointegration
                | TransformKind::HolidayTransformer
        )
    }

    /// Output rows or columns may not match the input.
    pub fn changes_cardinality(self) -> bool {
        matches!(
            self,
            TransformKind::Slice
                | TransformKind::Pca
                | TransformKind::FastIca
                | TransformKind::AnomalyRemoval
                | TransformKind::HolidayTransformer
        )
    }
}

/// Serializable parameters for one transform step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "params", rename_all = "snake_case")]
pub enum TransformSpec {
    None,
    MinMaxScaler,
    StandardScaler,
    MaxAbsScaler,
    RobustScaler,
    Log,
    PositiveShift {
        log: bool,
        center_one: bool,
        squared: bool,
    },
    Detrend {
        model: DetrendModel,
        phi: f64,
        window: Option<usize>,
        pre_clean: Option<PipelineConfig>,
    },
    SinTrend,
    LocalLinearTrend {
        rolling_window: f64,
        n_future: f64,
        method: CenterStat,
    },
    DatepartRegression {
        regression: RegressionSpec,
        datepart_method: DatePartMethod,
        pre_clean: Option<PipelineConfig>,
    },
    SeasonalDifference {
        lag: usize,
        method: SeasonalMethod,
    },
    Differenced,
    PctChange,
    CumSum,
    MeanDifference,
    RollingMean {
        window: usize,
        fixed: bool,
    },
    EwmaFilter {
        span: usize,
    },
    ClipOutliers {
        method: ClipMethod,
        std_threshold: f64,
        fillna: Option<FillMethod>,
    },
    Round {
        decimals: i32,
        on_transform: bool,
        on_inverse: bool,
    },
    Slice {
        method: f64,
    },
    Discretize {
        discretization: Discretization,
        n_bins: usize,
    },
    CenterLastValue {
        rows: usize,
    },
    IntermittentOccurrence {
        center: CenterStat,
    },
    SignalFilter {
        design: FilterDesign,
    },
    HpFilter {
        part: TrendPart,
        lamb: f64,
    },
    StlFilter {
        robust_trend: bool,
        part: DecompPart,
        seasonal: usize,
    },
    BkFilter,
    ConvolutionFilter,
    KalmanSmoothing {
        state_transition: Vec<Vec<f64>>,
        process_noise: Vec<Vec<f64>>,
        observation_model: Vec<f64>,
        observation_noise: f64,
    },
    Pca {
        whiten: bool,
    },
    FastIca {
        max_iter: usize,
        whiten: bool,
    },
    Cointegration {
        det_order: i32,
        k_ar_diff: usize,
    },
    Btcd {
        regression: RegressionSpec,
        max_lags: usize,
    },
    AlignLastValue {
        rows: usize,
        lag: usize,
        method: AlignMethod,
        strength: f64,
        first_value_only: bool,
    },
    AnomalyRemoval {
        method: AnomalyMethod,
        pre_clean: Option<PipelineConfig>,
        fillna: Option<FillMethod>,
    },
    HolidayTransformer {
        anomaly_method: AnomalyMethod,
        anomaly_pre_clean: Option<PipelineConfig>,
        anomaly_fillna: Option<FillMethod>,
        threshold: f64,
        min_occurrences: usize,
        use_dayofmonth_holidays: bool,
        use_wkdom_holidays: bool,
        use_wkdeom_holidays: bool,
        use_lunar_holidays: bool,
        use_lunar_weekday: bool,
        use_islamic_holidays: bool,
        use_hebrew_holidays: bool,
        remove_excess_anomalies: bool,
        impact: HolidayImpact,
        regression_params: Option<HolidayRegressionParams>,
    },
}

/// Datepart-regression settings used when holiday impact is regression
/// based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolidayRegressionParams {
    pub regression: RegressionSpec,
    pub datepart_method: DatePartMethod,
}

/// Which part the Hodrick-Prescott filter keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendPart {
    Trend,
    Cycle,
}

/// Which part a seasonal decomposition keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompPart {
    Trend,
    Seasonal,
    Resid,
}

/// Alignment adjustment arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignMethod {
    Additive,
    Multiplicative,
}

impl TransformSpec {
    pub fn kind(&self) -> TransformKind {
        match self {
            TransformSpec::None => TransformKind::None,
            TransformSpec::MinMaxScaler => TransformKind::MinMaxScaler,
            TransformSpec::StandardScaler => TransformKind::StandardScaler,
            TransformSpec::MaxAbsScaler => TransformKind::MaxAbsScaler,
            TransformSpec::RobustScaler => TransformKind::RobustScaler,
            TransformSpec::Log => TransformKind::Log,
            TransformSpec::PositiveShift { .. } => TransformKind::PositiveShift,
            TransformSpec::Detrend { .. } => TransformKind::Detrend,
            TransformSpec::SinTrend => TransformKind::SinTrend,
            TransformSpec::LocalLinearTrend { .. } => TransformKind::LocalLinearTrend,
            TransformSpec::DatepartRegression { .. } => TransformKind::DatepartRegression,
            TransformSpec::SeasonalDifference { .. } => TransformKind::SeasonalDifference,
            TransformSpec::Differenced => TransformKind::Differenced,
            TransformSpec::PctChange => TransformKind::PctChange,
            TransformSpec::CumSum => TransformKind::CumSum,
            TransformSpec::MeanDifference => TransformKind::MeanDifference,
            TransformSpec::RollingMean { .. } => TransformKind::RollingMean,
            TransformSpec::EwmaFilter { .. } => TransformKind::EwmaFilter,
            TransformSpec::ClipOutliers { .. } => TransformKind::ClipOutliers,
            TransformSpec::Round { .. } => TransformKind::Round,
            TransformSpec::Slice { .. } => TransformKind::Slice,
            TransformSpec::Discretize { .. } => TransformKind::Discretize,
            TransformSpec::CenterLastValue { .. } => TransformKind::CenterLastValue,
            TransformSpec::IntermittentOccurrence { .. } => {
                TransformKind::IntermittentOccurrence
            }
            TransformSpec::SignalFilter { .. } => TransformKind::SignalFilter,
            TransformSpec::HpFilter { .. } => TransformKind::HpFilter,
            TransformSpec::StlFilter { .. } => TransformKind::StlFilter,
            TransformSpec::BkFilter => TransformKind::BkFilter,
            TransformSpec::ConvolutionFilter => TransformKind::ConvolutionFilter,
            TransformSpec::KalmanSmoothing { .. } => TransformKind::KalmanSmoothing,
            TransformSpec::Pca { .. } => TransformKind::Pca,
            TransformSpec::FastIca { .. } => TransformKind::FastIca,
            TransformSpec::Cointegration { .. } => TransformKind::Cointegration,
            TransformSpec::Btcd { .. } => TransformKind::Btcd,
            TransformSpec::AlignLastValue { .. } => TransformKind::AlignLastValue,
            TransformSpec::AnomalyRemoval { .. } => TransformKind::AnomalyRemoval,
            TransformSpec::HolidayTransformer { .. } => TransformKind::HolidayTransformer,
        }
    }

    /// Instantiate an unfitted transform for this spec.
    pub fn build(&self) -> Result<Box<dyn Transform>> {
        Ok(match self.clone() {
            TransformSpec::None => Box::new(NoOp),
            TransformSpec::MinMaxScaler => Box::new(MinMaxScaler::default()),
            TransformSpec::StandardScaler => Box::new(StandardScaler::default()),
            TransformSpec::MaxAbsScaler => Box::new(MaxAbsScaler::default()),
            TransformSpec::RobustScaler => Box::new(RobustScaler::default()),
            TransformSpec::Log => Box::new(PositiveShift::new(true, true, false)),
            TransformSpec::PositiveShift {
                log,
                center_one,
                squared,
            } => Box::new(PositiveShift::new(log, center_one, squared)),
            TransformSpec::Detrend {
                model,
                phi,
                window,
                pre_clean,
            } => Box::new(Detrend::new(model, phi, window, pre_clean)?),
            TransformSpec::SinTrend => Box::new(SinTrend::default()),
            TransformSpec::LocalLinearTrend {
                rolling_window,
                n_future,
                method,
            } => Box::new(LocalLinearTrend::new(rolling_window, n_future, method)?),
            TransformSpec::DatepartRegression {
                regression,
                datepart_method,
                pre_clean,
            } => Box::new(DatepartRegression::new(
                regression,
                datepart_method,
                pre_clean,
            )),
            TransformSpec::SeasonalDifference { lag, method } => {
                Box::new(SeasonalDifference::new(lag, method)?)
            }
            TransformSpec::Differenced => Box::new(Differenced::default()),
            TransformSpec::PctChange => Box::new(PctChange::default()),
            TransformSpec::CumSum => Box::new(CumSum::default()),
            TransformSpec::MeanDifference => Box::new(MeanDifference::default()),
            TransformSpec::RollingMean { window, fixed } => {
                Box::new(RollingMean::new(window, fixed)?)
            }
            TransformSpec::EwmaFilter { span } => Box::new(EwmaFilter::new(span)?),
            TransformSpec::ClipOutliers {
                method,
                std_threshold,
                fillna,
            } => Box::new(ClipOutliers::new(method, std_threshold, fillna)),
            TransformSpec::Round {
                decimals,
                on_transform,
                on_inverse,
            } => Box::new(Round::new(decimals, on_transform, on_inverse)),
            TransformSpec::Slice { method } => Box::new(Slice::new(method)?),
            TransformSpec::Discretize {
                discretization,
                n_bins,
            } => Box::new(Discretize::new(discretization, n_bins)?),
            TransformSpec::CenterLastValue { rows } => {
                Box::new(CenterLastValue::new(rows)?)
            }
            TransformSpec::IntermittentOccurrence { center } => {
                Box::new(IntermittentOccurrence::new(center))
            }
            TransformSpec::SignalFilter { design } => Box::new(SignalFilter::new(design)?),
            TransformSpec::HpFilter { part, lamb } => Box::new(HpFilter::new(part, lamb)?),
            TransformSpec::StlFilter {
                robust_trend,
                part,
                seasonal,
            } => Box::new(StlFilter::new(robust_trend, part, seasonal)?),
            TransformSpec::BkFilter => Box::new(ConvolutionFilter::bandpass()),
            TransformSpec::ConvolutionFilter => Box::new(ConvolutionFilter::smoothing()),
            TransformSpec::KalmanSmoothing {
                state_transition,
                process_noise,
                observation_model,
                observation_noise,
            } => Box::new(KalmanSmoothing::new(
                state_transition,
                process_noise,
                observation_model,
                observation_noise,
            )?),
            TransformSpec::Pca { whiten } => Box::new(Pca::new(whiten)),
            TransformSpec::FastIca { max_iter, whiten } => {
                Box::new(FastIca::new(max_iter, whiten))
            }
            TransformSpec::Cointegration {
                det_order,
                k_ar_diff,
            } => Box::new(Cointegration::new(det_order, k_ar_diff)),
            TransformSpec::Btcd {
                regression,
                max_lags,
            } => Box::new(Btcd::new(regression, max_lags)?),
            TransformSpec::AlignLastValue {
                rows,
                lag,
                method,
                strength,
                first_value_only,
            } => Box::new(AlignLastValue::new(
                rows,
                lag,
                method,
                strength,
                first_value_only,
            )?),
            TransformSpec::AnomalyRemoval {
                method,
                pre_clean,
                fillna,
            } => Box::new(AnomalyRemoval::new(method, pre_clean, fillna)),
            TransformSpec::HolidayTransformer {
                anomaly_method,
                anomaly_pre_clean,
                anomaly_fillna,
                threshold,
                min_occurrences,
                use_dayofmonth_holidays,
                use_wkdom_holidays,
                use_wkdeom_holidays,
                use_lunar_holidays,
                use_lunar_weekday,
                use_islamic_holidays,
                use_hebrew_holidays,
                remove_excess_anomalies,
                impact,
                regression_params,
            } => Box::new(HolidayTransformer::new(holiday::HolidayParams {
                anomaly_method,
                anomaly_pre_clean,
                anomaly_fillna,
                threshold,
                min_occurrences,
                use_dayofmonth_holidays,
                use_wkdom_holidays,
                use_wkdeom_holidays,
                use_lunar_holidays,
                use_lunar_weekday,
                use_islamic_holidays,
                use_hebrew_holidays,
                remove_excess_anomalies,
                impact,
                regression_params,
            })?),
        })
    }
}

/// Identity transform, the no-op pipeline step.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOp;

impl Transform for NoOp {
    fn name(&self) -> &'static str {
        "None"
    }

    fn fit(&mut self, _df: &TimeSeriesFrame) -> Result<()> {
        Ok(())
    }

    fn transform(&self, df: &TimeSeriesFrame) -> Result<TimeSeriesFrame> {
        Ok(df.clone())
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

    #[test]
    fn test_spec_json_roundtrip() {
        let spec = TransformSpec::SeasonalDifference {
            lag: 7,
            method: SeasonalMethod::LastValue,
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: TransformSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
        assert_eq!(back.kind(), TransformKind::SeasonalDifference);
    }

    #[test]
    fn test_classifications() {
        assert!(TransformKind::Differenced.is_mode_aware());
        assert!(!TransformKind::Differenced.is_shared());
        assert!(TransformKind::AlignLastValue.is_bounds_aware());
        assert!(TransformKind::Pca.is_shared());
        assert!(TransformKind::Pca.changes_cardinality());
        assert!(!TransformKind::StandardScaler.is_mode_aware());
    }

    #[test]
    fn test_every_unit_spec_builds() {
        for spec in [
            TransformSpec::None,
            TransformSpec::MinMaxScaler,
            TransformSpec::StandardScaler,
            TransformSpec::MaxAbsScaler,
            TransformSpec::RobustScaler,
            TransformSpec::Log,
            TransformSpec::SinTrend,
            TransformSpec::Differenced,
            TransformSpec::PctChange,
            TransformSpec::CumSum,
            TransformSpec::MeanDifference,
            TransformSpec::BkFilter,
            TransformSpec::ConvolutionFilter,
        ] {
            assert!(spec.build().is_ok(), "{spec:?} failed to build");
        }
    }
}

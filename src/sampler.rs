//! Randomized pipeline configuration sampling.
//!
//! Catalogs assign selection weights to every transform kind at three
//! speed tiers; `random_transform` draws a depth, a fill method, and a
//! parameterized spec for each step. Every configuration produced here
//! must build through [`Pipeline::from_config`] without error, so the
//! per-kind samplers only emit parameter values inside the constructors'
//! accepted domains.

use crate::fillna::FillMethod;
use crate::pipeline::PipelineConfig;
use crate::regression::{sample_regression_spec, RegressionSpec};
use crate::seasonal::{seasonal_int, DatePartMethod};
use crate::transforms::{
    damped_trend_params, local_linear_trend_params, random_walk_params, AlignMethod,
    AnomalyMethod, BandType, CenterStat, ClipMethod, DecompPart, DetrendModel, Discretization,
    FilterDesign, HolidayImpact, HolidayRegressionParams, SavgolMode, SeasonalMethod,
    TransformKind, TransformSpec, TrendPart,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Runtime-cost tier restricting which transforms and parameters are
/// eligible for sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTier {
    All,
    Fast,
    Superfast,
}

use TransformKind as K;

const ALL_CATALOG: &[(TransformKind, f64)] = &[
    (K::None, 0.0),
    (K::MinMaxScaler, 0.05),
    (K::MaxAbsScaler, 0.05),
    (K::StandardScaler, 0.04),
    (K::RobustScaler, 0.05),
    (K::Pca, 0.01),
    (K::FastIca, 0.01),
    (K::Detrend, 0.1),
    (K::RollingMean, 0.02),
    (K::Differenced, 0.07),
    (K::SinTrend, 0.01),
    (K::PctChange, 0.01),
    (K::CumSum, 0.02),
    (K::PositiveShift, 0.02),
    (K::Log, 0.01),
    (K::IntermittentOccurrence, 0.01),
    (K::SeasonalDifference, 0.1),
    (K::BkFilter, 0.05),
    (K::ConvolutionFilter, 0.001),
    (K::HpFilter, 0.01),
    (K::DatepartRegression, 0.01),
    (K::ClipOutliers, 0.05),
    (K::Discretize, 0.01),
    (K::CenterLastValue, 0.01),
    (K::Round, 0.02),
    (K::Slice, 0.02),
    (K::SignalFilter, 0.02),
    (K::StlFilter, 0.01),
    (K::EwmaFilter, 0.02),
    (K::MeanDifference, 0.002),
    (K::Btcd, 0.01),
    (K::Cointegration, 0.01),
    (K::AlignLastValue, 0.2),
    (K::AnomalyRemoval, 0.03),
    (K::HolidayTransformer, 0.01),
    (K::LocalLinearTrend, 0.01),
    (K::KalmanSmoothing, 0.01),
];

const SUPERFAST_CATALOG: &[(TransformKind, f64)] = &[
    (K::None, 0.0),
    (K::MinMaxScaler, 0.05),
    (K::MaxAbsScaler, 0.05),
    (K::StandardScaler, 0.04),
    (K::RobustScaler, 0.05),
    (K::Detrend, 0.1),
    (K::RollingMean, 0.02),
    (K::Differenced, 0.1),
    (K::PositiveShift, 0.02),
    (K::Log, 0.01),
    (K::SeasonalDifference, 0.1),
    (K::BkFilter, 0.05),
    (K::ClipOutliers, 0.05),
    (K::Discretize, 0.01),
    (K::Slice, 0.02),
    (K::EwmaFilter, 0.01),
    (K::AlignLastValue, 0.05),
];

/// Kinds excluded from the fast tier because their fit cost scales badly
/// with column count.
const SLOW_KINDS: &[TransformKind] = &[K::FastIca, K::Cointegration, K::Btcd];

/// Transform selection weights for a tier.
pub fn transform_catalog(tier: SpeedTier) -> Vec<(TransformKind, f64)> {
    match tier {
        SpeedTier::All => ALL_CATALOG.to_vec(),
        SpeedTier::Fast => ALL_CATALOG
            .iter()
            .copied()
            .filter(|(k, _)| !SLOW_KINDS.contains(k))
            .collect(),
        SpeedTier::Superfast => SUPERFAST_CATALOG.to_vec(),
    }
}

const NA_PROBS: &[(Option<FillMethod>, f64)] = &[
    (Some(FillMethod::Ffill), 0.4),
    (Some(FillMethod::FakeDate), 0.1),
    (Some(FillMethod::RollingMean), 0.1),
    (Some(FillMethod::RollingMean24), 0.1),
    (Some(FillMethod::IterativeImputer), 0.05),
    (Some(FillMethod::Mean), 0.06),
    (Some(FillMethod::Zero), 0.05),
    (Some(FillMethod::FfillMeanBiased), 0.1),
    (Some(FillMethod::Median), 0.03),
    (None, 0.001),
    (Some(FillMethod::Interpolate), 0.4),
    (Some(FillMethod::KnnImputer), 0.05),
];

/// Fill-method selection weights for a tier; the imputers are filtered
/// out of the faster tiers.
pub fn fill_catalog(tier: SpeedTier) -> Vec<(Option<FillMethod>, f64)> {
    NA_PROBS
        .iter()
        .cloned()
        .filter(|(m, _)| match (tier, m) {
            (SpeedTier::All, _) => true,
            (_, Some(FillMethod::IterativeImputer)) => false,
            (SpeedTier::Superfast, Some(FillMethod::KnnImputer)) => false,
            _ => true,
        })
        .collect()
}

fn weighted<'a, T, R: Rng + ?Sized>(items: &'a [(T, f64)], rng: &mut R) -> &'a T {
    let total: f64 = items.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return &items[0].0;
    }
    let mut roll = rng.gen::<f64>() * total;
    for (item, w) in items {
        roll -= w;
        if roll <= 0.0 {
            return item;
        }
    }
    &items[items.len() - 1].0
}

fn choose<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R) -> &'a T {
    &items[rng.gen_range(0..items.len())]
}

/// Knobs for [`random_transform`].
#[derive(Debug, Clone)]
pub struct RandomTransformOptions {
    pub tier: SpeedTier,
    pub min_depth: usize,
    pub max_depth: usize,
    /// Permit a single-step identity pipeline.
    pub allow_none: bool,
    /// Force the classic clean / detrend / wildcard / align ordering.
    pub traditional_order: bool,
}

impl Default for RandomTransformOptions {
    fn default() -> Self {
        Self {
            tier: SpeedTier::Fast,
            min_depth: 1,
            max_depth: 4,
            allow_none: true,
            traditional_order: false,
        }
    }
}

/// Draw a complete pipeline configuration.
pub fn random_transform<R: Rng + ?Sized>(
    options: &RandomTransformOptions,
    rng: &mut R,
) -> PipelineConfig {
    let min = options.min_depth.max(1);
    let max = options.max_depth.max(min);
    let num_trans = rng.gen_range(min..=max);
    let fillna = weighted(&fill_catalog(options.tier), rng).clone();

    if options.allow_none && num_trans == 1 && rng.gen::<f64>() < 0.1 {
        return PipelineConfig::new(fillna, vec![TransformSpec::None]);
    }

    let catalog = transform_catalog(options.tier);
    let kinds: Vec<TransformKind> = (0..num_trans)
        .map(|slot| {
            if options.traditional_order {
                match slot {
                    0 => K::ClipOutliers,
                    1 => K::Detrend,
                    3 => K::AlignLastValue,
                    _ => *weighted(&catalog, rng),
                }
            } else {
                *weighted(&catalog, rng)
            }
        })
        .collect();

    let steps = kinds
        .into_iter()
        .map(|kind| sample_transform(kind, options.tier, rng))
        .collect();
    PipelineConfig::new(fillna, steps)
}

/// Short preprocessing chains used as `pre_clean` inputs by detrenders
/// and anomaly detection. Usually nothing.
pub fn random_cleaners<R: Rng + ?Sized>(rng: &mut R) -> Option<PipelineConfig> {
    let roll = rng.gen::<f64>() * 1.45;
    let steps = if roll < 0.8 {
        return None;
    } else if roll < 0.9 {
        let options = RandomTransformOptions {
            tier: SpeedTier::Fast,
            min_depth: 1,
            max_depth: 2,
            allow_none: false,
            traditional_order: false,
        };
        return Some(random_transform(&options, rng));
    } else if roll < 1.0 {
        vec![TransformSpec::EwmaFilter { span: 7 }]
    } else if roll < 1.1 {
        vec![TransformSpec::EwmaFilter { span: 2 }]
    } else if roll < 1.2 {
        vec![TransformSpec::SignalFilter {
            design: FilterDesign::Savgol {
                window_length: 31,
                polyorder: 3,
                deriv: 0,
                mode: SavgolMode::Interp,
            },
        }]
    } else if roll < 1.3 {
        vec![TransformSpec::ClipOutliers {
            method: ClipMethod::Clip,
            std_threshold: 3.0,
            fillna: None,
        }]
    } else if roll < 1.35 {
        vec![TransformSpec::BkFilter]
    } else if roll < 1.4 {
        vec![TransformSpec::Discretize {
            discretization: Discretization::Center,
            n_bins: 20,
        }]
    } else {
        vec![TransformSpec::AnomalyRemoval {
            method: AnomalyMethod::Zscore { threshold: 3.0 },
            pre_clean: Some(datepart_precleaner()),
            fillna: Some(FillMethod::Ffill),
        }]
    };
    Some(PipelineConfig::new(Some(FillMethod::Ffill), steps))
}

fn datepart_precleaner() -> PipelineConfig {
    PipelineConfig::new(
        Some(FillMethod::Ffill),
        vec![TransformSpec::DatepartRegression {
            regression: RegressionSpec::Ridge { alpha: 1.0 },
            datepart_method: DatePartMethod::Simple3,
            pre_clean: None,
        }],
    )
}

fn sample_anomaly_method<R: Rng + ?Sized>(rng: &mut R) -> AnomalyMethod {
    let roll = rng.gen::<f64>();
    if roll < 0.4 {
        AnomalyMethod::Zscore {
            threshold: *choose(&[2.5, 3.0, 3.5], rng),
        }
    } else if roll < 0.6 {
        AnomalyMethod::RollingZscore {
            window: *choose(&[10, 30, 90], rng),
            threshold: *choose(&[2.5, 3.0], rng),
        }
    } else if roll < 0.8 {
        AnomalyMethod::Iqr {
            multiplier: *choose(&[1.5, 2.0, 3.0], rng),
        }
    } else {
        AnomalyMethod::Mad {
            threshold: *choose(&[3.0, 5.0], rng),
        }
    }
}

fn sample_datepart_method<R: Rng + ?Sized>(rng: &mut R) -> DatePartMethod {
    *weighted(
        &[
            (DatePartMethod::Simple, 0.1),
            (DatePartMethod::Expanded, 0.25),
            (DatePartMethod::Recurring, 0.2),
            (DatePartMethod::Simple2, 0.1),
            (DatePartMethod::SimpleBinarized, 0.3),
            (DatePartMethod::LunarPhase, 0.01),
            (DatePartMethod::CommonFourier, 0.1),
        ],
        rng,
    )
}

/// Draw parameters for one transform kind, valid for its constructor.
pub fn sample_transform<R: Rng + ?Sized>(
    kind: TransformKind,
    tier: SpeedTier,
    rng: &mut R,
) -> TransformSpec {
    let fast = tier != SpeedTier::All;
    match kind {
        K::None => TransformSpec::None,
        K::MinMaxScaler => TransformSpec::MinMaxScaler,
        K::StandardScaler => TransformSpec::StandardScaler,
        K::MaxAbsScaler => TransformSpec::MaxAbsScaler,
        K::RobustScaler => TransformSpec::RobustScaler,
        K::Log => TransformSpec::Log,
        K::SinTrend => TransformSpec::SinTrend,
        K::Differenced => TransformSpec::Differenced,
        K::PctChange => TransformSpec::PctChange,
        K::CumSum => TransformSpec::CumSum,
        K::MeanDifference => TransformSpec::MeanDifference,
        K::BkFilter => TransformSpec::BkFilter,
        K::ConvolutionFilter => TransformSpec::ConvolutionFilter,
        K::PositiveShift => TransformSpec::PositiveShift {
            log: false,
            center_one: true,
            squared: false,
        },
        K::Detrend => {
            let model = if fast {
                *weighted(&[(DetrendModel::Gls, 0.5), (DetrendModel::Linear, 0.5)], rng)
            } else {
                *weighted(
                    &[
                        (DetrendModel::Gls, 0.3),
                        (DetrendModel::Linear, 0.2),
                        (DetrendModel::TheilSen, 0.1),
                    ],
                    rng,
                )
            };
            let phi_weights: &[(f64, f64)] = if fast {
                &[(1.0, 0.9), (0.999, 0.05), (0.998, 0.01), (0.99, 0.01)]
            } else {
                &[(1.0, 0.9), (0.999, 0.1), (0.998, 0.05), (0.99, 0.05)]
            };
            let window = *weighted(
                &[
                    (None, 2.0),
                    (Some(365), 0.1),
                    (Some(900), 0.1),
                    (Some(30), 0.1),
                    (Some(90), 0.1),
                    (Some(10), 0.1),
                ],
                rng,
            );
            TransformSpec::Detrend {
                model,
                phi: *weighted(phi_weights, rng),
                window,
                pre_clean: random_cleaners(rng),
            }
        }
        K::LocalLinearTrend => TransformSpec::LocalLinearTrend {
            rolling_window: *weighted(
                &[
                    (0.1, 0.5),
                    (90.0, 0.1),
                    (30.0, 0.1),
                    (180.0, 0.1),
                    (360.0, 0.1),
                    (0.05, 0.2),
                ],
                rng,
            ),
            n_future: *weighted(
                &[(0.2, 0.5), (90.0, 0.1), (360.0, 0.1), (0.1, 0.1), (0.05, 0.2)],
                rng,
            ),
            method: *choose(&[CenterStat::Mean, CenterStat::Median], rng),
        },
        K::DatepartRegression => TransformSpec::DatepartRegression {
            regression: sample_regression_spec(rng),
            datepart_method: sample_datepart_method(rng),
            pre_clean: None,
        },
        K::SeasonalDifference => {
            let lag = if fast {
                *choose(&[7, 12], rng)
            } else {
                seasonal_int(rng, false, false, false).max(2)
            };
            TransformSpec::SeasonalDifference {
                lag,
                method: *choose(
                    &[
                        SeasonalMethod::LastValue,
                        SeasonalMethod::Mean,
                        SeasonalMethod::Median,
                    ],
                    rng,
                ),
            }
        }
        K::RollingMean => TransformSpec::RollingMean {
            window: if fast {
                *choose(&[3, 7, 10, 12], rng)
            } else {
                seasonal_int(rng, false, true, false).max(2)
            },
            fixed: rng.gen::<f64>() < 0.7,
        },
        K::EwmaFilter => TransformSpec::EwmaFilter {
            span: if fast {
                *choose(&[3, 7, 10, 12], rng)
            } else {
                seasonal_int(rng, false, true, false).max(2)
            },
        },
        K::ClipOutliers => {
            let method = if fast || rng.gen::<f64>() < 0.5 {
                ClipMethod::Clip
            } else {
                ClipMethod::Remove
            };
            let fillna = if method == ClipMethod::Remove {
                Some(*choose(
                    &[FillMethod::Ffill, FillMethod::Mean, FillMethod::RollingMean24],
                    rng,
                ))
            } else {
                None
            };
            TransformSpec::ClipOutliers {
                method,
                std_threshold: *weighted(
                    &[
                        (1.0, 0.1),
                        (2.0, 0.2),
                        (3.0, 0.2),
                        (3.5, 0.2),
                        (4.0, 0.2),
                        (5.0, 0.1),
                    ],
                    rng,
                ),
                fillna,
            }
        }
        K::Round => {
            let on_transform = rng.gen::<f64>() < 0.5;
            let on_inverse = rng.gen::<f64>() < 0.5;
            TransformSpec::Round {
                decimals: *weighted(
                    &[(-2, 0.1), (-1, 0.2), (0, 0.4), (1, 0.2), (2, 0.1)],
                    rng,
                ),
                on_transform,
                // rounding nowhere is a no-op, so it lands on the inverse
                on_inverse: on_inverse || !on_transform,
            }
        }
        K::Slice => {
            let choices: &[(f64, f64)] = if fast {
                &[(100.0, 0.3), (0.5, 0.5), (0.2, 0.2)]
            } else {
                &[(100.0, 0.2), (0.5, 0.2), (0.8, 0.2), (0.9, 0.2), (0.3, 0.2)]
            };
            TransformSpec::Slice {
                method: *weighted(choices, rng),
            }
        }
        K::Discretize => {
            let (discretization, n_bins) = if fast {
                (
                    *choose(
                        &[
                            Discretization::Center,
                            Discretization::Upper,
                            Discretization::Lower,
                        ],
                        rng,
                    ),
                    *choose(&[5, 10, 20], rng),
                )
            } else {
                (
                    *weighted(
                        &[
                            (Discretization::Center, 0.3),
                            (Discretization::Upper, 0.2),
                            (Discretization::Lower, 0.2),
                            (Discretization::Quantile, 0.1),
                            (Discretization::Uniform, 0.1),
                            (Discretization::Kmeans, 0.1),
                        ],
                        rng,
                    ),
                    *choose(&[5, 10, 20, 50], rng),
                )
            };
            TransformSpec::Discretize {
                discretization,
                n_bins,
            }
        }
        K::CenterLastValue => TransformSpec::CenterLastValue {
            rows: rng.gen_range(1..=6),
        },
        K::IntermittentOccurrence => TransformSpec::IntermittentOccurrence {
            center: if fast {
                CenterStat::Mean
            } else {
                *weighted(
                    &[
                        (CenterStat::Mean, 0.4),
                        (CenterStat::Median, 0.3),
                        (CenterStat::Midhinge, 0.3),
                    ],
                    rng,
                )
            },
        },
        K::SignalFilter => {
            let pick_savgol = |rng: &mut R| FilterDesign::Savgol {
                window_length: *weighted(&[(7, 0.4), (31, 0.3), (91, 0.3)], rng),
                polyorder: rng.gen_range(1..4),
                deriv: if rng.gen::<f64>() < 0.8 { 0 } else { 1 },
                mode: *choose(
                    &[SavgolMode::Mirror, SavgolMode::Nearest, SavgolMode::Interp],
                    rng,
                ),
            };
            let pick_butter = |rng: &mut R| {
                let window_size = seasonal_int(rng, false, true, false).max(2);
                FilterDesign::Butter {
                    order: rng.gen_range(1..=8),
                    cutoff: 1.0 / window_size as f64,
                    band: if rng.gen::<f64>() < 0.9 {
                        BandType::Lowpass
                    } else {
                        BandType::Highpass
                    },
                }
            };
            let design = if fast {
                if rng.gen::<f64>() < 0.5 {
                    pick_butter(rng)
                } else {
                    pick_savgol(rng)
                }
            } else {
                let roll = rng.gen::<f64>() * 2.0;
                if roll < 0.1 {
                    FilterDesign::Hilbert
                } else if roll < 0.2 {
                    FilterDesign::Wiener
                } else if roll < 1.1 {
                    pick_savgol(rng)
                } else {
                    pick_butter(rng)
                }
            };
            TransformSpec::SignalFilter { design }
        }
        K::HpFilter => TransformSpec::HpFilter {
            part: *weighted(&[(TrendPart::Trend, 0.98), (TrendPart::Cycle, 0.02)], rng),
            lamb: *weighted(
                &[
                    (1600.0, 0.5),
                    (6.25, 0.2),
                    (129_600.0, 0.2),
                    (104_976_000_000.0, 0.1),
                ],
                rng,
            ),
        },
        K::StlFilter => {
            let mut seasonal = seasonal_int(rng, false, false, false);
            if seasonal < 7 || fast {
                seasonal = 7;
            }
            if seasonal % 2 == 0 {
                seasonal -= 1;
            }
            TransformSpec::StlFilter {
                robust_trend: rng.gen::<f64>() < 0.5,
                part: *weighted(
                    &[
                        (DecompPart::Trend, 0.98),
                        (DecompPart::Seasonal, 0.02),
                        (DecompPart::Resid, 0.001),
                    ],
                    rng,
                ),
                seasonal,
            }
        }
        K::KalmanSmoothing => {
            let roll = rng.gen::<f64>();
            let (a, q, h, r) = if roll < 0.25 {
                local_linear_trend_params()
            } else if roll < 0.5 {
                damped_trend_params()
            } else {
                random_walk_params()
            };
            TransformSpec::KalmanSmoothing {
                state_transition: a,
                process_noise: q,
                observation_model: h,
                observation_noise: r,
            }
        }
        K::Pca => TransformSpec::Pca {
            whiten: rng.gen::<f64>() < 0.1,
        },
        K::FastIca => TransformSpec::FastIca {
            max_iter: *weighted(&[(100, 0.2), (250, 0.7), (500, 0.1)], rng),
            whiten: rng.gen::<f64>() < 0.9,
        },
        K::Cointegration => TransformSpec::Cointegration {
            det_order: *choose(&[-1, 0, 1], rng),
            k_ar_diff: *choose(&[0, 1, 2], rng),
        },
        K::Btcd => TransformSpec::Btcd {
            regression: sample_regression_spec(rng),
            max_lags: *choose(&[1, 2], rng),
        },
        K::AlignLastValue => TransformSpec::AlignLastValue {
            rows: *weighted(&[(1, 0.83), (2, 0.02), (4, 0.05), (7, 0.1)], rng),
            lag: *weighted(&[(1, 0.8), (2, 0.05), (7, 0.1), (28, 0.05)], rng),
            method: *weighted(
                &[(AlignMethod::Additive, 0.9), (AlignMethod::Multiplicative, 0.1)],
                rng,
            ),
            strength: *weighted(
                &[(1.0, 0.8), (0.9, 0.05), (0.7, 0.05), (0.5, 0.05), (0.2, 0.05)],
                rng,
            ),
            first_value_only: rng.gen::<f64>() < 0.1,
        },
        K::AnomalyRemoval => TransformSpec::AnomalyRemoval {
            method: sample_anomaly_method(rng),
            pre_clean: if rng.gen::<f64>() < 0.3 {
                Some(datepart_precleaner())
            } else {
                None
            },
            fillna: weighted(
                &[
                    (None, 0.01),
                    (Some(FillMethod::Ffill), 0.39),
                    (Some(FillMethod::Mean), 0.1),
                    (Some(FillMethod::RollingMean24), 0.3),
                    (Some(FillMethod::Interpolate), 0.15),
                    (Some(FillMethod::FakeDate), 0.05),
                ],
                rng,
            )
            .clone(),
        },
        K::HolidayTransformer => TransformSpec::HolidayTransformer {
            anomaly_method: sample_anomaly_method(rng),
            anomaly_pre_clean: None,
            anomaly_fillna: Some(FillMethod::Ffill),
            threshold: 0.8,
            min_occurrences: 2,
            use_dayofmonth_holidays: true,
            use_wkdom_holidays: rng.gen::<f64>() < 0.5,
            use_wkdeom_holidays: rng.gen::<f64>() < 0.1,
            use_lunar_holidays: rng.gen::<f64>() < 0.1,
            use_lunar_weekday: rng.gen::<f64>() < 0.05,
            use_islamic_holidays: false,
            use_hebrew_holidays: false,
            remove_excess_anomalies: rng.gen::<f64>() < 0.9,
            impact: *weighted(
                &[
                    (HolidayImpact::None, 0.1),
                    (HolidayImpact::MedianValue, 0.3),
                    (HolidayImpact::AnomalyScore, 0.3),
                    (HolidayImpact::DatepartRegression, 0.2),
                    (HolidayImpact::Regression, 0.2),
                ],
                rng,
            ),
            regression_params: Some(HolidayRegressionParams {
                regression: sample_regression_spec(rng),
                datepart_method: *choose(
                    &[DatePartMethod::Simple2, DatePartMethod::Simple3],
                    rng,
                ),
            }),
        },
    }
}

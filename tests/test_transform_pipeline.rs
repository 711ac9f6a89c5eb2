//! Integration tests for the transformation pipeline: round trips,
//! forecast-mode inversion, failure attribution, and seasonality features.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use ndarray::Array2;
use tsforge::fillna::FillMethod;
use tsforge::frame::TimeSeriesFrame;
use tsforge::pipeline::{Pipeline, PipelineConfig};
use tsforge::seasonal::common_fourier;
use tsforge::transforms::{
    AnomalyMethod, DetrendModel, InverseMode, TransformSpec,
};
use tsforge::ForgeError;

fn daily_index(start: (i32, u32, u32), n: usize) -> Vec<NaiveDateTime> {
    let first = NaiveDate::from_ymd_opt(start.0, start.1, start.2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    (0..n).map(|i| first + Duration::days(i as i64)).collect()
}

fn daily_frame(cols: usize, rows: usize) -> TimeSeriesFrame {
    let values = Array2::from_shape_fn((rows, cols), |(i, j)| {
        20.0 * (j + 1) as f64
            + 0.1 * i as f64
            + 3.0 * (2.0 * std::f64::consts::PI * i as f64 / 7.0).sin()
            + ((i * 7 + j * 13) % 11) as f64 * 0.1
    });
    let columns = (0..cols).map(|j| format!("series_{j}")).collect();
    TimeSeriesFrame::new(daily_index((2021, 1, 1), rows), columns, values).unwrap()
}

fn assert_frames_close(a: &TimeSeriesFrame, b: &TimeSeriesFrame, tol: f64) {
    assert_eq!(a.nrows(), b.nrows());
    assert_eq!(a.ncols(), b.ncols());
    for (x, y) in a.values().iter().zip(b.values().iter()) {
        assert!((x - y).abs() < tol, "{x} vs {y} (tol {tol})");
    }
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_invertible_chain_roundtrips() {
    let df = daily_frame(3, 200);
    let config = PipelineConfig::new(
        Some(FillMethod::Ffill),
        vec![
            TransformSpec::MinMaxScaler,
            TransformSpec::Detrend {
                model: DetrendModel::Linear,
                phi: 1.0,
                window: None,
                pre_clean: None,
            },
            TransformSpec::SinTrend,
            TransformSpec::StandardScaler,
        ],
    );
    let mut pipeline = Pipeline::from_config(config).unwrap();
    let out = pipeline.fit_transform(&df).unwrap();
    let back = pipeline
        .inverse_transform(&out, InverseMode::Original)
        .unwrap();
    assert_frames_close(&back, &df, 1e-6);
}

#[test]
fn test_differencing_chain_original_exact() {
    let df = daily_frame(2, 120);
    let config = PipelineConfig::new(
        None,
        vec![TransformSpec::Differenced, TransformSpec::CumSum],
    );
    let mut pipeline = Pipeline::from_config(config).unwrap();
    let out = pipeline.fit_transform(&df).unwrap();
    let back = pipeline
        .inverse_transform(&out, InverseMode::Original)
        .unwrap();
    assert_frames_close(&back, &df, 1e-8);
}

#[test]
fn test_forecast_inverse_recovers_future() {
    let df = daily_frame(2, 140);
    let train = df.head(126);
    let future = df.tail(14);

    let config = PipelineConfig::new(
        None,
        vec![TransformSpec::StandardScaler, TransformSpec::Differenced],
    );
    let mut pipeline = Pipeline::from_config(config).unwrap();
    pipeline.fit(&train).unwrap();

    // a perfect forecast in transformed space must invert to the raw tail
    let transformed_future = pipeline.transform(&df).unwrap().tail(14);
    let back = pipeline
        .inverse_transform(&transformed_future, InverseMode::Forecast)
        .unwrap();
    assert_frames_close(&back, &future, 1e-8);
}

// ============================================================================
// Failure attribution and cardinality
// ============================================================================

#[test]
fn test_multivariate_transforms_reject_single_column() {
    let df = daily_frame(1, 80);
    let specs = vec![
        TransformSpec::Pca { whiten: false },
        TransformSpec::FastIca {
            max_iter: 250,
            whiten: true,
        },
        TransformSpec::Cointegration {
            det_order: 0,
            k_ar_diff: 1,
        },
        TransformSpec::Btcd {
            regression: tsforge::regression::RegressionSpec::Linear,
            max_lags: 1,
        },
        TransformSpec::MeanDifference,
    ];
    for spec in specs {
        let mut pipeline =
            Pipeline::from_config(PipelineConfig::new(None, vec![spec.clone()])).unwrap();
        let err = pipeline.fit_transform(&df).unwrap_err();
        assert!(
            matches!(err, ForgeError::StepFailed { .. }),
            "{spec:?} should fail wrapped with its step name, got {err:?}"
        );
    }
}

#[test]
fn test_slice_shrinks_rows_and_tracks_columns() {
    let df = daily_frame(2, 100);
    let config = PipelineConfig::new(None, vec![TransformSpec::Slice { method: 0.5 }]);
    let mut pipeline = Pipeline::from_config(config).unwrap();
    let out = pipeline.fit_transform(&df).unwrap();
    assert_eq!(out.nrows(), 50);
    assert_eq!(pipeline.output_columns().unwrap(), df.columns());
}

#[test]
fn test_anomaly_removal_cleans_spike() {
    let mut df = daily_frame(1, 90);
    let mut values = df.values().clone();
    values[[45, 0]] += 200.0;
    df = df.with_values(values).unwrap();

    let config = PipelineConfig::new(
        None,
        vec![TransformSpec::AnomalyRemoval {
            method: AnomalyMethod::Zscore { threshold: 3.0 },
            pre_clean: None,
            fillna: Some(FillMethod::Ffill),
        }],
    );
    let mut pipeline = Pipeline::from_config(config).unwrap();
    let out = pipeline.fit_transform(&df).unwrap();
    assert!(!out.has_nan());
    assert!((out.values()[[45, 0]] - df.values()[[44, 0]]).abs() < 10.0);

    // removal is one-way; the inverse leaves forecasts untouched
    let back = pipeline
        .inverse_transform(&out, InverseMode::Forecast)
        .unwrap();
    assert_frames_close(&back, &out, 1e-12);
}

// ============================================================================
// Seasonality features
// ============================================================================

#[test]
fn test_common_fourier_resolution_buckets() {
    // one year of hourly stamps lands in the hourly band set
    let start = NaiveDate::from_ymd_opt(2022, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let hourly: Vec<NaiveDateTime> = (0..8760).map(|i| start + Duration::hours(i)).collect();
    let (_, hourly_features) = common_fourier(&hourly);
    assert_eq!(hourly_features.ncols(), 52);

    // five years of daily stamps lands in the daily band set
    let daily = daily_index((2018, 1, 1), 1826);
    let (names, daily_features) = common_fourier(&daily);
    assert_eq!(daily_features.ncols(), 36);
    assert_eq!(names.len(), 36);
    assert!(names[0].starts_with("seasonalitycommonfourier_"));
}

// ============================================================================
// Configuration serialization
// ============================================================================

#[test]
fn test_sampled_configs_json_roundtrip() {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tsforge::sampler::{random_transform, RandomTransformOptions};

    let options = RandomTransformOptions::default();
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let config = random_transform(&options, &mut rng);
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back, "seed {seed} config changed through JSON");
    }
}

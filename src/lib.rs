//! tsforge - composable, invertible time-series transformations
//!
//! This crate provides a pipeline engine for preprocessing time series
//! ahead of forecasting models and mapping forecasts back to the
//! original scale:
//! - [`frame`] - the date-indexed, column-named value matrix all
//!   transforms operate on
//! - [`transforms`] - the transform library: scalers, detrenders,
//!   differencers, filters, decompositions, anomaly and holiday handling
//! - [`pipeline`] - ordered chains of transforms with NaN filling and
//!   per-step failure attribution
//! - [`sampler`] - weighted random configuration generation for
//!   template search
//! - [`seasonal`] - date-part feature matrices and Fourier seasonality
//! - [`fillna`] - missing-value fill strategies
//! - [`regression`] - the small regression toolkit the detrenders use
//! - [`calendar`] - lunar phase math and external calendar lookups
//!
//! # Example
//!
//! ```no_run
//! use tsforge::pipeline::{Pipeline, PipelineConfig};
//! use tsforge::transforms::{InverseMode, TransformSpec};
//! use tsforge::fillna::FillMethod;
//! # fn df() -> tsforge::frame::TimeSeriesFrame { unimplemented!() }
//!
//! # fn main() -> tsforge::error::Result<()> {
//! let config = PipelineConfig::new(
//!     Some(FillMethod::Ffill),
//!     vec![TransformSpec::StandardScaler, TransformSpec::Differenced],
//! );
//! let mut pipeline = Pipeline::from_config(config)?;
//! let transformed = pipeline.fit_transform(&df())?;
//! // model the transformed series, then invert the forecast
//! let forecast = pipeline.inverse_transform(&transformed, InverseMode::Forecast)?;
//! # Ok(())
//! # }
//! ```

pub mod calendar;
pub mod error;
pub mod fillna;
pub mod frame;
pub mod linalg;
pub mod pipeline;
pub mod regression;
pub mod sampler;
pub mod seasonal;
pub mod transforms;

pub use error::{ForgeError, Result};
pub use frame::TimeSeriesFrame;
pub use pipeline::{Pipeline, PipelineConfig};
pub use sampler::{random_transform, RandomTransformOptions, SpeedTier};
pub use transforms::{InverseMode, Transform, TransformKind, TransformSpec};

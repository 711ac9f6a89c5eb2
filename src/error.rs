//! Crate-wide error type and result alias.

use thiserror::Error;

/// Errors produced by transforms, pipelines, and the configuration sampler.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Input contained values that cannot be treated as numeric floats.
    #[error("data cannot be converted to numeric float: {0}")]
    NonNumeric(String),

    /// A transform method was called before `fit`.
    #[error("{0} has not been fitted")]
    NotFitted(&'static str),

    /// A joint-fitting transform received fewer than two series.
    #[error("{0} only works on multivariate series (>= 2 columns)")]
    MultivariateRequired(&'static str),

    /// NaN survived into a step that forbids it, or a reconstruction
    /// produced undefined values.
    #[error("NaN encountered in {0}")]
    NanProduced(String),

    /// Frame metadata did not line up with fitted state.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A parameter value is outside its valid domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A configuration referenced a transform name not in the registry.
    #[error("unknown transformer: {0}")]
    UnknownTransformer(String),

    /// Numerical routine failed (singular system, no convergence).
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// A pipeline step failed; wraps the underlying error with the step name.
    #[error("transformer {step} failed on {phase}: {source}")]
    StepFailed {
        step: String,
        phase: &'static str,
        #[source]
        source: Box<ForgeError>,
    },
}

pub type Result<T> = std::result::Result<T, ForgeError>;

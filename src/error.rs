// src/error.rs

use thiserror::Error;

/// Failure to interpret stored model data.
///
/// Raised while reading the tagged dictionaries produced by [`crate::serializer`].
/// A model that fails with one of these must not be used for training or prediction.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("can not recognize object type: '{key}' entry is missing", key = crate::serializer::TYPE_KEY)]
    MissingTypeTag,

    #[error("wrong object type '{found}', expected '{expected}'")]
    WrongTypeTag { expected: &'static str, found: String },

    #[error("expected a dictionary for {0}")]
    NotADictionary(&'static str),

    #[error("field '{0}' is missing")]
    MissingField(&'static str),

    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("malformed array: {0}")]
    MalformedArray(String),

    #[error("limit type '{0}' is not supported")]
    UnknownLimitType(String),

    #[error("stored model is inconsistent: {0}")]
    Inconsistent(String),

    #[error("model text is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The error type for every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum SimcaError {
    #[error("can not apply PCA: matrix has {found} columns but the basis has {expected} features")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("component count must be a positive integer")]
    InvalidComponentCount,

    #[error("chosen component count {requested} is invalid or incompatible with the model (maximum {maximum})")]
    ComponentCountOutOfRange { requested: usize, maximum: usize },

    #[error("changing the scale parameter is not possible")]
    ScaleChangeRejected,

    #[error("input matrix has zero samples or zero features ({rows}x{cols})")]
    EmptyMatrix { rows: usize, cols: usize },

    #[error("target vector has {found} entries, expected {expected}")]
    TargetLengthMismatch { expected: usize, found: usize },

    #[error("measurement is not labelled: a target vector is required")]
    MissingTarget,

    #[error("covariance matrix must be square, got {rows}x{cols}")]
    NonSquareCovariance { rows: usize, cols: usize },

    #[error("eigen decomposition of covariance matrix failed: {0}")]
    Eigendecomposition(String),

    #[error("chi-squared distribution with {dof} degrees of freedom is undefined: {reason}")]
    Distribution { dof: f64, reason: String },

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("can not interpret stored model data: {0}")]
    Format(#[from] FormatError),

    #[error("model file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SimcaError {
    fn from(err: serde_json::Error) -> Self {
        SimcaError::Format(FormatError::Json(err))
    }
}

//! Error type shared by the covariance engine.

/// Errors of the covariance engine
///
/// Cells with fewer than two complete observations are not errors; they are
/// reported as `NaN` in the resulting matrices.
///
/// ### Variants
///
/// * `InvalidInput` - Malformed shapes or parameters (mismatched lengths, zero
///   columns, split count outside `[1, nrows]`, unknown options).
/// * `WorkerFailure` - A partition computation failed unexpectedly or the
///   worker pool could not be set up. Partial results are discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum CovError {
    InvalidInput(String),
    WorkerFailure(String),
}

impl std::fmt::Display for CovError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CovError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            CovError::WorkerFailure(msg) => write!(f, "Worker failure: {}", msg),
        }
    }
}

impl std::error::Error for CovError {}

#[cfg(feature = "r")]
impl From<CovError> for extendr_api::Error {
    fn from(err: CovError) -> Self {
        extendr_api::Error::Other(err.to_string())
    }
}

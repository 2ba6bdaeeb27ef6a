//! Error type shared by the statistics and calibration code.

use thiserror::Error;

/// Errors raised while aggregating frames or fitting the noise model.
///
/// None of these are retried: every variant is fatal to the call that
/// produced it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Frame vs. accumulator dimensions, or sample vs. weight counts, disagree.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// The normal-equation matrix cannot be inverted.
    #[error("singular normal equations of order {order} (determinant={determinant:.6e})")]
    SingularSystem { order: usize, determinant: f64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for statistics and calibration operations
pub type CalibrationResult<T> = Result<T, CalibrationError>;

impl CalibrationError {
    pub(crate) fn frame_shape(expected: (usize, usize), found: (usize, usize)) -> Self {
        CalibrationError::ShapeMismatch {
            expected: vec![expected.0, expected.1],
            found: vec![found.0, found.1],
        }
    }
}

//! Error taxonomy for acquisition and calibration runs.

use sensor_math::CalibrationError;
use std::time::Duration;
use thiserror::Error;

use crate::frame::ElementType;
use crate::roi::RoiViolation;
use crate::source::Capability;

/// Error type for acquisition operations
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// No frame arrived within the per-wait timeout
    #[error("timed out after {waited:?} waiting for a frame")]
    Timeout { waited: Duration },

    /// The frame source does not implement a required operation
    #[error("frame source does not support {0}")]
    UnsupportedCapability(Capability),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid ROI: {0}")]
    InvalidRoi(#[from] RoiViolation),

    /// The session delivers a different pixel type than the caller asked for
    #[error("element type mismatch: expected {expected}, source delivered {found}")]
    ElementTypeMismatch {
        expected: ElementType,
        found: ElementType,
    },

    /// A frame does not have the dimensions the operation requires
    #[error("frame shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// Backend-specific failure
    #[error("hardware error: {0}")]
    Hardware(String),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for acquisition operations
pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

/// Coarse classification of an [`AcquisitionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    UnsupportedCapability,
    ShapeMismatch,
    SingularSystem,
    InvalidArgument,
    Hardware,
    Io,
}

impl AcquisitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquisitionError::Timeout { .. } => ErrorKind::Timeout,
            AcquisitionError::UnsupportedCapability(_) => ErrorKind::UnsupportedCapability,
            AcquisitionError::InvalidArgument(_) | AcquisitionError::InvalidRoi(_) => {
                ErrorKind::InvalidArgument
            }
            AcquisitionError::ElementTypeMismatch { .. } | AcquisitionError::ShapeMismatch { .. } => {
                ErrorKind::ShapeMismatch
            }
            AcquisitionError::Hardware(_) => ErrorKind::Hardware,
            AcquisitionError::Calibration(e) => match e {
                CalibrationError::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
                CalibrationError::SingularSystem { .. } => ErrorKind::SingularSystem,
                CalibrationError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            },
            AcquisitionError::Io(_) | AcquisitionError::Serialization(_) => ErrorKind::Io,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

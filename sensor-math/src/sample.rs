//! Per-exposure summary records consumed by the calibration solver.

use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, CalibrationResult};

/// Whether an exposure was taken in the dark or under flat illumination.
///
/// Maps onto the brightness flag `s` of the noise model: `0` for dark/bias
/// exposures, `1` for flats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Illumination {
    Dark,
    Flat,
}

impl Illumination {
    /// Brightness flag as used in the model basis functions.
    pub fn flag(self) -> f64 {
        match self {
            Illumination::Dark => 0.0,
            Illumination::Flat => 1.0,
        }
    }
}

/// Summary of all pixels read out under one exposure condition.
///
/// Immutable once built; construct through [`CalibrationSample::new`] or
/// [`crate::MomentAccumulator::to_sample`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    count: usize,
    average: f64,
    average_squared: f64,
    illumination: Illumination,
    exposure: f64,
}

impl CalibrationSample {
    /// Build a sample after checking its fields.
    ///
    /// # Arguments
    /// * `count` - Number of pixel observations summarized, at least 1
    /// * `average` - Mean pixel value
    /// * `average_squared` - Mean of squared pixel values
    /// * `illumination` - Dark or flat exposure
    /// * `exposure` - Exposure time in seconds, non-negative
    pub fn new(
        count: usize,
        average: f64,
        average_squared: f64,
        illumination: Illumination,
        exposure: f64,
    ) -> CalibrationResult<Self> {
        if count == 0 {
            return Err(CalibrationError::InvalidArgument(
                "sample count must be positive".to_string(),
            ));
        }
        if !average.is_finite() || !average_squared.is_finite() {
            return Err(CalibrationError::InvalidArgument(format!(
                "sample moments must be finite (average={average}, average_squared={average_squared})"
            )));
        }
        if !(exposure.is_finite() && exposure >= 0.0) {
            return Err(CalibrationError::InvalidArgument(format!(
                "exposure time must be finite and non-negative, got {exposure}"
            )));
        }
        Ok(Self {
            count,
            average,
            average_squared,
            illumination,
            exposure,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn average_squared(&self) -> f64 {
        self.average_squared
    }

    pub fn illumination(&self) -> Illumination {
        self.illumination
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    /// Population variance implied by the two moments, clamped at zero.
    pub fn variance(&self) -> f64 {
        (self.average_squared - self.average * self.average).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert_eq!(Illumination::Dark.flag(), 0.0);
        assert_eq!(Illumination::Flat.flag(), 1.0);
    }

    #[test]
    fn test_rejects_bad_fields() {
        assert!(CalibrationSample::new(0, 1.0, 1.0, Illumination::Dark, 0.0).is_err());
        assert!(CalibrationSample::new(1, f64::NAN, 1.0, Illumination::Dark, 0.0).is_err());
        assert!(CalibrationSample::new(1, 1.0, 1.0, Illumination::Dark, -0.1).is_err());
        assert!(CalibrationSample::new(1, 1.0, 1.0, Illumination::Flat, f64::INFINITY).is_err());
    }

    #[test]
    fn test_variance() {
        let sample = CalibrationSample::new(100, 50.0, 2600.0, Illumination::Dark, 0.0).unwrap();
        assert_eq!(sample.variance(), 100.0);
    }
}

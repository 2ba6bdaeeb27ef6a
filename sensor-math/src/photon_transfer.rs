//! Gain and read-noise estimation from the photon transfer relation.
//!
//! Under the detector noise model the per-sample variance is linear in the
//! bias-subtracted mean:
//!
//! ```text
//! variance = (mean - bias) / g + sigma^2 / g^2
//! ```
//!
//! A weighted line through `(mean - bias, variance)` therefore gives the
//! conversion gain `g` (electrons per ADU) from its slope and the read noise
//! `sigma` (electrons) from its intercept.

use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, CalibrationResult};
use crate::normal_eq::NormalEquations;
use crate::sample::CalibrationSample;
use crate::solver::{check_weights, FitResult};

/// Photon-transfer line and the detector quantities derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhotonTransfer {
    /// Conversion gain in electrons per ADU
    pub gain: f64,
    /// Read noise in electrons
    pub read_noise: f64,
    /// Fitted `1/g`
    pub slope: f64,
    /// Fitted `sigma^2 / g^2` in ADU^2
    pub intercept: f64,
}

/// Fit the variance/mean line of `samples` given the bias level.
///
/// # Arguments
/// * `samples` - Samples spanning at least two distinct signal levels
/// * `weights` - Optional external weight per sample
/// * `bias` - Bias level in ADU, typically from [`crate::CalibrationSolver`]
///
/// # Returns
/// * `Err(CalibrationError::SingularSystem)` if all samples share one signal level
/// * `Err(CalibrationError::InvalidArgument)` if the slope is not positive
///   or a weight is negative or not finite
pub fn fit_photon_transfer(
    samples: &[CalibrationSample],
    weights: Option<&[f64]>,
    bias: f64,
) -> CalibrationResult<PhotonTransfer> {
    check_weights(samples.len(), weights)?;

    let mut eq = NormalEquations::new(2)?;
    for (i, sample) in samples.iter().enumerate() {
        let weight = sample.count() as f64 * weights.map_or(1.0, |w| w[i]);
        let variance = sample.variance();
        eq.accumulate(
            weight,
            &[sample.average() - bias, 1.0],
            variance,
            variance * variance,
        )?;
    }

    let solution = eq.solve()?;
    let slope = solution.params[0];
    let intercept = solution.params[1];

    if !(slope > 0.0) {
        return Err(CalibrationError::InvalidArgument(format!(
            "photon transfer slope must be positive, got {slope:.6e}"
        )));
    }

    let gain = 1.0 / slope;
    Ok(PhotonTransfer {
        gain,
        read_noise: intercept.max(0.0).sqrt() * gain,
        slope,
        intercept,
    })
}

/// Physical detector parameters in electrons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorParameters {
    /// Electrons per ADU
    pub gain: f64,
    /// Bias level in ADU
    pub bias: f64,
    /// Read noise in electrons
    pub read_noise: f64,
    /// Illumination signal in electrons per second
    pub flux: f64,
    /// Dark current in electrons per second
    pub dark_current: f64,
}

impl DetectorParameters {
    pub fn new(fit: &FitResult, transfer: &PhotonTransfer) -> Self {
        Self {
            gain: transfer.gain,
            bias: fit.bias,
            read_noise: transfer.read_noise,
            flux: fit.flux * transfer.gain,
            dark_current: fit.dark_current * transfer.gain,
        }
    }
}

//! End-to-end detector calibration from a live frame source.
//!
//! A [`CalibrationPlan`] lists exposure conditions. For each one a
//! caller-provided hook configures the hardware (exposure time, shutter or
//! light source), then a burst of frames is folded through
//! [`process_stream`] into a moment accumulator without keeping any frame.
//! The per-condition summaries feed the noise-model solver and, when the
//! signal levels allow it, the photon-transfer fit.

use ndarray::ArrayView2;
use sensor_math::{
    fit_photon_transfer, median, CalibrationSample, CalibrationSolver, DetectorParameters,
    FitResult, Illumination, MomentAccumulator, NoiseModel, PhotonTransfer,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::acquisition::process_stream;
use crate::error::{AcquisitionError, AcquisitionResult};
use crate::frame::Pixel;
use crate::options::AcquisitionOptions;
use crate::source::{Capability, CheckedSource, FrameSource};

/// One exposure setting to measure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureCondition {
    pub illumination: Illumination,
    /// Exposure time in seconds
    pub exposure: f64,
}

impl ExposureCondition {
    pub fn dark(exposure: f64) -> Self {
        Self {
            illumination: Illumination::Dark,
            exposure,
        }
    }

    pub fn flat(exposure: f64) -> Self {
        Self {
            illumination: Illumination::Flat,
            exposure,
        }
    }
}

/// Everything needed to run a calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPlan {
    pub conditions: Vec<ExposureCondition>,
    /// Frames folded per condition, at least 2
    pub frames_per_condition: usize,
    pub model: NoiseModel,
    /// Constrain flux and dark current to be non-negative
    #[serde(default)]
    pub non_negative: bool,
    #[serde(default)]
    pub acquisition: AcquisitionOptions,
}

impl CalibrationPlan {
    pub fn new(
        model: NoiseModel,
        conditions: Vec<ExposureCondition>,
        frames_per_condition: usize,
    ) -> Self {
        Self {
            conditions,
            frames_per_condition,
            model,
            non_negative: false,
            acquisition: AcquisitionOptions::default(),
        }
    }

    pub fn with_non_negative(mut self, non_negative: bool) -> Self {
        self.non_negative = non_negative;
        self
    }

    pub fn with_acquisition(mut self, acquisition: AcquisitionOptions) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn validate(&self) -> AcquisitionResult<()> {
        if self.frames_per_condition < 2 {
            return Err(AcquisitionError::InvalidArgument(format!(
                "at least 2 frames per condition are needed for a temporal variance, got {}",
                self.frames_per_condition
            )));
        }
        if self.conditions.len() < self.model.order() {
            return Err(AcquisitionError::InvalidArgument(format!(
                "{:?} model needs at least {} conditions, got {}",
                self.model,
                self.model.order(),
                self.conditions.len()
            )));
        }
        if let Some(bad) = self
            .conditions
            .iter()
            .find(|c| !(c.exposure.is_finite() && c.exposure >= 0.0))
        {
            return Err(AcquisitionError::InvalidArgument(format!(
                "exposure must be non-negative and finite, got {}",
                bad.exposure
            )));
        }
        self.acquisition.validate()
    }

    pub fn load_from_file(path: &Path) -> AcquisitionResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&json)?;
        plan.validate()?;
        Ok(plan)
    }
}

/// Summary of the frames taken under one condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasuredCondition {
    pub condition: ExposureCondition,
    pub sample: CalibrationSample,
    /// Frames actually folded; lower than planned only when truncated
    pub frames: usize,
    /// Median over pixels of the per-pixel temporal standard deviation, ADU
    pub temporal_noise: f64,
}

/// Fold `frames` frames from an already configured source into a sample.
///
/// # Returns
/// * `Err(AcquisitionError::InvalidArgument)` if fewer than 2 frames were
///   obtained (only possible with `truncate` set)
/// * Any acquisition error from the underlying loop
pub fn measure_condition<T, S>(
    source: &mut S,
    condition: &ExposureCondition,
    frames: usize,
    options: &AcquisitionOptions,
) -> AcquisitionResult<MeasuredCondition>
where
    T: Pixel,
    S: FrameSource + ?Sized,
{
    let (accumulator, obtained) = process_stream(
        source,
        frames,
        None,
        |accumulator: Option<MomentAccumulator>, pixels: ArrayView2<'_, T>, _timestamp, _ordinal| {
            let mut accumulator =
                accumulator.unwrap_or_else(|| MomentAccumulator::new(pixels.dim()));
            accumulator.accumulate(pixels)?;
            Ok(Some(accumulator))
        },
        options,
    )?;

    let accumulator = match accumulator {
        Some(acc) if obtained >= 2 => acc,
        _ => {
            return Err(AcquisitionError::InvalidArgument(format!(
                "only {obtained} of {frames} frames obtained, at least 2 are needed"
            )))
        }
    };

    let sample = accumulator.to_sample(condition.illumination, condition.exposure)?;
    let (_, std) = accumulator.mean_and_std()?;
    let temporal_noise = median(&std.iter().copied().collect::<Vec<_>>())?;

    info!(
        "Measured {:?} at {:.4}s: {} frames, mean {:.2} ADU, temporal noise {:.3} ADU",
        condition.illumination,
        condition.exposure,
        obtained,
        sample.average(),
        temporal_noise
    );

    Ok(MeasuredCondition {
        condition: *condition,
        sample,
        frames: obtained,
        temporal_noise,
    })
}

/// Result of a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorCalibration {
    pub model: NoiseModel,
    pub fit: FitResult,
    /// `None` when the samples do not constrain the variance/mean line
    pub transfer: Option<PhotonTransfer>,
    pub parameters: Option<DetectorParameters>,
    pub conditions: Vec<MeasuredCondition>,
}

impl DetectorCalibration {
    pub fn samples(&self) -> Vec<CalibrationSample> {
        self.conditions.iter().map(|c| c.sample).collect()
    }

    pub fn save_to_file(&self, path: &Path) -> AcquisitionResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> AcquisitionResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Measure every condition of `plan` and fit the detector model.
///
/// `configure` is called before each condition and is where the backend
/// changes exposure time or illumination. When the plan has no explicit
/// timeout the source must support speed queries; that is checked before
/// anything is configured.
///
/// # Returns
/// * `Err(AcquisitionError::UnsupportedCapability)` if the source cannot
///   report its speed and no timeout was given
/// * `Err(AcquisitionError::Calibration)` if the samples cannot be fitted
pub fn run_calibration<T, S, F>(
    source: &mut S,
    plan: &CalibrationPlan,
    mut configure: F,
) -> AcquisitionResult<DetectorCalibration>
where
    T: Pixel,
    S: FrameSource,
    F: FnMut(&mut S, &ExposureCondition) -> AcquisitionResult<()>,
{
    plan.validate()?;
    let required: &[Capability] = if plan.acquisition.timeout().is_some() {
        &[]
    } else {
        &[Capability::SpeedQuery]
    };
    let mut source = CheckedSource::new(source, required)?;

    let mut conditions = Vec::with_capacity(plan.conditions.len());
    for condition in &plan.conditions {
        configure(&mut **source.get_mut(), condition)?;
        conditions.push(measure_condition::<T, _>(
            &mut source,
            condition,
            plan.frames_per_condition,
            &plan.acquisition,
        )?);
    }

    let samples: Vec<CalibrationSample> = conditions.iter().map(|c| c.sample).collect();
    let fit = CalibrationSolver::new(plan.model)
        .non_negative(plan.non_negative)
        .fit(&samples, None)?;

    let transfer = match fit_photon_transfer(&samples, None, fit.bias) {
        Ok(transfer) => Some(transfer),
        Err(e) => {
            warn!("Photon transfer fit failed, gain and read noise unavailable: {e}");
            None
        }
    };
    let parameters = transfer.map(|t| DetectorParameters::new(&fit, &t));

    info!(
        "Calibration fit: bias {:.2} ADU, flux {:.4} ADU/s, dark {:.4} ADU/s, residual {:.4e}",
        fit.bias, fit.flux, fit.dark_current, fit.residual
    );

    Ok(DetectorCalibration {
        model: plan.model,
        fit,
        transfer,
        parameters,
        conditions,
    })
}

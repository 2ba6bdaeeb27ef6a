//! sensor-math - Frame statistics and detector noise-model fitting
//!
//! This crate holds the pure numerical half of detector calibration:
//!
//! - **Aggregation** - single-pass per-pixel sum / sum-of-squares accumulators
//! - **Samples** - per-exposure summary records fed to the solver
//! - **Normal equations** - weighted accumulation and closed-form solves of order 1-3
//! - **Solver** - weighted, optionally non-negative fit of flux, bias and dark current
//! - **Photon transfer** - gain and read noise from the variance/mean relation
//!
//! Nothing in here touches hardware; the acquisition side lives in `sensor-acq`.
//!
//! # Example
//!
//! ```
//! use sensor_math::{CalibrationSample, CalibrationSolver, Illumination, NoiseModel};
//!
//! let samples = [
//!     CalibrationSample::new(100, 50.0, 2600.0, Illumination::Dark, 0.0).unwrap(),
//!     CalibrationSample::new(100, 150.0, 23000.0, Illumination::Flat, 1.0).unwrap(),
//! ];
//! let fit = CalibrationSolver::new(NoiseModel::Reduced)
//!     .fit(&samples, None)
//!     .unwrap();
//! assert!((fit.bias - 50.0).abs() < 1e-9);
//! assert!((fit.flux - 100.0).abs() < 1e-9);
//! ```

pub mod aggregate;
pub mod error;
pub mod normal_eq;
pub mod photon_transfer;
pub mod sample;
pub mod solver;
pub mod stats;

pub use aggregate::{finalize_mean, finalize_mean_and_std, MomentAccumulator, SumAccumulator};
pub use error::{CalibrationError, CalibrationResult};
pub use normal_eq::{LinearSolution, NormalEquations};
pub use photon_transfer::{fit_photon_transfer, DetectorParameters, PhotonTransfer};
pub use sample::{CalibrationSample, Illumination};
pub use solver::{CalibrationSolver, FitResult, NoiseModel};
pub use stats::median;

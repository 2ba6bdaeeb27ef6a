//! Weighted least-squares fit of the detector noise model.
//!
//! For sample `i` with brightness flag `s_i` and exposure `t_i` the model
//! predicts
//!
//! ```text
//! mean_i     = (s_i a + c) t_i / g + b
//! variance_i = ((s_i a + c) t_i + sigma^2) / g^2
//! ```
//!
//! The mean is linear in `flux = a/g`, `bias = b` and `dark_current = c/g`
//! through the basis `h1 = s_i t_i`, `h2 = 1`, `h3 = t_i`. The reduced model
//! drops `h3` and pins the dark current at zero.
//!
//! With non-negativity requested, a negative flux or dark current triggers an
//! exhaustive active-set search over the (tiny) set of constraint patterns and
//! the feasible candidate with the best score wins.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CalibrationError, CalibrationResult};
use crate::normal_eq::NormalEquations;
use crate::sample::CalibrationSample;

const FLUX: usize = 0;
const BIAS: usize = 1;
const DARK: usize = 2;

/// Which parameters the fit estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseModel {
    /// Flux and bias; dark current fixed at 0
    Reduced,
    /// Flux, bias and dark current
    Full,
}

impl NoiseModel {
    /// Number of fitted parameters
    pub fn order(self) -> usize {
        match self {
            NoiseModel::Reduced => 2,
            NoiseModel::Full => 3,
        }
    }

    fn basis(self, sample: &CalibrationSample) -> [f64; 3] {
        let t = sample.exposure();
        [sample.illumination().flag() * t, 1.0, t]
    }
}

/// Outcome of a noise-model fit.
///
/// Parameters the model does not estimate are exactly `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// `gamma - score / 2`
    pub residual: f64,
    /// `q = 2 b.x - x.A.x` of the retained solution
    pub score: f64,
    /// Illumination signal rate `a/g` in ADU per second
    pub flux: f64,
    /// Bias level in ADU
    pub bias: f64,
    /// Dark signal rate `c/g` in ADU per second
    pub dark_current: f64,
}

impl FitResult {
    fn from_candidate(gamma: f64, candidate: Candidate) -> Self {
        Self {
            residual: gamma - candidate.score / 2.0,
            score: candidate.score,
            flux: candidate.params[FLUX],
            bias: candidate.params[BIAS],
            dark_current: candidate.params[DARK],
        }
    }

    /// Predicted mean pixel value for an exposure condition.
    pub fn predicted_mean(&self, flag: f64, exposure: f64) -> f64 {
        (flag * self.flux + self.dark_current) * exposure + self.bias
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f64,
    params: [f64; 3],
}

/// Fits [`NoiseModel`] parameters to calibration samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationSolver {
    model: NoiseModel,
    non_negative: bool,
}

/// One finite, non-negative weight per sample, if weights are given at all.
pub(crate) fn check_weights(samples: usize, weights: Option<&[f64]>) -> CalibrationResult<()> {
    let Some(weights) = weights else {
        return Ok(());
    };
    if weights.len() != samples {
        return Err(CalibrationError::ShapeMismatch {
            expected: vec![samples],
            found: vec![weights.len()],
        });
    }
    if let Some(bad) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
        return Err(CalibrationError::InvalidArgument(format!(
            "sample weights must be finite and non-negative, got {bad}"
        )));
    }
    Ok(())
}

impl CalibrationSolver {
    pub fn new(model: NoiseModel) -> Self {
        Self {
            model,
            non_negative: false,
        }
    }

    /// Constrain flux (and dark current for the full model) to be `>= 0`.
    pub fn non_negative(mut self, non_negative: bool) -> Self {
        self.non_negative = non_negative;
        self
    }

    pub fn model(&self) -> NoiseModel {
        self.model
    }

    /// Build the weighted normal equations for this solver's model.
    ///
    /// Each sample is weighted by `count * weight`; with no external weights
    /// every weight is 1.
    pub fn normal_equations(
        &self,
        samples: &[CalibrationSample],
        weights: Option<&[f64]>,
    ) -> CalibrationResult<NormalEquations> {
        check_weights(samples.len(), weights)?;

        let order = self.model.order();
        let mut eq = NormalEquations::new(order)?;
        for (i, sample) in samples.iter().enumerate() {
            let weight = sample.count() as f64 * weights.map_or(1.0, |w| w[i]);
            let basis = self.model.basis(sample);
            eq.accumulate(
                weight,
                &basis[..order],
                sample.average(),
                sample.average_squared(),
            )?;
        }
        Ok(eq)
    }

    /// Fit the model to `samples`.
    ///
    /// # Arguments
    /// * `samples` - One summary per exposure condition
    /// * `weights` - Optional external weight per sample (same length as `samples`)
    ///
    /// # Returns
    /// * `Ok(FitResult)` with the retained parameters
    /// * `Err(CalibrationError::ShapeMismatch)` if weights and samples differ in length
    /// * `Err(CalibrationError::SingularSystem)` if the samples cannot separate the
    ///   parameters (e.g. one brightness flag and a single exposure time)
    pub fn fit(
        &self,
        samples: &[CalibrationSample],
        weights: Option<&[f64]>,
    ) -> CalibrationResult<FitResult> {
        let eq = self.normal_equations(samples, weights)?;
        let indices: Vec<usize> = (0..self.model.order()).collect();
        let unconstrained = solve_restricted(&eq, &indices)?;

        let feasible = unconstrained.params[FLUX] >= 0.0 && unconstrained.params[DARK] >= 0.0;
        if !self.non_negative || feasible {
            return Ok(FitResult::from_candidate(eq.gamma(), unconstrained));
        }

        debug!(
            "unconstrained fit infeasible (flux={:.4e}, dark={:.4e}), searching active sets",
            unconstrained.params[FLUX], unconstrained.params[DARK]
        );

        let best = match self.model {
            NoiseModel::Reduced => solve_restricted(&eq, &[BIAS])?,
            NoiseModel::Full => best_constrained_full(&eq)?,
        };
        Ok(FitResult::from_candidate(eq.gamma(), best))
    }
}

/// Solve with only `indices` free; every other parameter stays at exactly 0.
fn solve_restricted(eq: &NormalEquations, indices: &[usize]) -> CalibrationResult<Candidate> {
    let solution = if indices.len() == eq.order() {
        eq.solve()?
    } else {
        eq.select(indices).solve()?
    };
    Ok(Candidate {
        score: solution.score,
        params: scatter(&solution.params, indices),
    })
}

fn scatter(values: &DVector<f64>, indices: &[usize]) -> [f64; 3] {
    let mut params = [0.0; 3];
    for (value, &index) in values.iter().zip(indices) {
        params[index] = *value;
    }
    params
}

/// Active-set search for the full model with `flux >= 0` and `dark_current >= 0`.
fn best_constrained_full(eq: &NormalEquations) -> CalibrationResult<Candidate> {
    // Both bounds active: bias only, always feasible.
    let mut best = solve_restricted(eq, &[BIAS])?;

    // (free parameters, parameter that must come out non-negative)
    let patterns: [([usize; 2], usize); 2] = [([BIAS, DARK], DARK), ([FLUX, BIAS], FLUX)];

    for (free, bounded) in patterns {
        let candidate = match solve_restricted(eq, &free) {
            Ok(candidate) => candidate,
            Err(CalibrationError::SingularSystem { .. }) => {
                debug!("active set {:?} is singular, skipping", free);
                continue;
            }
            Err(e) => return Err(e),
        };
        if candidate.params[bounded] >= 0.0 && candidate.score > best.score {
            best = candidate;
        }
    }

    debug!(
        "constrained fit: flux={:.4e} bias={:.4e} dark={:.4e} score={:.6e}",
        best.params[FLUX], best.params[BIAS], best.params[DARK], best.score
    );
    Ok(best)
}

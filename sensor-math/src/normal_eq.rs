//! Weighted normal equations for small linear least-squares problems.
//!
//! The calibration models have at most three parameters, so the system is
//! accumulated as a dense symmetric matrix of order 1-3 and solved through
//! nalgebra's closed-form inverse for those sizes.

use nalgebra::{DMatrix, DVector};

use crate::error::{CalibrationError, CalibrationResult};

/// Largest supported system order
pub const MAX_ORDER: usize = 3;

/// Relative threshold on `det(A) / prod(diag(A))` below which the system is singular.
///
/// For a positive semi-definite matrix the diagonal product bounds the
/// determinant from above (Hadamard), so the ratio is scale free.
const DETERMINANT_RTOL: f64 = 1e-12;

/// Normal equations `A x = b` plus the weighted sum of squared observations.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalEquations {
    matrix: DMatrix<f64>,
    rhs: DVector<f64>,
    gamma: f64,
}

/// Solution of a normal-equation system.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSolution {
    /// Parameter vector `x`
    pub params: DVector<f64>,
    /// `q = 2 b.x - x.A.x`; larger means a smaller residual
    pub score: f64,
}

impl NormalEquations {
    /// Create an empty system of the given order (1 to 3).
    pub fn new(order: usize) -> CalibrationResult<Self> {
        if order == 0 || order > MAX_ORDER {
            return Err(CalibrationError::InvalidArgument(format!(
                "normal equations order must be in 1..={MAX_ORDER}, got {order}"
            )));
        }
        Ok(Self {
            matrix: DMatrix::zeros(order, order),
            rhs: DVector::zeros(order),
            gamma: 0.0,
        })
    }

    pub fn order(&self) -> usize {
        self.rhs.len()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    /// Weighted sum of squared observations
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Add one weighted observation.
    ///
    /// # Arguments
    /// * `weight` - Observation weight
    /// * `basis` - Basis function values `h_j`, one per parameter
    /// * `value` - Observed value entering the right-hand side
    /// * `value_squared` - Squared observation entering `gamma`
    pub fn accumulate(
        &mut self,
        weight: f64,
        basis: &[f64],
        value: f64,
        value_squared: f64,
    ) -> CalibrationResult<()> {
        let n = self.order();
        if basis.len() != n {
            return Err(CalibrationError::ShapeMismatch {
                expected: vec![n],
                found: vec![basis.len()],
            });
        }
        for j in 0..n {
            let wh = weight * basis[j];
            self.rhs[j] += wh * value;
            for k in 0..n {
                self.matrix[(j, k)] += wh * basis[k];
            }
        }
        self.gamma += weight * value_squared;
        Ok(())
    }

    /// Sub-system keeping only the listed parameters (the others fixed at zero).
    pub fn select(&self, indices: &[usize]) -> NormalEquations {
        NormalEquations {
            matrix: self.matrix.select_rows(indices).select_columns(indices),
            rhs: self.rhs.select_rows(indices),
            gamma: self.gamma,
        }
    }

    /// Solve the system in closed form.
    ///
    /// # Returns
    /// * `Ok(LinearSolution)` with the parameters and their score
    /// * `Err(CalibrationError::SingularSystem)` if the matrix is not invertible
    pub fn solve(&self) -> CalibrationResult<LinearSolution> {
        let order = self.order();
        let determinant = self.matrix.determinant();
        let scale: f64 = self.matrix.diagonal().iter().product();

        if !(determinant > DETERMINANT_RTOL * scale) {
            return Err(CalibrationError::SingularSystem { order, determinant });
        }

        let inverse = self
            .matrix
            .clone()
            .try_inverse()
            .ok_or(CalibrationError::SingularSystem { order, determinant })?;

        let params = &inverse * &self.rhs;
        let score = self.score(&params);
        Ok(LinearSolution { params, score })
    }

    /// Score `2 b.x - x.A.x` of an arbitrary parameter vector.
    pub fn score(&self, params: &DVector<f64>) -> f64 {
        2.0 * self.rhs.dot(params) - params.dot(&(&self.matrix * params))
    }
}

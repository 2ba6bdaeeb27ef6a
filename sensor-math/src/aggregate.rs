//! Streaming per-pixel aggregation over same-shaped frames.
//!
//! Frames are folded into running sums as they arrive so a long exposure
//! series never has to be held in memory. Two flavours are provided:
//!
//! - [`SumAccumulator`] keeps only the per-pixel sum (enough for a mean frame)
//! - [`MomentAccumulator`] also keeps the sum of squares (mean and temporal std)
//!
//! # Precision
//!
//! Variance is recovered from `sum_squares / n - mean^2` in a single pass.
//! This is cheaper and simpler than Welford's update but loses precision when
//! the mean is large compared to the spread. The difference is clamped at zero
//! so cancellation can never produce a negative variance (and a NaN std).
//!
//! Accumulators carry no locking: feeding one accumulator from several threads
//! needs external serialization, independent accumulators can run in parallel.

use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{CalibrationError, CalibrationResult};
use crate::sample::{CalibrationSample, Illumination};

fn check_shape(expected: (usize, usize), found: (usize, usize)) -> CalibrationResult<()> {
    if expected != found {
        return Err(CalibrationError::frame_shape(expected, found));
    }
    Ok(())
}

/// Running per-pixel sum over a frame sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SumAccumulator {
    sum: Array2<f64>,
    count: usize,
}

impl SumAccumulator {
    /// Create an empty accumulator for frames of `(height, width)`.
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            sum: Array2::zeros(shape),
            count: 0,
        }
    }

    /// Add one frame into the running sum.
    ///
    /// # Returns
    /// * `Err(CalibrationError::ShapeMismatch)` if the frame dimensions differ
    ///   from the accumulator's; the accumulator is left untouched.
    pub fn accumulate<T>(&mut self, frame: ArrayView2<'_, T>) -> CalibrationResult<()>
    where
        T: Copy + Into<f64>,
    {
        check_shape(self.sum.dim(), frame.dim())?;
        Zip::from(&mut self.sum)
            .and(&frame)
            .for_each(|s, &v| *s += v.into());
        self.count += 1;
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        self.sum.dim()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum(&self) -> &Array2<f64> {
        &self.sum
    }

    /// Per-pixel mean of everything accumulated so far.
    pub fn mean(&self) -> CalibrationResult<Array2<f64>> {
        finalize_mean(&self.sum, self.count)
    }
}

/// Running per-pixel sum and sum of squares over a frame sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentAccumulator {
    sum: Array2<f64>,
    sum_squares: Array2<f64>,
    count: usize,
}

impl MomentAccumulator {
    /// Create an empty accumulator for frames of `(height, width)`.
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            sum: Array2::zeros(shape),
            sum_squares: Array2::zeros(shape),
            count: 0,
        }
    }

    /// Add one frame into both running sums.
    ///
    /// Fails with `ShapeMismatch` before touching either array when the frame
    /// dimensions differ from the accumulator's.
    pub fn accumulate<T>(&mut self, frame: ArrayView2<'_, T>) -> CalibrationResult<()>
    where
        T: Copy + Into<f64>,
    {
        check_shape(self.sum.dim(), frame.dim())?;
        Zip::from(&mut self.sum)
            .and(&mut self.sum_squares)
            .and(&frame)
            .for_each(|s, s2, &v| {
                let v: f64 = v.into();
                *s += v;
                *s2 += v * v;
            });
        self.count += 1;
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        self.sum.dim()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum(&self) -> &Array2<f64> {
        &self.sum
    }

    pub fn sum_squares(&self) -> &Array2<f64> {
        &self.sum_squares
    }

    pub fn mean(&self) -> CalibrationResult<Array2<f64>> {
        finalize_mean(&self.sum, self.count)
    }

    /// Per-pixel mean and unbiased temporal standard deviation.
    pub fn mean_and_std(&self) -> CalibrationResult<(Array2<f64>, Array2<f64>)> {
        finalize_mean_and_std(&self.sum, &self.sum_squares, self.count)
    }

    /// Collapse the accumulated frames into a single calibration sample.
    ///
    /// Every pixel of every frame counts as one observation, so `count` is
    /// `pixels * frames`, `average` is the grand mean and `average_squared` the
    /// grand mean of squared values.
    pub fn to_sample(
        &self,
        illumination: Illumination,
        exposure: f64,
    ) -> CalibrationResult<CalibrationSample> {
        let observations = self.count * self.sum.len();
        if observations == 0 {
            return Err(CalibrationError::InvalidArgument(
                "cannot build a calibration sample from an empty accumulator".to_string(),
            ));
        }
        let n = observations as f64;
        CalibrationSample::new(
            observations,
            self.sum.sum() / n,
            self.sum_squares.sum() / n,
            illumination,
            exposure,
        )
    }
}

/// Per-pixel mean, `sum / count`.
///
/// # Returns
/// * `Err(CalibrationError::InvalidArgument)` if `count` is zero
pub fn finalize_mean(sum: &Array2<f64>, count: usize) -> CalibrationResult<Array2<f64>> {
    if count == 0 {
        return Err(CalibrationError::InvalidArgument(
            "mean requires at least one frame".to_string(),
        ));
    }
    let n = count as f64;
    Ok(sum.mapv(|s| s / n))
}

/// Per-pixel mean and standard deviation from single-pass sums.
///
/// `variance = max(0, sum_squares/count - mean^2) * count/(count - 1)`
///
/// # Arguments
/// * `sum` - Per-pixel sum of values
/// * `sum_squares` - Per-pixel sum of squared values, same shape as `sum`
/// * `count` - Number of frames folded into the sums, at least 2
///
/// # Returns
/// * `Ok((mean, std))`
/// * `Err(CalibrationError::InvalidArgument)` if `count < 2`
/// * `Err(CalibrationError::ShapeMismatch)` if the two arrays differ in shape
pub fn finalize_mean_and_std(
    sum: &Array2<f64>,
    sum_squares: &Array2<f64>,
    count: usize,
) -> CalibrationResult<(Array2<f64>, Array2<f64>)> {
    if count < 2 {
        return Err(CalibrationError::InvalidArgument(format!(
            "standard deviation requires at least 2 frames, got {count}"
        )));
    }
    check_shape(sum.dim(), sum_squares.dim())?;

    let n = count as f64;
    let bessel = n / (n - 1.0);
    let mean = sum.mapv(|s| s / n);
    let mut std = Array2::zeros(sum.dim());
    Zip::from(&mut std)
        .and(&mean)
        .and(sum_squares)
        .for_each(|sd, &m, &s2| {
            let variance = (s2 / n - m * m).max(0.0) * bessel;
            *sd = variance.sqrt();
        });

    Ok((mean, std))
}

//! Robust summary statistics

use crate::error::{CalibrationError, CalibrationResult};

/// Median of a slice of f64 values, ignoring NaN.
///
/// For even-length data the two middle values are averaged.
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(CalibrationError::InvalidArgument)` - If no non-NaN value remains
pub fn median(values: &[f64]) -> CalibrationResult<f64> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid.is_empty() {
        return Err(CalibrationError::InvalidArgument(format!(
            "cannot compute median: {} values, none valid",
            values.len()
        )));
    }

    valid.sort_by(|a, b| a.total_cmp(b));

    let mid = valid.len() / 2;
    let median = if valid.len() % 2 == 0 {
        (valid[mid - 1] + valid[mid]) / 2.0
    } else {
        valid[mid]
    };

    Ok(median)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]).unwrap(), 2.5);
    }

    #[test]
    fn test_median_skips_nan() {
        assert_eq!(median(&[f64::NAN, 5.0, 1.0, f64::NAN, 3.0]).unwrap(), 3.0);
        assert!(median(&[f64::NAN]).is_err());
        assert!(median(&[]).is_err());
    }
}

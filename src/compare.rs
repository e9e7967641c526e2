// compare.rs — Scalar distance between a variant result and the reference.
//
// Sums are accumulated in f64: a 8190×8190 result has 67M cells, and an
// f32 running sum would swallow per-cell differences long before the end.

use thiserror::Error;

use crate::error::ConfigError;
use crate::grid::Grid;

/// Default acceptance threshold on the mean absolute difference.
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompareError {
    #[error("cannot compare {left} elements with {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("cannot compare empty arrays")]
    Empty,
}

fn check_lengths(a: &[f32], b: &[f32]) -> Result<(), CompareError> {
    if a.len() != b.len() {
        return Err(CompareError::LengthMismatch { left: a.len(), right: b.len() });
    }
    if a.is_empty() {
        return Err(CompareError::Empty);
    }
    Ok(())
}

/// `Σ|a − b| / n`.
pub fn mean_abs_diff(a: &[f32], b: &[f32]) -> Result<f64, CompareError> {
    check_lengths(a, b)?;
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x as f64 - y as f64).abs())
        .sum();
    Ok(sum / a.len() as f64)
}

/// `max |a − b|`.
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> Result<f64, CompareError> {
    check_lengths(a, b)?;
    Ok(a.iter()
        .zip(b)
        .map(|(&x, &y)| (x as f64 - y as f64).abs())
        .fold(0.0, f64::max))
}

/// Both distances between two grids of equal extent.
pub fn grid_diff(result: &Grid, reference: &Grid) -> Result<(f64, f64), CompareError> {
    let a = result.as_slice();
    let b = reference.as_slice();
    Ok((mean_abs_diff(a, b)?, max_abs_diff(a, b)?))
}

/// Upper bound on the mean absolute difference a variant may show.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub max_mean_abs_diff: f64,
}

impl Tolerance {
    pub fn new(max_mean_abs_diff: f64) -> Result<Self, ConfigError> {
        if !max_mean_abs_diff.is_finite() || max_mean_abs_diff < 0.0 {
            return Err(ConfigError::InvalidTolerance(max_mean_abs_diff));
        }
        Ok(Tolerance { max_mean_abs_diff })
    }

    #[inline]
    pub fn accepts(&self, mean_abs_diff: f64) -> bool {
        mean_abs_diff <= self.max_mean_abs_diff
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance { max_mean_abs_diff: DEFAULT_TOLERANCE }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_iff_equal() {
        let a = [1.0, 2.0, 3.0];
        assert_eq!(mean_abs_diff(&a, &a).unwrap(), 0.0);
        assert!(mean_abs_diff(&a, &[1.0, 2.0, 3.5]).unwrap() > 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = [1.0, -2.0, 7.5, 0.0];
        let b = [0.5, 2.0, 7.0, -1.0];
        assert_eq!(mean_abs_diff(&a, &b).unwrap(), mean_abs_diff(&b, &a).unwrap());
        assert_eq!(max_abs_diff(&a, &b).unwrap(), max_abs_diff(&b, &a).unwrap());
    }

    #[test]
    fn test_values() {
        let a = [0.0, 0.0, 0.0, 0.0];
        let b = [1.0, -1.0, 2.0, 0.0];
        assert_eq!(mean_abs_diff(&a, &b).unwrap(), 1.0);
        assert_eq!(max_abs_diff(&a, &b).unwrap(), 2.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert_eq!(
            mean_abs_diff(&[1.0; 3], &[1.0; 4]),
            Err(CompareError::LengthMismatch { left: 3, right: 4 })
        );
        assert_eq!(max_abs_diff(&[], &[]), Err(CompareError::Empty));
    }

    #[test]
    fn test_tolerance() {
        let t = Tolerance::default();
        assert!(t.accepts(0.0));
        assert!(t.accepts(1e-3));
        assert!(!t.accepts(2e-3));
        assert!(Tolerance::new(-1.0).is_err());
        assert!(Tolerance::new(f64::NAN).is_err());
    }
}

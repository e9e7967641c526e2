// error.rs — Configuration errors and the per-variant failure wrapper.
//
// Each stage owns its own error type (`PlanError` in layout.rs,
// `LayoutError` in marshal.rs, `ExecError` in exec.rs, `CompareError` in
// compare.rs). `VariantError` tags one of them with the stage that failed so
// the driver can print a single diagnostic line per failure and move on to
// the next variant.
//
// Only `ConfigError` aborts a run.

use std::fmt;

use thiserror::Error;

use crate::compare::CompareError;
use crate::exec::ExecError;
use crate::layout::PlanError;
use crate::marshal::LayoutError;

/// Rejected before any planning happens.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("array extent must be at least 1×1 (got {width}×{height})")]
    EmptyExtent { width: usize, height: usize },

    #[error("stencil mask needs exactly 9 weights (got {0})")]
    MaskLength(usize),

    #[error("bordered buffer holds {actual} elements, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("no problem sizes configured")]
    NoSizes,

    #[error("malformed problem size {0:?} (expected WIDTHxHEIGHT, e.g. 1000x1000)")]
    MalformedSize(String),

    #[error("unknown variant {0:?}")]
    UnknownVariant(String),

    #[error("tolerance must be finite and non-negative (got {0})")]
    InvalidTolerance(f64),
}

/// The step of a variant run that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Plan,
    Stage,
    Execute,
    Unstage,
    Compare,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Plan => "plan",
            Stage::Stage => "stage",
            Stage::Execute => "execute",
            Stage::Unstage => "unstage",
            Stage::Compare => "compare",
        };
        f.write_str(name)
    }
}

/// Why a single variant produced no (acceptable) result.
#[derive(Debug, Error)]
pub enum VariantError {
    #[error("planning failed: {0}")]
    Plan(PlanError),

    #[error("staging failed: {0}")]
    Stage(LayoutError),

    #[error("kernel execution failed: {0}")]
    Execute(ExecError),

    #[error("read-back failed: {0}")]
    Unstage(LayoutError),

    #[error("comparison failed: {0}")]
    Compare(CompareError),

    #[error("mean absolute difference {mean_abs_diff:e} exceeds tolerance {tolerance:e}")]
    ToleranceExceeded { mean_abs_diff: f64, tolerance: f64 },
}

impl VariantError {
    pub fn stage(&self) -> Stage {
        match self {
            VariantError::Plan(_) => Stage::Plan,
            VariantError::Stage(_) => Stage::Stage,
            VariantError::Execute(_) => Stage::Execute,
            VariantError::Unstage(_) => Stage::Unstage,
            VariantError::Compare(_) | VariantError::ToleranceExceeded { .. } => Stage::Compare,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Plan.to_string(), "plan");
        assert_eq!(Stage::Unstage.to_string(), "unstage");
    }

    #[test]
    fn test_tolerance_failure_is_a_compare_stage() {
        let err = VariantError::ToleranceExceeded { mean_abs_diff: 0.5, tolerance: 1e-3 };
        assert_eq!(err.stage(), Stage::Compare);
        assert!(err.to_string().contains("exceeds tolerance"));
    }

    #[test]
    fn test_plan_failure_stage() {
        let err = VariantError::Plan(PlanError::ZeroRowGranularity);
        assert_eq!(err.stage(), Stage::Plan);
        assert!(err.to_string().starts_with("planning failed"));
    }
}

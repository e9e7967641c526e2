// mask.rs — The 3×3 correlation weights.

use crate::error::ConfigError;

/// Side length of the mask.
pub const MASK_SIZE: usize = 3;

/// Halo radius implied by the mask, `MASK_SIZE / 2`.
pub const MASK_RADIUS: usize = MASK_SIZE / 2;

/// Number of weights.
pub const MASK_LEN: usize = MASK_SIZE * MASK_SIZE;

/// Row-major 3×3 weights. Weight `(i, j)` (column `i`, row `j`) is applied
/// to the input tap at offset `(i - 1, j - 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StencilMask {
    weights: [f32; MASK_LEN],
}

impl StencilMask {
    pub const fn new(weights: [f32; MASK_LEN]) -> Self {
        StencilMask { weights }
    }

    /// Build from a runtime slice; anything but 9 weights is rejected.
    pub fn from_slice(weights: &[f32]) -> Result<Self, ConfigError> {
        let weights: [f32; MASK_LEN] = weights
            .try_into()
            .map_err(|_| ConfigError::MaskLength(weights.len()))?;
        Ok(StencilMask { weights })
    }

    /// Box sum: every tap weighted 1.
    pub const fn ones() -> Self {
        StencilMask::new([1.0; MASK_LEN])
    }

    /// Centre tap 1, everything else 0.
    pub const fn identity() -> Self {
        let mut weights = [0.0; MASK_LEN];
        weights[MASK_LEN / 2] = 1.0;
        StencilMask::new(weights)
    }

    /// Weight at column `i`, row `j`.
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> f32 {
        self.weights[i + j * MASK_SIZE]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }
}

impl Default for StencilMask {
    fn default() -> Self {
        StencilMask::ones()
    }
}

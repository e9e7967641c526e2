// input.rs — Synthetic bordered inputs.
//
//   sequential  logical cell (x, y) = x + y*w, halo zero
//   random      uniform [0, 100) from an explicit seed
//   debug       fixed 10×10 grid holding 1..=100, halo zero
//
// The random generator takes its seed as a parameter so failing runs can
// be replayed exactly (`--seed` on the command line).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ConfigError;
use crate::grid::{BorderedArray, Extent};
use crate::mask::MASK_RADIUS;

/// Extent of the fixed debug grid.
pub const DEBUG_EXTENT: Extent = Extent::new(10, 10);

/// What the random generator writes into the halo ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HaloFill {
    /// Halo stays zero. Every variant, texture ones included, can then
    /// reproduce the reference exactly.
    #[default]
    Zero,
    /// Halo gets random values too. Texture variants read zero past the
    /// image edge, so their border cells will deviate.
    Random,
}

/// Which generator the driver uses for every problem size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Sequential,
    Random { seed: u64, halo: HaloFill },
    /// Ignores the requested size and always yields `DEBUG_EXTENT`.
    Debug,
}

impl Default for InputKind {
    fn default() -> Self {
        InputKind::Random { seed: 0, halo: HaloFill::Zero }
    }
}

impl InputKind {
    pub fn generate(&self, extent: Extent) -> Result<BorderedArray, ConfigError> {
        match *self {
            InputKind::Sequential => sequential(extent.width, extent.height),
            InputKind::Random { seed, halo } => random(extent.width, extent.height, seed, halo),
            InputKind::Debug => Ok(debug()),
        }
    }
}

/// Ramp `0, 1, 2, ...` in row-major logical order, zero halo.
pub fn sequential(width: usize, height: usize) -> Result<BorderedArray, ConfigError> {
    let mut arr = BorderedArray::new(width, height, MASK_RADIUS)?;
    for y in 0..height {
        for x in 0..width {
            arr.set(x, y, (x + y * width) as f32);
        }
    }
    Ok(arr)
}

/// Uniform values in `[0, 100)` drawn from `StdRng::seed_from_u64(seed)`.
pub fn random(
    width: usize,
    height: usize,
    seed: u64,
    halo: HaloFill,
) -> Result<BorderedArray, ConfigError> {
    let mut arr = BorderedArray::new(width, height, MASK_RADIUS)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let padded = arr.padded_extent();
    for py in 0..padded.height {
        for px in 0..padded.width {
            // Draw for every cell so the interior does not depend on `halo`.
            let v: f32 = rng.gen_range(0.0..100.0);
            if halo == HaloFill::Random || !arr.is_halo(px, py) {
                arr.set_padded(px, py, v);
            }
        }
    }
    Ok(arr)
}

/// The fixed 10×10 grid `1..=100` with a zero halo.
pub fn debug() -> BorderedArray {
    let w = DEBUG_EXTENT.width;
    let h = DEBUG_EXTENT.height;
    let mut arr = BorderedArray::new(w, h, MASK_RADIUS)
        .expect("debug extent is non-empty");
    for y in 0..h {
        for x in 0..w {
            arr.set(x, y, (1 + x + y * w) as f32);
        }
    }
    arr
}

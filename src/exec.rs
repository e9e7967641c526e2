// exec.rs — Running a planned kernel on an input surface.
//
// `KernelExecutor` is the seam between the driver and whatever runs the
// kernel. Two implementations exist:
//
//   HostExecutor   a sequential model of the device kernels that walks the
//                  plan's grid of tiles exactly as the dispatch would
//   GpuCorrelator  wgpu compute pipelines (gpu/corr.rs)
//
// The host model exists so every layout can be checked without a GPU: it
// addresses the staged input and output surfaces with the plan's strides
// and origins, so a wrong plan produces a wrong (or out-of-bounds) result
// here just as it would on the device.
//
// ADDRESSING
// ──────────
// For output cell (ox, oy) of the covered span and tap (i, j):
//
//   bordered input:  src[(oy + j) * in_stride + input_origin + ox + i]
//   packed image:    img(ox + i - r, oy + j - r), zero outside w×h
//   output:          dst[oy * out_stride + ox]
//
// Every load and store is bounds-checked and reported as an `ExecError`
// instead of a panic.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::grid::{Extent, Grid};
use crate::gpu::device::GpuError;
use crate::layout::LayoutPlan;
use crate::marshal::StagedInput;
use crate::mask::{StencilMask, MASK_SIZE};
use crate::variant::KernelLaunch;

/// What one kernel run produced.
#[derive(Debug, Clone)]
pub struct Execution {
    /// The raw device output surface, `plan.output_extent`.
    pub output: Grid,
    /// Kernel time only; staging and read-back excluded.
    pub kernel_time: Duration,
}

/// Runs one planned variant against a staged input.
pub trait KernelExecutor {
    /// Short backend name for the report header.
    fn name(&self) -> &str;

    /// Maximum parallel items per group, used as `PlanConfig::group_capacity`.
    fn group_capacity(&self) -> usize;

    fn execute(
        &mut self,
        launch: &KernelLaunch<'_>,
        input: &StagedInput,
        mask: &StencilMask,
    ) -> Result<Execution, ExecError>;
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("staged input is {actual}, plan expects {expected}")]
    InputExtent { expected: Extent, actual: Extent },

    #[error("kernel read at index {index} outside input of {len} elements")]
    ReadOutOfBounds { index: usize, len: usize },

    #[error("kernel write at index {index} outside output of {len} elements")]
    WriteOutOfBounds { index: usize, len: usize },

    #[error("group of {items} items exceeds capacity {capacity}")]
    GroupTooLarge { items: usize, capacity: usize },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

// ---------------------------------------------------------------------------
// HostExecutor
// ---------------------------------------------------------------------------

/// What the host model computes per output cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKernel {
    /// The 3×3 correlation, same accumulation order as `reference::correlate`.
    #[default]
    Correlate,
    /// Copy the centre tap. Checks marshalling without any arithmetic.
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct HostExecutor {
    kernel: HostKernel,
    group_capacity: usize,
}

impl HostExecutor {
    pub fn new(kernel: HostKernel, group_capacity: usize) -> Self {
        HostExecutor { kernel, group_capacity }
    }

    pub fn correlate(group_capacity: usize) -> Self {
        HostExecutor::new(HostKernel::Correlate, group_capacity)
    }

    pub fn passthrough(group_capacity: usize) -> Self {
        HostExecutor::new(HostKernel::Passthrough, group_capacity)
    }

    pub fn kernel(&self) -> HostKernel {
        self.kernel
    }
}

impl KernelExecutor for HostExecutor {
    fn name(&self) -> &str {
        match self.kernel {
            HostKernel::Correlate => "host",
            HostKernel::Passthrough => "host-passthrough",
        }
    }

    fn group_capacity(&self) -> usize {
        self.group_capacity
    }

    fn execute(
        &mut self,
        launch: &KernelLaunch<'_>,
        input: &StagedInput,
        mask: &StencilMask,
    ) -> Result<Execution, ExecError> {
        let plan = launch.plan;
        if input.extent() != plan.input_extent {
            return Err(ExecError::InputExtent {
                expected: plan.input_extent,
                actual: input.extent(),
            });
        }
        let items = plan.group.area();
        if items > self.group_capacity {
            return Err(ExecError::GroupTooLarge { items, capacity: self.group_capacity });
        }

        let mut output = Grid::new(plan.output_extent);
        let start = Instant::now();
        let taps = Taps::new(plan, input.as_slice());
        run_tiles(plan, &taps, self.kernel, mask, output.as_mut_slice())?;
        let kernel_time = start.elapsed();

        Ok(Execution { output, kernel_time })
    }
}

/// Input addressing for one plan.
struct Taps<'a> {
    src: &'a [f32],
    stride: usize,
    origin: usize,
    radius: usize,
    /// `Some(extent)` for the packed image, whose reads outside the extent
    /// return zero.
    image: Option<Extent>,
}

impl<'a> Taps<'a> {
    fn new(plan: &LayoutPlan, src: &'a [f32]) -> Self {
        Taps {
            src,
            stride: plan.input_stride(),
            origin: plan.input_origin,
            radius: plan.radius,
            image: plan.policy.packs_image().then_some(plan.logical),
        }
    }

    /// Input value for tap `(i, j)` of output cell `(ox, oy)`.
    #[inline]
    fn load(&self, ox: usize, oy: usize, i: usize, j: usize) -> Result<f32, ExecError> {
        let index = match self.image {
            Some(extent) => {
                // Signed image coordinate of the tap.
                let x = (ox + i).wrapping_sub(self.radius);
                let y = (oy + j).wrapping_sub(self.radius);
                if x >= extent.width || y >= extent.height {
                    return Ok(0.0);
                }
                y * self.stride + x
            }
            None => (oy + j) * self.stride + self.origin + ox + i,
        };
        self.src
            .get(index)
            .copied()
            .ok_or(ExecError::ReadOutOfBounds { index, len: self.src.len() })
    }
}

fn run_tiles(
    plan: &LayoutPlan,
    taps: &Taps<'_>,
    kernel: HostKernel,
    mask: &StencilMask,
    dst: &mut [f32],
) -> Result<(), ExecError> {
    let out_stride = plan.output_stride();
    let r = plan.radius;

    for gy in 0..plan.grid.height {
        for gx in 0..plan.grid.width {
            for ty in 0..plan.tile.height {
                let oy = gy * plan.tile.height + ty;
                for tx in 0..plan.tile.width {
                    let ox = gx * plan.tile.width + tx;

                    let value = match kernel {
                        HostKernel::Passthrough => taps.load(ox, oy, r, r)?,
                        HostKernel::Correlate => {
                            let mut sum = 0.0f32;
                            for j in 0..MASK_SIZE {
                                for i in 0..MASK_SIZE {
                                    sum += taps.load(ox, oy, i, j)? * mask.at(i, j);
                                }
                            }
                            sum
                        }
                    };

                    let index = oy * out_stride + ox;
                    let len = dst.len();
                    *dst.get_mut(index).ok_or(ExecError::WriteOutOfBounds { index, len })? =
                        value;
                }
            }
        }
    }
    Ok(())
}

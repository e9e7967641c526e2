// marshal.rs — Host ↔ device-layout transfers.
//
// Every transfer is a rectangle copy between two row-major buffers with
// their own strides:
//
//   src (stride S)                       dst (stride D)
//   ┌─────────────────────┐              ┌───────────────────────────┐
//   │   (x,y)┌───────┐    │   copy_rect  │  (ox,oy)┌───────┐         │
//   │        │ w × h │    │  ─────────▶  │         │ w × h │         │
//   │        └───────┘    │              │         └───────┘         │
//   └─────────────────────┘              └───────────────────────────┘
//
// `stage` places the bordered input into the plan's input surface, and
// `unstage` lifts the logical `w×h` out of the plan's output surface,
// discarding over-compute. A rectangle that does not fit either buffer
// means the planner got its arithmetic wrong, so these return `LayoutError`
// rather than clipping.

use thiserror::Error;

use crate::grid::{BorderedArray, Extent, Grid, ResultArray};
use crate::layout::LayoutPlan;

/// Device input surface produced by `stage`.
pub type StagedInput = Grid;

/// Axis-aligned rectangle in element coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Rect { x, y, width, height }
    }

    pub const fn at_origin(extent: Extent) -> Self {
        Rect::new(0, 0, extent.width, extent.height)
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }
}

/// How the bordered input maps onto the device input surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarshalMode {
    /// Whole `(w+2r)×(h+2r)` rectangle, halo included.
    Bordered,
    /// Interior only, packed with stride `w`.
    Packed,
}

impl MarshalMode {
    pub fn for_plan(plan: &LayoutPlan) -> Self {
        if plan.policy.packs_image() {
            MarshalMode::Packed
        } else {
            MarshalMode::Bordered
        }
    }
}

/// Rectangle transfer inconsistency.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("{side} rectangle {rect:?} overruns row stride {stride}")]
    RowOverrunsStride { side: &'static str, rect: Rect, stride: usize },

    #[error("{side} rectangle {rect:?} needs {needed} elements, buffer holds {len}")]
    RegionOverrunsBuffer { side: &'static str, rect: Rect, needed: usize, len: usize },

    #[error("device output is {actual}, plan expects {expected}")]
    ExtentMismatch { expected: Extent, actual: Extent },
}

/// Copy `src_rect` of `src` into `dst` with its top-left at `dst_origin`.
pub fn copy_rect(
    src: &[f32],
    src_stride: usize,
    src_rect: Rect,
    dst: &mut [f32],
    dst_stride: usize,
    dst_origin: (usize, usize),
) -> Result<(), LayoutError> {
    let dst_rect = Rect::new(dst_origin.0, dst_origin.1, src_rect.width, src_rect.height);
    check_rect("source", src_rect, src_stride, src.len())?;
    check_rect("destination", dst_rect, dst_stride, dst.len())?;

    for row in 0..src_rect.height {
        let s = (src_rect.y + row) * src_stride + src_rect.x;
        let d = (dst_rect.y + row) * dst_stride + dst_rect.x;
        dst[d..d + src_rect.width].copy_from_slice(&src[s..s + src_rect.width]);
    }
    Ok(())
}

fn check_rect(side: &'static str, rect: Rect, stride: usize, len: usize) -> Result<(), LayoutError> {
    if rect.width == 0 || rect.height == 0 {
        return Ok(());
    }
    if rect.x + rect.width > stride {
        return Err(LayoutError::RowOverrunsStride { side, rect, stride });
    }
    // One past the last element of the last row.
    let needed = (rect.y + rect.height - 1) * stride + rect.x + rect.width;
    if needed > len {
        return Err(LayoutError::RegionOverrunsBuffer { side, rect, needed, len });
    }
    Ok(())
}

/// Build the device input surface for `plan`.
pub fn stage(input: &BorderedArray, plan: &LayoutPlan) -> Result<StagedInput, LayoutError> {
    let mut staged = Grid::new(plan.input_extent);
    let dst_stride = plan.input_stride();
    let src = input.padded().as_slice();

    match MarshalMode::for_plan(plan) {
        MarshalMode::Bordered => copy_rect(
            src,
            input.stride(),
            Rect::at_origin(input.padded_extent()),
            staged.as_mut_slice(),
            dst_stride,
            (plan.input_origin, 0),
        )?,
        MarshalMode::Packed => {
            let r = input.radius();
            copy_rect(
                src,
                input.stride(),
                Rect::new(r, r, input.width(), input.height()),
                staged.as_mut_slice(),
                dst_stride,
                (0, 0),
            )?
        }
    }
    Ok(staged)
}

/// Read the logical result back out of the device output surface.
pub fn unstage(output: &Grid, plan: &LayoutPlan) -> Result<ResultArray, LayoutError> {
    if output.extent() != plan.output_extent {
        return Err(LayoutError::ExtentMismatch {
            expected: plan.output_extent,
            actual: output.extent(),
        });
    }
    let mut result = ResultArray::new(plan.logical);
    copy_rect(
        output.as_slice(),
        plan.output_stride(),
        Rect::at_origin(plan.logical),
        result.as_mut_slice(),
        plan.logical.width,
        (0, 0),
    )?;
    Ok(result)
}

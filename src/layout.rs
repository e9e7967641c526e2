// layout.rs — Per-strategy layout planning.
//
// A `LayoutPlan` is a pure function of the logical extent, the halo radius
// and a `PlanConfig` (device group capacity, row granularity, alignment).
// Every variant derives its own input buffer, output buffer and transfer
// rectangles from it, so an off-by-one here shows up as a wrong or
// out-of-bounds result only the reference comparison catches.
//
// POLICIES
// ────────
//   Flat       no tiling: one "tile" covering w×h, grid 1×1
//   Tiled      group = G×⌊cap/G⌋, tile = G×G (or G×groupH when tall)
//   InnerTile  tile = group shrunk by the halo on every side
//   Padded     Tiled plus aligned input rows and an aligned output stride
//   Texture    Tiled output, borderless packed input image
//
// where G is the row granularity (SIMD width, 32 by default).
//
// Tiled input extent (r = 1, tile 32×32, w = 70):
//
//   grid.width  = ⌈70/32⌉ = 3
//   covered     = 3*32    = 96       ≥ 70, last tile over-computes 26 columns
//   input width = 96 + 2r = 98       halo on both sides of the covered span
//
// Over-computed cells are never read back; clipping to w×h is the
// marshaller's job (`marshal::unstage`), not the planner's.
//
// PADDED ROWS
// ───────────
// The kernel's row reads start one halo column left of logical column 0.
// To put logical column 0 on an aligned address, each device row starts
// with A - r filler cells (A = alignment stride), then the bordered row,
// then trailing padding that rounds the row up to a multiple of A:
//
//   |<── A-1 ──>|h|<── covered width ──>|h|<─ leading_padding ─>|
//               ^ input_origin           ^ tiledInputWidth + 1
//
//   leading_padding = (A - (tiledInputWidth + 1) mod A) mod A
//   input width     = A + tiledInputWidth + 1 + leading_padding
//
// The "+1" is the right halo column, so this arithmetic holds for r = 1
// only; `plan` rejects any other radius.

use std::fmt;

use thiserror::Error;

use crate::grid::Extent;
use crate::mask::MASK_RADIUS;

/// Default SIMD row width (warp size on NVIDIA hardware).
pub const DEFAULT_ROW_GRANULARITY: usize = 32;

/// Default coalescing width for the padded policy: 32 floats = 128 bytes.
pub const DEFAULT_ALIGNMENT: usize = 32;

/// wgpu's default `max_compute_invocations_per_workgroup`.
pub const DEFAULT_GROUP_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Device-dependent inputs to every planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanConfig {
    /// Maximum parallel items per work-group, as reported by the device.
    pub group_capacity: usize,
    /// Group and tile width.
    pub row_granularity: usize,
    /// Padded policy only.
    pub alignment_stride: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        PlanConfig {
            group_capacity: DEFAULT_GROUP_CAPACITY,
            row_granularity: DEFAULT_ROW_GRANULARITY,
            alignment_stride: DEFAULT_ALIGNMENT,
        }
    }
}

impl PlanConfig {
    pub fn with_group_capacity(self, group_capacity: usize) -> Self {
        PlanConfig { group_capacity, ..self }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Planning policy. `tall_tile` selects the second tile shape: tile height
/// equals the group height instead of the row granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    Flat,
    Tiled { tall_tile: bool },
    InnerTile,
    Padded { tall_tile: bool },
    Texture { tall_tile: bool },
}

impl Policy {
    pub fn family(&self) -> &'static str {
        match self {
            Policy::Flat => "flat",
            Policy::Tiled { .. } => "tiled",
            Policy::InnerTile => "inner-tile",
            Policy::Padded { .. } => "padded",
            Policy::Texture { .. } => "texture",
        }
    }

    pub fn tall_tile(&self) -> bool {
        matches!(
            self,
            Policy::Tiled { tall_tile: true }
                | Policy::Padded { tall_tile: true }
                | Policy::Texture { tall_tile: true }
        )
    }

    /// True if the device input is the borderless packed image.
    pub fn packs_image(&self) -> bool {
        matches!(self, Policy::Texture { .. })
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tall_tile() {
            write!(f, "{} (tall tile)", self.family())
        } else {
            f.write_str(self.family())
        }
    }
}

// ---------------------------------------------------------------------------
// LayoutPlan
// ---------------------------------------------------------------------------

/// Alignment bookkeeping of the padded policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    /// Row alignment A, in elements.
    pub alignment_stride: usize,
    /// Cells after the right halo column that round the input row to A.
    pub leading_padding: usize,
    /// Cells after the covered output span that round the output row to A.
    pub output_padding: usize,
}

/// Everything a variant needs to size and address its device buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutPlan {
    pub policy: Policy,
    /// The `w×h` the caller asked for.
    pub logical: Extent,
    pub radius: usize,
    /// Output cells one group produces.
    pub tile: Extent,
    /// Work items per group.
    pub group: Extent,
    /// Tiles covering the logical extent, rounded up.
    pub grid: Extent,
    /// Physical device input buffer (or image) size.
    pub input_extent: Extent,
    /// Physical device output buffer size.
    pub output_extent: Extent,
    /// Column of each device input row where bordered column 0 is staged.
    pub input_origin: usize,
    pub padding: Option<Padding>,
}

impl LayoutPlan {
    /// The span the grid of tiles computes, over-compute included.
    pub fn covered(&self) -> Extent {
        Extent::new(self.grid.width * self.tile.width, self.grid.height * self.tile.height)
    }

    #[inline]
    pub fn input_stride(&self) -> usize {
        self.input_extent.width
    }

    #[inline]
    pub fn output_stride(&self) -> usize {
        self.output_extent.width
    }

    /// Number of groups to dispatch in each dimension.
    ///
    /// Tiled policies launch one group per tile. The flat policy has a
    /// single tile, so it launches enough groups for one item per cell.
    pub fn dispatch(&self) -> Extent {
        match self.policy {
            Policy::Flat => Extent::new(
                self.logical.width.div_ceil(self.group.width),
                self.logical.height.div_ceil(self.group.height),
            ),
            _ => self.grid,
        }
    }

    /// Re-check the invariants every policy must satisfy.
    fn validate(self) -> Result<Self, PlanError> {
        let covered = self.covered();
        if !covered.contains(self.logical) {
            return Err(PlanError::UnderCoverage {
                logical: self.logical,
                grid: self.grid,
                tile: self.tile,
            });
        }
        if !self.output_extent.contains(covered) {
            return Err(PlanError::OutputTooSmall { output: self.output_extent, covered });
        }

        if self.policy.packs_image() {
            if self.input_extent != self.logical {
                return Err(PlanError::InputTooSmall {
                    input: self.input_extent,
                    needed: self.logical,
                    origin: 0,
                });
            }
        } else {
            // The kernel reads the covered span plus a halo on each side,
            // starting at `input_origin`.
            let halo = 2 * self.radius;
            let needed = Extent::new(covered.width + halo, covered.height + halo);
            let reach = Extent::new(self.input_origin + needed.width, needed.height);
            if !self.input_extent.contains(reach) {
                return Err(PlanError::InputTooSmall {
                    input: self.input_extent,
                    needed,
                    origin: self.input_origin,
                });
            }
        }

        if let Some(p) = self.padding {
            if p.leading_padding >= p.alignment_stride {
                return Err(PlanError::PaddingOutOfRange {
                    padding: p.leading_padding,
                    alignment: p.alignment_stride,
                });
            }
            for stride in [self.input_extent.width, self.output_extent.width] {
                if stride % p.alignment_stride != 0 {
                    return Err(PlanError::Misaligned { stride, alignment: p.alignment_stride });
                }
            }
        }
        Ok(self)
    }
}

impl fmt::Display for LayoutPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "grid={} group={} tile={} in={} out={}",
            self.grid, self.group, self.tile, self.input_extent, self.output_extent,
        )?;
        if let Some(p) = self.padding {
            write!(
                f,
                " alignment={} padding_in={} padding_out={}",
                p.alignment_stride, p.leading_padding, p.output_padding,
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Plan the layout of `logical` under `policy`.
pub fn plan(
    policy: Policy,
    logical: Extent,
    radius: usize,
    cfg: &PlanConfig,
) -> Result<LayoutPlan, PlanError> {
    if logical.is_empty() {
        return Err(PlanError::EmptyExtent(logical));
    }
    if radius != MASK_RADIUS {
        return Err(PlanError::UnsupportedRadius(radius));
    }
    let group = group_shape(cfg)?;
    let halo = 2 * radius;

    let plan = match policy {
        Policy::Flat => LayoutPlan {
            policy,
            logical,
            radius,
            tile: logical,
            group,
            grid: Extent::new(1, 1),
            input_extent: Extent::new(logical.width + halo, logical.height + halo),
            output_extent: logical,
            input_origin: 0,
            padding: None,
        },

        Policy::Tiled { tall_tile } => {
            let tile = granular_tile(cfg, group, tall_tile);
            tiled(policy, logical, radius, group, tile)
        }

        Policy::InnerTile => {
            if group.width <= halo || group.height <= halo {
                return Err(PlanError::NoInteriorTile { group, radius });
            }
            let tile = Extent::new(group.width - halo, group.height - halo);
            tiled(policy, logical, radius, group, tile)
        }

        Policy::Padded { tall_tile } => {
            let alignment = cfg.alignment_stride;
            if alignment == 0 {
                return Err(PlanError::ZeroAlignment);
            }
            let tile = granular_tile(cfg, group, tall_tile);
            let base = tiled(policy, logical, radius, group, tile);
            let covered = base.covered();

            let leading_padding = pad_to(covered.width + radius, alignment);
            let output_padding = pad_to(covered.width, alignment);
            LayoutPlan {
                input_extent: Extent::new(
                    alignment + covered.width + radius + leading_padding,
                    covered.height + halo,
                ),
                output_extent: Extent::new(covered.width + output_padding, covered.height),
                input_origin: alignment - radius,
                padding: Some(Padding {
                    alignment_stride: alignment,
                    leading_padding,
                    output_padding,
                }),
                ..base
            }
        }

        Policy::Texture { tall_tile } => {
            let tile = granular_tile(cfg, group, tall_tile);
            LayoutPlan {
                input_extent: logical,
                ..tiled(policy, logical, radius, group, tile)
            }
        }
    };

    plan.validate()
}

/// `row_granularity × ⌊capacity / row_granularity⌋`.
fn group_shape(cfg: &PlanConfig) -> Result<Extent, PlanError> {
    if cfg.row_granularity == 0 {
        return Err(PlanError::ZeroRowGranularity);
    }
    let height = cfg.group_capacity / cfg.row_granularity;
    if height == 0 {
        return Err(PlanError::GroupTooSmall {
            capacity: cfg.group_capacity,
            row_granularity: cfg.row_granularity,
        });
    }
    Ok(Extent::new(cfg.row_granularity, height))
}

fn granular_tile(cfg: &PlanConfig, group: Extent, tall_tile: bool) -> Extent {
    let height = if tall_tile { group.height } else { cfg.row_granularity };
    Extent::new(cfg.row_granularity, height)
}

/// Grid and halo-bordered extents shared by every tiled policy.
fn tiled(policy: Policy, logical: Extent, radius: usize, group: Extent, tile: Extent) -> LayoutPlan {
    let grid = Extent::new(
        logical.width.div_ceil(tile.width),
        logical.height.div_ceil(tile.height),
    );
    let covered = Extent::new(grid.width * tile.width, grid.height * tile.height);
    LayoutPlan {
        policy,
        logical,
        radius,
        tile,
        group,
        grid,
        input_extent: Extent::new(covered.width + 2 * radius, covered.height + 2 * radius),
        output_extent: covered,
        input_origin: 0,
        padding: None,
    }
}

/// Cells needed to round `len` up to a multiple of `alignment`; zero when
/// already aligned.
#[inline]
fn pad_to(len: usize, alignment: usize) -> usize {
    (alignment - len % alignment) % alignment
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A planner produced (or would produce) an inconsistent layout. Always a
/// defect in one policy's arithmetic or its configuration, never in the
/// input data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("cannot plan an empty {0} extent")]
    EmptyExtent(Extent),

    #[error("halo radius {0} is not supported (the 3×3 mask fixes radius 1)")]
    UnsupportedRadius(usize),

    #[error("row granularity must be non-zero")]
    ZeroRowGranularity,

    #[error("group capacity {capacity} cannot hold one row of {row_granularity} items")]
    GroupTooSmall { capacity: usize, row_granularity: usize },

    #[error("group {group} leaves no interior tile for halo radius {radius}")]
    NoInteriorTile { group: Extent, radius: usize },

    #[error("alignment stride must be non-zero")]
    ZeroAlignment,

    #[error("grid {grid} of {tile} tiles does not cover {logical}")]
    UnderCoverage { logical: Extent, grid: Extent, tile: Extent },

    #[error("output extent {output} cannot hold the covered span {covered}")]
    OutputTooSmall { output: Extent, covered: Extent },

    #[error("input extent {input} cannot hold {needed} starting at column {origin}")]
    InputTooSmall { input: Extent, needed: Extent, origin: usize },

    #[error("padding {padding} is outside [0, {alignment})")]
    PaddingOutOfRange { padding: usize, alignment: usize },

    #[error("row stride {stride} is not a multiple of alignment {alignment}")]
    Misaligned { stride: usize, alignment: usize },
}

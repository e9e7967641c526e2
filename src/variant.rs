// variant.rs — The registry of tiling strategies.
//
// A `Variant` pairs a kernel program with a planning policy. The registry is
// a static slice in reporting order; the driver walks it for every size.
//
//   name           program                     policy
//   ─────────────  ──────────────────────────  ──────────────────────
//   global         corr_global_mem             Flat
//   tiled          corr_local_mem              Tiled
//   tiled-v2       corr_local_mem              Tiled (tall tile)
//   inner-tile     corr_local_mem_inner_tile   InnerTile
//   padded         corr_local_mem_padding      Padded
//   padded-v2      corr_local_mem_padding      Padded (tall tile)
//   texture        corr_image                  Texture
//   texture-v2     corr_image                  Texture (tall tile)
//   tiled-corners  corr_local_mem_corners      Tiled
//
// Each program is compiled with its own list of numeric defines derived
// from the plan (see `Variant::defines`).

use std::fmt;

use crate::grid::Extent;
use crate::layout::{self, LayoutPlan, PlanConfig, PlanError, Policy};
use crate::mask::MASK_RADIUS;

/// Entry point shared by every program.
pub const KERNEL_NAME: &str = "corr";

/// Kernel program families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    GlobalMem,
    LocalMem,
    LocalMemCorners,
    InnerTile,
    Padding,
    Image,
}

impl Program {
    pub fn name(&self) -> &'static str {
        match self {
            Program::GlobalMem => "corr_global_mem",
            Program::LocalMem => "corr_local_mem",
            Program::LocalMemCorners => "corr_local_mem_corners",
            Program::InnerTile => "corr_local_mem_inner_tile",
            Program::Padding => "corr_local_mem_padding",
            Program::Image => "corr_image",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    pub name: &'static str,
    pub program: Program,
    pub policy: Policy,
}

static REGISTRY: [Variant; 9] = [
    Variant { name: "global", program: Program::GlobalMem, policy: Policy::Flat },
    Variant {
        name: "tiled",
        program: Program::LocalMem,
        policy: Policy::Tiled { tall_tile: false },
    },
    Variant {
        name: "tiled-v2",
        program: Program::LocalMem,
        policy: Policy::Tiled { tall_tile: true },
    },
    Variant { name: "inner-tile", program: Program::InnerTile, policy: Policy::InnerTile },
    Variant {
        name: "padded",
        program: Program::Padding,
        policy: Policy::Padded { tall_tile: false },
    },
    Variant {
        name: "padded-v2",
        program: Program::Padding,
        policy: Policy::Padded { tall_tile: true },
    },
    Variant {
        name: "texture",
        program: Program::Image,
        policy: Policy::Texture { tall_tile: false },
    },
    Variant {
        name: "texture-v2",
        program: Program::Image,
        policy: Policy::Texture { tall_tile: true },
    },
    Variant {
        name: "tiled-corners",
        program: Program::LocalMemCorners,
        policy: Policy::Tiled { tall_tile: false },
    },
];

/// Every registered variant, in reporting order.
pub fn registry() -> &'static [Variant] {
    &REGISTRY
}

pub fn find(name: &str) -> Option<&'static Variant> {
    REGISTRY.iter().find(|v| v.name == name)
}

impl Variant {
    pub fn tall_tile(&self) -> bool {
        self.policy.tall_tile()
    }

    pub fn plan(&self, logical: Extent, cfg: &PlanConfig) -> Result<LayoutPlan, PlanError> {
        layout::plan(self.policy, logical, MASK_RADIUS, cfg)
    }

    /// Compile-time constants for this variant's program.
    pub fn defines(&self, plan: &LayoutPlan) -> KernelDefines {
        let mut d = KernelDefines::default();
        let tile = plan.tile;
        let group = plan.group;
        match self.program {
            Program::GlobalMem => {
                d.push("WG_W", group.width);
                d.push("WG_H", group.height);
            }
            Program::InnerTile => {
                d.push("IN_TILE_W", group.width);
                d.push("IN_TILE_H", group.height);
                d.push("OUT_TILE_W", tile.width);
                d.push("OUT_TILE_H", tile.height);
            }
            Program::LocalMem | Program::LocalMemCorners | Program::Image | Program::Padding => {
                d.push("TILE_W", tile.width);
                d.push("TILE_H", tile.height);
                d.push("WG_W", group.width);
                d.push("WG_H", group.height);
                if let (Program::Padding, Some(p)) = (self.program, plan.padding) {
                    d.push("PADDING", p.alignment_stride);
                }
            }
        }
        d
    }

    /// Everything an executor needs for one run.
    pub fn launch<'a>(&'a self, plan: &'a LayoutPlan) -> KernelLaunch<'a> {
        KernelLaunch { variant: self, plan, defines: self.defines(plan) }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name)
    }
}

/// Ordered `(name, value)` pairs substituted into a program before
/// compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelDefines(Vec<(&'static str, usize)>);

impl KernelDefines {
    pub fn push(&mut self, key: &'static str, value: usize) {
        self.0.push((key, value));
    }

    pub fn get(&self, key: &str) -> Option<usize> {
        self.0.iter().find(|(k, _)| *k == key).map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Rendered the way a compiler command line would spell them.
impl fmt::Display for KernelDefines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "-D{k}={v}")?;
        }
        Ok(())
    }
}

/// A planned variant, ready for an executor.
#[derive(Debug, Clone)]
pub struct KernelLaunch<'a> {
    pub variant: &'a Variant,
    pub plan: &'a LayoutPlan,
    pub defines: KernelDefines,
}

impl KernelLaunch<'_> {
    pub fn program(&self) -> Program {
        self.variant.program
    }
}

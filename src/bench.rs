// bench.rs — The benchmark driver.
//
// For every problem size:
//
//   generate input ─▶ reference (timed once)
//                          │
//   for each variant:      ▼
//     plan ─▶ stage ─▶ execute (timed) ─▶ unstage ─▶ compare ─▶ VariantReport
//
// A failing step ends that variant only; the error is tagged with its
// `Stage`, logged, and kept in the report. The run as a whole fails only
// on configuration errors, which are detected before the first size.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::compare::{self, Tolerance};
use crate::error::{ConfigError, VariantError};
use crate::exec::KernelExecutor;
use crate::grid::{BorderedArray, Extent, ResultArray};
use crate::input::InputKind;
use crate::layout::{LayoutPlan, PlanConfig};
use crate::marshal;
use crate::mask::StencilMask;
use crate::reference;
use crate::variant::{self, KernelDefines, KernelLaunch, Variant};

/// Problem sizes used when none are given.
pub const DEFAULT_SIZES: [Extent; 4] = [
    Extent::new(1000, 1000),
    Extent::new(4000, 2000),
    Extent::new(8000, 10000),
    Extent::new(8190, 8190),
];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub sizes: Vec<Extent>,
    pub input: InputKind,
    pub mask: StencilMask,
    /// `None` records the differences without judging them.
    pub tolerance: Option<Tolerance>,
    /// `group_capacity` is overridden by the executor's own.
    pub plan: PlanConfig,
    /// Variant names to run; empty means all of them.
    pub variants: Vec<String>,
    /// Keep input, reference and variant outputs in the report.
    pub keep_arrays: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            sizes: DEFAULT_SIZES.to_vec(),
            input: InputKind::default(),
            mask: StencilMask::ones(),
            tolerance: Some(Tolerance::default()),
            plan: PlanConfig::default(),
            variants: Vec::new(),
            keep_arrays: false,
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sizes.is_empty() {
            return Err(ConfigError::NoSizes);
        }
        if let Some(size) = self.sizes.iter().find(|s| s.is_empty()) {
            return Err(ConfigError::EmptyExtent { width: size.width, height: size.height });
        }
        if let Some(t) = self.tolerance {
            Tolerance::new(t.max_mean_abs_diff)?;
        }
        self.selected_variants().map(|_| ())
    }

    /// Registry entries to run, in registry order.
    pub fn selected_variants(&self) -> Result<Vec<&'static Variant>, ConfigError> {
        if let Some(unknown) = self.variants.iter().find(|n| variant::find(n).is_none()) {
            return Err(ConfigError::UnknownVariant(unknown.clone()));
        }
        Ok(variant::registry()
            .iter()
            .filter(|v| self.variants.is_empty() || self.variants.iter().any(|n| n == v.name))
            .collect())
    }
}

/// Parse `WIDTHxHEIGHT` (`x` or `×`).
pub fn parse_size(s: &str) -> Result<Extent, ConfigError> {
    let malformed = || ConfigError::MalformedSize(s.to_string());
    let (w, h) = s
        .trim()
        .split_once(['x', 'X', '×'])
        .ok_or_else(malformed)?;
    let width: usize = w.trim().parse().map_err(|_| malformed())?;
    let height: usize = h.trim().parse().map_err(|_| malformed())?;
    if width == 0 || height == 0 {
        return Err(ConfigError::EmptyExtent { width, height });
    }
    Ok(Extent::new(width, height))
}

/// Parse a comma-separated list of sizes.
pub fn parse_sizes(s: &str) -> Result<Vec<Extent>, ConfigError> {
    let sizes = s
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(parse_size)
        .collect::<Result<Vec<_>, _>>()?;
    if sizes.is_empty() {
        return Err(ConfigError::NoSizes);
    }
    Ok(sizes)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VariantOutcome {
    pub mean_abs_diff: f64,
    pub max_abs_diff: f64,
    pub kernel_time: Duration,
    /// Present only with `keep_arrays`.
    pub output: Option<ResultArray>,
}

#[derive(Debug)]
pub struct VariantReport {
    pub variant: &'static Variant,
    /// `None` if planning failed.
    pub plan: Option<LayoutPlan>,
    pub defines: Option<KernelDefines>,
    pub result: Result<VariantOutcome, VariantError>,
}

impl VariantReport {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug)]
pub struct SizeReport {
    pub logical: Extent,
    pub reference_time: Duration,
    pub variants: Vec<VariantReport>,
    pub input: Option<BorderedArray>,
    pub reference: Option<ResultArray>,
}

#[derive(Debug)]
pub struct BenchReport {
    pub executor: String,
    pub sizes: Vec<SizeReport>,
}

impl BenchReport {
    /// Every failed variant with the size it failed at.
    pub fn failures(&self) -> impl Iterator<Item = (Extent, &VariantReport, &VariantError)> + '_ {
        self.sizes.iter().flat_map(|size| {
            size.variants
                .iter()
                .filter_map(move |v| v.result.as_ref().err().map(|e| (size.logical, v, e)))
        })
    }

    pub fn all_passed(&self) -> bool {
        self.failures().next().is_none()
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "executor: {}", self.executor)?;
        for size in &self.sizes {
            writeln!(f)?;
            writeln!(
                f,
                "== {} == reference (cpu): {:.3} ms",
                size.logical,
                ms(size.reference_time)
            )?;
            for v in &size.variants {
                write!(f, "  {:<14}", v.variant.name)?;
                match &v.result {
                    Ok(o) => write!(
                        f,
                        "{:>10.3} ms  mad={:.3e} max={:.3e}",
                        ms(o.kernel_time),
                        o.mean_abs_diff,
                        o.max_abs_diff
                    )?,
                    Err(e) => write!(f, "FAILED at {}: {e}", e.stage())?,
                }
                writeln!(f)?;
                if let Some(plan) = &v.plan {
                    write!(f, "                {plan}")?;
                    if let Some(d) = &v.defines {
                        write!(f, "  [{d}]")?;
                    }
                    writeln!(f)?;
                }
            }
        }
        let failed = self.failures().count();
        if failed > 0 {
            writeln!(f)?;
            writeln!(f, "{failed} variant run(s) failed")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run every selected variant at every size on `executor`.
pub fn run(config: &BenchConfig, executor: &mut dyn KernelExecutor) -> Result<BenchReport, ConfigError> {
    config.validate()?;
    let variants = config.selected_variants()?;
    let plan_cfg = config.plan.with_group_capacity(executor.group_capacity());
    info!(
        executor = executor.name(),
        group_capacity = plan_cfg.group_capacity,
        variants = variants.len(),
        "starting benchmark"
    );

    let mut sizes = Vec::with_capacity(config.sizes.len());
    for &size in &config.sizes {
        sizes.push(run_size(config, &plan_cfg, &variants, size, executor)?);
    }
    Ok(BenchReport { executor: executor.name().to_string(), sizes })
}

/// One problem size: input, reference, then every variant in turn.
pub fn run_size(
    config: &BenchConfig,
    plan_cfg: &PlanConfig,
    variants: &[&'static Variant],
    size: Extent,
    executor: &mut dyn KernelExecutor,
) -> Result<SizeReport, ConfigError> {
    let input = config.input.generate(size)?;
    let logical = input.extent();

    let start = Instant::now();
    let reference = reference::correlate(&input, &config.mask);
    let reference_time = start.elapsed();
    info!(size = %logical, reference_ms = ms(reference_time), "reference done");

    let reports = variants
        .iter()
        .map(|&v| {
            let report = run_variant(v, &input, &reference, config, plan_cfg, executor);
            match &report.result {
                Ok(o) => info!(
                    variant = v.name,
                    size = %logical,
                    kernel_ms = ms(o.kernel_time),
                    mad = o.mean_abs_diff,
                    "variant done"
                ),
                Err(e) => warn!(variant = v.name, size = %logical, stage = %e.stage(), "{e}"),
            }
            report
        })
        .collect();

    let keep = config.keep_arrays;
    Ok(SizeReport {
        logical,
        reference_time,
        variants: reports,
        input: keep.then_some(input),
        reference: keep.then_some(reference),
    })
}

/// plan → stage → execute → unstage → compare for one variant.
pub fn run_variant(
    variant: &'static Variant,
    input: &BorderedArray,
    reference: &ResultArray,
    config: &BenchConfig,
    plan_cfg: &PlanConfig,
    executor: &mut dyn KernelExecutor,
) -> VariantReport {
    let plan = match variant.plan(input.extent(), plan_cfg) {
        Ok(plan) => plan,
        Err(e) => {
            return VariantReport {
                variant,
                plan: None,
                defines: None,
                result: Err(VariantError::Plan(e)),
            }
        }
    };
    let launch = variant.launch(&plan);
    debug!(variant = variant.name, %plan, defines = %launch.defines, "planned");

    let result = execute_planned(&launch, input, reference, config, executor);
    let defines = launch.defines.clone();
    VariantReport { variant, plan: Some(plan), defines: Some(defines), result }
}

fn execute_planned(
    launch: &KernelLaunch<'_>,
    input: &BorderedArray,
    reference: &ResultArray,
    config: &BenchConfig,
    executor: &mut dyn KernelExecutor,
) -> Result<VariantOutcome, VariantError> {
    let plan = launch.plan;
    let staged = marshal::stage(input, plan).map_err(VariantError::Stage)?;
    let exec = executor
        .execute(launch, &staged, &config.mask)
        .map_err(VariantError::Execute)?;
    let output = marshal::unstage(&exec.output, plan).map_err(VariantError::Unstage)?;
    let (mean_abs_diff, max_abs_diff) =
        compare::grid_diff(&output, reference).map_err(VariantError::Compare)?;

    if let Some(t) = config.tolerance {
        if !t.accepts(mean_abs_diff) {
            return Err(VariantError::ToleranceExceeded {
                mean_abs_diff,
                tolerance: t.max_mean_abs_diff,
            });
        }
    }
    Ok(VariantOutcome {
        mean_abs_diff,
        max_abs_diff,
        kernel_time: exec.kernel_time,
        output: config.keep_arrays.then_some(output),
    })
}

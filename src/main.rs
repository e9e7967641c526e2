// main.rs — corrbench command line.
//
// Runs every registered variant at every requested size on one backend and
// prints the report. Exits non-zero on a configuration error or if any
// variant failed.
//
//   corrbench                                   # GPU, default sizes
//   corrbench --backend host --sizes 17x5,100x70
//   corrbench --input debug --print-arrays --variant padded
//
// Logging goes to stderr through `tracing`; set RUST_LOG (or --log-level)
// to `info` for per-variant progress, `debug` for plans and defines.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use corrbench::bench::{self, BenchConfig, BenchReport};
use corrbench::compare::{Tolerance, DEFAULT_TOLERANCE};
use corrbench::exec::{HostExecutor, KernelExecutor};
use corrbench::gpu::{DeviceProfile, GpuCorrelator};
use corrbench::input::{HaloFill, InputKind};
use corrbench::layout::{
    PlanConfig, DEFAULT_ALIGNMENT, DEFAULT_GROUP_CAPACITY, DEFAULT_ROW_GRANULARITY,
};
use corrbench::mask::StencilMask;
use corrbench::variant;

const DEFAULT_SIZES: &str = "1000x1000,4000x2000,8000x10000,8190x8190";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputArg {
    /// Ramp 0, 1, 2, ... with a zero halo.
    Sequential,
    /// Uniform [0, 100) from --seed.
    Random,
    /// Fixed 10x10 grid 1..=100; ignores --sizes.
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// wgpu compute pipelines.
    Gpu,
    /// Sequential host model of the device kernels.
    Host,
    /// Host model copying the centre tap; checks marshalling only.
    Passthrough,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    /// Adapter's own limits.
    Native,
    /// wgpu default limits.
    Baseline,
}

impl From<ProfileArg> for DeviceProfile {
    fn from(p: ProfileArg) -> Self {
        match p {
            ProfileArg::Native => DeviceProfile::Native,
            ProfileArg::Baseline => DeviceProfile::Baseline,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "corrbench", version, about = "3x3 correlation memory-access benchmark")]
struct Args {
    /// Comma-separated problem sizes, WIDTHxHEIGHT.
    #[arg(long, default_value = DEFAULT_SIZES)]
    sizes: String,

    #[arg(long, value_enum, default_value_t = InputArg::Random)]
    input: InputArg,

    /// Seed for --input random.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Fill the halo with random values too (texture variants then deviate
    /// at the border).
    #[arg(long)]
    random_halo: bool,

    /// Nine comma-separated weights, row-major. Defaults to all ones.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    mask: Option<Vec<f32>>,

    /// Maximum mean absolute difference a variant may show.
    #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
    tolerance: f64,

    /// Report differences without failing any variant.
    #[arg(long, conflicts_with = "tolerance")]
    no_tolerance: bool,

    #[arg(long, value_enum, default_value_t = Backend::Gpu)]
    backend: Backend,

    /// Device limits for the GPU backend.
    #[arg(long, value_enum, default_value_t = ProfileArg::Native)]
    profile: ProfileArg,

    /// Work-group capacity of the host backends.
    #[arg(long, default_value_t = DEFAULT_GROUP_CAPACITY)]
    group_capacity: usize,

    #[arg(long, default_value_t = DEFAULT_ROW_GRANULARITY)]
    row_granularity: usize,

    /// Row alignment of the padded variants, in floats.
    #[arg(long, default_value_t = DEFAULT_ALIGNMENT)]
    alignment: usize,

    /// Run only these variants (repeatable).
    #[arg(long = "variant")]
    variants: Vec<String>,

    /// List the registered variants and exit.
    #[arg(long)]
    list_variants: bool,

    /// Dump input, reference and every variant output. Small sizes only.
    #[arg(long)]
    print_arrays: bool,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> Result<BenchConfig> {
    let sizes = bench::parse_sizes(&args.sizes)?;
    let input = match args.input {
        InputArg::Sequential => InputKind::Sequential,
        InputArg::Debug => InputKind::Debug,
        InputArg::Random => InputKind::Random {
            seed: args.seed,
            halo: if args.random_halo { HaloFill::Random } else { HaloFill::Zero },
        },
    };
    let mut mask = match &args.mask {
        Some(weights) => StencilMask::from_slice(weights)?,
        None => StencilMask::ones(),
    };
    if args.backend == Backend::Passthrough {
        // The passthrough kernel copies the centre tap, which only matches
        // the reference under the identity mask.
        tracing::info!("passthrough backend: using the identity mask");
        mask = StencilMask::identity();
    }
    let tolerance = if args.no_tolerance { None } else { Some(Tolerance::new(args.tolerance)?) };

    Ok(BenchConfig {
        sizes,
        input,
        mask,
        tolerance,
        plan: PlanConfig {
            group_capacity: args.group_capacity,
            row_granularity: args.row_granularity,
            alignment_stride: args.alignment,
        },
        variants: args.variants.clone(),
        keep_arrays: args.print_arrays,
    })
}

fn print_arrays(report: &BenchReport) {
    for size in &report.sizes {
        println!();
        if let Some(input) = &size.input {
            println!("input {} (bordered):\n{}", size.logical, input.padded());
        }
        if let Some(reference) = &size.reference {
            println!("reference:\n{reference}");
        }
        for v in &size.variants {
            if let Ok(outcome) = &v.result {
                if let Some(out) = &outcome.output {
                    println!("{}:\n{out}", v.variant.name);
                }
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    if args.list_variants {
        for v in variant::registry() {
            println!("{:<14} {:<28} {}", v.name, v.program, v.policy);
        }
        return Ok(());
    }

    let config = build_config(&args)?;
    let mut executor: Box<dyn KernelExecutor> = match args.backend {
        Backend::Gpu => Box::new(
            GpuCorrelator::new(args.profile.into()).context("GPU backend initialisation failed")?,
        ),
        Backend::Host => Box::new(HostExecutor::correlate(args.group_capacity)),
        Backend::Passthrough => Box::new(HostExecutor::passthrough(args.group_capacity)),
    };

    let report = bench::run(&config, executor.as_mut())?;
    print!("{report}");
    if args.print_arrays {
        print_arrays(&report);
    }

    let failed = report.failures().count();
    if failed > 0 {
        for (size, v, err) in report.failures() {
            eprintln!("error: {} at {size}: {} stage failed: {err}", v.variant.name, err.stage());
        }
        bail!("{failed} variant run(s) failed");
    }
    Ok(())
}

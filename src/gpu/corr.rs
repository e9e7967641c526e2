// gpu/corr.rs — Running correlation variants as wgpu compute pipelines.
//
// One `execute` call owns every GPU resource of one variant run:
//
//   render WGSL ─▶ shader + pipeline ─▶ upload src/weights/params
//        ─▶ submit + wait (upload done) ─▶ dispatch + wait   <- timed
//        ─▶ copy dst → staging ─▶ map ─▶ Grid
//
// Nothing is cached between calls; pipelines, buffers and textures are
// dropped on return, success or error. Resource creation and the dispatch
// run inside `GpuDevice::scoped`, so a validation or out-of-memory error
// comes back as an `ExecError` for that variant only.
//
// BINDINGS (all programs)
// ───────────────────────
//   0  src      storage array<f32> (bordered or padded input)
//               texture_2d<f32> R32Float for corr_image
//   1  weights  storage array<f32>, 9 entries, row-major
//   2  dst      storage read_write array<f32>, plan.output_extent
//   3  params   uniform CorrParams
//
// SHADER TEMPLATES
// ────────────────
// naga does not accept `override` expressions inside @workgroup_size(),
// so the variant's defines are baked into the WGSL source by string
// replacement of `{{NAME}}` tokens. `SHARED_LEN` (workgroup array length)
// is derived here from the tile defines.
//
// NEW RUST CONCEPTS
// ──────────────────
// - `bytemuck::cast_slice` — reinterpret `&[f32]` as `&[u8]` (and back on
//   read-back) without copying. Safe because both are `Pod`.
// - `impl KernelExecutor for GpuCorrelator` — the driver only sees the
//   trait object, so the host model and the GPU are interchangeable.

use std::time::{Duration, Instant};

use tracing::debug;
use wgpu::util::DeviceExt;

use crate::exec::{ExecError, Execution, KernelExecutor};
use crate::grid::{Extent, Grid};
use crate::gpu::device::{DeviceProfile, GpuDevice, GpuError};
use crate::layout::LayoutPlan;
use crate::marshal::StagedInput;
use crate::mask::StencilMask;
use crate::variant::{KernelDefines, KernelLaunch, Program, KERNEL_NAME};

const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

// ---------------------------------------------------------------------------
// Params uniform (must match `CorrParams` in every shader)
// ---------------------------------------------------------------------------

/// Layout:
///   offset  0: in_stride  (u32)
///   offset  4: out_stride (u32)
///   offset  8: width      (u32)  logical
///   offset 12: height     (u32)  logical
///   total:  16 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct CorrParams {
    in_stride: u32,
    out_stride: u32,
    width: u32,
    height: u32,
}

impl CorrParams {
    fn new(plan: &LayoutPlan) -> Result<Self, GpuError> {
        Ok(CorrParams {
            in_stride: to_u32("input stride", plan.input_stride())?,
            out_stride: to_u32("output stride", plan.output_stride())?,
            width: to_u32("width", plan.logical.width)?,
            height: to_u32("height", plan.logical.height)?,
        })
    }
}

fn to_u32(what: &'static str, value: usize) -> Result<u32, GpuError> {
    u32::try_from(value).map_err(|_| GpuError::DimensionOverflow { what, value })
}

// ---------------------------------------------------------------------------
// Shader templates
// ---------------------------------------------------------------------------

fn template(program: Program) -> &'static str {
    match program {
        Program::GlobalMem => include_str!("../shaders/corr_global_mem.wgsl"),
        Program::LocalMem => include_str!("../shaders/corr_local_mem.wgsl"),
        Program::LocalMemCorners => include_str!("../shaders/corr_local_mem_corners.wgsl"),
        Program::InnerTile => include_str!("../shaders/corr_local_mem_inner_tile.wgsl"),
        Program::Padding => include_str!("../shaders/corr_local_mem_padding.wgsl"),
        Program::Image => include_str!("../shaders/corr_image.wgsl"),
    }
}

/// Elements of workgroup memory the program declares, if any.
fn shared_len(program: Program, defines: &KernelDefines) -> Option<usize> {
    match program {
        Program::LocalMem | Program::LocalMemCorners | Program::Padding => {
            Some((defines.get("TILE_W")? + 2) * (defines.get("TILE_H")? + 2))
        }
        Program::InnerTile => Some(defines.get("IN_TILE_W")? * defines.get("IN_TILE_H")?),
        Program::GlobalMem | Program::Image => None,
    }
}

/// Substitute every define (and `SHARED_LEN`) into the program template.
pub fn render_shader(program: Program, defines: &KernelDefines) -> Result<String, GpuError> {
    let mut src = template(program).to_string();
    for (key, value) in defines.iter() {
        src = src.replace(&format!("{{{{{key}}}}}"), &value.to_string());
    }
    if let Some(len) = shared_len(program, defines) {
        src = src.replace("{{SHARED_LEN}}", &len.to_string());
    }
    if let Some(start) = src.find("{{") {
        let end = src[start..].find("}}").map_or(src.len(), |e| start + e + 2);
        return Err(GpuError::UnresolvedPlaceholder {
            program: program.name(),
            placeholder: src[start..end].to_string(),
        });
    }
    Ok(src)
}

// ---------------------------------------------------------------------------
// GpuCorrelator
// ---------------------------------------------------------------------------

/// `KernelExecutor` backed by a wgpu device.
pub struct GpuCorrelator {
    gpu: GpuDevice,
}

impl GpuCorrelator {
    pub fn new(profile: DeviceProfile) -> Result<Self, GpuError> {
        Ok(GpuCorrelator { gpu: GpuDevice::new_with_profile(profile)? })
    }

    pub fn from_device(gpu: GpuDevice) -> Self {
        GpuCorrelator { gpu }
    }

    pub fn device(&self) -> &GpuDevice {
        &self.gpu
    }

    /// Size checks that need no device calls.
    fn check_limits(&self, launch: &KernelLaunch<'_>) -> Result<(), GpuError> {
        let plan = launch.plan;
        let gpu = &self.gpu;
        gpu.check_workgroup(
            to_u32("group width", plan.group.width)?,
            to_u32("group height", plan.group.height)?,
        )?;
        let dispatch = plan.dispatch();
        gpu.check_dispatch(
            to_u32("dispatch width", dispatch.width)?,
            to_u32("dispatch height", dispatch.height)?,
        )?;
        if let Some(len) = shared_len(launch.program(), &launch.defines) {
            gpu.check_shared_memory(to_u32("shared memory", len * F32_BYTES as usize)?)?;
        }
        if launch.program() == Program::Image {
            gpu.check_texture_extent(
                to_u32("texture width", plan.input_extent.width)?,
                to_u32("texture height", plan.input_extent.height)?,
            )?;
        } else {
            gpu.check_buffer_size(plan.input_extent.area() as u64 * F32_BYTES)?;
        }
        gpu.check_buffer_size(plan.output_extent.area() as u64 * F32_BYTES)?;
        Ok(())
    }

    fn run(
        &self,
        launch: &KernelLaunch<'_>,
        input: &StagedInput,
        mask: &StencilMask,
    ) -> Result<(Vec<f32>, Duration), GpuError> {
        let gpu = &self.gpu;
        let plan = launch.plan;
        let program = launch.program();

        let shader_src = render_shader(program, &launch.defines)?;
        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.name()),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("corr BGL"),
            entries: &[
                // Binding 0 — input (buffer or texture)
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: if program == Program::Image {
                        wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        }
                    } else {
                        storage_binding(true)
                    },
                    count: None,
                },
                // Binding 1 — weights
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: storage_binding(true),
                    count: None,
                },
                // Binding 2 — output
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: storage_binding(false),
                    count: None,
                },
                // Binding 3 — params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("corr pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(launch.variant.name),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: KERNEL_NAME,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        // --- Inputs ---
        let input_resource = upload_input(gpu, program, input)?;
        let weights_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("corr weights"),
            contents: bytemuck::cast_slice(mask.as_slice()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let params = CorrParams::new(plan)?;
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("CorrParams"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        // Zero-filled so over-computed cells the kernel skips read back as 0.
        let out_bytes = plan.output_extent.area() as u64 * F32_BYTES;
        let dst_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("corr dst"),
            size: out_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let input_binding = match &input_resource {
            InputResource::Buffer(buf) => buf.as_entire_binding(),
            InputResource::Texture { view, .. } => wgpu::BindingResource::TextureView(view),
        };
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("corr bind group"),
            layout: &bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: input_binding },
                wgpu::BindGroupEntry { binding: 1, resource: weights_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: dst_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: params_buf.as_entire_binding() },
            ],
        });

        // Flush uploads so the timed region covers the kernel only.
        gpu.queue.submit(std::iter::empty());
        gpu.device.poll(wgpu::Maintain::Wait);

        // --- Dispatch (timed) ---
        let dispatch = plan.dispatch();
        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("corr dispatch"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(KERNEL_NAME),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(dispatch.width as u32, dispatch.height as u32, 1);
        }
        let start = Instant::now();
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.device.poll(wgpu::Maintain::Wait);
        let kernel_time = start.elapsed();

        debug!(
            variant = launch.variant.name,
            dispatch = %dispatch,
            kernel_ms = kernel_time.as_secs_f64() * 1e3,
            "dispatch complete"
        );

        let output = readback(gpu, &dst_buf, out_bytes)?;
        Ok((output, kernel_time))
    }
}

impl KernelExecutor for GpuCorrelator {
    fn name(&self) -> &str {
        "gpu"
    }

    fn group_capacity(&self) -> usize {
        self.gpu.group_capacity()
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
        self.check_limits(launch)?;

        let (data, kernel_time) = self.gpu.scoped(|| self.run(launch, input, mask))?;
        Ok(Execution { output: Grid::from_vec(plan.output_extent, data), kernel_time })
    }
}

// ---------------------------------------------------------------------------
// Upload / read-back helpers
// ---------------------------------------------------------------------------

enum InputResource {
    Buffer(wgpu::Buffer),
    Texture {
        // Held so the texture outlives its view until the dispatch is done.
        _texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
}

fn storage_binding(read_only: bool) -> wgpu::BindingType {
    wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Storage { read_only },
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

fn upload_input(
    gpu: &GpuDevice,
    program: Program,
    input: &StagedInput,
) -> Result<InputResource, GpuError> {
    if program != Program::Image {
        let buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("corr src"),
            contents: bytemuck::cast_slice(input.as_slice()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        return Ok(InputResource::Buffer(buf));
    }

    let Extent { width, height } = input.extent();
    let width = to_u32("texture width", width)?;
    let height = to_u32("texture height", height)?;
    let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("corr src image"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        // R32Float: raw f32 values, not normalised.
        format: wgpu::TextureFormat::R32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    // `write_texture` has no 256-byte row alignment requirement, unlike a
    // buffer→texture copy, so the packed rows go up as they are.
    gpu.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(input.as_slice()),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * F32_BYTES as u32),
            rows_per_image: Some(height),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(InputResource::Texture { _texture: texture, view })
}

/// Copy `src` into a mappable buffer and read it back as f32.
fn readback(gpu: &GpuDevice, src: &wgpu::Buffer, bytes: u64) -> Result<Vec<f32>, GpuError> {
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("corr readback"),
        size: bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("corr readback"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, bytes);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| GpuError::MapCallbackLost)?
        .map_err(GpuError::Map)?;

    let data = {
        let mapped = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, f32>(&mapped).to_vec()
    };
    staging.unmap();
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PlanConfig;
    use crate::variant;

    fn defines_for(name: &str, extent: Extent, capacity: usize) -> (Program, KernelDefines) {
        let v = variant::find(name).unwrap();
        let plan = v.plan(extent, &PlanConfig::default().with_group_capacity(capacity)).unwrap();
        (v.program, v.defines(&plan))
    }

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<CorrParams>(), 16);
    }

    #[test]
    fn test_every_registered_variant_renders() {
        for v in variant::registry() {
            let (program, defines) = defines_for(v.name, Extent::new(100, 70), 256);
            let src = render_shader(program, &defines)
                .unwrap_or_else(|e| panic!("{}: {e}", v.name));
            assert!(!src.contains("{{"), "{}", v.name);
            assert!(src.contains(&format!("fn {KERNEL_NAME}(")), "{}", v.name);
        }
    }

    #[test]
    fn test_render_substitutes_shared_len() {
        let (program, defines) = defines_for("tiled", Extent::new(100, 70), 256);
        let src = render_shader(program, &defines).unwrap();
        // (32 + 2) * (32 + 2)
        assert!(src.contains("array<f32, 1156>"));
        assert!(src.contains("@workgroup_size(32, 8, 1)"));

        let (program, defines) = defines_for("inner-tile", Extent::new(100, 70), 256);
        let src = render_shader(program, &defines).unwrap();
        assert!(src.contains("array<f32, 256>"));
        assert!(src.contains("const OUT_TILE_W: u32 = 30u;"));
    }

    #[test]
    fn test_render_reports_missing_define() {
        let mut defines = KernelDefines::default();
        defines.push("TILE_W", 32);
        defines.push("TILE_H", 32);
        defines.push("WG_W", 32);
        defines.push("WG_H", 8);
        // No PADDING.
        let err = render_shader(Program::Padding, &defines).unwrap_err();
        match err {
            GpuError::UnresolvedPlaceholder { program, placeholder } => {
                assert_eq!(program, "corr_local_mem_padding");
                assert_eq!(placeholder, "{{PADDING}}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_shared_len() {
        let (program, defines) = defines_for("tiled-v2", Extent::new(64, 64), 256);
        assert_eq!(shared_len(program, &defines), Some(34 * 10));
        let (program, defines) = defines_for("global", Extent::new(64, 64), 256);
        assert_eq!(shared_len(program, &defines), None);
    }

    // ---- GPU integration tests (subprocess-isolated) -----------------------
    //
    // Same subprocess isolation pattern as gpu::device. The `inner_*` tests
    // run in a child process; `test_*` wrappers spawn the child and assert
    // "GPU_TEST_OK" appears in the output.

    fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
            .output()
            .unwrap_or_else(|e| panic!("subprocess failed for {test_name}: {e}"));
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }

    // Inner tests ─────────────────────────────────────────────────────────────

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_matches_reference() {
        use crate::bench::{self, BenchConfig};
        use crate::input::InputKind;

        let mut gpu = GpuCorrelator::new(DeviceProfile::Native).expect("need Vulkan GPU");
        let config = BenchConfig {
            sizes: vec![Extent::new(17, 5), Extent::new(100, 70), Extent::new(257, 129)],
            input: InputKind::Sequential,
            ..BenchConfig::default()
        };
        let report = bench::run(&config, &mut gpu).unwrap();
        for (size, v, err) in report.failures() {
            eprintln!("[test] {size} {}: {err}", v.variant.name);
        }
        assert!(report.all_passed());
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_oversized_buffer_is_a_variant_error() {
        use crate::input;
        use crate::marshal;

        let mut gpu = GpuCorrelator::new(DeviceProfile::Baseline).expect("need Vulkan GPU");
        // 8000×10000 floats = 320 MB, over the 128 MiB baseline binding limit.
        let v = variant::find("global").unwrap();
        let cfg = PlanConfig::default().with_group_capacity(gpu.group_capacity());
        let plan = v.plan(Extent::new(8000, 10000), &cfg).unwrap();
        let arr = input::sequential(8000, 10000).unwrap();
        let staged = marshal::stage(&arr, &plan).unwrap();
        let err = gpu
            .execute(&v.launch(&plan), &staged, &StencilMask::ones())
            .unwrap_err();
        assert!(matches!(err, ExecError::Gpu(GpuError::BufferTooLarge { .. })), "{err}");
        println!("GPU_TEST_OK");
    }

    // Outer tests ─────────────────────────────────────────────────────────────

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_gpu_matches_reference() {
        let out = run_gpu_test_in_subprocess("gpu::corr::tests::inner_gpu_matches_reference");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_oversized_buffer_is_a_variant_error() {
        let out =
            run_gpu_test_in_subprocess("gpu::corr::tests::inner_oversized_buffer_is_a_variant_error");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }
}

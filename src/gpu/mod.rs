// gpu/mod.rs — wgpu backend.
//
// The device kernels mirror the host model in `exec.rs`: same plans, same
// staged inputs, same output surfaces. Every GPU result is validated
// against `reference::correlate` by the driver, exactly like the host ones.
//
//   device.rs   adapter selection, profiles, limit checks, error scopes
//   corr.rs     `GpuCorrelator`, one compute pipeline per variant run
//
// Shaders live in src/shaders/ and are embedded with `include_str!`.

pub mod corr;
pub mod device;

pub use corr::GpuCorrelator;
pub use device::{DeviceProfile, GpuDevice, GpuError};

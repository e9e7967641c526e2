// corrbench: memory-access strategies for a 3×3 correlation stencil.
//
// Every accelerated variant is graded against the sequential reference in
// `reference`. The interesting part lives in `layout` (tile/grid/extent
// planning per strategy) and `marshal` (moving the bordered host array into
// the device-side layout and clipping the result back out).
//
// Pipeline per problem size:
//   input → reference → for each variant:
//     layout::plan → marshal::stage → KernelExecutor → marshal::unstage → compare

pub mod error;
pub mod grid;
pub mod mask;
pub mod input;
pub mod reference;
pub mod layout;
pub mod marshal;
pub mod variant;
pub mod compare;
pub mod exec;
pub mod bench;
pub mod gpu;

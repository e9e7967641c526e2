// reference.rs — Sequential 3×3 correlation over a bordered array.
//
// This is the oracle every variant is graded against.
//
//   out(x, y) = Σ_{j=0..3} Σ_{i=0..3} in_padded(x + i, y + j) * mask(i, j)
//
// Padded coordinates already include the halo shift, so tap (i, j) of
// logical (x, y) is the logical neighbour (x + i - 1, y + j - 1) and halo
// cells participate at the edges.
//
// BORDER HANDLING: whatever the halo holds. Unlike the clamp-to-edge
// convolution used for image pyramids, nothing is synthesised here; the
// generator decides what lives past the edge.
//
// Accumulation order is fixed (row j outer, column i inner, starting from
// 0.0). The host kernel model in exec.rs uses the same order, which is what
// makes its results bit-identical to this one.

use crate::grid::{BorderedArray, Extent, ResultArray};
use crate::mask::{StencilMask, MASK_RADIUS, MASK_SIZE};

/// Correlate `input` with `mask`, producing the logical `w×h` result.
///
/// # Panics
/// Panics if the array's halo radius is not the mask radius (1).
pub fn correlate(input: &BorderedArray, mask: &StencilMask) -> ResultArray {
    assert_eq!(
        input.radius(),
        MASK_RADIUS,
        "halo radius {} does not match mask radius {MASK_RADIUS}",
        input.radius(),
    );

    let w = input.width();
    let h = input.height();
    let stride = input.stride();
    let src = input.padded().as_slice();
    let mut out = ResultArray::new(Extent::new(w, h));
    let dst = out.as_mut_slice();

    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0f32;
            for j in 0..MASK_SIZE {
                let row = (y + j) * stride + x;
                for i in 0..MASK_SIZE {
                    sum += src[row + i] * mask.at(i, j);
                }
            }
            dst[y * w + x] = sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input;

    #[test]
    fn test_identity_mask_reproduces_interior() {
        let arr = input::random(13, 7, 11, input::HaloFill::Random).unwrap();
        let out = correlate(&arr, &StencilMask::identity());
        assert_eq!(out, arr.interior());
    }

    #[test]
    fn test_box_sum_on_ramp() {
        // 10×10 ramp 0..99, zero halo.
        let arr = input::sequential(10, 10).unwrap();
        let out = correlate(&arr, &StencilMask::ones());
        // Corner: 0 + 1 + 10 + 11.
        assert_eq!(out.get(0, 0), 22.0);
        // Interior: nine neighbours of 55 → 9 * 55.
        assert_eq!(out.get(5, 5), 495.0);
        // Right edge (9, 4): 38 + 39 + 48 + 49 + 58 + 59.
        assert_eq!(out.get(9, 4), 291.0);
    }

    #[test]
    fn test_halo_participates() {
        // 1×1 array whose halo is all 2.0 and centre 1.0.
        let arr = BorderedArray::from_padded(1, 1, 1, vec![
            2.0, 2.0, 2.0,
            2.0, 1.0, 2.0,
            2.0, 2.0, 2.0,
        ]).unwrap();
        let out = correlate(&arr, &StencilMask::ones());
        assert_eq!(out.get(0, 0), 17.0);
    }

    #[test]
    fn test_asymmetric_mask_orientation() {
        // Only the top-left weight set: output(x, y) = in(x - 1, y - 1).
        let mut weights = [0.0; 9];
        weights[0] = 1.0;
        let mask = StencilMask::new(weights);
        let arr = input::sequential(4, 3).unwrap();
        let out = correlate(&arr, &mask);
        assert_eq!(out.get(0, 0), 0.0); // halo
        assert_eq!(out.get(1, 1), arr.get(0, 0));
        assert_eq!(out.get(3, 2), arr.get(2, 1));
    }

    #[test]
    fn test_deterministic() {
        let arr = input::random(33, 9, 5, input::HaloFill::Random).unwrap();
        let mask = StencilMask::new([0.1, -0.2, 0.3, 0.4, 0.5, -0.6, 0.7, 0.8, -0.9]);
        let a = correlate(&arr, &mask);
        let b = correlate(&arr, &mask);
        let bits = |g: &ResultArray| g.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }
}

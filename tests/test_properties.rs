// tests/test_properties.rs — Randomised invariants for planner, marshaller
// and comparator.

use proptest::prelude::*;

use corrbench::compare;
use corrbench::exec::{HostExecutor, KernelExecutor};
use corrbench::grid::Extent;
use corrbench::input::{self, HaloFill};
use corrbench::layout::PlanConfig;
use corrbench::marshal;
use corrbench::mask::StencilMask;
use corrbench::reference;
use corrbench::variant;

fn capacity() -> impl Strategy<Value = usize> {
    prop::sample::select(vec![128usize, 256, 512, 1024])
}

fn variant_index() -> impl Strategy<Value = usize> {
    0..variant::registry().len()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn plan_covers_and_contains(
        w in 1usize..600,
        h in 1usize..600,
        cap in capacity(),
        vi in variant_index(),
    ) {
        let v = &variant::registry()[vi];
        let cfg = PlanConfig::default().with_group_capacity(cap);
        let p = v.plan(Extent::new(w, h), &cfg).unwrap();
        let covered = p.covered();
        prop_assert!(covered.width >= w && covered.height >= h);
        prop_assert!(p.output_extent.contains(Extent::new(w, h)));
        prop_assert!(p.group.area() <= cap);
        if !v.policy.packs_image() {
            prop_assert!(p.input_extent.width >= p.input_origin + covered.width + 2);
        }
    }

    #[test]
    fn padded_plans_align_rows(
        w in 1usize..2000,
        h in 1usize..64,
        alignment in prop::sample::select(vec![16usize, 32, 64, 128]),
        tall in any::<bool>(),
    ) {
        let name = if tall { "padded-v2" } else { "padded" };
        let cfg = PlanConfig { alignment_stride: alignment, ..PlanConfig::default() };
        let p = variant::find(name).unwrap().plan(Extent::new(w, h), &cfg).unwrap();
        let pad = p.padding.unwrap();
        prop_assert!(pad.leading_padding < alignment);
        prop_assert_eq!(p.input_stride() % alignment, 0);
        prop_assert_eq!(p.output_stride() % alignment, 0);
        prop_assert_eq!((p.input_origin + 1) % alignment, 0);
    }

    #[test]
    fn passthrough_round_trip_preserves_interior(
        w in 1usize..80,
        h in 1usize..80,
        seed in any::<u64>(),
        vi in variant_index(),
    ) {
        let v = &variant::registry()[vi];
        let arr = input::random(w, h, seed, HaloFill::Random).unwrap();
        let p = v.plan(arr.extent(), &PlanConfig::default()).unwrap();
        let staged = marshal::stage(&arr, &p).unwrap();
        let mut exec = HostExecutor::passthrough(256);
        let out = exec.execute(&v.launch(&p), &staged, &StencilMask::identity()).unwrap();
        let result = marshal::unstage(&out.output, &p).unwrap();
        prop_assert_eq!(result, arr.interior());
    }

    #[test]
    fn host_correlation_matches_reference(
        w in 1usize..70,
        h in 1usize..70,
        seed in any::<u64>(),
        vi in variant_index(),
    ) {
        let v = &variant::registry()[vi];
        let arr = input::random(w, h, seed, HaloFill::Zero).unwrap();
        let mask = StencilMask::from_slice(&[0.5, -1.0, 0.25, 2.0, 1.0, -0.5, 0.0, 1.5, -2.0]).unwrap();
        let expected = reference::correlate(&arr, &mask);
        let p = v.plan(arr.extent(), &PlanConfig::default()).unwrap();
        let staged = marshal::stage(&arr, &p).unwrap();
        let mut exec = HostExecutor::correlate(256);
        let out = exec.execute(&v.launch(&p), &staged, &mask).unwrap();
        let result = marshal::unstage(&out.output, &p).unwrap();
        prop_assert_eq!(compare::mean_abs_diff(result.as_slice(), expected.as_slice()).unwrap(), 0.0);
    }

    #[test]
    fn comparator_is_symmetric_and_bounded(
        pairs in prop::collection::vec((-1e3f32..1e3, -1e3f32..1e3), 1..200),
    ) {
        let (a, b): (Vec<f32>, Vec<f32>) = pairs.into_iter().unzip();
        let ab = compare::mean_abs_diff(&a, &b).unwrap();
        let ba = compare::mean_abs_diff(&b, &a).unwrap();
        prop_assert_eq!(ab, ba);
        prop_assert!(ab >= 0.0);
        prop_assert!(ab <= compare::max_abs_diff(&a, &b).unwrap());
        prop_assert_eq!(compare::mean_abs_diff(&a, &a).unwrap(), 0.0);
    }
}

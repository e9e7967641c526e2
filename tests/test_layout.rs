// tests/test_layout.rs — Planner invariants across every policy.
//
// The unit tests in layout.rs pin individual numbers. These walk the
// registry over awkward sizes and device capacities and check the
// invariants every plan must satisfy regardless of policy.

use corrbench::grid::Extent;
use corrbench::layout::{plan, PlanConfig, PlanError, Policy};
use corrbench::variant;

const SIZES: [(usize, usize); 9] = [
    (1, 1),
    (2, 3),
    (17, 5),
    (31, 33),
    (32, 32),
    (33, 31),
    (100, 70),
    (1000, 1000),
    (8190, 8190),
];

const CAPACITIES: [usize; 4] = [64, 256, 512, 1024];

fn config(capacity: usize) -> PlanConfig {
    PlanConfig::default().with_group_capacity(capacity)
}

#[test]
fn test_every_plan_covers_logical_extent() {
    for &cap in &CAPACITIES {
        for &(w, h) in &SIZES {
            for v in variant::registry() {
                let logical = Extent::new(w, h);
                let p = match v.plan(logical, &config(cap)) {
                    Ok(p) => p,
                    // 32×2 groups leave no interior rows.
                    Err(PlanError::NoInteriorTile { .. }) if v.name == "inner-tile" && cap == 64 => {
                        continue
                    }
                    Err(e) => panic!("{} {w}×{h} cap {cap}: {e}", v.name),
                };
                let covered = p.covered();
                assert!(covered.width >= w && covered.height >= h, "{} {w}×{h}: {p}", v.name);
                assert!(p.output_extent.contains(logical), "{} {w}×{h}: {p}", v.name);
                assert!(p.output_extent.area() >= w * h);
                assert!(p.group.area() <= cap, "{} group {} over capacity {cap}", v.name, p.group);
            }
        }
    }
}

#[test]
fn test_grid_is_minimal() {
    // One tile fewer in either direction would leave cells uncovered.
    for &(w, h) in &SIZES {
        for v in variant::registry() {
            let p = v.plan(Extent::new(w, h), &config(256)).unwrap();
            if p.grid.width > 1 {
                assert!((p.grid.width - 1) * p.tile.width < w, "{} {w}×{h}", v.name);
            }
            if p.grid.height > 1 {
                assert!((p.grid.height - 1) * p.tile.height < h, "{} {w}×{h}", v.name);
            }
        }
    }
}

#[test]
fn test_bordered_input_holds_halo_around_covered_span() {
    for &(w, h) in &SIZES {
        for v in variant::registry().iter().filter(|v| !v.policy.packs_image()) {
            let p = v.plan(Extent::new(w, h), &config(256)).unwrap();
            let covered = p.covered();
            assert!(p.input_extent.width >= p.input_origin + covered.width + 2, "{} {p}", v.name);
            assert_eq!(p.input_extent.height, covered.height + 2, "{} {p}", v.name);
        }
    }
}

#[test]
fn test_padded_rows_are_aligned() {
    for &alignment in &[16, 32, 48, 64] {
        let cfg = PlanConfig { alignment_stride: alignment, ..config(256) };
        for &(w, h) in &SIZES {
            for tall_tile in [false, true] {
                let p = plan(Policy::Padded { tall_tile }, Extent::new(w, h), 1, &cfg).unwrap();
                let pad = p.padding.expect("padded plan carries padding");
                let tiled_w = p.covered().width;
                assert!(pad.leading_padding < alignment);
                assert_eq!((alignment + pad.leading_padding + tiled_w + 1) % alignment, 0);
                assert_eq!(p.input_extent.width % alignment, 0);
                assert_eq!(p.output_extent.width % alignment, 0);
                assert_eq!(p.output_extent.width, tiled_w + pad.output_padding);
                // Logical column 0 of every row lands on an aligned column.
                assert_eq!((p.input_origin + 1) % alignment, 0);
            }
        }
    }
}

#[test]
fn test_texture_input_is_packed_image() {
    for &(w, h) in &SIZES {
        for tall_tile in [false, true] {
            let p = plan(Policy::Texture { tall_tile }, Extent::new(w, h), 1, &config(256)).unwrap();
            assert_eq!(p.input_extent, Extent::new(w, h));
            assert_eq!(p.input_origin, 0);
        }
    }
}

#[test]
fn test_tall_tile_matches_group_height() {
    for &cap in &CAPACITIES {
        let p = plan(Policy::Tiled { tall_tile: true }, Extent::new(100, 100), 1, &config(cap)).unwrap();
        assert_eq!(p.tile.height, p.group.height);
        assert_eq!(p.group.height, cap / 32);
        let p = plan(Policy::Tiled { tall_tile: false }, Extent::new(100, 100), 1, &config(cap)).unwrap();
        assert_eq!(p.tile, Extent::new(32, 32));
    }
}

#[test]
fn test_flat_dispatch_covers_logical_extent() {
    for &cap in &CAPACITIES {
        for &(w, h) in &SIZES {
            let p = plan(Policy::Flat, Extent::new(w, h), 1, &config(cap)).unwrap();
            let d = p.dispatch();
            assert!(d.width * p.group.width >= w);
            assert!(d.height * p.group.height >= h);
        }
    }
}

#[test]
fn test_large_problem_sizes() {
    // 8190 = 255 * 32 + 30: the last tile column over-computes two cells.
    let v = variant::find("tiled").unwrap();
    let p = v.plan(Extent::new(8190, 8190), &config(1024)).unwrap();
    assert_eq!(p.grid, Extent::new(256, 256));
    assert_eq!(p.output_extent, Extent::new(8192, 8192));
    assert_eq!(p.input_extent, Extent::new(8194, 8194));

    let v = variant::find("padded").unwrap();
    let p = v.plan(Extent::new(8000, 10000), &config(1024)).unwrap();
    let pad = p.padding.unwrap();
    // tiledW = 250 * 32 = 8000; (8000 + 1) % 32 = 1 → 31 leading.
    assert_eq!(pad.leading_padding, 31);
    assert_eq!(p.input_extent.width, 32 + 8000 + 1 + 31);
}

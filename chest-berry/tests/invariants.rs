//! 随机化的不变量检查.

mod common;

use chest_berry::consts::region;
use chest_berry::features::FirstOrderFeature;
use chest_berry::prelude::*;
use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 绕 z 轴与 x 轴旋转得到的方向矩阵 (列为 IJK 各轴方向).
fn rotation(a: f64, b: f64) -> [[f64; 3]; 3] {
    let (sa, ca) = a.sin_cos();
    let (sb, cb) = b.sin_cos();
    // Rz(a) · Rx(b)
    [
        [ca, -sa * cb, sa * sb],
        [sa, ca * cb, -ca * sb],
        [0.0, sb, cb],
    ]
}

#[test]
fn test_ras_ijk_roundtrip() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let dims = [
            rng.random_range(1..600),
            rng.random_range(1..600),
            rng.random_range(1..400),
        ];
        let spacing = [
            rng.random_range(0.1..3.0),
            rng.random_range(0.1..3.0),
            rng.random_range(0.1..5.0),
        ];
        let origin = [
            rng.random_range(-300.0..300.0),
            rng.random_range(-300.0..300.0),
            rng.random_range(-300.0..300.0),
        ];
        let dirs = rotation(
            rng.random_range(-3.1..3.1),
            rng.random_range(-3.1..3.1),
        );
        let g = Geometry::new(dims, spacing, origin, dirs).unwrap();
        assert!(g.roundtrip_error() < 1e-9);
        for _ in 0..20 {
            let p = [
                rng.random_range(-500.0..500.0),
                rng.random_range(-500.0..500.0),
                rng.random_range(-500.0..500.0),
            ];
            let q = g.ijk_to_ras(g.ras_to_ijk(p, false));
            for (a, b) in p.iter().zip(q.iter()) {
                assert!((a - b).abs() < 1e-6, "{p:?} -> {q:?}");
            }
            assert_eq!(ras_to_lps(lps_to_ras(p)), p);
        }
    }
}

#[test]
fn test_shells_disjoint_and_nested() {
    let volume = ball_phantom([48, 48, 48], 0.9, 6.0, -880, 20);
    let mut nodule = segmented_nodule(&volume, 15.0);
    let lesion = nodule.labelmap().unwrap().clone();
    let cancel = CancelToken::new();

    let mut rng = StdRng::seed_from_u64(11);
    let mut radii: Vec<f64> = (0..6).map(|_| rng.random_range(0.5..15.0)).collect();
    radii.push(15.0);
    radii.sort_by(f64::total_cmp);

    let mut previous: Option<LabelMap> = None;
    for r in radii {
        let shell = nodule.sphere_shell(r, &cancel).unwrap();
        assert!(
            shell
                .data()
                .iter()
                .zip(lesion.data().iter())
                .all(|(s, l)| *s == 0 || *l == 0),
            "shell {r} intersects lesion"
        );
        if let Some(prev) = previous.as_ref() {
            assert!(is_subset(prev, &shell), "shell {r} not nested");
        }
        previous = Some(shell);
    }
}

#[test]
fn test_seed_move_and_restore_is_identical() {
    let volume = ball_phantom([40, 40, 40], 0.8, 6.0, -900, -20);
    let provider = ConnectedThresholdLevelSet::default();
    let cancel = CancelToken::new();
    let mut nodule = segmented_nodule(&volume, 12.0);
    nodule.seeds_mut().push([2.0, 0.5, -1.0]);
    nodule.segment(&provider, &volume, &cancel).unwrap();
    let labelmap = nodule.labelmap().unwrap().clone();
    let mesh = nodule.mesh().unwrap().clone();

    let mut rng = StdRng::seed_from_u64(3);
    for index in [0, 1] {
        let original = nodule.seeds().points()[index];
        let moved = [
            rng.random_range(-3.0..3.0),
            rng.random_range(-3.0..3.0),
            rng.random_range(-3.0..3.0),
        ];
        nodule.seeds_mut().move_to(index, moved);
        assert_eq!(nodule.state(), NoduleState::HasSeeds);
        nodule.segment(&provider, &volume, &cancel).unwrap();

        nodule.seeds_mut().move_to(index, original);
        nodule.segment(&provider, &volume, &cancel).unwrap();
        assert_eq!(nodule.labelmap(), Some(&labelmap));
        assert_eq!(nodule.mesh(), Some(&mesh));
    }
}

#[test]
fn test_leaf_regions_partition_whole_lung() {
    let leaves = [
        region::RIGHT_LUNG,
        region::LEFT_LUNG,
        region::RIGHT_SUPERIOR_LOBE,
        region::RIGHT_MIDDLE_LOBE,
        region::RIGHT_INFERIOR_LOBE,
        region::LEFT_SUPERIOR_LOBE,
        region::LEFT_INFERIOR_LOBE,
        region::LEFT_UPPER_THIRD,
        region::RIGHT_LOWER_THIRD,
    ];
    let mut rng = StdRng::seed_from_u64(5);
    let g = Geometry::centered([16, 16, 12], [0.7, 0.7, 1.25]).unwrap();
    for _ in 0..5 {
        let volume = Volume::from_fn(g.clone(), |_| rng.random_range(-1024..200));
        let labels = LabelMap::from_fn(g.clone(), |_| {
            if rng.random_bool(0.2) {
                0
            } else {
                let code = leaves[rng.random_range(0..leaves.len())];
                chest_berry::consts::label::compose(code, rng.random_range(0..4))
            }
        });
        let report = ParenchymaAnalyzer::default()
            .analyze(&volume, &labels, &CancelToken::new())
            .unwrap();
        let table = RegionTable::chest();
        let sum: f64 = report
            .regions
            .iter()
            .filter(|r| table.get(&r.region).is_some_and(|r| r.is_leaf()))
            .map(|r| r.metrics["VoxelCount"])
            .sum();
        assert_eq!(Some(sum), report.get("WholeLung", "VoxelCount"));
        assert_eq!(sum as usize, labels.foreground_count());
    }
}

#[test]
fn test_constant_intensity_first_order() {
    let g = Geometry::centered([12, 12, 12], [1.0; 3]).unwrap();
    let volume = Volume::filled(g.clone(), -730);
    let mask = LabelMap::from_fn(g, |(k, j, i)| u16::from(k > 2 && j > 3 && i < 9));
    let selection = FeatureSelection::empty().with_class(FeatureClass::FirstOrder);
    let r = extract(
        &volume,
        &mask,
        &selection,
        AuxMasks::default(),
        &mut Silent,
        &CancelToken::new(),
    )
    .unwrap();
    use FirstOrderFeature::*;
    for (f, expected) in [
        (StandardDeviation, 0.0),
        (Variance, 0.0),
        (Skewness, 0.0),
        (Kurtosis, 0.0),
        (Uniformity, 1.0),
    ] {
        assert_eq!(r.value(f.name()).unwrap(), expected, "{f}");
    }
}

#[test]
fn test_mass_monotonic_in_voxel_count() {
    let mut rng = StdRng::seed_from_u64(19);
    let g = Geometry::centered([10, 10, 10], [0.8; 3]).unwrap();
    let analyzer = ParenchymaAnalyzer::default();
    for _ in 0..5 {
        let hu = rng.random_range(-1000..400);
        let volume = Volume::filled(g.clone(), hu);
        let mut last = 0.0;
        for n in (50..=1000).step_by(50) {
            let labels = LabelMap::from_fn(g.clone(), |(k, j, i)| {
                u16::from(k * 100 + j * 10 + i < n) * region::WHOLE_LUNG as u16
            });
            let mass = analyzer
                .analyze(&volume, &labels, &CancelToken::new())
                .unwrap()
                .get("WholeLung", "Mass")
                .unwrap();
            assert!(mass >= last, "hu {hu}, {n} voxels");
            last = mass;
        }
    }
}

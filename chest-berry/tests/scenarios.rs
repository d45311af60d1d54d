//! 端到端场景.

mod common;

use chest_berry::features::FirstOrderFeature;
use chest_berry::prelude::*;
use chest_berry::seeds::CoordinateSystem;
use common::*;

/// 球形病灶分割, 球壳体素数与病灶均值.
fn lesion_and_shell(dims: [usize; 3]) {
    let volume = ball_phantom(dims, 0.7, 15.0, -900, 0);
    let mut nodule = segmented_nodule(&volume, 30.0);
    let cancel = CancelToken::new();
    let voxel = 0.7f64.powi(3);

    let lesion = nodule.labelmap().unwrap().foreground_count() as f64;
    let expected = ball_mm3(15.0) / voxel;
    assert!(rel_err(lesion, expected) < 0.02, "{lesion} vs {expected}");

    let shell = nodule.sphere_shell(20.0, &cancel).unwrap().foreground_count() as f64;
    let expected = (ball_mm3(20.0) - ball_mm3(15.0)) / voxel;
    assert!(rel_err(shell, expected) < 0.05, "{shell} vs {expected}");

    let selection = FeatureSelection::empty().with(Feature::FirstOrder(FirstOrderFeature::Mean));
    let record = nodule
        .analyze(
            &volume,
            AnalysisTarget::Lesion,
            &selection,
            AuxMasks::default(),
            &mut Silent,
            &cancel,
        )
        .unwrap();
    assert!((record.value("Mean").unwrap() + 900.0).abs() < 0.1);
}

#[test]
fn test_s1_lesion_and_shell() {
    // 间距与半径保持不变, 只缩小视野.
    lesion_and_shell([100, 100, 100]);
}

#[test]
#[ignore = "full-size 512×512×300 volume"]
fn test_s1_full_size() {
    lesion_and_shell([512, 512, 300]);
}

#[test]
fn test_s2_parenchyma() {
    let g = Geometry::centered([10, 10, 20], [1.0; 3]).unwrap();
    let volume = Volume::from_fn(g.clone(), |(k, _, _)| if k < 10 { -1000 } else { 0 });
    let labels = LabelMap::from_fn(g, |(k, _, _)| if k < 10 { 2 } else { 3 });
    let report = ParenchymaAnalyzer::default()
        .analyze(&volume, &labels, &CancelToken::new())
        .unwrap();

    assert_eq!(report.get("RightLung", "LAA%-950"), Some(100.0));
    assert_eq!(report.get("LeftLung", "LAA%-950"), Some(0.0));
    let mass = report.get("WholeLung", "Mass").unwrap();
    let expected = (1000.0 * 1.21e-3 + 1000.0 * 1.018) * 1e-3;
    assert!((mass - expected).abs() < 1e-9, "{mass} vs {expected}");
}

#[test]
fn test_s3_seed_xml_roundtrip() {
    let volume = Volume::filled(Geometry::centered([32, 32, 32], [0.7; 3]).unwrap(), -900);
    let mut case = Case::new("s3", volume);
    for t in [LesionType::Nodule, LesionType::Tumor] {
        let index = case.create_nodule(None);
        let mut seeds = case.nodule_mut(index).unwrap().seeds_mut();
        seeds.set_lesion_type(t);
        seeds.push(lps_to_ras([1.0, 2.0, 3.0]));
        seeds.push(lps_to_ras([4.0, 5.0, 6.0]));
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s3_seeds.xml");
    case.save_seeds(&path).unwrap();

    let doc = GeometryTopologyData::open(&path).unwrap();
    assert_eq!(doc.coordinate_system, CoordinateSystem::Lps);
    assert_eq!(doc.points.len(), 4);
    let parsed: Vec<_> = doc.points.iter().map(|p| p.nodule().unwrap()).collect();
    assert_eq!(
        parsed,
        vec![
            (1, LesionType::Nodule),
            (1, LesionType::Nodule),
            (2, LesionType::Tumor),
            (2, LesionType::Tumor)
        ]
    );
    for (p, expected) in doc.points.iter().zip([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].iter().cycle()) {
        for (a, b) in p.coordinate.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    let mut other = Case::new("s3", case.volume().clone());
    assert_eq!(other.open_seeds(&path).unwrap(), 2);
    for index in [1, 2] {
        assert_eq!(
            other.nodule(index).unwrap().seeds(),
            case.nodule(index).unwrap().seeds()
        );
    }
}

#[test]
fn test_s4_threshold_monotonicity() {
    let volume = ball_phantom([40, 40, 40], 1.0, 8.0, -900, 0);
    let mut handle = segment(
        &ConnectedThresholdLevelSet::default(),
        &volume,
        &SeedSet::with_centroid([0.0; 3], LesionType::Nodule),
        &SegmentConfig::default(),
        0.0,
        &CancelToken::new(),
    )
    .unwrap();

    let (lo, hi) = handle.range();
    let steps = 8;
    let mut previous: Option<LabelMap> = None;
    for s in 0..=steps {
        let t = (lo + (hi - lo) * s as f64 / steps as f64).min(hi);
        handle.set_threshold(t).unwrap();
        let current = handle.labelmap().clone();
        // `field >= t`: 阈值越高, 体素集合越小.
        if let Some(prev) = previous.as_ref() {
            assert!(is_subset(&current, prev), "threshold {t}");
        }
        previous = Some(current);
    }
}

#[test]
fn test_s5_feature_determinism() {
    let volume = Volume::from_fn(
        Geometry::centered([20, 20, 20], [0.8, 0.8, 1.2]).unwrap(),
        |(k, j, i)| (-1000 + ((k * 131 + j * 17 + i * 7) % 900) as i32) as i16,
    );
    let mask = LabelMap::from_fn(volume.geometry().clone(), |(k, j, i)| {
        u16::from((4..16).contains(&k) && (3..17).contains(&j) && (5..14).contains(&i))
    });
    let emphysema = LabelMap::from_fn(volume.geometry().clone(), |(k, _, _)| u16::from(k % 2 == 0));
    let selection = FeatureSelection::all();

    let run = || {
        extract(
            &volume,
            &mask,
            &selection,
            AuxMasks::with_emphysema(&emphysema),
            &mut Silent,
            &CancelToken::new(),
        )
        .unwrap()
    };
    let (a, b) = (run(), run());
    assert_eq!(a.len(), Feature::all().count());
    let bits = |r: &FeatureRecord| r.iter().map(|(k, v)| (k.to_string(), v.to_bits())).collect::<Vec<_>>();
    assert_eq!(bits(&a), bits(&b));
}

#[test]
fn test_s6_cancel_during_extraction() {
    let volume = ball_phantom([40, 40, 40], 1.0, 6.0, -900, 0);
    let mut nodule = segmented_nodule(&volume, 12.0);
    let before_labelmap = nodule.labelmap().unwrap().clone();
    let cancel = CancelToken::new();

    // 第一类特征完成后请求取消.
    let token = cancel.clone();
    let mut progress = move |_: &str, _: usize, _: usize| -> CoreResult<()> {
        token.cancel();
        Ok(())
    };
    let result = nodule.analyze(
        &volume,
        AnalysisTarget::Shell(10.0),
        &FeatureSelection::default(),
        AuxMasks::default(),
        &mut progress,
        &cancel,
    );
    assert_eq!(result, Err(CoreError::Cancelled));
    assert_eq!(nodule.state(), NoduleState::Segmented);
    assert_eq!(nodule.labelmap(), Some(&before_labelmap));
    assert!(!nodule.has_distance_map());
    assert!(nodule.cached_shells().is_empty());

    // 之后的调用正常完成并提交缓存.
    let ok = nodule.analyze(
        &volume,
        AnalysisTarget::Shell(10.0),
        &FeatureSelection::default(),
        AuxMasks::default(),
        &mut Silent,
        &CancelToken::new(),
    );
    assert!(ok.is_ok());
    assert_eq!(nodule.cached_shells(), vec![10.0]);
}

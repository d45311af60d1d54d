#![allow(dead_code)]

use chest_berry::prelude::*;

/// 球形病灶体模: `dims` 尺寸, 各向同性间距 `spacing`,
/// RAS 原点处半径 `radius` (mm) 的球内为 `inside` HU, 其余为 `outside` HU.
pub fn ball_phantom(dims: [usize; 3], spacing: f64, radius: f64, inside: i16, outside: i16) -> Volume {
    let g = Geometry::centered(dims, [spacing; 3]).unwrap();
    let gg = g.clone();
    Volume::from_fn(g, |pos| {
        let [x, y, z] = gg.index_to_ras(pos);
        if x * x + y * y + z * z <= radius * radius {
            inside
        } else {
            outside
        }
    })
}

/// 球的体积 (mm³).
pub fn ball_mm3(radius: f64) -> f64 {
    4.0 / 3.0 * std::f64::consts::PI * radius.powi(3)
}

/// 相对误差.
pub fn rel_err(actual: f64, expected: f64) -> f64 {
    (actual - expected).abs() / expected.abs()
}

/// 以单个质心种子创建的已分割结节.
pub fn segmented_nodule(volume: &Volume, max_radius_mm: f64) -> NoduleRecord {
    let config = SegmentConfig {
        max_radius_mm,
        ..Default::default()
    };
    let mut n = NoduleRecord::new(1, "Nodule 1", config);
    n.seeds_mut().push([0.0; 3]);
    n.segment(&ConnectedThresholdLevelSet::default(), volume, &CancelToken::new())
        .unwrap();
    n
}

/// 是否有 `a` 中的前景全部属于 `b` 的前景?
pub fn is_subset(a: &LabelMap, b: &LabelMap) -> bool {
    a.data()
        .iter()
        .zip(b.data().iter())
        .all(|(x, y)| *x == 0 || *y != 0)
}

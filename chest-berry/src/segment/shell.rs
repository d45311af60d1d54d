use super::DistanceMap;
use crate::consts::label::FOREGROUND;
use crate::{CoreError, CoreResult, LabelMap, VolumeAttr};

/// 计算半径为 `radius` (mm) 的球壳标签: 距离不大于 `radius` 且不属于病灶的体素置 1.
///
/// 病灶边界上病灶优先, 即球壳与病灶不相交.
/// `radius` 必须位于 `(0, distance.max_radius()]`, 否则返回 `CoreError::InvalidGeometry`.
pub fn sphere_shell(lesion: &LabelMap, distance: &DistanceMap, radius: f64) -> CoreResult<LabelMap> {
    if !(radius > 0.0 && radius <= distance.max_radius()) {
        return Err(CoreError::geometry(format!(
            "球壳半径 {radius} 不在 (0, {}] 内",
            distance.max_radius()
        )));
    }
    lesion.geometry().ensure_compatible(distance.geometry())?;

    let mut shell = LabelMap::empty(lesion.geometry().clone());
    let mut n = 0usize;
    for (pos, _) in distance.within(radius) {
        if lesion[pos] == 0 {
            shell[pos] = FOREGROUND;
            n += 1;
        }
    }
    log::debug!("sphere shell {radius} mm: {n} voxels");
    Ok(shell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::Geometry;

    fn setup() -> (LabelMap, DistanceMap) {
        let g = Geometry::centered([33, 33, 33], [1.0; 3]).unwrap();
        let lesion = LabelMap::from_fn(g, |(k, j, i)| {
            let d2 = (k as f64 - 16.0).powi(2) + (j as f64 - 16.0).powi(2) + (i as f64 - 16.0).powi(2);
            u16::from(d2 <= 16.0)
        });
        let dm = DistanceMap::from_lesion(&lesion, 12.0, &CancelToken::new()).unwrap();
        (lesion, dm)
    }

    #[test]
    fn test_shell_disjoint_and_nested() {
        let (lesion, dm) = setup();
        let mut prev: Option<LabelMap> = None;
        for r in [5.0, 8.0, 12.0] {
            let s = sphere_shell(&lesion, &dm, r).unwrap();
            assert!(s
                .data()
                .iter()
                .zip(lesion.data().iter())
                .all(|(a, b)| !(*a == 1 && *b == 1)));
            if let Some(p) = prev.as_ref() {
                assert!(p
                    .data()
                    .iter()
                    .zip(s.data().iter())
                    .all(|(a, b)| *a == 0 || *b == 1));
            }
            prev = Some(s);
        }
    }

    #[test]
    fn test_shell_count() {
        let (lesion, dm) = setup();
        let s = sphere_shell(&lesion, &dm, 4.0).unwrap();
        // 半径 4 的球恰好等于病灶.
        assert_eq!(s.count(1), 0);
        let s = sphere_shell(&lesion, &dm, 10.0).unwrap();
        let ball = dm.within(10.0).count();
        assert_eq!(s.count(1), ball - lesion.count(1));
    }

    #[test]
    fn test_shell_radius_bounds() {
        let (lesion, dm) = setup();
        assert!(matches!(
            sphere_shell(&lesion, &dm, 12.5),
            Err(CoreError::InvalidGeometry(_))
        ));
        assert!(sphere_shell(&lesion, &dm, 0.0).is_err());
        assert!(sphere_shell(&lesion, &dm, 12.0).is_ok());
    }
}

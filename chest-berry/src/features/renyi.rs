use ndarray::Array3;

use super::{RenyiFeature, Roi};

/// 广义 (Renyi) 维数 D0, D1, D2.
///
/// 盒子边长取 1, 2, 4, .. 个体素 (不超过包围盒最长边), 网格与包围盒对齐.
/// 对每个边长统计各盒子中的 mask 体素比例 `p`, 然后对 `log(1/s)` 做最小二乘拟合:
/// D0 拟合非空盒子数的对数, D1 拟合 Shannon 熵, D2 拟合 `-log(Σp²)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct RenyiStats {
    d0: f64,
    d1: f64,
    d2: f64,
}

/// 最小二乘直线拟合的斜率. 点数不足或 `x` 无变化时返回 0.
fn slope(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mx).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    if sxx > 0.0 {
        sxy / sxx
    } else {
        0.0
    }
}

impl RenyiStats {
    pub fn compute(roi: &Roi<'_>) -> Self {
        let mask = roi.mask();
        let (nk, nj, ni) = mask.dim();
        let longest = nk.max(nj).max(ni);
        let total = roi.len() as f64;
        if total == 0.0 {
            return Self::default();
        }

        let (mut p0, mut p1, mut p2) = (Vec::new(), Vec::new(), Vec::new());
        let mut size = 1usize;
        while size <= longest {
            let grid = |n: usize| (n + size - 1) / size;
            let mut boxes = Array3::<usize>::zeros((grid(nk), grid(nj), grid(ni)));
            for ((k, j, i), _) in mask.indexed_iter().filter(|(_, m)| **m) {
                boxes[(k / size, j / size, i / size)] += 1;
            }
            let x = -(size as f64).ln();
            let (mut n, mut h, mut s2) = (0usize, 0.0, 0.0);
            for c in boxes.iter().filter(|c| **c > 0) {
                let p = *c as f64 / total;
                n += 1;
                h -= p * p.ln();
                s2 += p * p;
            }
            p0.push((x, (n as f64).ln()));
            p1.push((x, h));
            p2.push((x, -s2.ln()));
            size *= 2;
        }

        Self {
            d0: slope(&p0),
            d1: slope(&p1),
            d2: slope(&p2),
        }
    }

    pub fn get(&self, f: RenyiFeature) -> f64 {
        match f {
            RenyiFeature::BoxCounting => self.d0,
            RenyiFeature::Information => self.d1,
            RenyiFeature::Correlation => self.d2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Geometry, LabelMap, Volume};

    fn stats(dims: [usize; 3]) -> RenyiStats {
        let g = Geometry::centered(dims, [1.0; 3]).unwrap();
        let v = Volume::filled(g.clone(), 0);
        let m = LabelMap::filled(g, 1);
        RenyiStats::compute(&Roi::new(&v, &m))
    }

    #[test]
    fn test_solid_cube_is_three_dimensional() {
        let s = stats([16, 16, 16]);
        for f in RenyiFeature::ALL {
            assert!((s.get(*f) - 3.0).abs() < 1e-9, "{f}: {}", s.get(*f));
        }
    }

    #[test]
    fn test_plane_is_two_dimensional() {
        let s = stats([16, 16, 1]);
        for f in RenyiFeature::ALL {
            assert!((s.get(*f) - 2.0).abs() < 1e-9, "{f}: {}", s.get(*f));
        }
    }

    #[test]
    fn test_single_voxel() {
        assert_eq!(stats([1, 1, 1]), RenyiStats::default());
    }
}

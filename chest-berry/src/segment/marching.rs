//! marching cubes 等值面提取与三角网格度量.

use std::collections::HashMap;

use ndarray::ArrayView3;

use super::tables::{CORNERS, EDGE_CORNERS, EDGE_TABLE, TRIANGLE_TABLE};
use crate::{BoundingBox, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 共享顶点的三角网格. 顶点坐标单位为毫米.
///
/// 由 [`marching_cubes`] 生成时, 三角形法向朝外 (IJK 到世界坐标的变换行列式为正时).
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Mesh {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
}

#[inline]
fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn dist2(a: &Vec3, b: &Vec3) -> f64 {
    let d = sub(a, b);
    dot(&d, &d)
}

impl Mesh {
    /// 所有顶点.
    #[inline]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// 所有三角形 (顶点下标).
    #[inline]
    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    /// 网格是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    #[inline]
    fn corners(&self, t: &[u32; 3]) -> [&Vec3; 3] {
        t.map(|v| &self.vertices[v as usize])
    }

    /// 表面积 (mm²).
    pub fn surface_area(&self) -> f64 {
        self.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = self.corners(t);
                let n = cross(&sub(b, a), &sub(c, a));
                dot(&n, &n).sqrt() / 2.0
            })
            .sum()
    }

    /// 有向体积 (mm³), 由散度定理计算. 法向朝外时为正.
    pub fn signed_volume(&self) -> f64 {
        self.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = self.corners(t);
                dot(a, &cross(b, c))
            })
            .sum::<f64>()
            / 6.0
    }

    /// 包围体积 (mm³).
    #[inline]
    pub fn volume(&self) -> f64 {
        self.signed_volume().abs()
    }

    /// 最大三维直径: 所有顶点两两之间的最大欧氏距离 (mm).
    pub fn max_diameter(&self) -> f64 {
        let v = &self.vertices;
        let farthest = |a: &Vec3| v.iter().map(|b| dist2(a, b)).fold(0.0, f64::max);
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                use rayon::prelude::*;
                let d2 = v.par_iter().map(farthest).reduce(|| 0.0, f64::max);
            } else {
                let d2 = v.iter().map(farthest).fold(0.0, f64::max);
            }
        }
        d2.sqrt()
    }

    /// 网格是否闭合: 每条无向边恰好被两个三角形共享.
    pub fn is_closed(&self) -> bool {
        let mut edges: HashMap<(u32, u32), u32> = HashMap::new();
        for [a, b, c] in self.triangles.iter() {
            for (p, q) in [(a, b), (b, c), (c, a)] {
                *edges.entry((*p.min(q), *p.max(q))).or_default() += 1;
            }
        }
        edges.values().all(|n| *n == 2)
    }
}

/// 在 `data` 上以 `iso` 为等值面运行 marching cubes.
///
/// 值不小于 `iso` 的体素视为内部. 仅处理覆盖 `region` (默认为整个数组)
/// 及其外扩一层的立方体; 数组以外视为外部, 因此内部区域完全位于 `region` 中时
/// 得到的网格总是闭合的. `to_world` 将 IJK 坐标 `[i, j, k]` 映射到毫米坐标.
pub fn marching_cubes<T, W>(
    data: ArrayView3<'_, T>,
    region: Option<BoundingBox>,
    iso: f64,
    to_world: W,
) -> Mesh
where
    T: Copy + Into<f64>,
    W: Fn(Vec3) -> Vec3,
{
    let (nk, nj, ni) = data.dim();
    if nk == 0 || nj == 0 || ni == 0 {
        return Mesh::default();
    }
    let region = region.unwrap_or(BoundingBox {
        lo: (0, 0, 0),
        hi: (nk - 1, nj - 1, ni - 1),
    });
    let outside = iso - 1.0;
    let sample = |i: isize, j: isize, k: isize| -> f64 {
        if i < 0 || j < 0 || k < 0 || i >= ni as isize || j >= nj as isize || k >= nk as isize {
            return outside;
        }
        let v: f64 = data[(k as usize, j as usize, i as usize)].into();
        if v.is_nan() {
            outside
        } else {
            v
        }
    };

    let mut vertices: Vec<Vec3> = Vec::new();
    let mut triangles: Vec<[u32; 3]> = Vec::new();
    // (较低端点, 轴) 唯一确定一条棱.
    let mut cache: HashMap<(isize, isize, isize, usize), u32> = HashMap::new();

    let (lo, hi) = (region.lo, region.hi);
    for ck in (lo.0 as isize - 1)..=(hi.0 as isize) {
        for cj in (lo.1 as isize - 1)..=(hi.1 as isize) {
            for ci in (lo.2 as isize - 1)..=(hi.2 as isize) {
                let mut values = [0.0; 8];
                let mut cube_index = 0usize;
                for (n, [di, dj, dk]) in CORNERS.iter().enumerate() {
                    let v = sample(ci + *di as isize, cj + *dj as isize, ck + *dk as isize);
                    values[n] = v;
                    if v < iso {
                        cube_index |= 1 << n;
                    }
                }
                let edges = EDGE_TABLE[cube_index];
                if edges == 0 {
                    continue;
                }

                let mut ids = [0u32; 12];
                for (e, [a, b]) in EDGE_CORNERS.iter().enumerate() {
                    if edges & (1 << e) == 0 {
                        continue;
                    }
                    // 保证从较低端点插值到较高端点.
                    let (a, b) = if CORNERS[*a] <= CORNERS[*b] {
                        (*a, *b)
                    } else {
                        (*b, *a)
                    };
                    let [ai, aj, ak] = CORNERS[a];
                    let [bi, bj, _] = CORNERS[b];
                    let axis = if ai != bi {
                        0
                    } else if aj != bj {
                        1
                    } else {
                        2
                    };
                    let p = (ci + ai as isize, cj + aj as isize, ck + ak as isize);
                    let (va, vb) = (values[a], values[b]);
                    ids[e] = *cache.entry((p.0, p.1, p.2, axis)).or_insert_with(|| {
                        let mu = if (vb - va).abs() < 1e-12 {
                            0.5
                        } else {
                            ((iso - va) / (vb - va)).clamp(0.0, 1.0)
                        };
                        let mut ijk = [p.0 as f64, p.1 as f64, p.2 as f64];
                        ijk[axis] += mu;
                        vertices.push(to_world(ijk));
                        (vertices.len() - 1) as u32
                    });
                }

                for t in TRIANGLE_TABLE[cube_index]
                    .chunks_exact(3)
                    .take_while(|t| t[0] != -1)
                {
                    triangles.push([ids[t[0] as usize], ids[t[1] as usize], ids[t[2] as usize]]);
                }
            }
        }
    }

    Mesh {
        vertices,
        triangles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::f64::consts::PI;

    fn ball(n: usize, r: f64) -> Array3<u16> {
        let c = (n as f64 - 1.0) / 2.0;
        Array3::from_shape_fn((n, n, n), |(k, j, i)| {
            let d2 = (i as f64 - c).powi(2) + (j as f64 - c).powi(2) + (k as f64 - c).powi(2);
            u16::from(d2 <= r * r)
        })
    }

    #[test]
    fn test_single_voxel_closed() {
        let mut a = Array3::<u16>::zeros((3, 3, 3));
        a[(1, 1, 1)] = 1;
        let m = marching_cubes(a.view(), None, 0.5, |p| p);
        assert!(!m.is_empty());
        assert!(m.is_closed());
        // 正八面体, 体积 4/3 * 0.5^3.
        assert!((m.signed_volume() - 4.0 / 3.0 * 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_touching_border_is_closed() {
        let a = Array3::<u16>::ones((2, 3, 4));
        let m = marching_cubes(a.view(), None, 0.5, |p| p);
        assert!(m.is_closed());
        assert!(m.signed_volume() > 0.0);
    }

    #[test]
    fn test_ball_measures() {
        let r = 10.0;
        let a = ball(25, r);
        let m = marching_cubes(a.view(), None, 0.5, |p| p);
        assert!(m.is_closed());
        let area = m.surface_area();
        let exact = 4.0 * PI * r * r;
        // 二值输入的阶梯效应使表面积偏大.
        assert!(area > exact * 0.95 && area < exact * 1.15, "{area}");
        let vol = m.volume();
        let exact = 4.0 / 3.0 * PI * r * r * r;
        assert!((vol - exact).abs() < exact * 0.05, "{vol}");
        let d = m.max_diameter();
        assert!(d > 2.0 * r - 1.0 && d < 2.0 * r + 1.5, "{d}");
    }

    #[test]
    fn test_world_scaling() {
        let mut a = Array3::<f32>::zeros((4, 4, 4));
        a.slice_mut(ndarray::s![1..3, 1..3, 1..3]).fill(1.0);
        let m1 = marching_cubes(a.view(), None, 0.5, |p| p);
        let m2 = marching_cubes(a.view(), None, 0.5, |[i, j, k]| [i * 2.0, j * 2.0, k * 2.0]);
        assert!((m2.volume() - 8.0 * m1.volume()).abs() < 1e-9);
        assert!((m2.surface_area() - 4.0 * m1.surface_area()).abs() < 1e-9);
    }

    #[test]
    fn test_region_restricts_cubes() {
        let mut a = Array3::<u16>::zeros((10, 10, 10));
        a[(2, 2, 2)] = 1;
        a[(7, 7, 7)] = 1;
        let region = BoundingBox::point((2, 2, 2));
        let m = marching_cubes(a.view(), Some(region), 0.5, |p| p);
        let all = marching_cubes(a.view(), None, 0.5, |p| p);
        assert_eq!(m.triangles().len() * 2, all.triangles().len());
        assert!(m.is_closed());
    }
}

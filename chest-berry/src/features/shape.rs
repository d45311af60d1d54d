use std::f64::consts::PI;

use ndarray::{Array3, ArrayView3};

use super::{GeometricalFeature, Roi, ShapeFeature};
use crate::segment::{marching_cubes, Mesh};
use crate::Geometry;

/// 对包围盒内的二值 mask 在 0.5 等值面上提取网格, 坐标为 RAS (mm).
fn mesh_of(mask: ArrayView3<'_, u8>, geometry: &Geometry, lo: (usize, usize, usize)) -> Mesh {
    marching_cubes(mask, None, 0.5, |[i, j, k]| {
        geometry.ijk_to_ras([i + lo.2 as f64, j + lo.1 as f64, k + lo.0 as f64])
    })
}

/// 形态与形状特征.
///
/// 体积由体素计数得到, 表面积与最大直径由网格得到.
#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct ShapeStats {
    volume: f64,
    area: f64,
    diameter: f64,
}

impl ShapeStats {
    pub fn compute(roi: &Roi<'_>) -> Self {
        let g = roi.geometry();
        let mask = roi.mask().mapv(u8::from);
        let mesh = mesh_of(mask.view(), g, roi.bbox().lo);
        Self {
            volume: roi.len() as f64 * g.voxel_mm3(),
            area: mesh.surface_area(),
            diameter: mesh.max_diameter(),
        }
    }

    pub fn get(&self, f: ShapeFeature) -> f64 {
        use ShapeFeature::*;
        let (v, s) = (self.volume, self.area);
        if s <= 0.0 || v <= 0.0 {
            return match f {
                VolumeMm3 => v,
                VolumeCc => v / 1000.0,
                SurfaceArea => s,
                MaximumDiameter => self.diameter,
                _ => 0.0,
            };
        }
        match f {
            VolumeMm3 => v,
            VolumeCc => v / 1000.0,
            SurfaceArea => s,
            SurfaceVolumeRatio => s / v,
            Compactness1 => v / (PI.sqrt() * s.powf(1.5)),
            Compactness2 => 36.0 * PI * v * v / s.powi(3),
            MaximumDiameter => self.diameter,
            SphericalDisproportion => {
                let r = (3.0 * v / (4.0 * PI)).cbrt();
                s / (4.0 * PI * r * r)
            }
            Sphericity => PI.cbrt() * (6.0 * v).powf(2.0 / 3.0) / s,
        }
    }
}

/// 沿 Z 轴 (K 方向) 拉伸一个体素后重新度量的几何量.
#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct ExtrudedStats {
    volume: f64,
    area: f64,
}

/// 拉伸: 输出比输入多一层, 第 `k` 层为输入第 `k` 层与第 `k - 1` 层的并.
fn extrude(mask: ArrayView3<'_, bool>) -> Array3<u8> {
    let (nk, nj, ni) = mask.dim();
    Array3::from_shape_fn((nk + 1, nj, ni), |(k, j, i)| {
        let here = k < nk && mask[(k, j, i)];
        let below = k > 0 && mask[(k - 1, j, i)];
        u8::from(here || below)
    })
}

impl ExtrudedStats {
    pub fn compute(roi: &Roi<'_>) -> Self {
        let g = roi.geometry();
        let extruded = extrude(roi.mask());
        let count = extruded.iter().filter(|v| **v != 0).count();
        let mesh = mesh_of(extruded.view(), g, roi.bbox().lo);
        Self {
            volume: count as f64 * g.voxel_mm3(),
            area: mesh.surface_area(),
        }
    }

    pub fn get(&self, f: GeometricalFeature) -> f64 {
        match f {
            GeometricalFeature::ExtrudedSurfaceArea => self.area,
            GeometricalFeature::ExtrudedVolume => self.volume,
            GeometricalFeature::ExtrudedRatio => {
                if self.volume > 0.0 {
                    self.area / self.volume
                } else {
                    0.0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LabelMap, Volume};

    fn ball(r: f64, spacing: f64) -> (Volume, LabelMap) {
        let n = (2.0 * r / spacing).ceil() as usize + 5;
        let g = Geometry::centered([n, n, n], [spacing; 3]).unwrap();
        let v = Volume::filled(g.clone(), 0);
        let gg = g.clone();
        let m = LabelMap::from_fn(g, |p| {
            let [x, y, z] = gg.index_to_ras(p);
            u16::from(x * x + y * y + z * z <= r * r)
        });
        (v, m)
    }

    #[test]
    fn test_ball_shape() {
        let (v, m) = ball(8.0, 0.5);
        let roi = Roi::new(&v, &m);
        let s = ShapeStats::compute(&roi);
        let exact = 4.0 / 3.0 * PI * 512.0;
        assert!((s.get(ShapeFeature::VolumeMm3) - exact).abs() < exact * 0.02);
        assert!((s.get(ShapeFeature::VolumeCc) * 1000.0 - s.get(ShapeFeature::VolumeMm3)).abs() < 1e-9);
        let d = s.get(ShapeFeature::MaximumDiameter);
        assert!((d - 16.0).abs() < 1.0, "{d}");
        // 阶梯效应使球形度略小于 1.
        let sph = s.get(ShapeFeature::Sphericity);
        assert!(sph > 0.8 && sph <= 1.0, "{sph}");
        let c2 = s.get(ShapeFeature::Compactness2);
        assert!((c2 - sph.powi(3)).abs() < 1e-9);
        let sd = s.get(ShapeFeature::SphericalDisproportion);
        assert!((sd * sph - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_extrusion() {
        let g = Geometry::centered([6, 6, 6], [1.0, 1.0, 2.0]).unwrap();
        let v = Volume::filled(g.clone(), 0);
        let mut m = LabelMap::empty(g);
        m[(2, 2, 2)] = 1;
        m[(2, 2, 3)] = 1;
        let roi = Roi::new(&v, &m);
        let e = ExtrudedStats::compute(&roi);
        // 两个体素拉伸为四个, 每个 2 mm³.
        assert_eq!(e.get(GeometricalFeature::ExtrudedVolume), 8.0);
        assert!(e.get(GeometricalFeature::ExtrudedSurfaceArea) > 0.0);
        let shape = ShapeStats::compute(&roi);
        assert!(e.get(GeometricalFeature::ExtrudedSurfaceArea) > shape.get(ShapeFeature::SurfaceArea));
    }
}

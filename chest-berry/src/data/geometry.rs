//! 体数据几何: 尺寸, 间距, 原点, 方向, 以及 RAS/LPS/IJK 坐标变换.

use crate::consts::lesion::*;
use crate::{CoreError, CoreResult, Idx3d, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 4×4 齐次仿射矩阵, 行优先.
pub type Affine = [[f64; 4]; 4];

/// 单位矩阵.
const IDENTITY: Affine = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// LPS 坐标转换为 RAS 坐标 (x, y 取反).
#[inline]
pub fn lps_to_ras([x, y, z]: Vec3) -> Vec3 {
    [-x, -y, z]
}

/// RAS 坐标转换为 LPS 坐标 (x, y 取反).
#[inline]
pub fn ras_to_lps([x, y, z]: Vec3) -> Vec3 {
    [-x, -y, z]
}

/// 将仿射矩阵作用于点.
#[inline]
fn apply(m: &Affine, [x, y, z]: Vec3) -> Vec3 {
    let mut out = [0.0; 3];
    for (r, o) in out.iter_mut().enumerate() {
        *o = m[r][0] * x + m[r][1] * y + m[r][2] * z + m[r][3];
    }
    out
}

/// 矩阵乘法 `a · b`.
fn matmul(a: &Affine, b: &Affine) -> Affine {
    let mut out = [[0.0; 4]; 4];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = (0..4).map(|t| a[r][t] * b[t][c]).sum();
        }
    }
    out
}

/// 求仿射矩阵 (末行为 `[0, 0, 0, 1]`) 的逆. 线性部分奇异时返回 `None`.
///
/// 线性部分使用伴随矩阵求逆, 平移部分为 `-M⁻¹·t`.
fn invert_affine(m: &Affine) -> Option<Affine> {
    let a = |r: usize, c: usize| m[r][c];
    let det = a(0, 0) * (a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1))
        - a(0, 1) * (a(1, 0) * a(2, 2) - a(1, 2) * a(2, 0))
        + a(0, 2) * (a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0));
    if !det.is_finite() || det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let mut inv = IDENTITY;
    inv[0][0] = (a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1)) * inv_det;
    inv[0][1] = (a(0, 2) * a(2, 1) - a(0, 1) * a(2, 2)) * inv_det;
    inv[0][2] = (a(0, 1) * a(1, 2) - a(0, 2) * a(1, 1)) * inv_det;
    inv[1][0] = (a(1, 2) * a(2, 0) - a(1, 0) * a(2, 2)) * inv_det;
    inv[1][1] = (a(0, 0) * a(2, 2) - a(0, 2) * a(2, 0)) * inv_det;
    inv[1][2] = (a(0, 2) * a(1, 0) - a(0, 0) * a(1, 2)) * inv_det;
    inv[2][0] = (a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0)) * inv_det;
    inv[2][1] = (a(0, 1) * a(2, 0) - a(0, 0) * a(2, 1)) * inv_det;
    inv[2][2] = (a(0, 0) * a(1, 1) - a(0, 1) * a(1, 0)) * inv_det;
    for r in 0..3 {
        inv[r][3] = -(0..3).map(|c| inv[r][c] * m[c][3]).sum::<f64>();
    }
    Some(inv)
}

/// 采集尺度. 决定默认的最大病灶半径和预设球壳半径.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AcquisitionScale {
    /// 人体尺度.
    Human,

    /// 小动物尺度.
    SmallAnimal,
}

impl AcquisitionScale {
    /// 由几何信息判断采集尺度: `spacing[0] × dimensions[0]` 小于 100 mm 时视为小动物.
    pub fn of(geometry: &Geometry) -> Self {
        if geometry.spacing()[0] * (geometry.dims()[0] as f64) < SMALL_ANIMAL_FOV_MM {
            Self::SmallAnimal
        } else {
            Self::Human
        }
    }

    /// 默认最大病灶半径 (mm).
    #[inline]
    pub fn max_radius_mm(&self) -> f64 {
        match self {
            Self::Human => HUMAN_MAX_RADIUS_MM,
            Self::SmallAnimal => SMALL_ANIMAL_MAX_RADIUS_MM,
        }
    }

    /// 预设球壳半径 (mm), 升序.
    #[inline]
    pub fn shell_radii_mm(&self) -> [f64; 3] {
        match self {
            Self::Human => HUMAN_SHELL_RADII_MM,
            Self::SmallAnimal => SMALL_ANIMAL_SHELL_RADII_MM,
        }
    }
}

/// 体数据的空间几何.
///
/// `dims` 和 `spacing` 均按 IJK 顺序给出. `directions` 的第 `c` 列是 IJK 第 `c`
/// 轴在 RAS 空间中的单位方向. 构造时会同时缓存 `ijk_to_ras` 与 `ras_to_ijk`,
/// 二者互为逆矩阵.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Geometry {
    dims: [usize; 3],
    spacing: Vec3,
    origin: Vec3,
    directions: [[f64; 3]; 3],
    ijk_to_ras: Affine,
    ras_to_ijk: Affine,
}

impl Geometry {
    /// 构建几何信息.
    ///
    /// 尺寸必须为正, 间距必须为正有限数, 方向矩阵必须非奇异,
    /// 否则返回 `CoreError::InvalidGeometry`. 方向的每一列会被归一化.
    pub fn new(
        dims: [usize; 3],
        spacing: Vec3,
        origin: Vec3,
        directions: [[f64; 3]; 3],
    ) -> CoreResult<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(CoreError::geometry(format!("非法尺寸 {dims:?}")));
        }
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(CoreError::geometry(format!("非法间距 {spacing:?}")));
        }
        if origin.iter().any(|o| !o.is_finite()) {
            return Err(CoreError::geometry(format!("非法原点 {origin:?}")));
        }
        let mut dirs = directions;
        for c in 0..3 {
            let norm = (0..3).map(|r| dirs[r][c] * dirs[r][c]).sum::<f64>().sqrt();
            if !norm.is_finite() || norm < 1e-12 {
                return Err(CoreError::geometry(format!("第 {c} 轴方向退化")));
            }
            (0..3).for_each(|r| dirs[r][c] /= norm);
        }

        let mut ijk_to_ras = IDENTITY;
        for r in 0..3 {
            for c in 0..3 {
                ijk_to_ras[r][c] = dirs[r][c] * spacing[c];
            }
            ijk_to_ras[r][3] = origin[r];
        }
        let ras_to_ijk = invert_affine(&ijk_to_ras)
            .ok_or_else(|| CoreError::geometry("方向矩阵奇异"))?;

        Ok(Self {
            dims,
            spacing,
            origin,
            directions: dirs,
            ijk_to_ras,
            ras_to_ijk,
        })
    }

    /// 由 IJK -> RAS 仿射矩阵构建几何信息. 间距为线性部分的列范数.
    pub fn from_ijk_to_ras(dims: [usize; 3], m: &Affine) -> CoreResult<Self> {
        let mut spacing = [0.0; 3];
        let mut directions = [[0.0; 3]; 3];
        for c in 0..3 {
            spacing[c] = (0..3).map(|r| m[r][c] * m[r][c]).sum::<f64>().sqrt();
            for r in 0..3 {
                directions[r][c] = m[r][c];
            }
        }
        Self::new(dims, spacing, [m[0][3], m[1][3], m[2][3]], directions)
    }

    /// 轴对齐 (RAS) 的几何信息, 原点选择使得 IJK 索引 `dims / 2` 恰好位于 RAS 原点.
    pub fn centered(dims: [usize; 3], spacing: Vec3) -> CoreResult<Self> {
        let origin = [
            -((dims[0] / 2) as f64) * spacing[0],
            -((dims[1] / 2) as f64) * spacing[1],
            -((dims[2] / 2) as f64) * spacing[2],
        ];
        Self::new(
            dims,
            spacing,
            origin,
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        )
    }

    /// 尺寸 `[I, J, K]`.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// 数组形状 `(K, J, I)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let [i, j, k] = self.dims;
        (k, j, i)
    }

    /// 体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// 间距 (mm), IJK 顺序.
    #[inline]
    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    /// 原点 (RAS).
    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// 方向矩阵 (每列一轴, RAS 单位向量).
    #[inline]
    pub fn directions(&self) -> [[f64; 3]; 3] {
        self.directions
    }

    /// 单个体素的体积, 以立方毫米为单位.
    #[inline]
    pub fn voxel_mm3(&self) -> f64 {
        self.spacing.iter().product()
    }

    /// 单个体素的体积, 以立方厘米 (mL) 为单位.
    #[inline]
    pub fn voxel_cc(&self) -> f64 {
        self.voxel_mm3() * 1e-3
    }

    /// IJK -> RAS 仿射矩阵.
    #[inline]
    pub fn ijk_to_ras_matrix(&self) -> &Affine {
        &self.ijk_to_ras
    }

    /// RAS -> IJK 仿射矩阵.
    #[inline]
    pub fn ras_to_ijk_matrix(&self) -> &Affine {
        &self.ras_to_ijk
    }

    /// LPS -> IJK 仿射矩阵: 将 `ras_to_ijk` 的前两列取反.
    pub fn lps_to_ijk_matrix(&self) -> Affine {
        let mut m = self.ras_to_ijk;
        for row in m.iter_mut().take(3) {
            row[0] = -row[0];
            row[1] = -row[1];
        }
        m
    }

    /// `ras_to_ijk · ijk_to_ras` 与单位矩阵的最大偏差.
    pub fn roundtrip_error(&self) -> f64 {
        let p = matmul(&self.ras_to_ijk, &self.ijk_to_ras);
        let mut err = 0.0f64;
        for (r, row) in p.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                err = err.max((v - IDENTITY[r][c]).abs());
            }
        }
        err
    }

    /// 将 RAS 坐标转换为 IJK 坐标. `round` 为真时各分量四舍五入取整.
    #[inline]
    pub fn ras_to_ijk(&self, p: Vec3, round: bool) -> Vec3 {
        let ijk = apply(&self.ras_to_ijk, p);
        if round {
            ijk.map(f64::round)
        } else {
            ijk
        }
    }

    /// 将 IJK 坐标 (可以是非整数) 转换为 RAS 坐标.
    #[inline]
    pub fn ijk_to_ras(&self, p: Vec3) -> Vec3 {
        apply(&self.ijk_to_ras, p)
    }

    /// 将 LPS 坐标转换为 IJK 坐标.
    #[inline]
    pub fn lps_to_ijk(&self, p: Vec3, round: bool) -> Vec3 {
        self.ras_to_ijk(lps_to_ras(p), round)
    }

    /// 将数组索引 `(k, j, i)` 转换为体素中心的 RAS 坐标.
    #[inline]
    pub fn index_to_ras(&self, (k, j, i): Idx3d) -> Vec3 {
        self.ijk_to_ras([i as f64, j as f64, k as f64])
    }

    /// 将 RAS 坐标转换为最近体素的数组索引 `(k, j, i)`. 位于体数据外时返回 `None`.
    pub fn ras_to_index(&self, p: Vec3) -> Option<Idx3d> {
        let [i, j, k] = self.ras_to_ijk(p, true);
        let [di, dj, dk] = self.dims;
        let inside = |v: f64, d: usize| v >= 0.0 && v < d as f64;
        (inside(i, di) && inside(j, dj) && inside(k, dk))
            .then_some((k as usize, j as usize, i as usize))
    }

    /// 检查数组索引是否合法.
    #[inline]
    pub fn check(&self, (k, j, i): &Idx3d) -> bool {
        let [di, dj, dk] = self.dims;
        *i < di && *j < dj && *k < dk
    }

    /// RAS 对齐的包围尺寸 (四舍五入到整数).
    ///
    /// 即 `|directions| · dims`, 对于轴对齐但翻转/置换的体数据给出各 RAS 方向的体素数.
    pub fn dimensions_ras(&self) -> [usize; 3] {
        let mut out = [0usize; 3];
        for (r, o) in out.iter_mut().enumerate() {
            let v: f64 = (0..3)
                .map(|c| self.directions[r][c].abs() * self.dims[c] as f64)
                .sum();
            *o = v.round() as usize;
        }
        out
    }

    /// 两个几何信息的尺寸和间距是否一致?
    pub fn is_compatible(&self, other: &Geometry) -> bool {
        self.dims == other.dims
            && self
                .spacing
                .iter()
                .zip(other.spacing.iter())
                .all(|(a, b)| (a - b).abs() <= 1e-6 * a.abs().max(1.0))
    }

    /// 同 [`Geometry::is_compatible`], 不一致时返回 `CoreError::InvalidGeometry`.
    pub fn ensure_compatible(&self, other: &Geometry) -> CoreResult<()> {
        if self.is_compatible(other) {
            Ok(())
        } else {
            Err(CoreError::geometry(format!(
                "尺寸/间距不一致: {:?} {:?} vs {:?} {:?}",
                self.dims, self.spacing, other.dims, other.spacing
            )))
        }
    }

    /// 采集尺度.
    #[inline]
    pub fn scale(&self) -> AcquisitionScale {
        AcquisitionScale::of(self)
    }
}

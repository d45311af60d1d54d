//! 以病灶质心为源点的距离图.

use binary_heap_plus::BinaryHeap;
use ndarray::Array3;

use crate::cancel::{CancelToken, Ticker};
use crate::consts::label::FOREGROUND;
use crate::data::diamond_neighbours;
use crate::{Affine, BoundingBox, CoreError, CoreResult, Field, Geometry, Idx3d, LabelMap, VolumeAttr};

/// 单位速度域上的距离图, 源点为病灶质心.
///
/// 波前按物理欧氏距离 (mm) 从小到大推进, 到达 `max_radius` 时停止.
/// 仅保存包围最大半径球的子块, 之外的体素距离为 `+inf`.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceMap {
    geometry: Geometry,
    center: Idx3d,
    max_radius: f64,
    bbox: BoundingBox,
    data: Array3<f32>,
}

/// 以 `center` 为中心, 包含半径 `radius` (mm) 物理球的最小子块 (已截断到体数据内).
pub(super) fn reach_box(geometry: &Geometry, center: Idx3d, radius: f64) -> BoundingBox {
    let shape = geometry.shape();
    let spacing = geometry.spacing();
    // 每个方向最多延伸的体素个数 (k, j, i).
    let reach = |axis: usize| (radius / spacing[axis]).ceil() as usize;
    BoundingBox {
        lo: (
            center.0.saturating_sub(reach(2)),
            center.1.saturating_sub(reach(1)),
            center.2.saturating_sub(reach(0)),
        ),
        hi: (
            (center.0 + reach(2)).min(shape.0 - 1),
            (center.1 + reach(1)).min(shape.1 - 1),
            (center.2 + reach(0)).min(shape.2 - 1),
        ),
    }
}

/// 两个数组索引之间物理距离 (mm) 的平方.
#[inline]
pub(super) fn physical_dist2(m: &Affine, a: &Idx3d, b: &Idx3d) -> f64 {
    let d = [
        a.2 as f64 - b.2 as f64,
        a.1 as f64 - b.1 as f64,
        a.0 as f64 - b.0 as f64,
    ];
    (0..3)
        .map(|r| {
            let x = m[r][0] * d[0] + m[r][1] * d[1] + m[r][2] * d[2];
            x * x
        })
        .sum()
}

impl DistanceMap {
    /// 以数组索引 `center` 为源点计算距离图.
    ///
    /// `max_radius` 必须为正, `center` 必须位于体数据内, 否则返回
    /// `CoreError::InvalidGeometry`.
    pub fn compute(
        geometry: &Geometry,
        center: Idx3d,
        max_radius: f64,
        cancel: &CancelToken,
    ) -> CoreResult<Self> {
        if !(max_radius.is_finite() && max_radius > 0.0) {
            return Err(CoreError::geometry(format!("非法最大半径 {max_radius}")));
        }
        if !geometry.check(&center) {
            return Err(CoreError::geometry(format!("质心 {center:?} 不在体数据内")));
        }

        let shape = geometry.shape();
        let bbox = reach_box(geometry, center, max_radius);
        let m = geometry.ijk_to_ras_matrix();
        let dist2 = |p: &Idx3d| physical_dist2(m, p, &center);

        let mut data = Array3::from_elem(bbox.shape(), f32::INFINITY);
        let local = |(k, j, i): Idx3d| (k - bbox.lo.0, j - bbox.lo.1, i - bbox.lo.2);

        // 堆顶距质心最近
        let mut heap = BinaryHeap::new_by(|a: &(f64, Idx3d), b: &(f64, Idx3d)| b.0.total_cmp(&a.0));
        heap.reserve(64);
        heap.push((0.0, center));
        let limit = max_radius * max_radius;
        let mut ticker = Ticker::new(cancel);
        let mut reached = 0usize;

        while let Some((d2, pos)) = heap.pop() {
            ticker.tick()?;
            if d2 > limit {
                break;
            }
            let slot = &mut data[local(pos)];
            if slot.is_finite() {
                continue;
            }
            *slot = d2.sqrt() as f32;
            reached += 1;

            for n in diamond_neighbours(shape, pos) {
                if bbox.contains(&n) && !data[local(n)].is_finite() {
                    heap.push((dist2(&n), n));
                }
            }
        }
        cancel.check()?;
        log::debug!("distance map from {center:?}: {reached} voxels within {max_radius} mm");

        Ok(Self {
            geometry: geometry.clone(),
            center,
            max_radius,
            bbox,
            data,
        })
    }

    /// 以二值病灶标签 (前景值 1) 的质心为源点计算距离图.
    ///
    /// 病灶为空时返回 `CoreError::NoSuchLabel`.
    pub fn from_lesion(lesion: &LabelMap, max_radius: f64, cancel: &CancelToken) -> CoreResult<Self> {
        let center = lesion.centroid_of_label(FOREGROUND)?;
        Self::compute(lesion.geometry(), center, max_radius, cancel)
    }

    /// 源点 (数组索引).
    #[inline]
    pub fn center(&self) -> Idx3d {
        self.center
    }

    /// 停止半径 (mm).
    #[inline]
    pub fn max_radius(&self) -> f64 {
        self.max_radius
    }

    /// 保存距离值的子块.
    #[inline]
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// 几何信息.
    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// `pos` 处的距离 (mm). 未到达的体素返回 `+inf`.
    #[inline]
    pub fn get(&self, pos: Idx3d) -> f32 {
        if self.bbox.contains(&pos) {
            let lo = self.bbox.lo;
            self.data[(pos.0 - lo.0, pos.1 - lo.1, pos.2 - lo.2)]
        } else {
            f32::INFINITY
        }
    }

    /// 迭代所有距离不大于 `radius` 的体素及其距离.
    pub fn within(&self, radius: f64) -> impl Iterator<Item = (Idx3d, f32)> + '_ {
        let lo = self.bbox.lo;
        self.data
            .indexed_iter()
            .filter(move |(_, d)| (**d as f64) <= radius)
            .map(move |((k, j, i), d)| ((k + lo.0, j + lo.1, i + lo.2), *d))
    }

    /// 展开为与体数据同尺寸的稠密场.
    pub fn to_field(&self) -> Field {
        Field::from_fn(self.geometry.clone(), |pos| self.get(pos))
    }
}

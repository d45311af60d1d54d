//! 进程内的 level set 提供者: 基于强度连通的区域生长.

use std::collections::VecDeque;

use binary_heap_plus::BinaryHeap;
use ndarray::Array3;

use super::distance::{physical_dist2, reach_box};
use super::{LevelSetProvider, SegmentConfig};
use crate::cancel::{CancelToken, Ticker};
use crate::data::diamond_neighbours;
use crate::seeds::SeedSet;
use crate::{BoundingBox, CoreError, CoreResult, Field, Idx3d, Volume, VolumeAttr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 从质心种子出发的强度连通区域生长.
///
/// 生长区间为 `[hu - tolerance, hu + tolerance]`, `hu` 为质心体素的 CT 值;
/// 部分实性结节额外向下放宽 `part_solid_extension`, 以纳入磨玻璃成分.
/// 生长范围不超过 `max_radius_mm` 的物理球.
///
/// 输出是生长区域的有符号距离场 (mm): 区域内为到最近区域外体素的距离 (正),
/// 区域外为到最近区域内体素的距离的相反数, 并截断到 `-margin_voxels` 个体素宽度.
/// 阈值 0 恰好得到生长区域, 正阈值腐蚀, 负阈值膨胀.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectedThresholdLevelSet {
    /// 生长区间的半宽 (HU).
    pub tolerance: f64,
    /// 部分实性结节向下额外放宽的量 (HU).
    pub part_solid_extension: f64,
    /// 距离场在区域外保留的体素层数.
    pub margin_voxels: usize,
}

impl Default for ConnectedThresholdLevelSet {
    fn default() -> Self {
        Self {
            tolerance: 100.0,
            part_solid_extension: 250.0,
            margin_voxels: 3,
        }
    }
}

/// 多源最近点传播得到的近似欧氏距离.
///
/// 只在 `admissible` 为真的体素上传播, 距离超过 `limit` (mm) 时停止.
/// 返回值与 `bbox` 同形状, 未到达的体素为 `+inf`.
fn propagate<A: Fn(Idx3d) -> bool>(
    volume: &Volume,
    bbox: &BoundingBox,
    sources: &[Idx3d],
    admissible: A,
    limit: f64,
    ticker: &mut Ticker,
) -> CoreResult<Array3<f32>> {
    let shape = volume.shape();
    let m = volume.geometry().ijk_to_ras_matrix();
    let local = |(k, j, i): Idx3d| (k - bbox.lo.0, j - bbox.lo.1, i - bbox.lo.2);
    let mut out = Array3::from_elem(bbox.shape(), f32::INFINITY);

    // (距离平方, 位置, 最近源点)
    let mut heap = BinaryHeap::new_by(|a: &(f64, Idx3d, Idx3d), b: &(f64, Idx3d, Idx3d)| {
        b.0.total_cmp(&a.0)
    });
    for s in sources {
        for n in diamond_neighbours(shape, *s) {
            if bbox.contains(&n) && admissible(n) {
                heap.push((physical_dist2(m, &n, s), n, *s));
            }
        }
    }
    let limit2 = limit * limit;
    while let Some((d2, pos, src)) = heap.pop() {
        ticker.tick()?;
        if d2 > limit2 {
            break;
        }
        let slot = &mut out[local(pos)];
        if slot.is_finite() {
            continue;
        }
        *slot = d2.sqrt() as f32;
        for n in diamond_neighbours(shape, pos) {
            if bbox.contains(&n) && admissible(n) && !out[local(n)].is_finite() {
                heap.push((physical_dist2(m, &n, &src), n, src));
            }
        }
    }
    Ok(out)
}

impl ConnectedThresholdLevelSet {
    /// 以 `tolerance` (HU) 创建.
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Default::default()
        }
    }

    /// 生长区间 `[low, high]` (HU).
    pub fn interval(&self, seed_hu: f64, part_solid: bool) -> (f64, f64) {
        let low = seed_hu - self.tolerance;
        let low = if part_solid {
            low - self.part_solid_extension
        } else {
            low
        };
        (low, seed_hu + self.tolerance)
    }

    /// 区域生长, 返回生长区域 (`bbox` 内的布尔块) 及其包围盒.
    fn grow(
        &self,
        volume: &Volume,
        seeds: &SeedSet,
        config: &SegmentConfig,
        ticker: &mut Ticker,
    ) -> CoreResult<(BoundingBox, Array3<bool>)> {
        let centroid = seeds.centroid().ok_or(CoreError::NoSeed)?;
        let geometry = volume.geometry();
        let center = geometry
            .ras_to_index(centroid)
            .ok_or_else(|| CoreError::geometry(format!("质心种子 {centroid:?} 不在体数据内")))?;
        let (low, high) = self.interval(volume[center] as f64, config.part_solid);
        let inside = |p: Idx3d| (low..=high).contains(&(volume[p] as f64));

        // 多留 `margin_voxels` 层, 以便得到区域外的负距离.
        let bbox = reach_box(geometry, center, config.max_radius_mm).pad(self.margin_voxels, volume.shape());
        let m = geometry.ijk_to_ras_matrix();
        let limit2 = config.max_radius_mm * config.max_radius_mm;
        let local = |(k, j, i): Idx3d| (k - bbox.lo.0, j - bbox.lo.1, i - bbox.lo.2);

        // step 1: 质心种子及落在生长区间与半径内的提示种子作为起点.
        let mut q: VecDeque<Idx3d> = VecDeque::with_capacity(64);
        q.push_back(center);
        q.extend(
            seeds
                .hints()
                .iter()
                .filter_map(|p| geometry.ras_to_index(*p))
                .filter(|p| inside(*p) && physical_dist2(m, p, &center) <= limit2),
        );

        // step 2: 6-相邻 BFS.
        let mut grown = Array3::from_elem(bbox.shape(), false);
        while let Some(cur) = q.pop_front() {
            ticker.tick()?;
            let slot = &mut grown[local(cur)];
            if *slot {
                continue;
            }
            *slot = true;
            q.extend(diamond_neighbours(volume.shape(), cur).filter(|n| {
                bbox.contains(n)
                    && !grown[local(*n)]
                    && physical_dist2(m, n, &center) <= limit2
                    && inside(*n)
            }));
        }
        Ok((bbox, grown))
    }
}

impl LevelSetProvider for ConnectedThresholdLevelSet {
    fn level_set(
        &self,
        volume: &Volume,
        seeds: &SeedSet,
        config: &SegmentConfig,
        cancel: &CancelToken,
    ) -> CoreResult<Field> {
        let mut ticker = Ticker::new(cancel);
        let (bbox, grown) = self.grow(volume, seeds, config, &mut ticker)?;
        let lo = bbox.lo;
        let global = |(k, j, i): Idx3d| (k + lo.0, j + lo.1, i + lo.2);
        let local = |(k, j, i): Idx3d| (k - lo.0, j - lo.1, i - lo.2);
        let is_grown = |p: Idx3d| bbox.contains(&p) && grown[local(p)];

        // step 3: 区域边界两侧的体素分别作为内外距离的源点.
        let shape = volume.shape();
        let (mut inner, mut outer) = (Vec::new(), Vec::new());
        for (idx, g) in grown.indexed_iter() {
            let p = global(idx);
            if *g && diamond_neighbours(shape, p).any(|n| !is_grown(n)) {
                inner.push(p);
            } else if !*g && diamond_neighbours(shape, p).any(is_grown) {
                outer.push(p);
            }
        }
        let n_grown = grown.iter().filter(|g| **g).count();
        log::debug!("region grown from centroid: {n_grown} voxels, {} boundary", inner.len());

        // step 4: 有符号距离.
        let spacing = volume.spacing();
        let cap = self.margin_voxels.max(1) as f64 * spacing.iter().cloned().fold(f64::INFINITY, f64::min);
        let depth = propagate(volume, &bbox, &outer, is_grown, f64::INFINITY, &mut ticker)?;
        let reach = propagate(volume, &bbox, &inner, |p| !is_grown(p), cap, &mut ticker)?;
        cancel.check()?;

        let cap = cap as f32;
        Ok(Field::from_fn(volume.geometry().clone(), |p| {
            if !bbox.contains(&p) {
                return -cap;
            }
            let l = local(p);
            if grown[l] {
                // 生长区域占满整个体数据时没有区域外的源点.
                if depth[l].is_finite() {
                    depth[l]
                } else {
                    cap
                }
            } else {
                -reach[l].min(cap)
            }
        }))
    }
}

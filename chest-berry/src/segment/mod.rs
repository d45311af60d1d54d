//! 结节分割.
//!
//! 外部 (或进程内) level set 提供者根据种子点生成标量场, 阈值化得到病灶标签,
//! 在同一阈值上运行 marching cubes 得到网格. 在此基础上提供以病灶质心为源点的
//! 距离图与同心球壳, 以及单个结节的状态机和病例级别的结节管理.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::consts::lesion::{DEFAULT_THRESHOLD, HUMAN_MAX_RADIUS_MM};
use crate::seeds::SeedSet;
use crate::{CoreError, CoreResult, Field, Geometry, Idx3d, LabelMap, Volume, VolumeAttr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod case;
mod cli;
mod distance;
mod marching;
mod nodule;
mod region_grow;
mod shell;
mod tables;

pub use case::Case;
pub use cli::ExternalSegmenter;
pub use distance::DistanceMap;
pub use marching::{marching_cubes, Mesh};
pub use nodule::{AnalysisTarget, NoduleRecord, NoduleState, SeedsMut};
pub use region_grow::ConnectedThresholdLevelSet;
pub use shell::sphere_shell;

/// 分割参数.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentConfig {
    /// 最大病灶半径 (mm), 同时也是距离图的停止半径和球壳半径上限.
    pub max_radius_mm: f64,

    /// 是否为部分实性结节.
    pub part_solid: bool,

    /// 外部分割程序的墙钟超时. `None` 表示不限.
    pub timeout: Option<Duration>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_radius_mm: HUMAN_MAX_RADIUS_MM,
            part_solid: false,
            timeout: None,
        }
    }
}

impl SegmentConfig {
    /// 根据体数据的采集尺度选择默认最大半径.
    pub fn for_geometry(geometry: &Geometry) -> Self {
        Self {
            max_radius_mm: geometry.scale().max_radius_mm(),
            ..Default::default()
        }
    }
}

/// level set 场的提供者, 即分割 CLI 的协作接口.
///
/// 输出必须与输入体数据几何一致. 失败时返回 `CoreError::SegmentationFailed`,
/// 被取消时返回 `CoreError::Cancelled`.
pub trait LevelSetProvider {
    /// 生成 level set 场.
    fn level_set(
        &self,
        volume: &Volume,
        seeds: &SeedSet,
        config: &SegmentConfig,
        cancel: &CancelToken,
    ) -> CoreResult<Field>;
}

impl<F> LevelSetProvider for F
where
    F: Fn(&Volume, &SeedSet, &SegmentConfig, &CancelToken) -> CoreResult<Field>,
{
    #[inline]
    fn level_set(
        &self,
        volume: &Volume,
        seeds: &SeedSet,
        config: &SegmentConfig,
        cancel: &CancelToken,
    ) -> CoreResult<Field> {
        self(volume, seeds, config, cancel)
    }
}

/// 一次分割的结果: level set 场, 质心, 当前阈值, 以及由阈值导出的标签和网格.
///
/// 阈值修改总是先在局部计算新的标签和网格, 成功后再一并替换,
/// 因此外部永远观察不到半更新的状态.
#[derive(Clone, Debug)]
pub struct SegmentationHandle {
    field: Field,
    centroid: Idx3d,
    range: (f64, f64),
    threshold: f64,
    labelmap: LabelMap,
    mesh: Mesh,
}

/// 由场和阈值导出病灶标签与网格.
fn derive(field: &Field, t: f64) -> (LabelMap, Mesh) {
    let labelmap = field.threshold(t as f32);
    let mesh = match labelmap.foreground_bounding_box() {
        Some(bb) => {
            let g = field.geometry();
            marching_cubes(field.data(), Some(bb), t, |p| g.ijk_to_ras(p))
        }
        None => Mesh::default(),
    };
    (labelmap, mesh)
}

impl SegmentationHandle {
    /// 创建句柄. `threshold` 超出场的取值范围时被截断到范围内.
    pub fn new(field: Field, centroid: Idx3d, threshold: f64) -> CoreResult<Self> {
        let (lo, hi) = field
            .range()
            .ok_or_else(|| CoreError::SegmentationFailed("level set 不含有限值".into()))?;
        let range = (lo as f64, hi as f64);
        let t = threshold.clamp(range.0, range.1);
        if t != threshold {
            log::warn!("threshold {threshold} clamped into level set range [{lo}, {hi}]");
        }
        let (labelmap, mesh) = derive(&field, t);
        Ok(Self {
            field,
            centroid,
            range,
            threshold: t,
            labelmap,
            mesh,
        })
    }

    /// level set 场.
    #[inline]
    pub fn level_set_field(&self) -> &Field {
        &self.field
    }

    /// 质心种子对应的数组索引 `(k, j, i)`.
    #[inline]
    pub fn centroid_ijk(&self) -> Idx3d {
        self.centroid
    }

    /// 阈值的合法范围 `[min, max]`.
    #[inline]
    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    /// 当前阈值.
    #[inline]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 当前病灶标签 (`field >= threshold` 置 1).
    #[inline]
    pub fn labelmap(&self) -> &LabelMap {
        &self.labelmap
    }

    /// 当前等值面网格 (RAS, mm).
    #[inline]
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// 修改阈值并重新生成标签与网格.
    ///
    /// `t` 超出场的取值范围时返回 `CoreError::ThresholdOutOfRange`, 且句柄保持不变.
    pub fn set_threshold(&mut self, t: f64) -> CoreResult<()> {
        let (min, max) = self.range;
        if !(min..=max).contains(&t) {
            return Err(CoreError::ThresholdOutOfRange { value: t, min, max });
        }
        let (labelmap, mesh) = derive(&self.field, t);
        self.labelmap = labelmap;
        self.mesh = mesh;
        self.threshold = t;
        Ok(())
    }
}

/// 分割入口.
///
/// 要求至少有一个种子点, 且质心种子位于体数据内, `max_radius_mm > 0`.
/// 提供者失败时返回 `CoreError::SegmentationFailed`, 不会产生任何部分结果.
pub fn segment<P: LevelSetProvider + ?Sized>(
    provider: &P,
    volume: &Volume,
    seeds: &SeedSet,
    config: &SegmentConfig,
    threshold: f64,
    cancel: &CancelToken,
) -> CoreResult<SegmentationHandle> {
    let centroid = seeds.centroid().ok_or(CoreError::NoSeed)?;
    let centroid = volume
        .geometry()
        .ras_to_index(centroid)
        .ok_or_else(|| CoreError::geometry(format!("质心种子 {centroid:?} 不在体数据内")))?;
    if !(config.max_radius_mm.is_finite() && config.max_radius_mm > 0.0) {
        return Err(CoreError::geometry(format!(
            "非法最大半径 {}",
            config.max_radius_mm
        )));
    }
    cancel.check()?;

    let field = provider.level_set(volume, seeds, config, cancel)?;
    cancel.check()?;
    if !field.geometry().is_compatible(volume.geometry()) {
        return Err(CoreError::SegmentationFailed(format!(
            "level set 几何 {:?} 与体数据 {:?} 不一致",
            field.geometry().dims(),
            volume.geometry().dims()
        )));
    }
    let handle = SegmentationHandle::new(field, centroid, threshold)?;
    log::info!(
        "segmented {} seed(s) at {:?}: {} voxels, {} triangles",
        seeds.len(),
        centroid,
        handle.labelmap().count(1),
        handle.mesh().triangles().len()
    );
    Ok(handle)
}

/// 默认阈值.
#[inline]
pub const fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeds::LesionType;

    /// 以到中心的距离构造的 level set: `r - |x|`.
    fn sphere_field(volume: &Volume, r: f64) -> Field {
        let g = volume.geometry().clone();
        Field::from_fn(g.clone(), |pos| {
            let [x, y, z] = g.index_to_ras(pos);
            (r - (x * x + y * y + z * z).sqrt()) as f32
        })
    }

    fn volume() -> Volume {
        Volume::filled(Geometry::centered([24, 24, 24], [1.0; 3]).unwrap(), -800)
    }

    #[test]
    fn test_segment_requires_seed() {
        let v = volume();
        let provider = |v: &Volume, _: &SeedSet, _: &SegmentConfig, _: &CancelToken| {
            Ok(sphere_field(v, 5.0))
        };
        let seeds = SeedSet::new(LesionType::Nodule);
        let r = segment(&provider, &v, &seeds, &SegmentConfig::default(), 0.0, &CancelToken::new());
        assert!(matches!(r, Err(CoreError::NoSeed)));

        let outside = SeedSet::with_centroid([100.0, 0.0, 0.0], LesionType::Nodule);
        let r = segment(&provider, &v, &outside, &SegmentConfig::default(), 0.0, &CancelToken::new());
        assert!(matches!(r, Err(CoreError::InvalidGeometry(_))));
    }

    #[test]
    fn test_segment_failure_propagates() {
        let v = volume();
        let provider = |_: &Volume, _: &SeedSet, _: &SegmentConfig, _: &CancelToken| -> CoreResult<Field> {
            Err(CoreError::SegmentationFailed("boom".into()))
        };
        let seeds = SeedSet::with_centroid([0.0; 3], LesionType::Unknown);
        let r = segment(&provider, &v, &seeds, &SegmentConfig::default(), 0.0, &CancelToken::new());
        assert_eq!(r.err(), Some(CoreError::SegmentationFailed("boom".into())));

        let wrong = |_: &Volume, _: &SeedSet, _: &SegmentConfig, _: &CancelToken| {
            Ok(Field::filled(Geometry::centered([4, 4, 4], [1.0; 3]).unwrap(), 1.0))
        };
        let r = segment(&wrong, &v, &seeds, &SegmentConfig::default(), 0.0, &CancelToken::new());
        assert!(matches!(r, Err(CoreError::SegmentationFailed(_))));
    }

    #[test]
    fn test_threshold_protocol() {
        let v = volume();
        let provider = |v: &Volume, _: &SeedSet, _: &SegmentConfig, _: &CancelToken| {
            Ok(sphere_field(v, 6.0))
        };
        let seeds = SeedSet::with_centroid([0.0; 3], LesionType::Nodule);
        let mut h =
            segment(&provider, &v, &seeds, &SegmentConfig::default(), 0.0, &CancelToken::new())
                .unwrap();
        assert_eq!(h.centroid_ijk(), (12, 12, 12));
        let n0 = h.labelmap().count(1);
        assert!(h.mesh().is_closed());
        let exact = 4.0 / 3.0 * std::f64::consts::PI * 216.0;
        assert!((h.mesh().volume() - exact).abs() < exact * 0.05);

        // 提高阈值, 标签收缩为原标签的子集.
        let before = h.labelmap().clone();
        h.set_threshold(2.0).unwrap();
        let n1 = h.labelmap().count(1);
        assert!(n1 < n0);
        assert!(h
            .labelmap()
            .data()
            .iter()
            .zip(before.data().iter())
            .all(|(a, b)| *a == 0 || *b == 1));

        let (min, max) = h.range();
        let err = h.set_threshold(max + 1.0).unwrap_err();
        assert_eq!(
            err,
            CoreError::ThresholdOutOfRange {
                value: max + 1.0,
                min,
                max
            }
        );
        // 失败时状态不变.
        assert_eq!(h.threshold(), 2.0);
        assert_eq!(h.labelmap().count(1), n1);
    }

    #[test]
    fn test_initial_threshold_clamped() {
        let v = volume();
        let field = Field::from_fn(v.geometry().clone(), |(k, _, _)| k as f32 + 1.0);
        let h = SegmentationHandle::new(field, (0, 0, 0), 0.0).unwrap();
        assert_eq!(h.threshold(), 1.0);
        assert_eq!(h.labelmap().count(1), h.labelmap().size());
    }
}

//! 单个结节的记录与状态机.
//!
//! 状态: `Empty -> HasSeeds -> Segmented`. 种子点只能通过 [`SeedsMut`] 修改,
//! 任何位置上的修改都会丢弃分割结果 (回到 `HasSeeds` 或 `Empty`);
//! 只修改阈值则保留分割, 但清空距离图与球壳缓存.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ops::Deref;

use log::{debug, info};
use ordered_float::NotNan;

use super::{segment, sphere_shell, DistanceMap, LevelSetProvider, Mesh, SegmentConfig, SegmentationHandle};
use crate::cancel::{CancelToken, Progress};
use crate::consts::label::FOREGROUND;
use crate::features::{extract, AuxMasks, FeatureSelection};
use crate::report::{FeatureRecord, MaskKind, NoduleReport};
use crate::seeds::{LesionType, SeedSet};
use crate::{ras_to_lps, CompactLabelMap, CoreError, CoreResult, LabelMap, Vec3, Volume, VolumeAttr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 结节状态.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NoduleState {
    /// 没有任何种子点.
    Empty,
    /// 有种子点, 尚未分割 (或分割已失效).
    HasSeeds,
    /// 已分割.
    Segmented,
}

/// 特征分析的目标 mask.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AnalysisTarget {
    /// 病灶本身.
    Lesion,
    /// 给定半径 (mm) 的球壳.
    Shell(f64),
}

impl From<AnalysisTarget> for MaskKind {
    fn from(t: AnalysisTarget) -> Self {
        match t {
            AnalysisTarget::Lesion => MaskKind::Nodule,
            AnalysisTarget::Shell(r) => MaskKind::Shell(r),
        }
    }
}

/// 分割结果及其派生缓存.
#[derive(Clone, Debug)]
struct Segmentation {
    handle: SegmentationHandle,
    distance: Option<DistanceMap>,
    shells: BTreeMap<NotNan<f64>, CompactLabelMap>,
}

impl Segmentation {
    fn new(handle: SegmentationHandle) -> Self {
        Self {
            handle,
            distance: None,
            shells: BTreeMap::new(),
        }
    }

    /// 以病灶质心为源点计算距离图. 病灶为空时退回质心种子.
    fn compute_distance(&self, max_radius: f64, cancel: &CancelToken) -> CoreResult<DistanceMap> {
        let lesion = self.handle.labelmap();
        let center = match lesion.centroid_of_label(FOREGROUND) {
            Ok(c) => c,
            Err(_) => {
                debug!("[distance] empty lesion, falling back to centroid seed");
                self.handle.centroid_ijk()
            }
        };
        DistanceMap::compute(lesion.geometry(), center, max_radius, cancel)
    }

    fn invalidate_derived(&mut self) {
        self.distance = None;
        self.shells.clear();
    }
}

/// 单个结节: 种子点, 阈值, 分割结果, 距离图与球壳缓存, 以及主轴标尺.
#[derive(Clone, Debug)]
pub struct NoduleRecord {
    index: usize,
    name: String,
    seeds: SeedSet,
    threshold: f64,
    config: SegmentConfig,
    segmentation: Option<Segmentation>,
    axes: Option<[[Vec3; 2]; 3]>,
}

fn shell_key(radius: f64) -> CoreResult<NotNan<f64>> {
    NotNan::new(radius).map_err(|_| CoreError::geometry("球壳半径为 NaN"))
}

impl NoduleRecord {
    /// 创建空结节.
    pub fn new(index: usize, name: impl Into<String>, config: SegmentConfig) -> Self {
        Self {
            index,
            name: name.into(),
            seeds: SeedSet::default(),
            threshold: super::default_threshold(),
            config,
            segmentation: None,
            axes: None,
        }
    }

    /// 结节编号, 在病例内唯一.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// 显示名称.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 修改显示名称, 不影响分割结果.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// 当前状态.
    pub fn state(&self) -> NoduleState {
        match (&self.segmentation, self.seeds.is_empty()) {
            (Some(_), _) => NoduleState::Segmented,
            (None, true) => NoduleState::Empty,
            (None, false) => NoduleState::HasSeeds,
        }
    }

    /// 种子点集合.
    #[inline]
    pub fn seeds(&self) -> &SeedSet {
        &self.seeds
    }

    /// 种子点的可变代理. 通过它修改种子点会驱动状态机.
    #[inline]
    pub fn seeds_mut(&mut self) -> SeedsMut<'_> {
        SeedsMut { record: self }
    }

    /// 病灶类型.
    #[inline]
    pub fn lesion_type(&self) -> LesionType {
        self.seeds.lesion_type()
    }

    /// 当前阈值. 分割后与分割句柄中的阈值一致.
    #[inline]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 分割参数.
    #[inline]
    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// 修改分割参数. 已有的分割结果失效.
    pub fn set_config(&mut self, config: SegmentConfig) {
        if config != self.config {
            self.config = config;
            self.invalidate();
        }
    }

    /// 分割句柄. 未分割时为 `None`.
    pub fn handle(&self) -> Option<&SegmentationHandle> {
        self.segmentation.as_ref().map(|s| &s.handle)
    }

    /// 病灶标签. 未分割时为 `None`.
    pub fn labelmap(&self) -> Option<&LabelMap> {
        self.handle().map(|h| h.labelmap())
    }

    /// 病灶网格. 未分割时为 `None`.
    pub fn mesh(&self) -> Option<&Mesh> {
        self.handle().map(|h| h.mesh())
    }

    /// 已缓存的球壳半径, 升序.
    pub fn cached_shells(&self) -> Vec<f64> {
        self.segmentation
            .as_ref()
            .map(|s| s.shells.keys().map(|k| k.into_inner()).collect())
            .unwrap_or_default()
    }

    /// 距离图是否已缓存?
    pub fn has_distance_map(&self) -> bool {
        matches!(&self.segmentation, Some(s) if s.distance.is_some())
    }

    fn invalidate(&mut self) {
        if self.segmentation.take().is_some() {
            debug!("[nodule {}] segmentation discarded", self.index);
        }
    }

    fn segmented(&self) -> CoreResult<&Segmentation> {
        match (&self.segmentation, self.seeds.is_empty()) {
            (Some(s), _) => Ok(s),
            (None, true) => Err(CoreError::NoSeed),
            (None, false) => Err(CoreError::NoSuchLabel(FOREGROUND.to_string())),
        }
    }

    /// 分割结节: `HasSeeds -> Segmented`. 已分割时重新分割.
    ///
    /// 没有种子点时返回 `CoreError::NoSeed`. 失败时记录保持原状.
    pub fn segment<P: LevelSetProvider + ?Sized>(
        &mut self,
        provider: &P,
        volume: &Volume,
        cancel: &CancelToken,
    ) -> CoreResult<()> {
        if self.seeds.is_empty() {
            return Err(CoreError::NoSeed);
        }
        let handle = segment(provider, volume, &self.seeds, &self.config, self.threshold, cancel)?;
        info!(
            "[nodule {}] segmented: {} voxels at threshold {}",
            self.index,
            handle.labelmap().foreground_count(),
            handle.threshold()
        );
        self.threshold = handle.threshold();
        self.segmentation = Some(Segmentation::new(handle));
        Ok(())
    }

    /// 修改阈值.
    ///
    /// 已分割时重新生成标签与网格, 并清空距离图与球壳缓存;
    /// 超出 level set 取值范围时返回 `CoreError::ThresholdOutOfRange` 且记录不变.
    /// 未分割时只记录阈值, 供下一次分割使用.
    pub fn set_threshold(&mut self, t: f64) -> CoreResult<()> {
        if let Some(seg) = self.segmentation.as_mut() {
            seg.handle.set_threshold(t)?;
            seg.invalidate_derived();
        }
        self.threshold = t;
        Ok(())
    }

    /// 距离图, 必要时计算并缓存.
    ///
    /// 未分割时返回 `CoreError::NoSeed` (没有种子) 或 `CoreError::NoSuchLabel` (没有病灶).
    pub fn distance_map(&mut self, cancel: &CancelToken) -> CoreResult<&DistanceMap> {
        let max_radius = self.config.max_radius_mm;
        self.segmented()?;
        let Some(seg) = self.segmentation.as_mut() else {
            return Err(CoreError::NoSeed);
        };
        if seg.distance.is_none() {
            seg.distance = Some(seg.compute_distance(max_radius, cancel)?);
        }
        seg.distance.as_ref().ok_or(CoreError::NoSeed)
    }

    /// 半径为 `radius` (mm) 的球壳标签, 必要时计算; 结果以压缩形式缓存.
    pub fn sphere_shell(&mut self, radius: f64, cancel: &CancelToken) -> CoreResult<LabelMap> {
        let key = shell_key(radius)?;
        if let Some(c) = self.segmented()?.shells.get(&key) {
            return Ok(c.decompress());
        }
        self.distance_map(cancel)?;
        let Some(seg) = self.segmentation.as_mut() else {
            return Err(CoreError::NoSeed);
        };
        let distance = seg.distance.as_ref().ok_or(CoreError::NoSeed)?;
        let shell = sphere_shell(seg.handle.labelmap(), distance, radius)?;
        seg.shells.insert(key, shell.compress());
        Ok(shell)
    }

    /// 在 `target` 上提取特征.
    ///
    /// 距离图与球壳先在局部计算, 只有整个调用成功后才写入缓存.
    /// 因此失败或取消时记录保持调用前的状态.
    pub fn analyze(
        &mut self,
        volume: &Volume,
        target: AnalysisTarget,
        selection: &FeatureSelection,
        aux: AuxMasks<'_>,
        progress: &mut dyn Progress,
        cancel: &CancelToken,
    ) -> CoreResult<FeatureRecord> {
        let seg = self.segmented()?;
        let radius = match target {
            AnalysisTarget::Lesion => {
                return extract(volume, seg.handle.labelmap(), selection, aux, progress, cancel);
            }
            AnalysisTarget::Shell(r) => r,
        };
        let key = shell_key(radius)?;

        let distance: Cow<'_, DistanceMap> = match &seg.distance {
            Some(d) => Cow::Borrowed(d),
            None => Cow::Owned(seg.compute_distance(self.config.max_radius_mm, cancel)?),
        };
        let (shell, fresh) = match seg.shells.get(&key) {
            Some(c) => (c.decompress(), false),
            None => (sphere_shell(seg.handle.labelmap(), &distance, radius)?, true),
        };
        let record = extract(volume, &shell, selection, aux, progress, cancel)?;

        // 提交缓存
        let distance = match distance {
            Cow::Owned(d) => Some(d),
            Cow::Borrowed(_) => None,
        };
        let compact = fresh.then(|| shell.compress());
        if let Some(seg) = self.segmentation.as_mut() {
            if distance.is_some() {
                seg.distance = distance;
            }
            if let Some(c) = compact {
                seg.shells.insert(key, c);
            }
        }
        Ok(record)
    }

    /// 设置三条主轴标尺的端点 (RAS, mm).
    pub fn set_axes(&mut self, axes: [[Vec3; 2]; 3]) {
        self.axes = Some(axes);
    }

    /// 清除主轴标尺.
    pub fn clear_axes(&mut self) {
        self.axes = None;
    }

    /// 三条主轴标尺的端点 (RAS, mm).
    #[inline]
    pub fn axes(&self) -> Option<&[[Vec3; 2]; 3]> {
        self.axes.as_ref()
    }

    /// 以当前状态包装一条结果记录.
    pub fn report(&self, case_id: &str, target: AnalysisTarget, features: FeatureRecord) -> NoduleReport {
        NoduleReport::now(
            case_id,
            self.index,
            target.into(),
            self.threshold,
            self.seeds.lesion_type(),
            self.seeds.points().iter().map(|p| ras_to_lps(*p)).collect(),
            self.axes,
            features,
        )
    }
}

/// 种子点的可变代理.
///
/// 增加, 移动, 删除种子点都会丢弃分割结果; 修改病灶类型不影响分割.
/// 通过 `Deref` 可以读取当前种子集合.
#[derive(Debug)]
pub struct SeedsMut<'a> {
    record: &'a mut NoduleRecord,
}

impl<'a> SeedsMut<'a> {
    /// 追加种子点. 空集合中的第一个点成为质心种子.
    pub fn push(&mut self, p: Vec3) {
        self.record.seeds.push(p);
        self.record.invalidate();
    }

    /// 移动第 `index` 个种子点. 返回旧坐标; 越界时返回 `None` 且不做任何修改.
    pub fn move_to(&mut self, index: usize, p: Vec3) -> Option<Vec3> {
        let old = self.record.seeds.move_to(index, p)?;
        self.record.invalidate();
        Some(old)
    }

    /// 删除第 `index` 个种子点. 越界时返回 `None` 且不做任何修改.
    pub fn remove(&mut self, index: usize) -> Option<Vec3> {
        let old = self.record.seeds.remove(index)?;
        self.record.invalidate();
        Some(old)
    }

    /// 删除所有种子点, 回到 `Empty`.
    pub fn clear(&mut self) {
        self.record.seeds.clear();
        self.record.invalidate();
    }

    /// 修改病灶类型. 会使已有分割失效.
    pub fn set_lesion_type(&mut self, t: LesionType) {
        self.record.seeds.set_lesion_type(t);
    }
}

impl Deref for SeedsMut<'_> {
    type Target = SeedSet;

    fn deref(&self) -> &SeedSet {
        &self.record.seeds
    }
}

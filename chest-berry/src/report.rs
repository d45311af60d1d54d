//! 结果记录.
//!
//! 特征结果是以特征名为键的扁平记录; 结节记录额外携带病例编号, 时间戳, 结节编号,
//! 球壳半径 (或 `nodule`), 阈值, 病灶类型, LPS 种子坐标以及三条主轴标尺 (RAS).

use std::collections::BTreeMap;

use crate::parenchyma::RegionHistogram;
use crate::seeds::LesionType;
use crate::{CoreError, CoreResult, Vec3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 特征名到特征值的有序映射.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureRecord {
    values: BTreeMap<String, f64>,
}

impl FeatureRecord {
    /// 创建空记录.
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖一个特征值.
    #[inline]
    pub fn insert<S: Into<String>>(&mut self, name: S, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// 按列名取特征值.
    #[inline]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// 同 [`FeatureRecord::get`], 不存在时返回 `CoreError::NoSuchLabel`.
    pub fn value(&self, name: &str) -> CoreResult<f64> {
        self.get(name)
            .ok_or_else(|| CoreError::NoSuchLabel(name.to_string()))
    }

    /// 特征个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否没有任何特征.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 全部列名, 按字典序.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// 全部特征值, 与 [`FeatureRecord::names`] 顺序一致.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.values().copied()
    }

    /// 按字典序遍历 `(列名, 取值)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// 特征计算所用的 mask.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MaskKind {
    /// 病灶本身.
    Nodule,
    /// 给定半径 (mm) 的球壳.
    Shell(f64),
}

impl MaskKind {
    /// 结果表中 "Sphere Radius" 列的取值.
    pub fn label(&self) -> String {
        match self {
            Self::Nodule => "nodule".to_string(),
            Self::Shell(r) => format!("{r}"),
        }
    }
}

/// 单个结节在某个 mask 上的特征记录.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NoduleReport {
    /// 病例编号.
    pub case_id: String,

    /// ISO-8601 (RFC 3339) 时间戳.
    pub timestamp: String,

    /// 结节编号, 从 1 开始.
    pub nodule_index: usize,
    /// 计算特征所用的 mask.
    pub mask: MaskKind,
    /// 分割阈值.
    pub threshold: f64,
    /// 病灶类型.
    pub lesion_type: LesionType,

    /// 种子坐标 (LPS, mm), 第一个为质心种子.
    pub seeds_lps: Vec<Vec3>,

    /// 三条主轴标尺的端点 (RAS, mm).
    pub axes: Option<[[Vec3; 2]; 3]>,

    /// 特征值.
    pub features: FeatureRecord,
}

#[inline]
fn fmt_point([x, y, z]: &Vec3) -> String {
    format!("{x:.6},{y:.6},{z:.6}")
}

impl NoduleReport {
    /// 以当前时间创建.
    #[allow(clippy::too_many_arguments)]
    pub fn now(
        case_id: impl Into<String>,
        nodule_index: usize,
        mask: MaskKind,
        threshold: f64,
        lesion_type: LesionType,
        seeds_lps: Vec<Vec3>,
        axes: Option<[[Vec3; 2]; 3]>,
        features: FeatureRecord,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            nodule_index,
            mask,
            threshold,
            lesion_type,
            seeds_lps,
            axes,
            features,
        }
    }

    /// 元数据列的列名, 按输出顺序.
    pub const METADATA_COLUMNS: [&'static str; 13] = [
        "CaseId",
        "Date",
        "Nodule",
        "Sphere Radius",
        "Threshold",
        "Lesion Type",
        "Seeds (LPS)",
        "Axis 1 Start (RAS)",
        "Axis 1 End (RAS)",
        "Axis 2 Start (RAS)",
        "Axis 2 End (RAS)",
        "Axis 3 Start (RAS)",
        "Axis 3 End (RAS)",
    ];

    /// 扁平的 `(列名, 值)` 行: 先元数据, 后特征 (按特征名排序).
    pub fn to_row(&self) -> Vec<(String, String)> {
        let seeds = self
            .seeds_lps
            .iter()
            .map(fmt_point)
            .collect::<Vec<_>>()
            .join(";");
        let mut values = vec![
            self.case_id.clone(),
            self.timestamp.clone(),
            self.nodule_index.to_string(),
            self.mask.label(),
            self.threshold.to_string(),
            self.lesion_type.to_string(),
            seeds,
        ];
        match &self.axes {
            Some(axes) => values.extend(axes.iter().flatten().map(fmt_point)),
            None => values.extend(std::iter::repeat(String::new()).take(6)),
        }

        Self::METADATA_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .zip(values)
            .chain(self.features.iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .collect()
    }
}

/// 单个区域的密度指标与直方图.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionReport {
    /// 区域名称, 见 [`RegionTable`](crate::parenchyma::RegionTable).
    pub region: String,

    /// 指标名到取值, 指标名见 [`ParenchymaAnalyzer::METRICS`](crate::parenchyma::ParenchymaAnalyzer::METRICS).
    pub metrics: BTreeMap<String, f64>,

    /// `x < -350` HU 部分的直方图. 区域内没有这样的体素时为 `None`.
    pub histogram: Option<RegionHistogram>,
}

/// 肺实质分析结果. 只包含标签中实际出现的区域, 按区域表顺序.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParenchymaReport {
    /// 各区域的结果.
    pub regions: Vec<RegionReport>,
}

impl ParenchymaReport {
    /// 按区域名查找.
    pub fn region(&self, name: &str) -> Option<&RegionReport> {
        self.regions.iter().find(|r| r.region == name)
    }

    /// 某个区域的某个指标.
    pub fn get(&self, region: &str, metric: &str) -> Option<f64> {
        self.region(region)
            .and_then(|r| r.metrics.get(metric))
            .copied()
    }

    /// 出现的区域名称.
    pub fn region_names(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.region.as_str())
    }
}

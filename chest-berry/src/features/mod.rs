//! 定量特征提取.
//!
//! 输入为 `(volume, mask)`, mask 中非零体素构成感兴趣区域. mask 可以是病灶, 球壳,
//! 或任意外部提供的区域, 计算语义相同.
//!
//! 特征分类固定 (一阶统计, 形状, GLCM, GLRL, Renyi 维数, 几何, 肺实质),
//! 内部以封闭的枚举分派; 特征名称字符串只用于结果记录.

use std::collections::BTreeSet;
use std::fmt;

use crate::cancel::{CancelToken, Progress};
use crate::consts::hu::DEFAULT_BIN_WIDTH;
use crate::report::FeatureRecord;
use crate::{CoreError, CoreResult, LabelMap, Volume, VolumeAttr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod first_order;
mod glcm;
mod glrl;
mod parenchymal;
mod renyi;
mod roi;
mod shape;

pub(crate) use roi::Roi;

/// 定义一类特征: 枚举, 全部成员, 以及结果记录中的列名.
macro_rules! named_features {
    ($(#[$meta: meta])* $name: ident { $($variant: ident => $label: literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub enum $name {
            $(#[doc = $label] $variant),+
        }

        impl $name {
            /// 该类的全部特征, 按分类表顺序.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// 结果记录中的列名.
            pub const fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

named_features!(
    /// 一阶统计 (17).
    FirstOrderFeature {
        VoxelCount => "Voxel Count",
        GrayLevels => "Gray Levels",
        Energy => "Energy",
        Entropy => "Entropy",
        Minimum => "Minimum",
        Maximum => "Maximum",
        Mean => "Mean",
        Median => "Median",
        Range => "Range",
        MeanDeviation => "Mean Absolute Deviation",
        RootMeanSquare => "Root Mean Square",
        StandardDeviation => "Standard Deviation",
        VentilationHeterogeneity => "Ventilation Heterogeneity",
        Skewness => "Skewness",
        Kurtosis => "Kurtosis",
        Variance => "Variance",
        Uniformity => "Uniformity",
    }
);

named_features!(
    /// 形态与形状 (9).
    ShapeFeature {
        VolumeMm3 => "Volume mm3",
        VolumeCc => "Volume cc",
        SurfaceArea => "Surface Area mm2",
        SurfaceVolumeRatio => "Surface:Volume Ratio",
        Compactness1 => "Compactness 1",
        Compactness2 => "Compactness 2",
        MaximumDiameter => "Maximum 3D Diameter",
        SphericalDisproportion => "Spherical Disproportion",
        Sphericity => "Sphericity",
    }
);

named_features!(
    /// 灰度共生矩阵纹理 (21).
    GlcmFeature {
        Autocorrelation => "Autocorrelation",
        ClusterProminence => "Cluster Prominence",
        ClusterShade => "Cluster Shade",
        ClusterTendency => "Cluster Tendency",
        Contrast => "Contrast",
        Correlation => "Correlation",
        DifferenceEntropy => "Difference Entropy",
        Dissimilarity => "Dissimilarity",
        Energy => "GLCM Energy",
        Entropy => "GLCM Entropy",
        Homogeneity1 => "Homogeneity 1",
        Homogeneity2 => "Homogeneity 2",
        Imc1 => "IMC1",
        Idmn => "IDMN",
        Idn => "IDN",
        InverseVariance => "Inverse Variance",
        MaximumProbability => "Maximum Probability",
        SumAverage => "Sum Average",
        SumEntropy => "Sum Entropy",
        SumVariance => "Sum Variance",
        Variance => "GLCM Variance",
    }
);

named_features!(
    /// 灰度游程矩阵纹理 (11).
    GlrlFeature {
        Sre => "SRE",
        Lre => "LRE",
        Gln => "GLN",
        Rln => "RLN",
        Rp => "RP",
        Lglre => "LGLRE",
        Hglre => "HGLRE",
        Srlgle => "SRLGLE",
        Srhgle => "SRHGLE",
        Lrlgle => "LRLGLE",
        Lrhgle => "LRHGLE",
    }
);

named_features!(
    /// Renyi 维数 (3).
    RenyiFeature {
        BoxCounting => "Box-Counting Dimension",
        Information => "Information Dimension",
        Correlation => "Correlation Dimension",
    }
);

named_features!(
    /// 沿 Z 轴拉伸一个体素后的几何量 (3).
    GeometricalFeature {
        ExtrudedSurfaceArea => "Extruded Surface Area",
        ExtrudedVolume => "Extruded Volume",
        ExtrudedRatio => "Extruded Surface:Volume Ratio",
    }
);

named_features!(
    /// 肺实质 (肺气肿) 描述, 需要辅助肺气肿标签.
    ParenchymalFeature {
        ParenchymalVolume => "Parenchymal Volume",
        EmphysemaVolume => "Emphysema Volume",
        EmphysemaPercent => "Emphysema %",
        ParenchymaMean => "Parenchyma Mean Intensity",
        EmphysemaMean => "Emphysema Mean Intensity",
    }
);

/// 特征类别.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FeatureClass {
    /// 一阶统计量.
    FirstOrder,
    /// 形态与形状.
    Shape,
    /// 灰度共生矩阵纹理.
    Glcm,
    /// 灰度游程矩阵纹理.
    Glrl,
    /// Renyi 维数.
    Renyi,
    /// 沿 Z 轴拉伸后的几何量.
    Geometrical,
    /// 肺实质与肺气肿体积.
    Parenchymal,
}

impl FeatureClass {
    /// 全部类别, 按结果表中的列顺序.
    pub const ALL: [FeatureClass; 7] = [
        Self::FirstOrder,
        Self::Shape,
        Self::Glcm,
        Self::Glrl,
        Self::Renyi,
        Self::Geometrical,
        Self::Parenchymal,
    ];

    /// 类别的显示名称.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FirstOrder => "First-Order Statistics",
            Self::Shape => "Morphology and Shape",
            Self::Glcm => "Texture: GLCM",
            Self::Glrl => "Texture: GLRL",
            Self::Renyi => "Renyi Dimensions",
            Self::Geometrical => "Geometrical Measures",
            Self::Parenchymal => "Parenchymal Volume",
        }
    }

    /// 该类的全部特征.
    pub fn features(&self) -> Vec<Feature> {
        match self {
            Self::FirstOrder => FirstOrderFeature::ALL.iter().map(|f| Feature::FirstOrder(*f)).collect(),
            Self::Shape => ShapeFeature::ALL.iter().map(|f| Feature::Shape(*f)).collect(),
            Self::Glcm => GlcmFeature::ALL.iter().map(|f| Feature::Glcm(*f)).collect(),
            Self::Glrl => GlrlFeature::ALL.iter().map(|f| Feature::Glrl(*f)).collect(),
            Self::Renyi => RenyiFeature::ALL.iter().map(|f| Feature::Renyi(*f)).collect(),
            Self::Geometrical => GeometricalFeature::ALL
                .iter()
                .map(|f| Feature::Geometrical(*f))
                .collect(),
            Self::Parenchymal => ParenchymalFeature::ALL
                .iter()
                .map(|f| Feature::Parenchymal(*f))
                .collect(),
        }
    }
}

impl fmt::Display for FeatureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 任意一个特征.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Feature {
    /// 一阶统计量.
    FirstOrder(FirstOrderFeature),
    /// 形态与形状.
    Shape(ShapeFeature),
    /// GLCM 纹理.
    Glcm(GlcmFeature),
    /// GLRL 纹理.
    Glrl(GlrlFeature),
    /// Renyi 维数.
    Renyi(RenyiFeature),
    /// 几何量.
    Geometrical(GeometricalFeature),
    /// 肺实质体积.
    Parenchymal(ParenchymalFeature),
}

impl Feature {
    /// 所属类别.
    pub const fn class(&self) -> FeatureClass {
        match self {
            Self::FirstOrder(_) => FeatureClass::FirstOrder,
            Self::Shape(_) => FeatureClass::Shape,
            Self::Glcm(_) => FeatureClass::Glcm,
            Self::Glrl(_) => FeatureClass::Glrl,
            Self::Renyi(_) => FeatureClass::Renyi,
            Self::Geometrical(_) => FeatureClass::Geometrical,
            Self::Parenchymal(_) => FeatureClass::Parenchymal,
        }
    }

    /// 结果记录中的列名.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FirstOrder(f) => f.name(),
            Self::Shape(f) => f.name(),
            Self::Glcm(f) => f.name(),
            Self::Glrl(f) => f.name(),
            Self::Renyi(f) => f.name(),
            Self::Geometrical(f) => f.name(),
            Self::Parenchymal(f) => f.name(),
        }
    }

    /// 全部特征.
    pub fn all() -> impl Iterator<Item = Feature> {
        FeatureClass::ALL.into_iter().flat_map(|c| c.features())
    }

    /// 按列名查找特征. 未知名称返回 `CoreError::NoSuchLabel`.
    pub fn from_name(name: &str) -> CoreResult<Feature> {
        Self::all()
            .find(|f| f.name() == name)
            .ok_or_else(|| CoreError::NoSuchLabel(name.to_string()))
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 特征选择及分类器参数.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureSelection {
    features: BTreeSet<Feature>,

    /// GLCM/GLRL 以及一阶直方图统计的 bin 宽度 (HU).
    pub bin_width: f64,

    /// 为真时空 mask 返回 `CoreError::MaskEmpty`, 否则所有特征为 0.
    pub strict: bool,
}

impl Default for FeatureSelection {
    /// 除肺实质外的全部特征.
    fn default() -> Self {
        FeatureSelection::empty()
            .with_class(FeatureClass::FirstOrder)
            .with_class(FeatureClass::Shape)
            .with_class(FeatureClass::Glcm)
            .with_class(FeatureClass::Glrl)
            .with_class(FeatureClass::Renyi)
            .with_class(FeatureClass::Geometrical)
    }
}

impl FeatureSelection {
    /// 不包含任何特征.
    pub fn empty() -> Self {
        Self {
            features: BTreeSet::new(),
            bin_width: DEFAULT_BIN_WIDTH,
            strict: false,
        }
    }

    /// 包含全部特征 (含肺实质).
    pub fn all() -> Self {
        Self {
            features: Feature::all().collect(),
            ..Self::empty()
        }
    }

    /// 按列名构造. 未知名称返回 `CoreError::NoSuchLabel`.
    pub fn from_names<'a, I: IntoIterator<Item = &'a str>>(names: I) -> CoreResult<Self> {
        let features = names
            .into_iter()
            .map(Feature::from_name)
            .collect::<CoreResult<BTreeSet<_>>>()?;
        Ok(Self {
            features,
            ..Self::empty()
        })
    }

    /// 加入单个特征.
    pub fn with(mut self, feature: Feature) -> Self {
        self.features.insert(feature);
        self
    }

    /// 加入某一类的全部特征.
    pub fn with_class(mut self, class: FeatureClass) -> Self {
        self.features.extend(class.features());
        self
    }

    /// 设置纹理特征量化的 bin 宽度 (HU).
    pub fn with_bin_width(mut self, bin_width: f64) -> Self {
        self.bin_width = bin_width;
        self
    }

    /// 设置 `strict` 字段: 为真时空 mask 报错.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// 是否选中了 `feature`.
    #[inline]
    pub fn contains(&self, feature: &Feature) -> bool {
        self.features.contains(feature)
    }

    /// 选中的特征, 有序.
    #[inline]
    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// 选中的特征个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// 是否一个特征都没有选中.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// 选中的类别, 按 [`FeatureClass::ALL`] 顺序.
    pub fn classes(&self) -> Vec<FeatureClass> {
        let present: BTreeSet<FeatureClass> = self.features.iter().map(Feature::class).collect();
        FeatureClass::ALL
            .into_iter()
            .filter(|c| present.contains(c))
            .collect()
    }
}

/// 特征提取的辅助输入.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuxMasks<'a> {
    /// 全体积肺气肿标签, 非零为肺气肿.
    pub emphysema: Option<&'a LabelMap>,
}

impl<'a> AuxMasks<'a> {
    /// 只带肺气肿标签的辅助输入.
    pub fn with_emphysema(emphysema: &'a LabelMap) -> Self {
        Self {
            emphysema: Some(emphysema),
        }
    }
}

/// 计算 `selection` 中的全部特征.
///
/// 每完成一类特征调用一次 `progress`; `progress` 返回错误或 `cancel` 被触发时立即中止,
/// 不返回任何部分结果.
pub fn extract(
    volume: &Volume,
    mask: &LabelMap,
    selection: &FeatureSelection,
    aux: AuxMasks<'_>,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> CoreResult<FeatureRecord> {
    volume.ensure_compatible(mask)?;
    if !(selection.bin_width.is_finite() && selection.bin_width > 0.0) {
        return Err(CoreError::geometry(format!("非法 bin 宽度 {}", selection.bin_width)));
    }
    if roi::gray_level_count(selection.bin_width) > roi::MAX_GRAY_LEVELS {
        return Err(CoreError::geometry(format!(
            "bin 宽度 {} 过小, 灰度级超过 {}",
            selection.bin_width,
            roi::MAX_GRAY_LEVELS
        )));
    }
    let classes = selection.classes();
    let emphysema = if classes.contains(&FeatureClass::Parenchymal) {
        let e = aux.emphysema.ok_or(CoreError::MissingAux)?;
        volume.ensure_compatible(e)?;
        Some(e)
    } else {
        None
    };
    cancel.check()?;

    let roi = Roi::new(volume, mask);
    let mut record = FeatureRecord::new();
    if roi.is_empty() {
        if selection.strict && !selection.is_empty() {
            return Err(CoreError::MaskEmpty);
        }
        for f in selection.features() {
            record.insert(f.name(), 0.0);
        }
        log::debug!("empty mask: {} features set to zero", record.len());
        return Ok(record);
    }

    let total = classes.len();
    for (done, class) in classes.into_iter().enumerate() {
        let wanted = selection.features().filter(|f| f.class() == class);
        match class {
            FeatureClass::FirstOrder => {
                let s = first_order::FirstOrderStats::compute(roi.values(), selection.bin_width);
                for f in wanted {
                    if let Feature::FirstOrder(f) = f {
                        record.insert(f.name(), s.get(*f));
                    }
                }
            }
            FeatureClass::Shape => {
                let s = shape::ShapeStats::compute(&roi);
                for f in wanted {
                    if let Feature::Shape(f) = f {
                        record.insert(f.name(), s.get(*f));
                    }
                }
            }
            FeatureClass::Glcm => {
                let s = glcm::GlcmStats::compute(&roi, selection.bin_width, cancel)?;
                for f in wanted {
                    if let Feature::Glcm(f) = f {
                        record.insert(f.name(), s.get(*f));
                    }
                }
            }
            FeatureClass::Glrl => {
                let s = glrl::GlrlStats::compute(&roi, selection.bin_width, cancel)?;
                for f in wanted {
                    if let Feature::Glrl(f) = f {
                        record.insert(f.name(), s.get(*f));
                    }
                }
            }
            FeatureClass::Renyi => {
                let s = renyi::RenyiStats::compute(&roi);
                for f in wanted {
                    if let Feature::Renyi(f) = f {
                        record.insert(f.name(), s.get(*f));
                    }
                }
            }
            FeatureClass::Geometrical => {
                let s = shape::ExtrudedStats::compute(&roi);
                for f in wanted {
                    if let Feature::Geometrical(f) = f {
                        record.insert(f.name(), s.get(*f));
                    }
                }
            }
            FeatureClass::Parenchymal => {
                // 上面已经检查过.
                let Some(e) = emphysema else {
                    return Err(CoreError::MissingAux);
                };
                let s = parenchymal::ParenchymalStats::compute(&roi, e);
                for f in wanted {
                    if let Feature::Parenchymal(f) = f {
                        record.insert(f.name(), s.get(*f));
                    }
                }
            }
        }
        cancel.check()?;
        log::debug!("feature class `{class}` done ({}/{total})", done + 1);
        progress.report(class.name(), done + 1, total)?;
    }

    log::info!(
        "extracted {} features over {} voxels",
        record.len(),
        roi.len()
    );
    Ok(record)
}

use std::ops::RangeInclusive;

use once_cell::sync::Lazy;

use crate::consts::region::*;

#[cfg(feature = "serde")]
use serde::Serialize;

/// 解剖区域: 名称, chest region 编码范围, 显示颜色与可读名称.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Region {
    /// 区域名, 即结果中的 `Region` 列.
    pub name: &'static str,
    /// 属于该区域的 chest region 编码.
    pub codes: RangeInclusive<u8>,
    /// 显示颜色 (RGB).
    pub color: [u8; 3],
    /// 可读名称.
    pub label: &'static str,
}

impl Region {
    /// chest region 编码是否属于该区域?
    #[inline]
    pub fn contains(&self, code: u8) -> bool {
        self.codes.contains(&code)
    }

    /// 该区域是否只包含一个编码?
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.codes.start() == self.codes.end()
    }
}

/// 区域名称到编码范围的映射表. 进程内唯一, 初始化后不可变.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RegionTable {
    regions: Vec<Region>,
}

static CHEST: Lazy<RegionTable> = Lazy::new(|| {
    let r = |name, lo, hi, color, label| Region {
        name,
        codes: lo..=hi,
        color,
        label,
    };
    RegionTable {
        regions: vec![
            r("WholeLung", WHOLE_LUNG, RIGHT_LOWER_THIRD, [128, 174, 128], "Whole Lung"),
            r("RightLung", RIGHT_LUNG, RIGHT_LUNG, [69, 184, 124], "Right Lung"),
            r("LeftLung", LEFT_LUNG, LEFT_LUNG, [241, 214, 145], "Left Lung"),
            r("RUL", RIGHT_SUPERIOR_LOBE, RIGHT_SUPERIOR_LOBE, [216, 101, 79], "Right Upper Lobe"),
            r("RML", RIGHT_MIDDLE_LOBE, RIGHT_MIDDLE_LOBE, [183, 156, 220], "Right Middle Lobe"),
            r("RLL", RIGHT_INFERIOR_LOBE, RIGHT_INFERIOR_LOBE, [221, 130, 101], "Right Lower Lobe"),
            r("LUL", LEFT_SUPERIOR_LOBE, LEFT_SUPERIOR_LOBE, [144, 238, 144], "Left Upper Lobe"),
            r("LLL", LEFT_INFERIOR_LOBE, LEFT_INFERIOR_LOBE, [192, 104, 88], "Left Lower Lobe"),
            r("LUT", LEFT_UPPER_THIRD, LEFT_UPPER_THIRD, [220, 245, 20], "Left Upper Third"),
            r("LMT", LEFT_MIDDLE_THIRD, LEFT_MIDDLE_THIRD, [78, 63, 0], "Left Middle Third"),
            r("LLT", LEFT_LOWER_THIRD, LEFT_LOWER_THIRD, [255, 250, 220], "Left Lower Third"),
            r("RUT", RIGHT_UPPER_THIRD, RIGHT_UPPER_THIRD, [230, 220, 70], "Right Upper Third"),
            r("RMT", RIGHT_MIDDLE_THIRD, RIGHT_MIDDLE_THIRD, [200, 200, 235], "Right Middle Third"),
            r("RLT", RIGHT_LOWER_THIRD, RIGHT_LOWER_THIRD, [250, 250, 210], "Right Lower Third"),
        ],
    }
});

impl RegionTable {
    /// 胸部区域表.
    #[inline]
    pub fn chest() -> &'static RegionTable {
        &CHEST
    }

    /// 由任意区域构造, 主要用于测试或自定义编码.
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// 按表顺序遍历区域.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// 区域个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// 表是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// 按区域名查找.
    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// 包含编码 `code` 的所有区域.
    pub fn regions_of(&self, code: u8) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(move |r| r.contains(code))
    }

    /// 编码 `code` 的显示颜色: 包含它的最小区域的颜色.
    pub fn color_of(&self, code: u8) -> Option<[u8; 3]> {
        self.regions_of(code)
            .min_by_key(|r| r.codes.end() - r.codes.start())
            .map(|r| r.color)
    }
}

//! 种子点集合与病灶类型.
//!
//! 每个结节拥有一个有序的种子点集合, 坐标均为 RAS. 第一个种子点是质心种子,
//! 分割前必须存在; 其余种子点作为边界提示交给外部分割程序.

use std::fmt;
use std::str::FromStr;

use crate::Vec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod xml;

pub use xml::{CoordinateSystem, GeometryTopologyData, SeedIoError, TopologyPoint};

/// 病灶类型.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LesionType {
    /// 未知.
    #[default]
    Unknown,

    /// 结节.
    Nodule,

    /// 肿瘤.
    Tumor,
}

impl LesionType {
    /// 文本名称.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Nodule => "Nodule",
            Self::Tumor => "Tumor",
        }
    }
}

impl fmt::Display for LesionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 无法识别的病灶类型名称.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lesion type `{0}`")]
pub struct ParseLesionTypeError(pub String);

impl FromStr for LesionType {
    type Err = ParseLesionTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "nodule" => Ok(Self::Nodule),
            "tumor" => Ok(Self::Tumor),
            _ => Err(ParseLesionTypeError(s.to_string())),
        }
    }
}

/// 单个结节的有序种子点集合 (RAS).
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SeedSet {
    points: Vec<Vec3>,
    lesion_type: LesionType,
}

impl SeedSet {
    /// 创建空集合.
    #[inline]
    pub fn new(lesion_type: LesionType) -> Self {
        Self {
            points: Vec::new(),
            lesion_type,
        }
    }

    /// 以质心种子创建集合.
    #[inline]
    pub fn with_centroid(centroid: Vec3, lesion_type: LesionType) -> Self {
        Self {
            points: vec![centroid],
            lesion_type,
        }
    }

    /// 质心种子. 集合为空时返回 `None`.
    #[inline]
    pub fn centroid(&self) -> Option<Vec3> {
        self.points.first().copied()
    }

    /// 除质心外的边界提示种子.
    #[inline]
    pub fn hints(&self) -> &[Vec3] {
        self.points.get(1..).unwrap_or(&[])
    }

    /// 全部种子点, 质心在前.
    #[inline]
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    /// 种子点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// 是否没有任何种子点?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 病灶类型.
    #[inline]
    pub fn lesion_type(&self) -> LesionType {
        self.lesion_type
    }

    pub(crate) fn set_lesion_type(&mut self, t: LesionType) {
        self.lesion_type = t;
    }

    pub(crate) fn push(&mut self, p: Vec3) {
        self.points.push(p);
    }

    /// 移动第 `index` 个种子点. 返回旧坐标; 越界时返回 `None`.
    pub(crate) fn move_to(&mut self, index: usize, p: Vec3) -> Option<Vec3> {
        self.points
            .get_mut(index)
            .map(|old| std::mem::replace(old, p))
    }

    /// 删除第 `index` 个种子点. 删除质心后, 下一个种子点成为新的质心.
    pub(crate) fn remove(&mut self, index: usize) -> Option<Vec3> {
        (index < self.points.len()).then(|| self.points.remove(index))
    }

    pub(crate) fn clear(&mut self) {
        self.points.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lesion_type_parse() {
        for t in [LesionType::Unknown, LesionType::Nodule, LesionType::Tumor] {
            assert_eq!(t.to_string().parse::<LesionType>().unwrap(), t);
        }
        assert_eq!(" tumor ".parse::<LesionType>().unwrap(), LesionType::Tumor);
        let e = "Cyst".parse::<LesionType>().unwrap_err();
        assert_eq!(e, ParseLesionTypeError("Cyst".to_string()));
        assert_eq!(e.to_string(), "unknown lesion type `Cyst`");
        let boxed: Box<dyn std::error::Error> = Box::new(e);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_seed_set_order() {
        let mut s = SeedSet::new(LesionType::Nodule);
        assert_eq!(s.centroid(), None);
        assert!(s.hints().is_empty());
        s.push([1.0, 2.0, 3.0]);
        s.push([4.0, 5.0, 6.0]);
        assert_eq!(s.centroid(), Some([1.0, 2.0, 3.0]));
        assert_eq!(s.hints(), &[[4.0, 5.0, 6.0]]);
        assert_eq!(s.move_to(1, [0.0; 3]), Some([4.0, 5.0, 6.0]));
        assert_eq!(s.move_to(5, [0.0; 3]), None);
        assert_eq!(s.remove(0), Some([1.0, 2.0, 3.0]));
        assert_eq!(s.centroid(), Some([0.0; 3]));
        assert_eq!(s.remove(3), None);
        s.clear();
        assert!(s.is_empty());
    }
}

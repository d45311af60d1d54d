use std::collections::BTreeSet;
use std::ops::{Index, IndexMut};

use ndarray::{Array3, ArrayView2, ArrayView3, ArrayViewMut3, Axis, Zip};
use thiserror::Error;

use crate::{CoreError, CoreResult, Idx3d, Vec3};

mod bbox;
mod compact;
pub mod geometry;
mod nifti_io;
mod nrrd;
mod window;

pub use bbox::BoundingBox;
pub use compact::CompactLabelMap;
pub use geometry::Geometry;
pub use window::CtWindow;

/// 体数据读写错误.
#[derive(Error, Debug)]
pub enum VolumeIoError {
    /// 底层 I/O 错误.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// NIfTI 解码错误.
    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// NRRD 头部格式错误.
    #[error("malformed NRRD header: {0}")]
    Header(String),

    /// 不支持的编码, 类型或维度.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// 数据长度与头部不符.
    #[error("expected {expected} voxels, got {actual}")]
    Size {
        /// 头部声明的体素个数.
        expected: usize,
        /// 实际读到的体素个数.
        actual: usize,
    },

    /// 几何信息不合法.
    #[error(transparent)]
    Geometry(#[from] CoreError),
}

/// 3D 体数据的共用属性和部分通用操作.
pub trait VolumeAttr {
    /// 获取几何信息.
    fn geometry(&self) -> &Geometry;

    /// 获取数组形状 `(K, J, I)`.
    #[inline]
    fn shape(&self) -> Idx3d {
        self.geometry().shape()
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        self.geometry().size()
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, pos: &Idx3d) -> bool {
        self.geometry().check(pos)
    }

    /// 获取单个体素分辨率 (mm), IJK 顺序.
    #[inline]
    fn spacing(&self) -> Vec3 {
        self.geometry().spacing()
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.geometry().voxel_mm3()
    }

    /// RAS -> IJK.
    #[inline]
    fn ras_to_ijk(&self, p: Vec3, round: bool) -> Vec3 {
        self.geometry().ras_to_ijk(p, round)
    }

    /// IJK -> RAS.
    #[inline]
    fn ijk_to_ras(&self, p: Vec3) -> Vec3 {
        self.geometry().ijk_to_ras(p)
    }

    /// RAS 对齐的包围尺寸.
    #[inline]
    fn dimensions_ras(&self) -> [usize; 3] {
        self.geometry().dimensions_ras()
    }

    /// 检查两个体数据的尺寸与间距是否一致.
    #[inline]
    fn ensure_compatible<V: VolumeAttr + ?Sized>(&self, other: &V) -> CoreResult<()> {
        self.geometry().ensure_compatible(other.geometry())
    }
}

/// 获取 `pos` 前后上下左右六个点的坐标.
///
/// 在形状 `shape` 范围外的坐标会被过滤掉, 不会包含在返回值中.
#[inline]
pub(crate) fn diamond_neighbours(shape: Idx3d, (k, j, i): Idx3d) -> impl Iterator<Item = Idx3d> {
    [
        (k.wrapping_sub(1), j, i),
        (k.saturating_add(1), j, i),
        (k, j.wrapping_sub(1), i),
        (k, j.saturating_add(1), i),
        (k, j, i.wrapping_sub(1)),
        (k, j, i.saturating_add(1)),
    ]
    .into_iter()
    .filter(move |(a, b, c)| *a < shape.0 && *b < shape.1 && *c < shape.2)
}

/// 为体数据类型实现共用方法.
macro_rules! impl_volume_common {
    ($volume: ident, $elem: ty) => {
        impl VolumeAttr for $volume {
            #[inline]
            fn geometry(&self) -> &Geometry {
                &self.geometry
            }
        }

        impl Index<Idx3d> for $volume {
            type Output = $elem;

            #[inline]
            fn index(&self, index: Idx3d) -> &Self::Output {
                &self.data[index]
            }
        }

        impl IndexMut<Idx3d> for $volume {
            #[inline]
            fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
                &mut self.data[index]
            }
        }

        impl $volume {
            /// 由几何信息和 `(K, J, I)` 排列的数组创建.
            /// 数组形状与几何信息不符时返回 `CoreError::InvalidGeometry`.
            pub fn new(geometry: Geometry, data: Array3<$elem>) -> CoreResult<Self> {
                if data.dim() != geometry.shape() {
                    return Err(CoreError::geometry(format!(
                        "数组形状 {:?} 与几何尺寸 {:?} 不符",
                        data.dim(),
                        geometry.shape()
                    )));
                }
                let data = if data.is_standard_layout() {
                    data
                } else {
                    data.as_standard_layout().to_owned()
                };
                Ok(Self { geometry, data })
            }

            /// 直接拼装. 调用者保证形状一致.
            #[inline]
            pub(crate) fn from_parts(geometry: Geometry, data: Array3<$elem>) -> Self {
                debug_assert_eq!(data.dim(), geometry.shape());
                debug_assert!(data.is_standard_layout());
                Self { geometry, data }
            }

            /// 创建所有体素均为 `value` 的体数据.
            #[inline]
            pub fn filled(geometry: Geometry, value: $elem) -> Self {
                let data = Array3::from_elem(geometry.shape(), value);
                Self { geometry, data }
            }

            /// 以索引 `(k, j, i)` 的函数创建体数据.
            #[inline]
            pub fn from_fn<F: FnMut(Idx3d) -> $elem>(geometry: Geometry, f: F) -> Self {
                let data = Array3::from_shape_fn(geometry.shape(), f);
                Self { geometry, data }
            }

            /// 获得数据的一份不可变 shallow copy.
            #[inline]
            pub fn data(&self) -> ArrayView3<'_, $elem> {
                self.data.view()
            }

            /// 获得数据的一份可变 shallow copy.
            #[inline]
            pub fn data_mut(&mut self) -> ArrayViewMut3<'_, $elem> {
                self.data.view_mut()
            }

            /// 拆解为底层数组.
            #[inline]
            pub fn into_data(self) -> Array3<$elem> {
                self.data
            }

            /// 获取给定位置的体素值. 越界时返回 `None`.
            #[inline]
            pub fn get(&self, pos: Idx3d) -> Option<&$elem> {
                self.data.get(pos)
            }

            /// 获取 RAS 坐标 `p` 所在体素的值. 位于体数据外时返回 `None`.
            #[inline]
            pub fn at_ras(&self, p: Vec3) -> Option<$elem> {
                self.geometry
                    .ras_to_index(p)
                    .map(|pos| self.data[pos])
            }

            /// 获取第 `k` 层水平切片视图.
            ///
            /// 当 `k` 越界时 panic.
            #[inline]
            pub fn slice_at(&self, k: usize) -> ArrayView2<'_, $elem> {
                self.data.index_axis(Axis(0), k)
            }
        }
    };
}

/// 3D CT 扫描. HU 值以 `i16` 保存.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    geometry: Geometry,
    data: Array3<i16>,
}

impl_volume_common!(Volume, i16);

impl Volume {
    /// 最小与最大 HU 值.
    pub fn min_max(&self) -> (i16, i16) {
        self.data
            .iter()
            .fold((i16::MAX, i16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// 计算由 `it` 给出的所有索引对应的 CT HU 值的平均值.
    /// `it` 为空时返回 `None`.
    ///
    /// 如果存在越界索引, 则程序 panic.
    pub fn mean_hu<I: IntoIterator<Item = Idx3d>>(&self, it: I) -> Option<f64> {
        let mut count = 0u64;
        let mut hu = 0.0;
        for pos in it.into_iter() {
            count += 1;
            hu += self[pos] as f64;
        }
        (count > 0).then(|| hu / count as f64)
    }
}

/// 3D 标签. 标签值以 `u16` 保存, 低字节为 chest region, 高字节为 chest type.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    geometry: Geometry,
    data: Array3<u16>,
}

impl_volume_common!(LabelMap, u16);

impl LabelMap {
    /// 创建与 `geometry` 一致的全背景标签.
    #[inline]
    pub fn empty(geometry: Geometry) -> Self {
        Self::filled(geometry, 0)
    }

    /// 获取 3D 标签中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u16) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 获取非零体素个数.
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|p| **p != 0).count()
    }

    /// 标签中出现过的所有值 (含背景).
    pub fn labels(&self) -> BTreeSet<u16> {
        self.data.iter().copied().collect()
    }

    /// 将 3D 标签中值为 `old` 的体素全部替换为 `new`.
    ///
    /// 返回总共成功替换的个数.
    pub fn replace(&mut self, old: u16, new: u16) -> usize {
        let mut cnt = 0usize;
        self.data
            .iter_mut()
            .filter(|pix| **pix == old)
            .for_each(|p| {
                cnt += 1;
                *p = new;
            });
        cnt
    }

    /// 收集满足谓词 `pred` 的所有体素对应的下标, 结果按行优先存储.
    pub fn filter_pos<P: Fn(u16) -> bool>(&self, pred: P) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, pixel)| pred(*pixel).then_some(pos))
            .collect()
    }

    /// 值为 `label` 的体素的包围盒. 不存在时返回 `None`.
    pub fn bounding_box(&self, label: u16) -> Option<BoundingBox> {
        self.bounding_box_by(|v| v == label)
    }

    /// 所有非零体素的包围盒. 不存在时返回 `None`.
    pub fn foreground_bounding_box(&self) -> Option<BoundingBox> {
        self.bounding_box_by(|v| v != 0)
    }

    fn bounding_box_by<P: Fn(u16) -> bool>(&self, pred: P) -> Option<BoundingBox> {
        let mut bb: Option<BoundingBox> = None;
        for (pos, v) in self.data.indexed_iter() {
            if pred(*v) {
                match bb.as_mut() {
                    Some(b) => b.extend(pos),
                    None => bb = Some(BoundingBox::point(pos)),
                }
            }
        }
        bb
    }

    /// 二值化: 值为 `label` 的体素置 1, 其余置 0.
    pub fn binary(&self, label: u16) -> LabelMap {
        let data = self.data.mapv(|v| u16::from(v == label));
        Self::from_parts(self.geometry.clone(), data)
    }

    /// 包含值为 `label` 的体素的所有水平切片 (K 方向) 索引, 升序.
    pub fn slices_containing(&self, label: u16) -> Vec<usize> {
        self.data
            .axis_iter(Axis(0))
            .enumerate()
            .filter_map(|(k, s)| s.iter().any(|v| *v == label).then_some(k))
            .collect()
    }

    /// 值为 `label` 的所有体素索引的算术平均, 四舍五入到整数, 以 `(k, j, i)` 给出.
    ///
    /// 若 `label` 不存在则返回 `CoreError::NoSuchLabel`.
    pub fn centroid_of_label(&self, label: u16) -> CoreResult<Idx3d> {
        let mut n = 0u64;
        let mut sum = [0.0f64; 3];
        for ((k, j, i), v) in self.data.indexed_iter() {
            if *v == label {
                n += 1;
                sum[0] += k as f64;
                sum[1] += j as f64;
                sum[2] += i as f64;
            }
        }
        if n == 0 {
            return Err(CoreError::NoSuchLabel(label.to_string()));
        }
        let [k, j, i] = sum.map(|s| (s / n as f64).round() as usize);
        Ok((k, j, i))
    }
}

/// 3D 实数标量场, 如分割 CLI 输出的 level set 或距离图. 以 `f32` 保存.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    geometry: Geometry,
    data: Array3<f32>,
}

impl_volume_common!(Field, f32);

impl Field {
    /// 场的有限值取值范围 `[min, max]`. 不存在有限值时返回 `None`.
    pub fn range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// 阈值化: `field >= t` 的体素置 1, 其余置 0.
    pub fn threshold(&self, t: f32) -> LabelMap {
        let mut out = Array3::<u16>::zeros(self.data.dim());
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                Zip::from(&mut out)
                    .and(&self.data)
                    .par_for_each(|o, &v| *o = u16::from(v >= t));
            } else {
                Zip::from(&mut out)
                    .and(&self.data)
                    .for_each(|o, &v| *o = u16::from(v >= t));
            }
        }
        LabelMap::from_parts(self.geometry.clone(), out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry::centered([8, 6, 4], [1.0, 1.0, 2.0]).unwrap()
    }

    #[test]
    fn test_new_rejects_shape() {
        let g = geometry();
        assert!(Volume::new(g.clone(), Array3::zeros((4, 6, 8))).is_ok());
        assert!(matches!(
            Volume::new(g, Array3::zeros((8, 6, 4))),
            Err(CoreError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_labelmap_statistics() {
        let mut lm = LabelMap::from_fn(geometry(), |(k, j, i)| {
            if k == 1 && (2..4).contains(&j) && i < 3 {
                2
            } else if k == 3 && j == 0 && i == 7 {
                3
            } else {
                0
            }
        });
        assert_eq!(lm.count(2), 6);
        assert_eq!(lm.foreground_count(), 7);
        assert_eq!(lm.labels().into_iter().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert_eq!(lm.slices_containing(2), vec![1]);
        assert_eq!(lm.slices_containing(3), vec![3]);
        assert!(lm.slices_containing(9).is_empty());

        let bb = lm.bounding_box(2).unwrap();
        assert_eq!((bb.lo, bb.hi), ((1, 2, 0), (1, 3, 2)));
        let fg = lm.foreground_bounding_box().unwrap();
        assert_eq!((fg.lo, fg.hi), ((1, 0, 0), (3, 3, 7)));

        assert_eq!(lm.centroid_of_label(2).unwrap(), (1, 3, 1));
        assert_eq!(
            lm.centroid_of_label(5),
            Err(CoreError::NoSuchLabel("5".into()))
        );

        let b = lm.binary(3);
        assert_eq!(b.count(1), 1);
        assert_eq!(b[(3, 0, 7)], 1);

        assert_eq!(lm.replace(2, 4), 6);
        assert_eq!(lm.count(4), 6);
        assert_eq!(lm.count(2), 0);
    }

    #[test]
    fn test_field_threshold() {
        let f = Field::from_fn(geometry(), |(k, j, i)| (k + j + i) as f32 - 5.0);
        assert_eq!(f.range(), Some((-5.0, 3.0 + 5.0 + 7.0 - 5.0)));
        let lm = f.threshold(0.0);
        let expected = f.data().iter().filter(|v| **v >= 0.0).count();
        assert_eq!(lm.count(1), expected);
        assert_eq!(lm.count(0) + expected, lm.size());
    }

    #[test]
    fn test_neighbours() {
        let n: Vec<_> = diamond_neighbours((2, 3, 4), (0, 0, 0)).collect();
        assert_eq!(n, vec![(1, 0, 0), (0, 1, 0), (0, 0, 1)]);
        let n: Vec<_> = diamond_neighbours((3, 3, 3), (1, 1, 1)).collect();
        assert_eq!(n.len(), 6);
    }

    #[test]
    fn test_volume_lookup() {
        let g = geometry();
        let v = Volume::from_fn(g, |(k, j, i)| (k * 100 + j * 10 + i) as i16);
        assert_eq!(v.min_max(), (0, 357));
        // 原点在索引 (2, 3, 4) 处.
        assert_eq!(v.at_ras([0.0, 0.0, 0.0]), Some(234));
        assert_eq!(v.at_ras([1.0, -1.0, 2.0]), Some(325));
        assert_eq!(v.at_ras([100.0, 0.0, 0.0]), None);
        assert_eq!(v.mean_hu([(0, 0, 0), (0, 0, 2)]), Some(1.0));
        assert_eq!(v.mean_hu(std::iter::empty()), None);
    }
}
